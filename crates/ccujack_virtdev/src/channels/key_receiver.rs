// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::KeyChannel;
use crate::channels::base::{ChannelWorker, new_matcher_kind_parameter, setup_mqtt_channel};
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Matcher;
use async_trait::async_trait;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use serde_json::json;
use std::sync::{Arc, Mutex};

struct MqttKeyReceiver {
  server: Arc<MqttServer>,
  channel: Arc<Channel>,

  short_topic: Arc<Parameter>,
  short_pattern: Arc<Parameter>,
  short_matcher_kind: Arc<Parameter>,
  short_press: Arc<Parameter>,

  long_topic: Arc<Parameter>,
  long_pattern: Arc<Parameter>,
  long_matcher_kind: Arc<Parameter>,
  long_press: Arc<Parameter>,

  subs: Mutex<Vec<SubscriptionHandle>>,
}

impl MqttKeyReceiver {
  async fn subscribe_press(
    &self,
    kind: &str,
    topic: &Arc<Parameter>,
    pattern: &Arc<Parameter>,
    matcher_kind: &Arc<Parameter>,
    press: &Arc<Parameter>,
  ) {
    let topic = topic.string_value();
    if topic.is_empty() {
      return;
    }
    let matcher = match Matcher::new(matcher_kind.int_value(), &pattern.string_value()) {
      Ok(matcher) => Arc::new(matcher),
      Err(err) => {
        error!("Creation of matcher for {kind} keypress failed: {err}");
        return;
      }
    };
    let channel = self.channel.clone();
    let press = press.clone();
    let kind = kind.to_owned();
    let result = self
      .server
      .subscribe(
        &topic,
        QoS::ExactlyOnce,
        Arc::new(move |msg| {
          let channel = channel.clone();
          let press = press.clone();
          let matcher = matcher.clone();
          let kind = kind.clone();
          Box::pin(async move {
            debug!(
              "Message for {} {kind} keypress received: {}, {}",
              channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            if matcher.matches(&msg.payload) {
              debug!("Triggering {kind} keypress on {}", channel.address());
              // hold the channel lock for observer ordering
              let _guard = channel.lock();
              press.update(json!(true));
            }
          })
        }),
      )
      .await;
    match result {
      Ok(handle) => self.subs.lock().expect("subs lock").push(handle),
      Err(err) => error!("Subscribe failed on topic {topic}: {err}"),
    }
  }
}

#[async_trait]
impl ChannelWorker for MqttKeyReceiver {
  async fn start(self: Arc<Self>) {
    self
      .subscribe_press(
        "short",
        &self.short_topic,
        &self.short_pattern,
        &self.short_matcher_kind,
        &self.short_press,
      )
      .await;
    self
      .subscribe_press(
        "long",
        &self.long_topic,
        &self.long_pattern,
        &self.long_matcher_kind,
        &self.long_press,
      )
      .await;
  }

  async fn stop(&self) {
    for handle in self.subs.lock().expect("subs lock").drain(..) {
      self.server.unsubscribe(handle);
    }
  }
}

/// Key channel pressed by matching MQTT messages.
pub(crate) async fn add_mqtt_key_receiver(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let kch = KeyChannel::new(dev);
  let channel = kch.channel.clone();

  let worker = Arc::new(MqttKeyReceiver {
    server: vd.mqtt_server.clone(),
    channel: channel.clone(),
    short_topic: channel.add_master_param(Parameter::new_string("SHORT_TOPIC")),
    short_pattern: channel.add_master_param(Parameter::new_string("SHORT_PATTERN")),
    short_matcher_kind: channel.add_master_param(new_matcher_kind_parameter("SHORT_MATCHER")),
    short_press: channel.value_paramset().parameter("PRESS_SHORT").expect("key channel"),
    long_topic: channel.add_master_param(Parameter::new_string("LONG_TOPIC")),
    long_pattern: channel.add_master_param(Parameter::new_string("LONG_PATTERN")),
    long_matcher_kind: channel.add_master_param(new_matcher_kind_parameter("LONG_MATCHER")),
    long_press: channel.value_paramset().parameter("PRESS_LONG").expect("key channel"),
    subs: Mutex::new(Vec::new()),
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::EventPublisher;
  use ccujack_config::{ChannelCfg, ChannelKind, Store, VirtualDeviceCfg};
  use serde_json::Value;

  struct RecordingPublisher {
    events: Mutex<Vec<(String, String, Value)>>,
  }

  impl EventPublisher for RecordingPublisher {
    fn publish_event(&self, address: &str, value_key: &str, value: Value) {
      self
        .events
        .lock()
        .unwrap()
        .push((address.to_owned(), value_key.to_owned(), value));
    }
  }

  #[tokio::test]
  async fn matching_message_synthesizes_a_press() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    store
      .update(|cfg| {
        cfg.virtual_devices.devices.insert(
          "JACK01".to_owned(),
          VirtualDeviceCfg {
            address: "JACK01".to_owned(),
            hm_type: "HmIP-MIO16-PCB".to_owned(),
            channels: vec![ChannelCfg {
              kind: ChannelKind::MqttKeyReceiver,
              master_paramset: [
                ("SHORT_TOPIC".to_owned(), json!("button/1")),
                ("SHORT_PATTERN".to_owned(), json!("on")),
                // CONTAINS
                ("SHORT_MATCHER".to_owned(), json!(1)),
              ]
              .into_iter()
              .collect(),
            }],
          },
        );
        Ok::<_, std::convert::Infallible>(())
      })
      .unwrap();
    let publisher = Arc::new(RecordingPublisher {
      events: Mutex::new(Vec::new()),
    });
    let server = ccujack_mqtt::MqttServer::new();
    let vd = VirtualDevices::new(store, publisher.clone(), server.clone());
    vd.synchronize_devices().await;

    server
      .publish("button/1", b"turn on".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    server
      .publish("button/1", b"of".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();

    let events = publisher.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, "JACK01:1");
    assert_eq!(events[0].1, "PRESS_SHORT");

    drop(events);
    vd.stop().await;
    vd.store.close();
  }

  #[tokio::test]
  async fn reconfiguration_moves_the_subscription() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    store
      .update(|cfg| {
        cfg.virtual_devices.devices.insert(
          "JACK01".to_owned(),
          VirtualDeviceCfg {
            address: "JACK01".to_owned(),
            hm_type: "HmIP-MIO16-PCB".to_owned(),
            channels: vec![ChannelCfg {
              kind: ChannelKind::MqttKeyReceiver,
              master_paramset: [
                ("SHORT_TOPIC".to_owned(), json!("button/old")),
                ("SHORT_PATTERN".to_owned(), json!("x")),
                ("SHORT_MATCHER".to_owned(), json!(0)),
              ]
              .into_iter()
              .collect(),
            }],
          },
        );
        Ok::<_, std::convert::Infallible>(())
      })
      .unwrap();
    let publisher = Arc::new(RecordingPublisher {
      events: Mutex::new(Vec::new()),
    });
    let server = ccujack_mqtt::MqttServer::new();
    let vd = VirtualDevices::new(store, publisher.clone(), server.clone());
    vd.synchronize_devices().await;

    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let mut values = serde_json::Map::new();
    values.insert("SHORT_TOPIC".to_owned(), json!("button/new"));
    channel.put_master_paramset(values).await.unwrap();

    // the old topic no longer triggers, the new one does
    server.publish("button/old", b"x".to_vec(), QoS::ExactlyOnce, false).await.unwrap();
    assert!(publisher.events.lock().unwrap().is_empty());
    server.publish("button/new", b"x".to_vec(), QoS::ExactlyOnce, false).await.unwrap();
    assert_eq!(publisher.events.lock().unwrap().len(), 1);

    // the new topic was persisted
    vd.store.view(|cfg| {
      let master = &cfg.virtual_devices.devices["JACK01"].channels[0].master_paramset;
      assert_eq!(master["SHORT_TOPIC"], json!("button/new"));
    });

    vd.stop().await;
    vd.store.close();
  }
}
