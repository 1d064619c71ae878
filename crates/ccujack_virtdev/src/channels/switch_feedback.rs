// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::SwitchChannel;
use crate::channels::base::{ChannelWorker, new_matcher_kind_parameter, setup_mqtt_channel};
use crate::channels::switch::publish_command;
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Matcher;
use async_trait::async_trait;
use ccujack_mqtt::server::topics_overlap;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use serde_json::json;
use std::sync::{Arc, Mutex};

struct MqttSwitchFeedback {
  server: Arc<MqttServer>,
  channel: Arc<Channel>,
  state: Arc<Parameter>,

  command_topic: Arc<Parameter>,
  fb_topic: Arc<Parameter>,
  on_pattern: Arc<Parameter>,
  off_pattern: Arc<Parameter>,
  matcher_kind: Arc<Parameter>,

  sub: Mutex<Option<SubscriptionHandle>>,
}

#[async_trait]
impl ChannelWorker for MqttSwitchFeedback {
  async fn start(self: Arc<Self>) {
    let fb_topic = self.fb_topic.string_value();
    if fb_topic.is_empty() {
      return;
    }
    let command_topic = self.command_topic.string_value();
    if topics_overlap(&fb_topic, &command_topic) {
      error!("Feedback topic '{fb_topic}' must not overlap with command topic '{command_topic}'");
      return;
    }
    let on_matcher = match Matcher::new(self.matcher_kind.int_value(), &self.on_pattern.string_value())
    {
      Ok(matcher) => Arc::new(matcher),
      Err(err) => {
        error!("Creation of matcher for 'on' failed: {err}");
        return;
      }
    };
    let off_matcher =
      match Matcher::new(self.matcher_kind.int_value(), &self.off_pattern.string_value()) {
        Ok(matcher) => Arc::new(matcher),
        Err(err) => {
          error!("Creation of matcher for 'off' failed: {err}");
          return;
        }
      };
    let channel = self.channel.clone();
    let state = self.state.clone();
    let result = self
      .server
      .subscribe(
        &fb_topic,
        QoS::ExactlyOnce,
        Arc::new(move |msg| {
          let channel = channel.clone();
          let state = state.clone();
          let on_matcher = on_matcher.clone();
          let off_matcher = off_matcher.clone();
          Box::pin(async move {
            debug!(
              "Message for switch {} received: {}, {}",
              channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            if on_matcher.matches(&msg.payload) {
              debug!("Turning on switch {}", channel.address());
              let _guard = channel.lock();
              state.update(json!(true));
            } else if off_matcher.matches(&msg.payload) {
              debug!("Turning off switch {}", channel.address());
              let _guard = channel.lock();
              state.update(json!(false));
            } else {
              warn!(
                "Invalid message for switch {} received: {}",
                channel.address(),
                String::from_utf8_lossy(&msg.payload)
              );
            }
          })
        }),
      )
      .await;
    match result {
      Ok(handle) => *self.sub.lock().expect("sub lock") = Some(handle),
      Err(err) => error!("Subscribe failed on topic {fb_topic}: {err}"),
    }
  }

  async fn stop(&self) {
    if let Some(handle) = self.sub.lock().expect("sub lock").take() {
      self.server.unsubscribe(handle);
    }
  }
}

/// Switch channel whose state follows a feedback topic; commands do not
/// change the state directly.
pub(crate) async fn add_mqtt_switch_feedback(
  vd: &VirtualDevices,
  dev: &Arc<Device>,
) -> Arc<Channel> {
  let sch = SwitchChannel::new(dev);
  let channel = sch.channel.clone();

  let command_topic = channel.add_master_param(Parameter::new_string("COMMAND_TOPIC"));
  let retain = channel.add_master_param(Parameter::new_bool("RETAIN"));
  let on_payload = channel.add_master_param(Parameter::new_string("ON_PAYLOAD"));
  let off_payload = channel.add_master_param(Parameter::new_string("OFF_PAYLOAD"));
  let fb_topic = channel.add_master_param(Parameter::new_string("FEEDBACK_TOPIC"));
  let on_pattern = channel.add_master_param(Parameter::new_string("ON_PATTERN"));
  let off_pattern = channel.add_master_param(Parameter::new_string("OFF_PATTERN"));
  let matcher_kind = channel.add_master_param(new_matcher_kind_parameter("MATCHER"));

  {
    let server = vd.mqtt_server.clone();
    let device = dev.clone();
    let index = channel.index();
    let command_topic = command_topic.clone();
    sch.handle_set_state(move |state| {
      let payload = if state { &on_payload } else { &off_payload };
      publish_command(&server, &device, index, &command_topic, payload, &retain);
      // do not update state in channel, the feedback does
      false
    });
  }

  let state = channel.value_paramset().parameter("STATE").expect("switch channel");
  let worker = Arc::new(MqttSwitchFeedback {
    server: vd.mqtt_server.clone(),
    channel: channel.clone(),
    state,
    command_topic,
    fb_topic,
    on_pattern,
    off_pattern,
    matcher_kind,
    sub: Mutex::new(None),
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::NullEventPublisher;
  use ccujack_config::{ChannelCfg, ChannelKind, Store, VirtualDeviceCfg};

  async fn engine(master: Vec<(&str, serde_json::Value)>) -> (tempfile::TempDir, VirtualDevices) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    store
      .update(|cfg| {
        cfg.virtual_devices.devices.insert(
          "JACK01".to_owned(),
          VirtualDeviceCfg {
            address: "JACK01".to_owned(),
            hm_type: "HM-LC-Sw1-Pl".to_owned(),
            channels: vec![ChannelCfg {
              kind: ChannelKind::MqttSwitchFeedback,
              master_paramset: master
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v))
                .collect(),
            }],
          },
        );
        Ok::<_, std::convert::Infallible>(())
      })
      .unwrap();
    let server = ccujack_mqtt::MqttServer::new();
    let vd = VirtualDevices::new(store, Arc::new(NullEventPublisher), server);
    vd.synchronize_devices().await;
    (dir, vd)
  }

  #[tokio::test]
  async fn feedback_drives_the_state_and_commands_do_not() {
    let (_dir, vd) = engine(vec![
      ("COMMAND_TOPIC", json!("cmnd/light/POWER")),
      ("ON_PAYLOAD", json!("ON")),
      ("OFF_PAYLOAD", json!("OFF")),
      ("FEEDBACK_TOPIC", json!("stat/light/POWER")),
      ("ON_PATTERN", json!("ON")),
      ("OFF_PATTERN", json!("OFF")),
      ("MATCHER", json!(0)),
    ])
    .await;
    let server = vd.mqtt_server.clone();
    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let state = channel.value_paramset().parameter("STATE").unwrap();

    // command does not switch the state
    state.set_value(json!(true)).unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    assert_eq!(state.value(), json!(false));
    assert!(server.retained("cmnd/light/POWER").is_none());

    // feedback does
    server
      .publish("stat/light/POWER", b"ON".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    assert_eq!(state.value(), json!(true));
    server
      .publish("stat/light/POWER", b"OFF".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    assert_eq!(state.value(), json!(false));
    // garbage is ignored
    server
      .publish("stat/light/POWER", b"HALF".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    assert_eq!(state.value(), json!(false));

    vd.stop().await;
    vd.store.close();
  }

  #[tokio::test]
  async fn overlapping_topics_abort_the_subscription() {
    let (_dir, vd) = engine(vec![
      ("COMMAND_TOPIC", json!("light/POWER")),
      ("FEEDBACK_TOPIC", json!("light/+")),
      ("ON_PATTERN", json!("ON")),
      ("OFF_PATTERN", json!("OFF")),
      ("MATCHER", json!(0)),
    ])
    .await;
    let server = vd.mqtt_server.clone();
    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let state = channel.value_paramset().parameter("STATE").unwrap();

    server
      .publish("light/POWER", b"ON".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    // no subscription was made
    assert_eq!(state.value(), json!(false));

    vd.stop().await;
    vd.store.close();
  }
}
