// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::DoorSensorChannel;
use crate::channels::base::{ChannelWorker, new_matcher_kind_parameter, setup_mqtt_channel};
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Matcher;
use async_trait::async_trait;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use serde_json::json;
use std::sync::{Arc, Mutex};

struct MqttDigitalReceiver {
  server: Arc<MqttServer>,
  channel: Arc<Channel>,
  state: Arc<Parameter>,

  topic: Arc<Parameter>,
  on_pattern: Arc<Parameter>,
  off_pattern: Arc<Parameter>,
  matcher_kind: Arc<Parameter>,

  sub: Mutex<Option<SubscriptionHandle>>,
}

#[async_trait]
impl ChannelWorker for MqttDigitalReceiver {
  async fn start(self: Arc<Self>) {
    let topic = self.topic.string_value();
    if topic.is_empty() {
      return;
    }
    let on_matcher = match Matcher::new(self.matcher_kind.int_value(), &self.on_pattern.string_value())
    {
      Ok(matcher) => Arc::new(matcher),
      Err(err) => {
        error!("Creation of matcher for 'open' failed: {err}");
        return;
      }
    };
    let off_matcher =
      match Matcher::new(self.matcher_kind.int_value(), &self.off_pattern.string_value()) {
        Ok(matcher) => Arc::new(matcher),
        Err(err) => {
          error!("Creation of matcher for 'closed' failed: {err}");
          return;
        }
      };
    let this = self.clone();
    let result = self
      .server
      .subscribe(
        &topic,
        QoS::ExactlyOnce,
        Arc::new(move |msg| {
          let this = this.clone();
          let on_matcher = on_matcher.clone();
          let off_matcher = off_matcher.clone();
          Box::pin(async move {
            debug!(
              "Message for digital input {} received: {}, {}",
              this.channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            if on_matcher.matches(&msg.payload) {
              debug!("Turning on digital input {}", this.channel.address());
              let _guard = this.channel.lock();
              this.state.update(json!(true));
            } else if off_matcher.matches(&msg.payload) {
              debug!("Turning off digital input {}", this.channel.address());
              let _guard = this.channel.lock();
              this.state.update(json!(false));
            } else {
              warn!(
                "Invalid message for digital input {} received: {}",
                this.channel.address(),
                String::from_utf8_lossy(&msg.payload)
              );
            }
          })
        }),
      )
      .await;
    match result {
      Ok(handle) => *self.sub.lock().expect("sub lock") = Some(handle),
      Err(err) => error!("Subscribe failed on topic {topic}: {err}"),
    }
  }

  async fn stop(&self) {
    if let Some(handle) = self.sub.lock().expect("sub lock").take() {
      self.server.unsubscribe(handle);
    }
  }
}

/// Door sensor channel driven by open/closed patterns on an MQTT topic.
pub(crate) async fn add_mqtt_door_sensor(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let dch = DoorSensorChannel::new(dev);
  let channel = dch.channel.clone();

  let worker = Arc::new(MqttDigitalReceiver {
    server: vd.mqtt_server.clone(),
    channel: channel.clone(),
    state: channel.value_paramset().parameter("STATE").expect("door sensor channel"),
    topic: channel.add_master_param(Parameter::new_string("TOPIC")),
    on_pattern: channel.add_master_param(Parameter::new_string("OPEN_PATTERN")),
    off_pattern: channel.add_master_param(Parameter::new_string("CLOSED_PATTERN")),
    matcher_kind: channel.add_master_param(new_matcher_kind_parameter("MATCHER")),
    sub: Mutex::new(None),
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}
