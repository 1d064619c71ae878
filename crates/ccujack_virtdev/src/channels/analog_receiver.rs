// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::AnalogInputChannel;
use crate::channels::base::{
  ChannelWorker, new_extractor_kind_parameter, new_regexp_group_parameter, setup_mqtt_channel,
};
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Extractor;
use async_trait::async_trait;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use std::sync::{Arc, Mutex};

/// Status code signalled when extraction fails.
const STATUS_UNKNOWN: i64 = 1;

type ValueHandler = Box<dyn Fn(f64) + Send + Sync>;
type StatusHandler = Box<dyn Fn(i64) + Send + Sync>;

/// One MQTT-fed analog target: a topic/pattern/extractor parameter triple
/// plus the handlers that push the extracted value into the channel. Shared
/// by the analog receiver, temperature, power meter and counter kinds.
pub(crate) struct AnalogInHandler {
  server: Arc<MqttServer>,
  channel: Arc<Channel>,
  label: String,

  topic: Arc<Parameter>,
  pattern: Arc<Parameter>,
  extractor_kind: Arc<Parameter>,
  regexp_group: Arc<Parameter>,

  value_handler: ValueHandler,
  status_handler: StatusHandler,

  sub: Mutex<Option<SubscriptionHandle>>,
}

impl AnalogInHandler {
  /// Creates the handler and its master parameters. An empty prefix yields
  /// the plain parameter names (TOPIC, PATTERN, ...).
  pub(crate) fn new(
    server: Arc<MqttServer>,
    channel: &Arc<Channel>,
    prefix: &str,
    label: &str,
    value_handler: ValueHandler,
    status_handler: StatusHandler,
  ) -> Arc<AnalogInHandler> {
    Arc::new(AnalogInHandler {
      server,
      channel: channel.clone(),
      label: label.to_owned(),
      topic: channel.add_master_param(Parameter::new_string(&format!("{prefix}TOPIC"))),
      pattern: channel.add_master_param(Parameter::new_string(&format!("{prefix}PATTERN"))),
      extractor_kind: channel
        .add_master_param(new_extractor_kind_parameter(&format!("{prefix}EXTRACTOR"))),
      regexp_group: channel
        .add_master_param(new_regexp_group_parameter(&format!("{prefix}REGEXP_GROUP"))),
      value_handler,
      status_handler,
      sub: Mutex::new(None),
    })
  }

  pub(crate) async fn subscribe(self: &Arc<Self>) {
    let topic = self.topic.string_value();
    if topic.is_empty() {
      return;
    }
    let extractor = match Extractor::new(
      self.extractor_kind.int_value(),
      &self.pattern.string_value(),
      self.regexp_group.int_value(),
    ) {
      Ok(extractor) => Arc::new(extractor),
      Err(err) => {
        error!(
          "Creation of value extractor for {} {} failed: {err}",
          self.label,
          self.channel.address()
        );
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
          let extractor = extractor.clone();
          Box::pin(async move {
            debug!(
              "Message for {} {} received: {}, {}",
              this.label,
              this.channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            match extractor.extract(&msg.payload) {
              Ok(value) => {
                (this.value_handler)(value);
                // set normal status
                (this.status_handler)(0);
              }
              Err(err) => {
                warn!(
                  "Extraction of value for {} {} failed: {err}",
                  this.label,
                  this.channel.address()
                );
                // the value is not updated
                (this.status_handler)(STATUS_UNKNOWN);
              }
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

  pub(crate) async fn unsubscribe(&self) {
    if let Some(handle) = self.sub.lock().expect("sub lock").take() {
      self.server.unsubscribe(handle);
    }
  }
}

#[async_trait]
impl ChannelWorker for AnalogInHandler {
  async fn start(self: Arc<Self>) {
    self.subscribe().await;
  }

  async fn stop(&self) {
    self.unsubscribe().await;
  }
}

/// Runs several analog targets of one channel as a single worker.
pub(crate) struct AnalogInGroup {
  pub(crate) handlers: Vec<Arc<AnalogInHandler>>,
}

#[async_trait]
impl ChannelWorker for AnalogInGroup {
  async fn start(self: Arc<Self>) {
    for handler in &self.handlers {
      handler.subscribe().await;
    }
  }

  async fn stop(&self) {
    for handler in &self.handlers {
      handler.unsubscribe().await;
    }
  }
}

/// Analog input channel fed by an MQTT topic.
pub(crate) async fn add_mqtt_analog_receiver(
  vd: &VirtualDevices,
  dev: &Arc<Device>,
) -> Arc<Channel> {
  let ach = Arc::new(AnalogInputChannel::new(dev));
  let channel = ach.channel.clone();

  let value_target = ach.clone();
  let status_target = ach.clone();
  let worker = AnalogInHandler::new(
    vd.mqtt_server.clone(),
    &channel,
    "",
    "analog receiver",
    Box::new(move |value| value_target.set_voltage(value)),
    Box::new(move |status| status_target.set_voltage_status(status)),
  );
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}
