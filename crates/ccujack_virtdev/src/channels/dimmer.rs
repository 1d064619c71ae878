// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::DimmerChannel;
use crate::channels::base::{
  ChannelWorker, new_extractor_kind_parameter, new_regexp_group_parameter, setup_mqtt_channel,
};
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Extractor;
use crate::tmpl;
use async_trait::async_trait;
use ccujack_core::util::async_manager;
use ccujack_mqtt::server::topics_overlap;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use std::sync::{Arc, Mutex};

struct MqttDimmer {
  server: Arc<MqttServer>,
  dimmer: Arc<DimmerChannel>,

  range_min: Arc<Parameter>,
  range_max: Arc<Parameter>,
  command_topic: Arc<Parameter>,
  retain: Arc<Parameter>,
  template: Arc<Parameter>,
  fb_topic: Arc<Parameter>,
  pattern: Arc<Parameter>,
  extractor_kind: Arc<Parameter>,
  regexp_group: Arc<Parameter>,

  old_level: Mutex<f64>,
  sub: Mutex<Option<SubscriptionHandle>>,
}

impl MqttDimmer {
  /// Maps a channel level [0, 1] into the configured range.
  fn map_to_range(&self, value: f64) -> f64 {
    let min = self.range_min.float_value();
    let max = self.range_max.float_value();
    value * (max - min) + min
  }

  /// Maps a feedback value from the configured range into [0, 1], clamped.
  fn map_from_range(&self, value: f64) -> f64 {
    let min = self.range_min.float_value();
    let max = self.range_max.float_value();
    if min == max {
      return 0.0;
    }
    ((value - min) / (max - min)).clamp(0.0, 1.0)
  }

  fn publish_level(&self, value: f64) {
    let topic = self.command_topic.string_value();
    if topic.is_empty() {
      return;
    }
    let mapped = self.map_to_range(value);
    let source = self.template.string_value();
    let payload = match tmpl::render_value(&source, mapped) {
      Ok(payload) => payload,
      Err(err) => {
        error!("{err}");
        return;
      }
    };
    let retain = self.retain.bool_value();
    let server = self.server.clone();
    async_manager::spawn(async move {
      if let Err(err) = server
        .publish(&topic, payload.into_bytes(), QoS::ExactlyOnce, retain)
        .await
      {
        error!("Publish failed on topic {topic}: {err}");
      }
    });
  }
}

#[async_trait]
impl ChannelWorker for MqttDimmer {
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
    let extractor = match Extractor::new(
      self.extractor_kind.int_value(),
      &self.pattern.string_value(),
      self.regexp_group.int_value(),
    ) {
      Ok(extractor) => Arc::new(extractor),
      Err(err) => {
        error!(
          "Creation of value extractor for MQTT dimmer {} failed: {err}",
          self.dimmer.channel.address()
        );
        return;
      }
    };
    let this = self.clone();
    let result = self
      .server
      .subscribe(
        &fb_topic,
        QoS::ExactlyOnce,
        Arc::new(move |msg| {
          let this = this.clone();
          let extractor = extractor.clone();
          Box::pin(async move {
            debug!(
              "Message for MQTT dimmer {} received: {}, {}",
              this.dimmer.channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            let value = match extractor.extract(&msg.payload) {
              Ok(value) => value,
              Err(err) => {
                warn!(
                  "Extraction of value for MQTT dimmer {} failed: {err}",
                  this.dimmer.channel.address()
                );
                return;
              }
            };
            let mapped = this.map_from_range(value);
            if mapped != 0.0 {
              *this.old_level.lock().expect("old level lock") = mapped;
            }
            this.dimmer.set_level(mapped);
            // the level re-emits through the command path; the overlap check
            // above keeps this from echoing back into the feedback topic
            this.publish_level(mapped);
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

/// Dimmer channel with a templated command payload and an extracted
/// feedback level.
pub(crate) async fn add_mqtt_dimmer(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let dimmer = Arc::new(DimmerChannel::new(dev));
  let channel = dimmer.channel.clone();

  let mut range_min = Parameter::new_float("RANGE_MIN");
  range_min.description.default = serde_json::json!(0.0);
  let range_min = channel.add_master_param(range_min);
  let mut range_max = Parameter::new_float("RANGE_MAX");
  range_max.description.default = serde_json::json!(1.0);
  let range_max = channel.add_master_param(range_max);
  range_max.internal_set_value(serde_json::json!(1.0)).expect("float default");

  let mut template = Parameter::new_string("TEMPLATE");
  template.description.default = serde_json::json!("{{ value }}");
  let template = channel.add_master_param(template);
  template
    .internal_set_value(serde_json::json!("{{ value }}"))
    .expect("string default");

  let worker = Arc::new(MqttDimmer {
    server: vd.mqtt_server.clone(),
    dimmer: dimmer.clone(),
    range_min,
    range_max,
    command_topic: channel.add_master_param(Parameter::new_string("COMMAND_TOPIC")),
    retain: channel.add_master_param(Parameter::new_bool("RETAIN")),
    template,
    fb_topic: channel.add_master_param(Parameter::new_string("FEEDBACK_TOPIC")),
    pattern: channel.add_master_param(Parameter::new_string("PATTERN")),
    extractor_kind: channel.add_master_param(new_extractor_kind_parameter("EXTRACTOR")),
    regexp_group: channel.add_master_param(new_regexp_group_parameter("REGEXP_GROUP")),
    old_level: Mutex::new(0.0),
    sub: Mutex::new(None),
  });

  // level change from the controller or VEAP
  {
    let worker = worker.clone();
    dimmer.handle_set_level(move |value| {
      if value != 0.0 {
        // remember previous dimmer level
        *worker.old_level.lock().expect("old level lock") = value;
      }
      worker.publish_level(value);
      true
    });
  }

  // restore previous dimmer level
  {
    let worker = worker.clone();
    let dimmer = dimmer.clone();
    dimmer.clone().handle_set_old_level(move || {
      let old_level = *worker.old_level.lock().expect("old level lock");
      dimmer.set_level(old_level);
      worker.publish_level(old_level);
      true
    });
  }

  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::device::NullEventPublisher;
  use ccujack_config::{ChannelCfg, ChannelKind, Store, VirtualDeviceCfg};
  use serde_json::json;

  async fn dimmer_engine() -> (tempfile::TempDir, VirtualDevices) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    store
      .update(|cfg| {
        cfg.virtual_devices.devices.insert(
          "JACK01".to_owned(),
          VirtualDeviceCfg {
            address: "JACK01".to_owned(),
            hm_type: "HM-LC-Dim1T-Pl".to_owned(),
            channels: vec![ChannelCfg {
              kind: ChannelKind::MqttDimmer,
              master_paramset: [
                ("RANGE_MIN".to_owned(), json!(0.0)),
                ("RANGE_MAX".to_owned(), json!(1023.0)),
                ("COMMAND_TOPIC".to_owned(), json!("cmnd/dimmer/LEVEL")),
                ("RETAIN".to_owned(), json!(true)),
                ("TEMPLATE".to_owned(), json!("{{ round(value) }}")),
                ("FEEDBACK_TOPIC".to_owned(), json!("stat/dimmer/RESULT")),
                ("PATTERN".to_owned(), json!(r"brightness=(\d+)")),
                // REGEXP
                ("EXTRACTOR".to_owned(), json!(2)),
                ("REGEXP_GROUP".to_owned(), json!(1)),
              ]
              .into_iter()
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
  async fn feedback_level_is_mapped_into_the_unit_range() {
    let (_dir, vd) = dimmer_engine().await;
    let server = vd.mqtt_server.clone();
    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let level = channel.value_paramset().parameter("LEVEL").unwrap();

    server
      .publish("stat/dimmer/RESULT", b"brightness=512".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    let value = level.value().as_f64().unwrap();
    assert!((value - 0.5).abs() < 0.001);

    // the level re-emits through the command path
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    let retained = server.retained("cmnd/dimmer/LEVEL").expect("command re-emitted");
    assert_eq!(retained.payload.as_slice(), b"512.0".as_slice());

    vd.stop().await;
    vd.store.close();
  }

  #[tokio::test]
  async fn level_write_publishes_through_the_template() {
    let (_dir, vd) = dimmer_engine().await;
    let server = vd.mqtt_server.clone();
    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let level = channel.value_paramset().parameter("LEVEL").unwrap();

    level.set_value(json!(0.5)).unwrap();
    tokio::task::yield_now().await;
    tokio::task::yield_now().await;
    // 0.5 * 1023 = 511.5, rounded by the template
    let retained = server.retained("cmnd/dimmer/LEVEL").expect("command published");
    assert_eq!(retained.payload.as_slice(), b"512.0".as_slice());

    vd.stop().await;
    vd.store.close();
  }

  #[tokio::test]
  async fn old_level_restores_the_previous_level() {
    let (_dir, vd) = dimmer_engine().await;
    let channel = vd.devices.device("JACK01").unwrap().channel("1").unwrap();
    let level = channel.value_paramset().parameter("LEVEL").unwrap();
    let old_level = channel.value_paramset().parameter("OLD_LEVEL").unwrap();

    level.set_value(json!(0.7)).unwrap();
    level.set_value(json!(0.0)).unwrap();
    assert_eq!(level.value(), json!(0.0));
    old_level.set_value(json!(true)).unwrap();
    assert_eq!(level.value().as_f64().unwrap(), 0.7);

    vd.stop().await;
    vd.store.close();
  }
}
