// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::KeyChannel;
use crate::channels::base::setup_persistence;
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::tmpl;
use ccujack_core::util::async_manager;
use ccujack_mqtt::{MqttServer, QoS};
use std::sync::Arc;

/// Key channel that publishes a templated payload on each press.
pub(crate) async fn add_mqtt_key_sender(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let kch = KeyChannel::new(dev);
  let channel = kch.channel.clone();

  let short_topic = channel.add_master_param(Parameter::new_string("SHORT_TOPIC"));
  let short_payload = channel.add_master_param(Parameter::new_string("SHORT_PAYLOAD"));
  let short_retain = channel.add_master_param(Parameter::new_bool("SHORT_RETAIN"));
  let long_topic = channel.add_master_param(Parameter::new_string("LONG_TOPIC"));
  let long_payload = channel.add_master_param(Parameter::new_string("LONG_PAYLOAD"));
  let long_retain = channel.add_master_param(Parameter::new_bool("LONG_RETAIN"));

  let index = channel.index();

  // PRESS_SHORT
  {
    let server = vd.mqtt_server.clone();
    let device = dev.clone();
    kch.handle_press_short(move || {
      publish_press(&server, &device, index, &short_topic, &short_payload, &short_retain);
      true
    });
  }

  // PRESS_LONG
  {
    let server = vd.mqtt_server.clone();
    let device = dev.clone();
    kch.handle_press_long(move || {
      publish_press(&server, &device, index, &long_topic, &long_payload, &long_retain);
      true
    });
  }

  setup_persistence(vd, &channel);
  channel
}

fn publish_press(
  server: &Arc<MqttServer>,
  device: &Arc<Device>,
  index: i32,
  topic: &Arc<Parameter>,
  payload: &Arc<Parameter>,
  retain: &Arc<Parameter>,
) {
  let topic = topic.string_value();
  if topic.is_empty() {
    return;
  }
  // the payload template sees the channel as data context
  let payload = match tmpl::render_channel(&payload.string_value(), device, index) {
    Ok(payload) => payload,
    Err(err) => {
      error!("{err}");
      return;
    }
  };
  let retain = retain.bool_value();
  let server = server.clone();
  async_manager::spawn(async move {
    if let Err(err) = server
      .publish(&topic, payload.into_bytes(), QoS::ExactlyOnce, retain)
      .await
    {
      error!("Publish failed on topic {topic}: {err}");
    }
  });
}
