// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::SwitchChannel;
use crate::channels::base::setup_persistence;
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::tmpl;
use ccujack_core::util::async_manager;
use ccujack_mqtt::{MqttServer, QoS};
use std::sync::Arc;

/// Switch channel publishing a templated on/off payload; the channel state
/// follows the command.
pub(crate) async fn add_mqtt_switch(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let sch = SwitchChannel::new(dev);
  let channel = sch.channel.clone();

  let topic = channel.add_master_param(Parameter::new_string("TOPIC"));
  let retain = channel.add_master_param(Parameter::new_bool("RETAIN"));
  let on_payload = channel.add_master_param(Parameter::new_string("ON_PAYLOAD"));
  let off_payload = channel.add_master_param(Parameter::new_string("OFF_PAYLOAD"));

  {
    let server = vd.mqtt_server.clone();
    let device = dev.clone();
    let index = channel.index();
    sch.handle_set_state(move |state| {
      let payload = if state { &on_payload } else { &off_payload };
      publish_command(&server, &device, index, &topic, payload, &retain);
      // update state in channel
      true
    });
  }

  setup_persistence(vd, &channel);
  channel
}

pub(crate) fn publish_command(
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
