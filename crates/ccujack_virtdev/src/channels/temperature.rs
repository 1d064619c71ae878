// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::TemperatureChannel;
use crate::channels::analog_receiver::{AnalogInGroup, AnalogInHandler};
use crate::channels::base::setup_mqtt_channel;
use crate::device::{Channel, Device};
use crate::engine::VirtualDevices;
use std::sync::Arc;

/// Temperature/humidity sensor channel; each target parameter has its own
/// extractor.
pub(crate) async fn add_mqtt_temperature(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let tch = Arc::new(TemperatureChannel::new(dev));
  let channel = tch.channel.clone();

  let temperature = {
    let value_target = tch.clone();
    let status_target = tch.clone();
    AnalogInHandler::new(
      vd.mqtt_server.clone(),
      &channel,
      "TEMPERATURE_",
      "temperature",
      Box::new(move |value| value_target.set_temperature(value)),
      Box::new(move |status| status_target.set_temperature_status(status)),
    )
  };
  let humidity = {
    let value_target = tch.clone();
    let status_target = tch.clone();
    AnalogInHandler::new(
      vd.mqtt_server.clone(),
      &channel,
      "HUMIDITY_",
      "humidity",
      Box::new(move |value| value_target.set_humidity(value as i64)),
      Box::new(move |status| status_target.set_humidity_status(status)),
    )
  };

  let worker = Arc::new(AnalogInGroup {
    handlers: vec![temperature, humidity],
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}
