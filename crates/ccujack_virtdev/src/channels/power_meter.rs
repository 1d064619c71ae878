// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::PowerMeterChannel;
use crate::channels::analog_receiver::{AnalogInGroup, AnalogInHandler};
use crate::channels::base::setup_mqtt_channel;
use crate::device::{Channel, Device};
use crate::engine::VirtualDevices;
use std::sync::Arc;

/// Power meter channel; every measurement has its own topic and extractor.
pub(crate) async fn add_mqtt_power_meter(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let pch = Arc::new(PowerMeterChannel::new(dev));
  let channel = pch.channel.clone();

  let targets: [(&str, &str, Box<dyn Fn(f64) + Send + Sync>); 5] = [
    ("ENERGY_COUNTER_", "energy counter", {
      let t = pch.clone();
      Box::new(move |v| t.set_energy_counter(v))
    }),
    ("POWER_", "power", {
      let t = pch.clone();
      Box::new(move |v| t.set_power(v))
    }),
    ("CURRENT_", "current", {
      let t = pch.clone();
      Box::new(move |v| t.set_current(v))
    }),
    ("VOLTAGE_", "voltage", {
      let t = pch.clone();
      Box::new(move |v| t.set_voltage(v))
    }),
    ("FREQUENCY_", "frequency", {
      let t = pch.clone();
      Box::new(move |v| t.set_frequency(v))
    }),
  ];

  let mut handlers = Vec::with_capacity(targets.len());
  for (prefix, label, value_handler) in targets {
    handlers.push(AnalogInHandler::new(
      vd.mqtt_server.clone(),
      &channel,
      prefix,
      label,
      value_handler,
      // the power meter channel has no status parameters
      Box::new(|_| {}),
    ));
  }

  let worker = Arc::new(AnalogInGroup { handlers });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}
