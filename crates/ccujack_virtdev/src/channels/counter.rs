// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use crate::channels::base::setup_mqtt_channel;
use crate::channels::analog_receiver::{AnalogInGroup, AnalogInHandler};
use crate::channels::{EnergyCounterChannel, GasCounterChannel};
use crate::device::{Channel, Device};
use crate::engine::VirtualDevices;
use std::sync::Arc;

// common API between energy and gas counter
trait CounterChannel: Send + Sync + 'static {
  fn channel(&self) -> &Arc<Channel>;
  fn set_energy_counter(&self, value: f64);
  fn set_power(&self, value: f64);
}

impl CounterChannel for EnergyCounterChannel {
  fn channel(&self) -> &Arc<Channel> {
    &self.channel
  }

  fn set_energy_counter(&self, value: f64) {
    EnergyCounterChannel::set_energy_counter(self, value);
  }

  fn set_power(&self, value: f64) {
    EnergyCounterChannel::set_power(self, value);
  }
}

impl CounterChannel for GasCounterChannel {
  fn channel(&self) -> &Arc<Channel> {
    &self.channel
  }

  fn set_energy_counter(&self, value: f64) {
    GasCounterChannel::set_energy_counter(self, value);
  }

  fn set_power(&self, value: f64) {
    GasCounterChannel::set_power(self, value);
  }
}

async fn add_mqtt_counter(
  vd: &VirtualDevices,
  setter: Arc<dyn CounterChannel>,
) -> Arc<Channel> {
  let channel = setter.channel().clone();

  let energy_counter = {
    let setter = setter.clone();
    AnalogInHandler::new(
      vd.mqtt_server.clone(),
      &channel,
      "ENERGY_COUNTER_",
      "energy counter",
      Box::new(move |value| setter.set_energy_counter(value)),
      Box::new(|_| {}),
    )
  };
  let power = {
    let setter = setter.clone();
    AnalogInHandler::new(
      vd.mqtt_server.clone(),
      &channel,
      "POWER_",
      "power",
      Box::new(move |value| setter.set_power(value)),
      Box::new(|_| {}),
    )
  };

  let worker = Arc::new(AnalogInGroup {
    handlers: vec![energy_counter, power],
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}

/// Energy counter channel fed by MQTT.
pub(crate) async fn add_mqtt_energy_counter(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  add_mqtt_counter(vd, Arc::new(EnergyCounterChannel::new(dev))).await
}

/// Gas counter channel fed by MQTT.
pub(crate) async fn add_mqtt_gas_counter(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  add_mqtt_counter(vd, Arc::new(GasCounterChannel::new(dev))).await
}
