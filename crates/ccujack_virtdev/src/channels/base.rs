// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Base channels and the master paramset persistence shared by all kinds.

use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::{EXTRACTOR_VALUE_LIST, MATCHER_VALUE_LIST};
use async_trait::async_trait;
use ccujack_config::Store;
use ccujack_core::errors::NotFoundError;
use serde_json::json;
use std::sync::Arc;

/// Subscription side of an MQTT channel kind. Master parameter writes stop
/// the worker, persist the paramset and start it again; this is the
/// canonical reload pattern.
#[async_trait]
pub(crate) trait ChannelWorker: Send + Sync {
  async fn start(self: Arc<Self>);
  async fn stop(&self);
}

/// Wires persistence and the start/stop lifecycle of an MQTT channel kind,
/// loads the master parameters from the config and starts the worker.
pub(crate) async fn setup_mqtt_channel(
  vd: &VirtualDevices,
  channel: &Arc<Channel>,
  worker: Arc<dyn ChannelWorker>,
) {
  let store = vd.store.clone();
  let ch = channel.clone();
  let w = worker.clone();
  channel.set_on_put_paramset(Arc::new(move || {
    let store = store.clone();
    let ch = ch.clone();
    let w = w.clone();
    Box::pin(async move {
      w.stop().await;
      store_master_paramset(&store, &ch);
      w.clone().start().await;
    })
  }));
  let w = worker.clone();
  channel.set_on_dispose(Arc::new(move || {
    let w = w.clone();
    Box::pin(async move {
      w.stop().await;
    })
  }));
  load_master_paramset(&vd.store, channel);
  worker.clone().start().await;
}

/// Wires persistence for a kind without subscriptions (e.g. the key
/// sender).
pub(crate) fn setup_persistence(vd: &VirtualDevices, channel: &Arc<Channel>) {
  let store = vd.store.clone();
  let ch = channel.clone();
  channel.set_on_put_paramset(Arc::new(move || {
    let store = store.clone();
    let ch = ch.clone();
    Box::pin(async move {
      store_master_paramset(&store, &ch);
    })
  }));
  load_master_paramset(&vd.store, channel);
}

/// Returns the config entry position of a channel. The maintenance channel
/// (index 0) has no config entry.
fn config_index(channel: &Channel) -> Result<usize, NotFoundError> {
  let index = channel.index() - 1;
  if index < 0 {
    return Err(NotFoundError::Channel(channel.address().to_owned()));
  }
  Ok(index as usize)
}

/// Sets the master parameters from the config. Unknown parameter ids in the
/// config are logged and ignored.
pub fn load_master_paramset(store: &Arc<Store>, channel: &Channel) {
  let address = channel.description().parent.clone();
  let Ok(index) = config_index(channel) else {
    return;
  };
  store.view(|cfg| {
    let Some(devcfg) = cfg.virtual_devices.devices.get(&address) else {
      error!("Virtual device {address} not found in config");
      return;
    };
    let Some(chcfg) = devcfg.channels.get(index) else {
      error!("Virtual device channel {} not found in config", channel.address());
      return;
    };
    for (id, value) in &chcfg.master_paramset {
      let Ok(param) = channel.master_paramset().parameter(id) else {
        warn!("Master parameter {}.{id} in config not found in device", channel.address());
        continue;
      };
      debug!("Setting master parameter {}.{id} from config: {value}", channel.address());
      if let Err(err) = param.internal_set_value(value.clone()) {
        error!(
          "Setting master parameter {}.{id} to value {value} failed: {err}",
          channel.address()
        );
      }
    }
  });
}

/// Updates the values of the master parameters in the config. Never call
/// this with the config store already locked.
pub fn store_master_paramset(store: &Arc<Store>, channel: &Channel) {
  let address = channel.description().parent.clone();
  let Ok(index) = config_index(channel) else {
    return;
  };
  let result = store.update(|cfg| {
    let devcfg = cfg
      .virtual_devices
      .devices
      .get_mut(&address)
      .ok_or_else(|| NotFoundError::Device(address.clone()))?;
    let chcfg = devcfg
      .channels
      .get_mut(index)
      .ok_or_else(|| NotFoundError::Channel(channel.address().to_owned()))?;
    for param in channel.master_paramset().parameters() {
      debug!(
        "Storing master parameter {}.{} in config: {}",
        channel.address(),
        param.description.id,
        param.value()
      );
      chcfg
        .master_paramset
        .insert(param.description.id.clone(), param.value());
    }
    Ok::<_, NotFoundError>(())
  });
  if let Err(err) = result {
    error!("{err}");
  }
}

/// ENUM parameter selecting a payload matcher.
pub fn new_matcher_kind_parameter(id: &str) -> Parameter {
  Parameter::new_enum(id, &MATCHER_VALUE_LIST)
}

/// ENUM parameter selecting a number extractor.
pub fn new_extractor_kind_parameter(id: &str) -> Parameter {
  Parameter::new_enum(id, &EXTRACTOR_VALUE_LIST)
}

/// INTEGER parameter selecting the regexp capture group.
pub fn new_regexp_group_parameter(id: &str) -> Parameter {
  let mut p = Parameter::new_integer(id);
  p.description.min = json!(0);
  p.description.max = json!(100);
  p.description.default = json!(0);
  p
}

/// Maintenance channel, always index 0.
pub struct MaintenanceChannel {
  pub channel: Arc<Channel>,
  unreach: Arc<Parameter>,
  sticky_unreach: Arc<Parameter>,
}

impl MaintenanceChannel {
  pub fn new(dev: &Arc<Device>) -> MaintenanceChannel {
    let channel = dev.add_channel("MAINTENANCE");
    let unreach = channel.add_value_param(Parameter::new_bool("UNREACH"));
    let sticky_unreach = channel.add_value_param(Parameter::new_bool("STICKY_UNREACH"));
    MaintenanceChannel {
      channel,
      unreach,
      sticky_unreach,
    }
  }

  pub fn set_unreach(&self, unreach: bool) {
    let _guard = self.channel.lock();
    self.unreach.update(json!(unreach));
    if unreach {
      self.sticky_unreach.update(json!(true));
    }
  }

  pub fn unreach(&self) -> bool {
    self.unreach.bool_value()
  }
}

/// Sets the UNREACH parameter of the maintenance channel (index 0) of the
/// device owning the channel.
pub fn set_device_unreach(dev: &Arc<Device>, unreach: bool) {
  let Ok(maintenance) = dev.channel("0") else {
    error!("Maintenance channel (0) not found: {}", dev.address());
    return;
  };
  let Ok(param) = maintenance.value_paramset().parameter("UNREACH") else {
    error!("Channel (0) is not a maintenance channel: {}", dev.address());
    return;
  };
  let _guard = maintenance.lock();
  param.update(json!(unreach));
  if unreach {
    if let Ok(sticky) = maintenance.value_paramset().parameter("STICKY_UNREACH") {
      sticky.update(json!(true));
    }
  }
}

/// Key channel with short and long press.
pub struct KeyChannel {
  pub channel: Arc<Channel>,
  press_short: Arc<Parameter>,
  press_long: Arc<Parameter>,
}

impl KeyChannel {
  pub fn new(dev: &Arc<Device>) -> KeyChannel {
    let channel = dev.add_channel("KEY");
    let press_short = channel.add_value_param(Parameter::new_action("PRESS_SHORT"));
    let press_long = channel.add_value_param(Parameter::new_action("PRESS_LONG"));
    KeyChannel {
      channel,
      press_short,
      press_long,
    }
  }

  /// Synthesizes a short key press; observers see the event under the
  /// channel lock.
  pub fn press_short(&self) {
    let _guard = self.channel.lock();
    self.press_short.update(json!(true));
  }

  pub fn press_long(&self) {
    let _guard = self.channel.lock();
    self.press_long.update(json!(true));
  }

  pub fn handle_press_short(&self, f: impl Fn() -> bool + Send + Sync + 'static) {
    self.press_short.handle_set(move |_| f());
  }

  pub fn handle_press_long(&self, f: impl Fn() -> bool + Send + Sync + 'static) {
    self.press_long.handle_set(move |_| f());
  }
}

/// Switch actuator channel.
pub struct SwitchChannel {
  pub channel: Arc<Channel>,
  state: Arc<Parameter>,
}

impl SwitchChannel {
  pub fn new(dev: &Arc<Device>) -> SwitchChannel {
    let channel = dev.add_channel("SWITCH");
    let state = channel.add_value_param(Parameter::new_bool("STATE"));
    SwitchChannel { channel, state }
  }

  pub fn set_state(&self, state: bool) {
    let _guard = self.channel.lock();
    self.state.update(json!(state));
  }

  pub fn state(&self) -> bool {
    self.state.bool_value()
  }

  pub fn handle_set_state(&self, f: impl Fn(bool) -> bool + Send + Sync + 'static) {
    self.state.handle_set(move |v| f(v.as_bool().unwrap_or(false)));
  }
}

/// Analog input channel (voltage plus status).
pub struct AnalogInputChannel {
  pub channel: Arc<Channel>,
  voltage: Arc<Parameter>,
  voltage_status: Arc<Parameter>,
}

impl AnalogInputChannel {
  pub fn new(dev: &Arc<Device>) -> AnalogInputChannel {
    let channel = dev.add_channel("ANALOG_INPUT_TRANSMITTER");
    let voltage = channel.add_value_param(Parameter::new_float("VOLTAGE"));
    let voltage_status = channel.add_value_param(Parameter::new_enum(
      "VOLTAGE_STATUS",
      &["NORMAL", "UNKNOWN", "OVERFLOW"],
    ));
    AnalogInputChannel {
      channel,
      voltage,
      voltage_status,
    }
  }

  pub fn set_voltage(&self, value: f64) {
    let _guard = self.channel.lock();
    self.voltage.update(json!(value));
  }

  pub fn voltage(&self) -> f64 {
    self.voltage.float_value()
  }

  pub fn set_voltage_status(&self, status: i64) {
    let _guard = self.channel.lock();
    self.voltage_status.update(json!(status));
  }

  pub fn voltage_status(&self) -> i64 {
    self.voltage_status.int_value()
  }
}

/// Door/window contact channel.
pub struct DoorSensorChannel {
  pub channel: Arc<Channel>,
  state: Arc<Parameter>,
}

impl DoorSensorChannel {
  pub fn new(dev: &Arc<Device>) -> DoorSensorChannel {
    let channel = dev.add_channel("SHUTTER_CONTACT");
    let state = channel.add_value_param(Parameter::new_bool("STATE"));
    DoorSensorChannel { channel, state }
  }

  /// STATE semantics: false = contact closed/off/ok, true = open/on/error.
  pub fn set_state(&self, state: bool) {
    let _guard = self.channel.lock();
    self.state.update(json!(state));
  }

  pub fn state(&self) -> bool {
    self.state.bool_value()
  }
}

/// Dimmer actuator channel.
pub struct DimmerChannel {
  pub channel: Arc<Channel>,
  level: Arc<Parameter>,
  old_level: Arc<Parameter>,
  working: Arc<Parameter>,
}

impl DimmerChannel {
  pub fn new(dev: &Arc<Device>) -> DimmerChannel {
    let channel = dev.add_channel("DIMMER");
    let mut level = Parameter::new_float("LEVEL");
    level.description.min = json!(0.0);
    level.description.max = json!(1.0);
    level.description.default = json!(0.0);
    let level = channel.add_value_param(level);
    let old_level = channel.add_value_param(Parameter::new_action("OLD_LEVEL"));
    let working = channel.add_value_param(Parameter::new_bool("WORKING"));
    DimmerChannel {
      channel,
      level,
      old_level,
      working,
    }
  }

  pub fn set_level(&self, level: f64) {
    let _guard = self.channel.lock();
    self.level.update(json!(level.clamp(0.0, 1.0)));
  }

  pub fn level(&self) -> f64 {
    self.level.float_value()
  }

  pub fn working(&self) -> bool {
    self.working.bool_value()
  }

  pub fn handle_set_level(&self, f: impl Fn(f64) -> bool + Send + Sync + 'static) {
    self.level.handle_set(move |v| f(v.as_f64().unwrap_or(0.0)));
  }

  pub fn handle_set_old_level(&self, f: impl Fn() -> bool + Send + Sync + 'static) {
    self.old_level.handle_set(move |_| f());
  }
}

/// Temperature/humidity sensor channel.
pub struct TemperatureChannel {
  pub channel: Arc<Channel>,
  temperature: Arc<Parameter>,
  temperature_status: Arc<Parameter>,
  humidity: Arc<Parameter>,
  humidity_status: Arc<Parameter>,
}

impl TemperatureChannel {
  pub fn new(dev: &Arc<Device>) -> TemperatureChannel {
    let channel = dev.add_channel("WEATHER_TRANSMITTER");
    let temperature = channel.add_value_param(Parameter::new_float("TEMPERATURE"));
    let temperature_status = channel.add_value_param(Parameter::new_enum(
      "TEMPERATURE_STATUS",
      &["NORMAL", "UNKNOWN"],
    ));
    let humidity = channel.add_value_param(Parameter::new_integer("HUMIDITY"));
    let humidity_status = channel.add_value_param(Parameter::new_enum(
      "HUMIDITY_STATUS",
      &["NORMAL", "UNKNOWN"],
    ));
    TemperatureChannel {
      channel,
      temperature,
      temperature_status,
      humidity,
      humidity_status,
    }
  }

  pub fn set_temperature(&self, value: f64) {
    let _guard = self.channel.lock();
    self.temperature.update(json!(value));
  }

  pub fn temperature(&self) -> f64 {
    self.temperature.float_value()
  }

  pub fn set_temperature_status(&self, status: i64) {
    let _guard = self.channel.lock();
    self.temperature_status.update(json!(status));
  }

  pub fn set_humidity(&self, value: i64) {
    let _guard = self.channel.lock();
    self.humidity.update(json!(value));
  }

  pub fn humidity(&self) -> i64 {
    self.humidity.int_value()
  }

  pub fn set_humidity_status(&self, status: i64) {
    let _guard = self.channel.lock();
    self.humidity_status.update(json!(status));
  }
}

/// Power meter channel.
pub struct PowerMeterChannel {
  pub channel: Arc<Channel>,
  energy_counter: Arc<Parameter>,
  power: Arc<Parameter>,
  current: Arc<Parameter>,
  voltage: Arc<Parameter>,
  frequency: Arc<Parameter>,
}

impl PowerMeterChannel {
  pub fn new(dev: &Arc<Device>) -> PowerMeterChannel {
    let channel = dev.add_channel("POWERMETER");
    PowerMeterChannel {
      energy_counter: channel.add_value_param(Parameter::new_float("ENERGY_COUNTER")),
      power: channel.add_value_param(Parameter::new_float("POWER")),
      current: channel.add_value_param(Parameter::new_float("CURRENT")),
      voltage: channel.add_value_param(Parameter::new_float("VOLTAGE")),
      frequency: channel.add_value_param(Parameter::new_float("FREQUENCY")),
      channel,
    }
  }

  pub fn set_energy_counter(&self, value: f64) {
    let _guard = self.channel.lock();
    self.energy_counter.update(json!(value));
  }

  pub fn set_power(&self, value: f64) {
    let _guard = self.channel.lock();
    self.power.update(json!(value));
  }

  pub fn set_current(&self, value: f64) {
    let _guard = self.channel.lock();
    self.current.update(json!(value));
  }

  pub fn set_voltage(&self, value: f64) {
    let _guard = self.channel.lock();
    self.voltage.update(json!(value));
  }

  pub fn set_frequency(&self, value: f64) {
    let _guard = self.channel.lock();
    self.frequency.update(json!(value));
  }

  pub fn power(&self) -> f64 {
    self.power.float_value()
  }

  pub fn energy_counter(&self) -> f64 {
    self.energy_counter.float_value()
  }
}

/// Energy counter channel (counter and power only).
pub struct EnergyCounterChannel {
  pub channel: Arc<Channel>,
  energy_counter: Arc<Parameter>,
  power: Arc<Parameter>,
}

impl EnergyCounterChannel {
  pub fn new(dev: &Arc<Device>) -> EnergyCounterChannel {
    let channel = dev.add_channel("ENERGIE_METER_TRANSMITTER");
    EnergyCounterChannel {
      energy_counter: channel.add_value_param(Parameter::new_float("ENERGY_COUNTER")),
      power: channel.add_value_param(Parameter::new_float("POWER")),
      channel,
    }
  }

  pub fn set_energy_counter(&self, value: f64) {
    let _guard = self.channel.lock();
    self.energy_counter.update(json!(value));
  }

  pub fn set_power(&self, value: f64) {
    let _guard = self.channel.lock();
    self.power.update(json!(value));
  }
}

/// Gas counter channel (counter and power only, gas units).
pub struct GasCounterChannel {
  pub channel: Arc<Channel>,
  energy_counter: Arc<Parameter>,
  power: Arc<Parameter>,
}

impl GasCounterChannel {
  pub fn new(dev: &Arc<Device>) -> GasCounterChannel {
    let channel = dev.add_channel("GAS_ENERGY_COUNTER");
    let mut energy_counter = Parameter::new_float("ENERGY_COUNTER");
    energy_counter.description.unit = "m3".to_owned();
    let mut power = Parameter::new_float("POWER");
    power.description.unit = "m3/h".to_owned();
    GasCounterChannel {
      energy_counter: channel.add_value_param(energy_counter),
      power: channel.add_value_param(power),
      channel,
    }
  }

  pub fn set_energy_counter(&self, value: f64) {
    let _guard = self.channel.lock();
    self.energy_counter.update(json!(value));
  }

  pub fn set_power(&self, value: f64) {
    let _guard = self.channel.lock();
    self.power.update(json!(value));
  }
}
