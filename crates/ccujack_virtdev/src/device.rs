// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The channel runtime: containers own devices, devices own an ordered list
//! of channels (the maintenance channel is index 0), channels own a MASTER
//! and a VALUES paramset of typed parameters.

use ccujack_ccu::itf::{DeviceDescription, ParameterDescription, ParameterType, OPERATION_EVENT,
  OPERATION_READ, OPERATION_WRITE};
use ccujack_core::errors::{CcuJackError, CcuJackResult, NotFoundError, ProtocolError};
use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

/// Receiver of value change events of virtual devices.
pub trait EventPublisher: Send + Sync {
  fn publish_event(&self, address: &str, value_key: &str, value: Value);
}

/// Forwards events to two publishers (controller and MQTT).
pub struct TeeEventPublisher {
  pub first: Arc<dyn EventPublisher>,
  pub second: Arc<dyn EventPublisher>,
}

impl EventPublisher for TeeEventPublisher {
  fn publish_event(&self, address: &str, value_key: &str, value: Value) {
    self.first.publish_event(address, value_key, value.clone());
    self.second.publish_event(address, value_key, value);
  }
}

/// Discards events; used where no device layer is attached.
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
  fn publish_event(&self, _address: &str, _value_key: &str, _value: Value) {}
}

type OnSetFn = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// A typed parameter with its cached value. Value parameters publish change
/// events; master parameters are configuration and stay silent.
pub struct Parameter {
  pub description: ParameterDescription,
  value: RwLock<Value>,
  on_set: RwLock<Option<OnSetFn>>,
  // set when the parameter is added to a channel's VALUES paramset
  event_ctx: RwLock<Option<EventCtx>>,
}

struct EventCtx {
  address: String,
  publisher: Arc<dyn EventPublisher>,
}

impl Parameter {
  fn new(id: &str, parameter_type: ParameterType, initial: Value) -> Parameter {
    Parameter {
      description: ParameterDescription {
        id: id.to_owned(),
        parameter_type,
        operations: OPERATION_READ | OPERATION_WRITE | OPERATION_EVENT,
        ..ParameterDescription::default()
      },
      value: RwLock::new(initial),
      on_set: RwLock::new(None),
      event_ctx: RwLock::new(None),
    }
  }

  pub fn new_bool(id: &str) -> Parameter {
    Parameter::new(id, ParameterType::Bool, json!(false))
  }

  pub fn new_action(id: &str) -> Parameter {
    let mut p = Parameter::new(id, ParameterType::Action, json!(false));
    p.description.operations = OPERATION_WRITE | OPERATION_EVENT;
    p
  }

  pub fn new_integer(id: &str) -> Parameter {
    Parameter::new(id, ParameterType::Integer, json!(0))
  }

  pub fn new_enum(id: &str, value_list: &[&str]) -> Parameter {
    let mut p = Parameter::new(id, ParameterType::Enum, json!(0));
    p.description.value_list = value_list.iter().map(|s| (*s).to_owned()).collect();
    p.description.min = json!(0);
    p.description.max = json!(value_list.len() as i64 - 1);
    p.description.default = json!(0);
    p
  }

  pub fn new_float(id: &str) -> Parameter {
    Parameter::new(id, ParameterType::Float, json!(0.0))
  }

  pub fn new_string(id: &str) -> Parameter {
    Parameter::new(id, ParameterType::String, json!(""))
  }

  pub fn value(&self) -> Value {
    self.value.read().expect("parameter lock").clone()
  }

  pub fn bool_value(&self) -> bool {
    self.value().as_bool().unwrap_or(false)
  }

  pub fn int_value(&self) -> i64 {
    self.value().as_i64().unwrap_or(0)
  }

  pub fn float_value(&self) -> f64 {
    self.value().as_f64().unwrap_or(0.0)
  }

  pub fn string_value(&self) -> String {
    self.value().as_str().unwrap_or("").to_owned()
  }

  /// Installs the callback invoked on external writes.
  pub fn handle_set(&self, f: impl Fn(&Value) -> bool + Send + Sync + 'static) {
    *self.on_set.write().expect("parameter lock") = Some(Box::new(f));
  }

  pub(crate) fn clear_on_set(&self) {
    *self.on_set.write().expect("parameter lock") = None;
  }

  /// External write (VEAP or controller). Validates the value, runs the set
  /// callback and, unless the callback declines, stores the value and
  /// publishes a change event.
  pub fn set_value(&self, value: Value) -> CcuJackResult {
    let value = self.description.parameter_type.convert_value(value);
    self.description.parameter_type.check_value(&value)?;
    let keep = match &*self.on_set.read().expect("parameter lock") {
      Some(on_set) => on_set(&value),
      None => true,
    };
    if keep {
      *self.value.write().expect("parameter lock") = value.clone();
      self.publish(&value);
    }
    Ok(())
  }

  /// Internal write without callbacks and events; used when loading values
  /// from the configuration.
  pub fn internal_set_value(&self, value: Value) -> CcuJackResult {
    let value = self.description.parameter_type.convert_value(value);
    self.description.parameter_type.check_value(&value)?;
    *self.value.write().expect("parameter lock") = value;
    Ok(())
  }

  /// Internal update driven by the channel logic (e.g. MQTT feedback):
  /// stores the value and publishes a change event, without callbacks.
  pub fn update(&self, value: Value) {
    *self.value.write().expect("parameter lock") = value.clone();
    self.publish(&value);
  }

  fn publish(&self, value: &Value) {
    if let Some(ctx) = &*self.event_ctx.read().expect("parameter lock") {
      ctx
        .publisher
        .publish_event(&ctx.address, &self.description.id, value.clone());
    }
  }
}

/// Logical grouping of parameters by id.
#[derive(Default)]
pub struct Paramset {
  params: RwLock<IndexMap<String, Arc<Parameter>>>,
}

impl Paramset {
  pub fn add(&self, param: Parameter) -> Arc<Parameter> {
    let param = Arc::new(param);
    self
      .params
      .write()
      .expect("paramset lock")
      .insert(param.description.id.clone(), param.clone());
    param
  }

  pub fn parameter(&self, id: &str) -> Result<Arc<Parameter>, CcuJackError> {
    self
      .params
      .read()
      .expect("paramset lock")
      .get(id)
      .cloned()
      .ok_or_else(|| NotFoundError::Parameter(id.to_owned()).into())
  }

  pub fn parameters(&self) -> Vec<Arc<Parameter>> {
    self.params.read().expect("paramset lock").values().cloned().collect()
  }
}

type LifecycleFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A channel of a virtual device.
pub struct Channel {
  description: DeviceDescription,
  master: Paramset,
  values: Paramset,
  // held while channel parameters mutate so observers see a consistent
  // snapshot
  lock: Mutex<()>,
  on_put_paramset: RwLock<Option<LifecycleFn>>,
  on_dispose: RwLock<Option<LifecycleFn>>,
  publisher: Arc<dyn EventPublisher>,
}

impl Channel {
  pub fn description(&self) -> &DeviceDescription {
    &self.description
  }

  pub fn address(&self) -> &str {
    &self.description.address
  }

  pub fn index(&self) -> i32 {
    self.description.index
  }

  pub fn master_paramset(&self) -> &Paramset {
    &self.master
  }

  pub fn value_paramset(&self) -> &Paramset {
    &self.values
  }

  pub fn lock(&self) -> MutexGuard<'_, ()> {
    self.lock.lock().expect("channel lock")
  }

  pub fn add_master_param(&self, param: Parameter) -> Arc<Parameter> {
    self.master.add(param)
  }

  pub fn add_value_param(self: &Arc<Self>, param: Parameter) -> Arc<Parameter> {
    let param = self.values.add(param);
    *param.event_ctx.write().expect("parameter lock") = Some(EventCtx {
      address: self.description.address.clone(),
      publisher: self.publisher.clone(),
    });
    param
  }

  pub fn set_on_put_paramset(&self, f: LifecycleFn) {
    *self.on_put_paramset.write().expect("channel lock") = Some(f);
  }

  pub fn set_on_dispose(&self, f: LifecycleFn) {
    *self.on_dispose.write().expect("channel lock") = Some(f);
  }

  /// Writes the MASTER paramset. Every entry is validated against its
  /// description before any value is applied; afterwards the registered
  /// lifecycle handler persists and reloads the channel.
  pub async fn put_master_paramset(&self, values: Map<String, Value>) -> CcuJackResult {
    let mut resolved = Vec::with_capacity(values.len());
    for (id, value) in values {
      let param = self.master.parameter(&id).map_err(|_| {
        CcuJackError::from(ProtocolError::UnexpectedResponse(format!(
          "Unknown parameter: {id}"
        )))
      })?;
      let value = param.description.parameter_type.convert_value(value);
      param.description.parameter_type.check_value(&value)?;
      resolved.push((param, value));
    }
    {
      let _guard = self.lock();
      for (param, value) in resolved {
        param.internal_set_value(value)?;
      }
    }
    let handler = self.on_put_paramset.read().expect("channel lock").clone();
    if let Some(handler) = handler {
      handler().await;
    }
    Ok(())
  }

  /// Stops the channel and releases all registered callbacks. The kind
  /// closures reference the channel through the runtime objects they
  /// capture; dropping them here is what lets a removed channel be freed.
  pub(crate) async fn dispose(&self) {
    let handler = self.on_dispose.write().expect("channel lock").take();
    if let Some(handler) = handler {
      handler().await;
    }
    *self.on_put_paramset.write().expect("channel lock") = None;
    for param in self.values.parameters() {
      param.clear_on_set();
    }
    for param in self.master.parameters() {
      param.clear_on_set();
    }
  }
}

/// A virtual device.
pub struct Device {
  description: RwLock<DeviceDescription>,
  channels: RwLock<Vec<Arc<Channel>>>,
  publisher: Arc<dyn EventPublisher>,
}

impl Device {
  pub fn new(address: &str, hm_type: &str, publisher: Arc<dyn EventPublisher>) -> Arc<Device> {
    Arc::new(Device {
      description: RwLock::new(DeviceDescription {
        address: address.to_owned(),
        device_type: hm_type.to_owned(),
        paramsets: vec!["MASTER".to_owned()],
        ..DeviceDescription::default()
      }),
      channels: RwLock::new(Vec::new()),
      publisher,
    })
  }

  pub fn description(&self) -> DeviceDescription {
    self.description.read().expect("device lock").clone()
  }

  pub fn address(&self) -> String {
    self.description.read().expect("device lock").address.clone()
  }

  pub fn publisher(&self) -> Arc<dyn EventPublisher> {
    self.publisher.clone()
  }

  /// Adds a channel with the next free index. The first added channel is
  /// the maintenance channel (index 0).
  pub fn add_channel(self: &Arc<Self>, channel_type: &str) -> Arc<Channel> {
    let mut channels = self.channels.write().expect("device lock");
    let index = channels.len() as i32;
    let mut descr = self.description.write().expect("device lock");
    let address = format!("{}:{}", descr.address, index);
    let channel = Arc::new(Channel {
      description: DeviceDescription {
        address: address.clone(),
        device_type: channel_type.to_owned(),
        parent: descr.address.clone(),
        parent_type: descr.device_type.clone(),
        index,
        paramsets: vec!["MASTER".to_owned(), "VALUES".to_owned()],
        ..DeviceDescription::default()
      },
      master: Paramset::default(),
      values: Paramset::default(),
      lock: Mutex::new(()),
      on_put_paramset: RwLock::new(None),
      on_dispose: RwLock::new(None),
      publisher: self.publisher.clone(),
    });
    descr.children.push(address);
    channels.push(channel.clone());
    channel
  }

  pub fn channels(&self) -> Vec<Arc<Channel>> {
    self.channels.read().expect("device lock").clone()
  }

  /// Resolves a channel by its index.
  pub fn channel(&self, index: &str) -> Result<Arc<Channel>, CcuJackError> {
    let channels = self.channels.read().expect("device lock");
    index
      .parse::<usize>()
      .ok()
      .and_then(|idx| channels.get(idx).cloned())
      .ok_or_else(|| NotFoundError::Channel(index.to_owned()).into())
  }

  pub(crate) async fn dispose(&self) {
    for channel in self.channels() {
      channel.dispose().await;
    }
  }
}

/// Notified when devices are added to or removed from the container, so the
/// controller can be told about the change.
pub trait ContainerSynchronizer: Send + Sync {
  fn device_added(&self, device: &Arc<Device>);
  fn device_removed(&self, address: &str);
}

/// Owns the virtual devices, addressed by device address.
#[derive(Default)]
pub struct Container {
  devices: RwLock<IndexMap<String, Arc<Device>>>,
  synchronizer: RwLock<Option<Arc<dyn ContainerSynchronizer>>>,
}

impl Container {
  pub fn new() -> Arc<Container> {
    Arc::new(Container::default())
  }

  pub fn set_synchronizer(&self, synchronizer: Arc<dyn ContainerSynchronizer>) {
    *self.synchronizer.write().expect("container lock") = Some(synchronizer);
  }

  pub fn add_device(&self, device: Arc<Device>) -> CcuJackResult {
    let address = device.address();
    {
      let mut devices = self.devices.write().expect("container lock");
      if devices.contains_key(&address) {
        return Err(
          ProtocolError::UnexpectedResponse(format!("Device already registered: {address}")).into(),
        );
      }
      devices.insert(address, device.clone());
    }
    if let Some(sync) = &*self.synchronizer.read().expect("container lock") {
      sync.device_added(&device);
    }
    Ok(())
  }

  pub async fn remove_device(&self, address: &str) -> CcuJackResult {
    let device = {
      let mut devices = self.devices.write().expect("container lock");
      devices
        .shift_remove(address)
        .ok_or_else(|| CcuJackError::from(NotFoundError::Device(address.to_owned())))?
    };
    device.dispose().await;
    if let Some(sync) = &*self.synchronizer.read().expect("container lock") {
      sync.device_removed(address);
    }
    Ok(())
  }

  pub fn device(&self, address: &str) -> Result<Arc<Device>, CcuJackError> {
    self
      .devices
      .read()
      .expect("container lock")
      .get(address)
      .cloned()
      .ok_or_else(|| NotFoundError::Device(address.to_owned()).into())
  }

  pub fn devices(&self) -> Vec<Arc<Device>> {
    self.devices.read().expect("container lock").values().cloned().collect()
  }

  /// Stops all channels and drops all devices.
  pub async fn dispose(&self) {
    let devices: Vec<Arc<Device>> = {
      let mut map = self.devices.write().expect("container lock");
      map.drain(..).map(|(_, d)| d).collect()
    };
    for device in devices {
      device.dispose().await;
    }
  }
}
