// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The device domain. Controller callbacks are buffered in a bounded queue
//! and processed by a single consumer that mutates the VEAP subtree below
//! `/device`.

use async_trait::async_trait;
use ccujack_ccu::itf::{
  DeviceDescription, ItfClient, ParameterDescription, ParamsetDescription, Receiver, split_address,
};
use ccujack_ccu::interconnector::Interconnector;
use ccujack_ccu::script::{ScriptClient, ValObjDef};
use ccujack_core::errors::CcuJackResult;
use ccujack_core::{Pv, State, Timestamp};
use ccujack_veap::{AttrValues, Collection, Node, PvReader, PvWriter, VeapError};
use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A buffer is needed for buffering events while exploring.
const NOTIF_BUFFER_SIZE: usize = 1000;

/// Delay between XML-RPC requests while exploring.
const XML_RPC_DELAY: Duration = Duration::from_millis(50);

/// Notification from a controller callback.
#[derive(Debug, Clone)]
pub enum Notification {
  NewDevices {
    interface_id: String,
    descriptions: Vec<DeviceDescription>,
  },
  DeleteDevices {
    addresses: Vec<String>,
  },
  ValueEvent {
    address: String,
    value_key: String,
    value: Value,
  },
}

/// The `/device` domain. Implements the controller receiver; notifications
/// are handled by a single consumer task.
pub struct DeviceCol {
  parent: Weak<dyn Node>,
  interconnector: Arc<Interconnector>,
  script_client: Arc<dyn ScriptClient>,
  devices: RwLock<IndexMap<String, Arc<DeviceNode>>>,

  tx: mpsc::Sender<Notification>,
  rx: Mutex<Option<mpsc::Receiver<Notification>>>,
  cancel: CancellationToken,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceCol {
  pub fn new(
    parent: Weak<dyn Node>,
    interconnector: Arc<Interconnector>,
    script_client: Arc<dyn ScriptClient>,
  ) -> Arc<DeviceCol> {
    let (tx, rx) = mpsc::channel(NOTIF_BUFFER_SIZE);
    Arc::new(DeviceCol {
      parent,
      interconnector,
      script_client,
      devices: RwLock::new(IndexMap::new()),
      tx,
      rx: Mutex::new(Some(rx)),
      cancel: CancellationToken::new(),
      task: Mutex::new(None),
    })
  }

  /// Starts handling notifications.
  pub fn start(self: &Arc<Self>) {
    info!("Starting notification handler");
    let mut rx = self
      .rx
      .lock()
      .expect("receiver lock")
      .take()
      .expect("notification handler started twice");
    let this = self.clone();
    let cancel = self.cancel.clone();
    *self.task.lock().expect("task lock") = Some(tokio::spawn(async move {
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          notification = rx.recv() => match notification {
            None => break,
            Some(Notification::DeleteDevices { addresses }) => {
              this.handle_deletion(addresses);
            }
            Some(Notification::NewDevices { interface_id, descriptions }) => {
              if !this.handle_new(&interface_id, descriptions).await {
                // stop requested while exploring devices
                break;
              }
            }
            Some(Notification::ValueEvent { address, value_key, value }) => {
              this.handle_event(&address, &value_key, value);
            }
          }
        }
      }
      debug!("Stopping notification handler");
    }));
  }

  /// Stops handling notifications.
  pub async fn stop(&self) {
    self.cancel.cancel();
    let task = self.task.lock().expect("task lock").take();
    if let Some(task) = task {
      let _ = task.await;
    }
  }

  fn send_notification(&self, notification: Notification) {
    if self.tx.try_send(notification).is_err() {
      // channel full
      error!("Notification lost, buffer size is too small: {NOTIF_BUFFER_SIZE}");
    }
  }

  fn handle_deletion(&self, addresses: Vec<String>) {
    // separate devices and channels
    let (channels, devices): (Vec<&String>, Vec<&String>) =
      addresses.iter().partition(|a| a.contains(':'));
    // 1. delete channels
    for address in channels {
      let Some((dev, ch)) = split_address(address) else {
        continue;
      };
      debug!("Deleting channel: {dev}:{ch}");
      let device = self.devices.read().expect("device map lock").get(dev).cloned();
      let Some(device) = device else {
        warn!("Deletion of channel failed, device not found: {dev}");
        continue;
      };
      if device.channels.write().expect("channel map lock").shift_remove(ch).is_none() {
        warn!("Deletion of channel failed, channel not found: {dev}:{ch}");
      }
    }
    // 2. delete devices
    for address in devices {
      debug!("Deleting device: {address}");
      if self
        .devices
        .write()
        .expect("device map lock")
        .shift_remove(address)
        .is_none()
      {
        warn!("Deletion of device failed, device not found: {address}");
      }
    }
  }

  async fn handle_new(self: &Arc<Self>, interface_id: &str, descriptions: Vec<DeviceDescription>) -> bool {
    // separate devices and channels
    let (devices, channels): (Vec<DeviceDescription>, Vec<DeviceDescription>) =
      descriptions.into_iter().partition(|d| d.is_device());

    // get CCU interface client
    let itf_client = match self.interconnector.client(interface_id) {
      Ok(client) => client,
      Err(_) => {
        error!("Invalid interface ID in callback: {interface_id}");
        return true;
      }
    };

    // 1. create devices
    for descr in devices {
      debug!("Creating device: {}", descr.address);
      let parent: Weak<dyn Node> = {
        let this: Arc<dyn Node> = self.clone();
        Arc::downgrade(&this)
      };
      let device = Arc::new(DeviceNode {
        descr: descr.clone(),
        itf_client: itf_client.clone(),
        channels: RwLock::new(IndexMap::new()),
        master: RwLock::new(None),
        parent,
      });
      // The parameter set MASTER can always be read and written. With the
      // others (e.g. LINK, SERVICE) this is unclear. Especially with battery
      // operated devices these cannot be read immediately. Therefore only
      // MASTER is supported.
      if descr.paramsets.iter().any(|p| p == "MASTER") {
        debug!("Creating parameter set: MASTER");
        let parent: Weak<dyn Node> = {
          let node: Arc<dyn Node> = device.clone();
          Arc::downgrade(&node)
        };
        *device.master.write().expect("paramset lock") = Some(Arc::new(ParamsetNode {
          paramset_id: "MASTER".to_owned(),
          address: descr.address.clone(),
          itf_client: itf_client.clone(),
          cached_descr: tokio::sync::Mutex::new(None),
          parent,
        }));
      }
      self
        .devices
        .write()
        .expect("device map lock")
        .insert(descr.address.clone(), device);
    }

    // 2. create channels
    for descr in channels {
      debug!("Creating channel: {}", descr.address);
      let Some((dev, ch)) = split_address(&descr.address) else {
        continue;
      };
      let device = self.devices.read().expect("device map lock").get(dev).cloned();
      let Some(device) = device else {
        error!("Device for channel not found: {dev}");
        continue;
      };
      let parent: Weak<dyn Node> = {
        let node: Arc<dyn Node> = device.clone();
        Arc::downgrade(&node)
      };
      let channel = Arc::new(ChannelNode {
        identifier: ch.to_owned(),
        descr: descr.clone(),
        params: RwLock::new(IndexMap::new()),
        master: RwLock::new(None),
        parent,
      });
      device
        .channels
        .write()
        .expect("channel map lock")
        .insert(ch.to_owned(), channel.clone());

      for paramset_id in &descr.paramsets {
        if paramset_id == "VALUES" {
          // fetch the parameter descriptions synchronously
          let pset_descr = match itf_client.get_paramset_description(&descr.address, "VALUES").await
          {
            Ok(pset_descr) => pset_descr,
            Err(err) => {
              error!("Retrieving parameter set description failed: {err}");
              continue;
            }
          };
          // bound the controller load; honour the shutdown signal
          tokio::select! {
            _ = self.cancel.cancelled() => return false,
            _ = tokio::time::sleep(XML_RPC_DELAY) => {}
          }
          let mut params = channel.params.write().expect("parameter map lock");
          for (id, param_descr) in sorted_params(pset_descr) {
            debug!("Creating parameter: {id}");
            let parent: Weak<dyn Node> = {
              let node: Arc<dyn Node> = channel.clone();
              Arc::downgrade(&node)
            };
            params.insert(
              id,
              Arc::new(ParameterNode {
                descr: param_descr,
                channel_address: descr.address.clone(),
                rega_hss_id: itf_client.rega_hss_id(),
                itf_client: itf_client.clone(),
                script_client: self.script_client.clone(),
                pv: RwLock::new(None),
                parent,
              }),
            );
          }
        } else if paramset_id == "MASTER" {
          debug!("Creating parameter set: MASTER");
          let parent: Weak<dyn Node> = {
            let node: Arc<dyn Node> = channel.clone();
            Arc::downgrade(&node)
          };
          *channel.master.write().expect("paramset lock") = Some(Arc::new(ParamsetNode {
            paramset_id: "MASTER".to_owned(),
            address: descr.address.clone(),
            itf_client: itf_client.clone(),
            cached_descr: tokio::sync::Mutex::new(None),
            parent,
          }));
        }
      }
    }
    true
  }

  fn handle_event(&self, address: &str, value_key: &str, value: Value) {
    let Some((dev, ch)) = split_address(address) else {
      warn!("Device should not send event: {address}");
      return;
    };
    let device = self.devices.read().expect("device map lock").get(dev).cloned();
    let Some(device) = device else {
      debug!("Device for event not found: {dev}");
      return;
    };
    let channel = device.channels.read().expect("channel map lock").get(ch).cloned();
    let Some(channel) = channel else {
      debug!("Channel for event not found: {address}");
      return;
    };
    let param = channel.params.read().expect("parameter map lock").get(value_key).cloned();
    let Some(param) = param else {
      debug!("Parameter for event not found: {address}.{value_key}");
      return;
    };
    debug!("Updating PV of {address}.{value_key} to {value}");
    param.update_pv(value);
  }
}

// deterministic parameter ordering for a stable tree
fn sorted_params(pset: ParamsetDescription) -> Vec<(String, ParameterDescription)> {
  let mut params: Vec<(String, ParameterDescription)> = pset.into_iter().collect();
  params.sort_by(|a, b| {
    a.1.tab_order.cmp(&b.1.tab_order).then_with(|| a.0.cmp(&b.0))
  });
  params
}

#[async_trait]
impl Receiver for DeviceCol {
  async fn event(
    &self,
    _interface_id: &str,
    address: &str,
    value_key: &str,
    value: Value,
  ) -> CcuJackResult {
    self.send_notification(Notification::ValueEvent {
      address: address.to_owned(),
      value_key: value_key.to_owned(),
      value,
    });
    Ok(())
  }

  async fn new_devices(
    &self,
    interface_id: &str,
    descriptions: Vec<DeviceDescription>,
  ) -> CcuJackResult {
    self.send_notification(Notification::NewDevices {
      interface_id: interface_id.to_owned(),
      descriptions,
    });
    Ok(())
  }

  async fn delete_devices(&self, _interface_id: &str, addresses: Vec<String>) -> CcuJackResult {
    self.send_notification(Notification::DeleteDevices { addresses });
    Ok(())
  }
}

#[async_trait]
impl Node for DeviceCol {
  fn identifier(&self) -> String {
    "device".to_owned()
  }

  fn title(&self) -> String {
    "Devices".to_owned()
  }

  fn description(&self) -> String {
    "CCU Devices".to_owned()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "domain".to_owned()
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for DeviceCol {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self
      .devices
      .read()
      .expect("device map lock")
      .values()
      .map(|d| d.clone() as Arc<dyn Node>)
      .collect()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    self
      .devices
      .read()
      .expect("device map lock")
      .get(id)
      .map(|d| d.clone() as Arc<dyn Node>)
  }

  fn child_role(&self) -> String {
    "device".to_owned()
  }
}

/// Converts a device description into VEAP attributes.
pub(crate) fn device_descr_to_attrs(d: &DeviceDescription) -> AttrValues {
  let mut attrs = AttrValues::new();
  attrs.insert("type".to_owned(), json!(d.device_type));
  attrs.insert("address".to_owned(), json!(d.address));
  attrs.insert("rfAddress".to_owned(), json!(d.rf_address));
  attrs.insert("children".to_owned(), json!(d.children));
  attrs.insert("parent".to_owned(), json!(d.parent));
  attrs.insert("parentType".to_owned(), json!(d.parent_type));
  attrs.insert("index".to_owned(), json!(d.index));
  attrs.insert("aesActive".to_owned(), json!(d.aes_active));
  attrs.insert("paramsets".to_owned(), json!(d.paramsets));
  attrs.insert("firmware".to_owned(), json!(d.firmware));
  attrs.insert("availableFirmware".to_owned(), json!(d.available_firmware));
  attrs.insert("version".to_owned(), json!(d.version));
  attrs.insert("flags".to_owned(), json!(d.flags));
  attrs.insert("linkSourceRoles".to_owned(), json!(d.link_source_roles));
  attrs.insert("linkTargetRoles".to_owned(), json!(d.link_target_roles));
  attrs.insert("direction".to_owned(), json!(d.direction));
  attrs.insert("group".to_owned(), json!(d.group));
  attrs.insert("team".to_owned(), json!(d.team));
  attrs.insert("teamTag".to_owned(), json!(d.team_tag));
  attrs.insert("teamChannels".to_owned(), json!(d.team_channels));
  attrs.insert("interface".to_owned(), json!(d.interface));
  attrs.insert("roaming".to_owned(), json!(d.roaming));
  attrs.insert("rxMode".to_owned(), json!(d.rx_mode));
  attrs
}

/// Converts a parameter description into VEAP attributes including the MQTT
/// topics of the data point.
pub(crate) fn param_descr_to_attrs(
  descr: &ParameterDescription,
  topic_prefix: &str,
  dev: &str,
  ch: &str,
) -> AttrValues {
  let mqtt_topic = format!("{dev}/{ch}/{}", descr.id);
  let mut attrs = AttrValues::new();
  attrs.insert("type".to_owned(), json!(descr.parameter_type.to_string()));
  attrs.insert("operations".to_owned(), json!(descr.operations));
  attrs.insert("flags".to_owned(), json!(descr.flags));
  attrs.insert("default".to_owned(), descr.default.clone());
  attrs.insert("maximum".to_owned(), descr.max.clone());
  attrs.insert("minimum".to_owned(), descr.min.clone());
  attrs.insert("unit".to_owned(), json!(descr.unit));
  attrs.insert("tabOrder".to_owned(), json!(descr.tab_order));
  attrs.insert("control".to_owned(), json!(descr.control));
  attrs.insert("id".to_owned(), json!(descr.id));
  attrs.insert(
    "mqttStatusTopic".to_owned(),
    json!(format!("{topic_prefix}/status/{mqtt_topic}")),
  );
  match descr.parameter_type {
    ccujack_ccu::itf::ParameterType::Float | ccujack_ccu::itf::ParameterType::Integer => {
      let special: Vec<Value> = descr
        .special
        .iter()
        .map(|s| json!({"id": s.id, "value": s.value}))
        .collect();
      attrs.insert("special".to_owned(), json!(special));
    }
    ccujack_ccu::itf::ParameterType::Enum => {
      attrs.insert("valueList".to_owned(), json!(descr.value_list));
    }
    _ => {}
  }
  if descr.writeable() {
    attrs.insert(
      "mqttSetTopic".to_owned(),
      json!(format!("{topic_prefix}/set/{mqtt_topic}")),
    );
  }
  attrs
}

struct DeviceNode {
  descr: DeviceDescription,
  itf_client: Arc<dyn ItfClient>,
  channels: RwLock<IndexMap<String, Arc<ChannelNode>>>,
  master: RwLock<Option<Arc<ParamsetNode>>>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for DeviceNode {
  fn identifier(&self) -> String {
    self.descr.address.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "device".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = device_descr_to_attrs(&self.descr);
    attrs.insert("interfaceType".to_owned(), json!(self.itf_client.rega_hss_id()));
    attrs
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for DeviceNode {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    let mut items: Vec<Arc<dyn Node>> = self
      .channels
      .read()
      .expect("channel map lock")
      .values()
      .map(|c| c.clone() as Arc<dyn Node>)
      .collect();
    if let Some(master) = &*self.master.read().expect("paramset lock") {
      items.push(master.clone());
    }
    items
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    if id == "$MASTER" {
      return self
        .master
        .read()
        .expect("paramset lock")
        .clone()
        .map(|m| m as Arc<dyn Node>);
    }
    self
      .channels
      .read()
      .expect("channel map lock")
      .get(id)
      .map(|c| c.clone() as Arc<dyn Node>)
  }

  fn child_role(&self) -> String {
    "channel".to_owned()
  }
}

struct ChannelNode {
  identifier: String,
  descr: DeviceDescription,
  params: RwLock<IndexMap<String, Arc<ParameterNode>>>,
  master: RwLock<Option<Arc<ParamsetNode>>>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for ChannelNode {
  fn identifier(&self) -> String {
    self.identifier.clone()
  }

  fn title(&self) -> String {
    self.descr.address.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "channel".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    device_descr_to_attrs(&self.descr)
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for ChannelNode {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    let mut items: Vec<Arc<dyn Node>> = self
      .params
      .read()
      .expect("parameter map lock")
      .values()
      .map(|p| p.clone() as Arc<dyn Node>)
      .collect();
    if let Some(master) = &*self.master.read().expect("paramset lock") {
      items.push(master.clone());
    }
    items
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    if id == "$MASTER" {
      return self
        .master
        .read()
        .expect("paramset lock")
        .clone()
        .map(|m| m as Arc<dyn Node>);
    }
    self
      .params
      .read()
      .expect("parameter map lock")
      .get(id)
      .map(|p| p.clone() as Arc<dyn Node>)
  }

  fn child_role(&self) -> String {
    "parameter".to_owned()
  }
}

struct ParameterNode {
  descr: ParameterDescription,
  channel_address: String,
  rega_hss_id: String,
  itf_client: Arc<dyn ItfClient>,
  script_client: Arc<dyn ScriptClient>,
  pv: RwLock<Option<Pv>>,
  parent: Weak<dyn Node>,
}

impl ParameterNode {
  /// Updates the cached PV with a new value from an event.
  fn update_pv(&self, value: Value) {
    let mut pv = self.pv.write().expect("pv lock");
    *pv = Some(Pv {
      time: Timestamp::now(),
      value,
      state: State::Good,
    });
  }
}

#[async_trait]
impl Node for ParameterNode {
  fn identifier(&self) -> String {
    self.descr.id.clone()
  }

  fn title(&self) -> String {
    format!("{} - {}", self.channel_address, self.descr.id)
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "parameter".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let (dev, ch) = split_address(&self.channel_address).unwrap_or((self.channel_address.as_str(), ""));
    param_descr_to_attrs(&self.descr, "device", dev, ch)
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for ParameterNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    {
      let pv = self.pv.read().expect("pv lock");
      if let Some(pv) = &*pv {
        return Ok(pv.clone());
      }
    }
    // no value cached yet: retrieve the current value from the ReGaHss
    let address = format!("{}.{}.{}", self.rega_hss_id, self.channel_address, self.descr.id);
    let readings = self
      .script_client
      .read_values(&[ValObjDef {
        ise_id: address,
        var_type: self.descr.parameter_type.to_string(),
      }])
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))?;
    let reading = readings
      .into_iter()
      .next()
      .ok_or_else(|| VeapError::Internal("Empty read result".to_owned()))?
      .map_err(|err| VeapError::Internal(err.to_string()))?;
    let pv = reading.into_pv();
    // store and return PV
    *self.pv.write().expect("pv lock") = Some(pv.clone());
    Ok(pv)
  }
}

#[async_trait]
impl PvWriter for ParameterNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    let value = self.descr.parameter_type.convert_value(pv.value);
    self.descr.parameter_type.check_value(&value).map_err(|err| {
      VeapError::BadRequest(format!(
        "Writing parameter {}.{} failed: {err}",
        self.channel_address, self.descr.id
      ))
    })?;
    self
      .itf_client
      .set_value(&self.channel_address, &self.descr.id, value)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))
  }
}

/// Lazy façade for a MASTER paramset. The description is fetched from the
/// controller on first use.
struct ParamsetNode {
  paramset_id: String,
  address: String,
  itf_client: Arc<dyn ItfClient>,
  cached_descr: tokio::sync::Mutex<Option<ParamsetDescription>>,
  parent: Weak<dyn Node>,
}

impl ParamsetNode {
  async fn descr(&self) -> Option<ParamsetDescription> {
    let mut cached = self.cached_descr.lock().await;
    if cached.is_none() {
      match self
        .itf_client
        .get_paramset_description(&self.address, &self.paramset_id)
        .await
      {
        Ok(descr) => *cached = Some(descr),
        Err(err) => {
          error!("Retrieving parameter set description failed: {err}");
          return None;
        }
      }
    }
    cached.clone()
  }
}

#[async_trait]
impl Node for ParamsetNode {
  fn identifier(&self) -> String {
    // the prefix avoids name clashes with HomeMatic identifiers
    format!("${}", self.paramset_id)
  }

  fn description(&self) -> String {
    format!("Parameter set {} of {}", self.paramset_id, self.address)
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "paramset".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = AttrValues::new();
    if let Some(descr) = self.descr().await {
      for (id, d) in descr {
        attrs.insert(
          id,
          json!({
            "type": d.parameter_type.to_string(),
            "operations": d.operations,
            "flags": d.flags,
            "default": d.default,
            "maximum": d.max,
            "minimum": d.min,
            "unit": d.unit,
            "tabOrder": d.tab_order,
            "control": d.control,
            "id": d.id,
          }),
        );
      }
    }
    attrs
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for ParamsetNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    let values = self
      .itf_client
      .get_paramset(&self.address, &self.paramset_id)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))?;
    Ok(Pv {
      time: Timestamp::now(),
      value: Value::Object(values),
      state: State::Good,
    })
  }
}

#[async_trait]
impl PvWriter for ParamsetNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    let Value::Object(entries) = pv.value else {
      return Err(VeapError::BadRequest(format!(
        "Writing parameter set {} of {} failed: Invalid type (expected JSON object)",
        self.paramset_id, self.address
      )));
    };
    let descr = self.descr().await.ok_or_else(|| {
      VeapError::Internal(format!(
        "Parameter set description of {} not available",
        self.address
      ))
    })?;
    let mut values = Map::new();
    for (id, value) in entries {
      // known parameter?
      let Some(d) = descr.get(&id) else {
        return Err(VeapError::BadRequest(format!(
          "Writing parameter set {} of {} failed: Unknown parameter: {id}",
          self.paramset_id, self.address
        )));
      };
      let value = d.parameter_type.convert_value(value);
      d.parameter_type.check_value(&value).map_err(|err| {
        VeapError::BadRequest(format!(
          "Writing parameter set {} of {} failed: {err}",
          self.paramset_id, self.address
        ))
      })?;
      values.insert(id, value);
    }
    self
      .itf_client
      .put_paramset(&self.address, &self.paramset_id, values)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_ccu::itf::{OPERATION_EVENT, OPERATION_READ, OPERATION_WRITE, ParameterType};
  use ccujack_ccu::script::{ProgramDef, SysVarDef, ValueReading};
  use ccujack_core::errors::CcuJackError;
  use ccujack_veap::{Domain, DomainCfg, Service};

  pub(crate) struct MockItfClient {
    pub set_values: Mutex<Vec<(String, String, Value)>>,
  }

  impl MockItfClient {
    pub(crate) fn new() -> Arc<MockItfClient> {
      Arc::new(MockItfClient {
        set_values: Mutex::new(Vec::new()),
      })
    }
  }

  #[async_trait]
  impl ItfClient for MockItfClient {
    fn interface_id(&self) -> String {
      "BidCos-RF".to_owned()
    }

    fn rega_hss_id(&self) -> String {
      "BidCos-RF".to_owned()
    }

    async fn get_paramset_description(
      &self,
      _address: &str,
      paramset_id: &str,
    ) -> Result<ParamsetDescription, CcuJackError> {
      let mut pset = ParamsetDescription::new();
      if paramset_id == "VALUES" {
        pset.insert(
          "STATE".to_owned(),
          ParameterDescription {
            id: "STATE".to_owned(),
            parameter_type: ParameterType::Bool,
            operations: OPERATION_READ | OPERATION_WRITE | OPERATION_EVENT,
            ..ParameterDescription::default()
          },
        );
      }
      Ok(pset)
    }

    async fn get_paramset(
      &self,
      _address: &str,
      _paramset_id: &str,
    ) -> Result<Map<String, Value>, CcuJackError> {
      Ok(Map::new())
    }

    async fn put_paramset(
      &self,
      _address: &str,
      _paramset_id: &str,
      _values: Map<String, Value>,
    ) -> Result<(), CcuJackError> {
      Ok(())
    }

    async fn set_value(
      &self,
      address: &str,
      value_key: &str,
      value: Value,
    ) -> Result<(), CcuJackError> {
      self
        .set_values
        .lock()
        .unwrap()
        .push((address.to_owned(), value_key.to_owned(), value));
      Ok(())
    }

    async fn ping(&self) -> Result<(), CcuJackError> {
      Ok(())
    }
  }

  struct MockScriptClient;

  #[async_trait]
  impl ScriptClient for MockScriptClient {
    async fn system_variables(&self) -> Result<Vec<SysVarDef>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn programs(&self) -> Result<Vec<ProgramDef>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn read_values(
      &self,
      objects: &[ValObjDef],
    ) -> Result<Vec<Result<ValueReading, CcuJackError>>, CcuJackError> {
      Ok(
        objects
          .iter()
          .map(|_| {
            Ok(ValueReading {
              value: json!(false),
              timestamp: Timestamp(1),
              uncertain: true,
            })
          })
          .collect(),
      )
    }

    async fn read_sys_var(&self, _def: &SysVarDef) -> Result<ValueReading, CcuJackError> {
      unimplemented!()
    }

    async fn write_sys_var(&self, _def: &SysVarDef, _value: Value) -> Result<(), CcuJackError> {
      unimplemented!()
    }

    async fn read_exec_time(&self, _def: &ProgramDef) -> Result<Timestamp, CcuJackError> {
      unimplemented!()
    }

    async fn exec_program(&self, _def: &ProgramDef) -> Result<(), CcuJackError> {
      unimplemented!()
    }
  }

  fn descriptions() -> Vec<DeviceDescription> {
    vec![
      DeviceDescription {
        address: "ABC".to_owned(),
        device_type: "HM-LC-Sw1-Pl".to_owned(),
        children: vec!["ABC:1".to_owned()],
        paramsets: vec!["MASTER".to_owned()],
        ..DeviceDescription::default()
      },
      DeviceDescription {
        address: "ABC:1".to_owned(),
        device_type: "SWITCH".to_owned(),
        parent: "ABC".to_owned(),
        index: 1,
        paramsets: vec!["MASTER".to_owned(), "VALUES".to_owned()],
        ..DeviceDescription::default()
      },
    ]
  }

  fn build() -> (Service, Arc<DeviceCol>, Arc<MockItfClient>) {
    let root = Domain::new(
      DomainCfg {
        identifier: "root".to_owned(),
        title: "Root".to_owned(),
        description: String::new(),
        item_role: "domain".to_owned(),
        child_role: "domain".to_owned(),
      },
      Weak::<Domain>::new(),
    );
    let itf_client = MockItfClient::new();
    let mut intercon = Interconnector::new("CCU-Jack");
    intercon.register(itf_client.clone());
    let device_col = DeviceCol::new(
      root.as_parent(),
      Arc::new(intercon),
      Arc::new(MockScriptClient),
    );
    root.children().put(device_col.clone());
    (Service::new(root), device_col, itf_client)
  }

  #[tokio::test]
  async fn new_devices_then_event_updates_the_pv() {
    let (service, device_col, _itf) = build();
    device_col.start();

    device_col.new_devices("BidCos-RF", descriptions()).await.unwrap();
    device_col.event("BidCos-RF", "ABC:1", "STATE", json!(true)).await.unwrap();
    // let the consumer drain the queue
    tokio::time::sleep(Duration::from_millis(200)).await;

    let pv = service.read_pv("/device/ABC/1/STATE").await.unwrap();
    assert_eq!(pv.value, json!(true));
    assert_eq!(pv.state, State::Good);
    assert!(!pv.time.is_zero());

    device_col.stop().await;
  }

  #[tokio::test]
  async fn event_before_device_creation_is_dropped() {
    let (service, device_col, _itf) = build();
    device_col.start();

    device_col.event("BidCos-RF", "ABC:1", "STATE", json!(true)).await.unwrap();
    device_col.new_devices("BidCos-RF", descriptions()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    // the early event was dropped; the read falls back to the script client
    let pv = service.read_pv("/device/ABC/1/STATE").await.unwrap();
    assert_eq!(pv.value, json!(false));
    assert_eq!(pv.state, State::Uncertain);

    device_col.stop().await;
  }

  #[tokio::test]
  async fn channels_are_removed_before_devices() {
    let (service, device_col, _itf) = build();
    device_col.start();

    device_col.new_devices("BidCos-RF", descriptions()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(service.eval_path("/device/ABC/1").is_ok());

    device_col
      .delete_devices("BidCos-RF", vec!["ABC:1".to_owned(), "ABC".to_owned()])
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(service.eval_path("/device/ABC").is_err());

    device_col.stop().await;
  }

  #[tokio::test]
  async fn parent_child_invariant_holds() {
    let (service, device_col, _itf) = build();
    device_col.start();
    device_col.new_devices("BidCos-RF", descriptions()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let param = service.eval_path("/device/ABC/1/STATE").unwrap();
    let channel = param.parent().expect("parameter has a parent");
    let resolved = channel
      .as_collection()
      .unwrap()
      .item(&param.identifier())
      .expect("channel resolves its parameter");
    assert!(Arc::ptr_eq(&param, &resolved));
    assert_eq!(channel.identifier(), "1");
    assert_eq!(channel.parent().unwrap().identifier(), "ABC");

    device_col.stop().await;
  }

  #[tokio::test]
  async fn mqtt_set_topic_writes_through_to_the_controller() {
    let (service, device_col, itf) = build();
    device_col.start();
    device_col.new_devices("BidCos-RF", descriptions()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let server = ccujack_mqtt::MqttServer::new();
    let mut bridge = ccujack_mqtt::Bridge::new(server.clone(), service.clone());
    bridge.start().await;

    server
      .publish(
        "device/set/ABC/1/STATE",
        br#"{"v":true}"#.to_vec(),
        ccujack_mqtt::QoS::ExactlyOnce,
        false,
      )
      .await
      .unwrap();

    let set_values = itf.set_values.lock().unwrap();
    assert_eq!(set_values.len(), 1);
    assert_eq!(set_values[0], ("ABC:1".to_owned(), "STATE".to_owned(), json!(true)));
    // no status is published until the controller reports an event
    assert!(server.retained("device/status/ABC/1/STATE").is_none());

    drop(set_values);
    bridge.stop();
    device_col.stop().await;
  }
}
