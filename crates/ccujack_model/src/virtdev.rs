// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `/virtdev` domain: a VEAP façade over the virtual device container.
//! The node objects exist only temporarily during a VEAP request.

use crate::device::{device_descr_to_attrs, param_descr_to_attrs};
use async_trait::async_trait;
use ccujack_core::{Pv, State, Timestamp};
use ccujack_veap::{AttrValues, Collection, Node, PvReader, PvWriter, VeapError};
use ccujack_virtdev::device::{Channel, Container, Device, Parameter};
use ccujack_virtdev::INTERFACE_ID;
use serde_json::{Value, json};
use std::sync::{Arc, Weak};

/// The `/virtdev` domain.
pub struct VirtualDeviceCol {
  parent: Weak<dyn Node>,
  container: Arc<Container>,
  self_weak: Weak<VirtualDeviceCol>,
}

impl VirtualDeviceCol {
  pub fn new(parent: Weak<dyn Node>, container: Arc<Container>) -> Arc<VirtualDeviceCol> {
    Arc::new_cyclic(|self_weak| VirtualDeviceCol {
      parent,
      container,
      self_weak: self_weak.clone(),
    })
  }

  fn device_node(&self, device: Arc<Device>) -> Arc<VirtualDeviceNode> {
    let parent: Weak<dyn Node> = self.self_weak.clone();
    Arc::new_cyclic(|self_weak| VirtualDeviceNode {
      device,
      parent,
      self_weak: self_weak.clone(),
    })
  }
}

#[async_trait]
impl Node for VirtualDeviceCol {
  fn identifier(&self) -> String {
    "virtdev".to_owned()
  }

  fn title(&self) -> String {
    "Virtual Devices".to_owned()
  }

  fn description(&self) -> String {
    "Virtual devices of the CCU-Jack".to_owned()
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

impl Collection for VirtualDeviceCol {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self
      .container
      .devices()
      .into_iter()
      .map(|d| self.device_node(d) as Arc<dyn Node>)
      .collect()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    let device = self.container.device(id).ok()?;
    Some(self.device_node(device))
  }

  fn child_role(&self) -> String {
    "device".to_owned()
  }
}

struct VirtualDeviceNode {
  device: Arc<Device>,
  parent: Weak<dyn Node>,
  self_weak: Weak<VirtualDeviceNode>,
}

impl VirtualDeviceNode {
  fn channel_node(&self, channel: Arc<Channel>) -> Arc<VirtualChannelNode> {
    let parent: Weak<dyn Node> = self.self_weak.clone();
    Arc::new_cyclic(|self_weak| VirtualChannelNode {
      channel,
      parent,
      self_weak: self_weak.clone(),
    })
  }
}

#[async_trait]
impl Node for VirtualDeviceNode {
  fn identifier(&self) -> String {
    self.device.address()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "device".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = device_descr_to_attrs(&self.device.description());
    attrs.insert("interfaceType".to_owned(), json!(INTERFACE_ID));
    attrs
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for VirtualDeviceNode {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self
      .device
      .channels()
      .into_iter()
      .map(|c| self.channel_node(c) as Arc<dyn Node>)
      .collect()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    let channel = self.device.channel(id).ok()?;
    Some(self.channel_node(channel))
  }

  fn child_role(&self) -> String {
    "channel".to_owned()
  }
}

struct VirtualChannelNode {
  channel: Arc<Channel>,
  parent: Weak<dyn Node>,
  self_weak: Weak<VirtualChannelNode>,
}

impl VirtualChannelNode {
  fn parameter_node(&self, parameter: Arc<Parameter>) -> Arc<VirtualParameterNode> {
    let parent: Weak<dyn Node> = self.self_weak.clone();
    Arc::new(VirtualParameterNode {
      channel: self.channel.clone(),
      parameter,
      parent,
    })
  }
}

#[async_trait]
impl Node for VirtualChannelNode {
  fn identifier(&self) -> String {
    // only the channel index
    self.channel.index().to_string()
  }

  fn title(&self) -> String {
    self.channel.address().to_owned()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "channel".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    device_descr_to_attrs(self.channel.description())
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for VirtualChannelNode {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    let mut items: Vec<Arc<dyn Node>> = self
      .channel
      .value_paramset()
      .parameters()
      .into_iter()
      .map(|p| self.parameter_node(p) as Arc<dyn Node>)
      .collect();
    let parent: Weak<dyn Node> = self.self_weak.clone();
    items.push(Arc::new(VirtualParamsetNode {
      channel: self.channel.clone(),
      parent,
    }));
    items
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    if id == "$MASTER" {
      let parent: Weak<dyn Node> = self.self_weak.clone();
      return Some(Arc::new(VirtualParamsetNode {
        channel: self.channel.clone(),
        parent,
      }));
    }
    let parameter = self.channel.value_paramset().parameter(id).ok()?;
    Some(self.parameter_node(parameter))
  }

  fn child_role(&self) -> String {
    "parameter".to_owned()
  }
}

struct VirtualParameterNode {
  channel: Arc<Channel>,
  parameter: Arc<Parameter>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for VirtualParameterNode {
  fn identifier(&self) -> String {
    self.parameter.description.id.clone()
  }

  fn title(&self) -> String {
    format!("{} - {}", self.channel.address(), self.parameter.description.id)
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "parameter".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let descr = self.channel.description();
    let dev = descr.parent.clone();
    let ch = self.channel.index().to_string();
    param_descr_to_attrs(&self.parameter.description, "virtdev", &dev, &ch)
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for VirtualParameterNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    Ok(Pv {
      time: Timestamp::now(),
      value: self.parameter.value(),
      state: State::Good,
    })
  }
}

#[async_trait]
impl PvWriter for VirtualParameterNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    self.parameter.set_value(pv.value).map_err(|err| {
      VeapError::BadRequest(format!(
        "Writing parameter {}.{} failed: {err}",
        self.channel.address(),
        self.parameter.description.id
      ))
    })
  }
}

/// The `$MASTER` paramset of a virtual channel. Writing persists the master
/// parameters and restarts the channel subscriptions.
struct VirtualParamsetNode {
  channel: Arc<Channel>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for VirtualParamsetNode {
  fn identifier(&self) -> String {
    "$MASTER".to_owned()
  }

  fn description(&self) -> String {
    format!("Parameter set MASTER of channel {}", self.channel.address())
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "paramset".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = AttrValues::new();
    for param in self.channel.master_paramset().parameters() {
      let d = &param.description;
      attrs.insert(
        d.id.clone(),
        json!({
          "type": d.parameter_type.to_string(),
          "operations": d.operations,
          "default": d.default,
          "maximum": d.max,
          "minimum": d.min,
          "unit": d.unit,
          "id": d.id,
          "valueList": d.value_list,
        }),
      );
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
impl PvReader for VirtualParamsetNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    let mut values = serde_json::Map::new();
    for param in self.channel.master_paramset().parameters() {
      values.insert(param.description.id.clone(), param.value());
    }
    Ok(Pv {
      time: Timestamp::now(),
      value: Value::Object(values),
      state: State::Good,
    })
  }
}

#[async_trait]
impl PvWriter for VirtualParamsetNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    let Value::Object(values) = pv.value else {
      return Err(VeapError::BadRequest(format!(
        "Writing parameter set MASTER of {} failed: Invalid type (expected JSON object)",
        self.channel.address()
      )));
    };
    self.channel.put_master_paramset(values).await.map_err(|err| {
      VeapError::BadRequest(format!(
        "Writing parameter set MASTER of {} failed: {err}",
        self.channel.address()
      ))
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_veap::{Domain, DomainCfg, Service};
  use ccujack_virtdev::device::NullEventPublisher;

  #[tokio::test]
  async fn facade_mirrors_the_container() {
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
    let container = Container::new();
    let device = Device::new("JACK01", "HM-LC-Sw1-Pl", Arc::new(NullEventPublisher));
    let channel = device.add_channel("SWITCH");
    channel.add_master_param(Parameter::new_string("TOPIC"));
    let state = channel.add_value_param(Parameter::new_bool("STATE"));
    state.update(json!(true));
    container.add_device(device).unwrap();

    let col = VirtualDeviceCol::new(root.as_parent(), container);
    root.children().put(col);
    let service = Service::new(root);

    let pv = service.read_pv("/virtdev/JACK01/0/STATE").await.unwrap();
    assert_eq!(pv.value, json!(true));

    // master paramset façade
    let pv = service.read_pv("/virtdev/JACK01/0/$MASTER").await.unwrap();
    assert_eq!(pv.value, json!({"TOPIC": ""}));
    service
      .write_pv(
        "/virtdev/JACK01/0/$MASTER",
        Pv::new(json!({"TOPIC": "stat/light"})),
      )
      .await
      .unwrap();
    let pv = service.read_pv("/virtdev/JACK01/0/$MASTER").await.unwrap();
    assert_eq!(pv.value, json!({"TOPIC": "stat/light"}));

    // unknown master parameters are rejected
    let err = service
      .write_pv("/virtdev/JACK01/0/$MASTER", Pv::new(json!({"NOPE": 1})))
      .await
      .unwrap_err();
    assert!(matches!(err, VeapError::BadRequest(_)));
  }
}
