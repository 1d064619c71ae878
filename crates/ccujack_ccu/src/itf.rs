// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! XML-RPC interface process contract: device metadata types, the client
//! used to read and write device parameters, and the receiver for callbacks
//! from the controller.

use async_trait::async_trait;
use ccujack_core::errors::{CcuJackError, CcuJackResult, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Parameter can be read.
pub const OPERATION_READ: u32 = 1;
/// Parameter can be written.
pub const OPERATION_WRITE: u32 = 2;
/// Parameter sends events.
pub const OPERATION_EVENT: u32 = 4;

/// Device metadata as supplied by the controller. Device addresses have the
/// form `DEV`, channel addresses the form `DEV:IDX`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceDescription {
  pub address: String,
  #[serde(rename = "type")]
  pub device_type: String,
  pub rf_address: i64,
  pub children: Vec<String>,
  pub parent: String,
  pub parent_type: String,
  pub index: i32,
  pub aes_active: bool,
  pub paramsets: Vec<String>,
  pub firmware: String,
  pub available_firmware: String,
  pub version: i32,
  pub flags: i32,
  pub link_source_roles: String,
  pub link_target_roles: String,
  pub direction: i32,
  pub group: String,
  pub team: String,
  pub team_tag: String,
  pub team_channels: Vec<String>,
  pub interface: String,
  pub roaming: bool,
  pub rx_mode: i32,
}

impl DeviceDescription {
  /// True for a device address (no channel separator).
  pub fn is_device(&self) -> bool {
    !self.address.contains(':')
  }
}

/// Splits a channel address `DEV:IDX` into device and channel part.
pub fn split_address(address: &str) -> Option<(&str, &str)> {
  address.split_once(':')
}

/// Data type of a parameter.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterType {
  #[serde(rename = "BOOL")]
  Bool,
  #[serde(rename = "ACTION")]
  Action,
  #[serde(rename = "INTEGER")]
  Integer,
  #[serde(rename = "ENUM")]
  Enum,
  #[default]
  #[serde(rename = "FLOAT")]
  Float,
  #[serde(rename = "STRING")]
  String,
}

impl fmt::Display for ParameterType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      ParameterType::Bool => "BOOL",
      ParameterType::Action => "ACTION",
      ParameterType::Integer => "INTEGER",
      ParameterType::Enum => "ENUM",
      ParameterType::Float => "FLOAT",
      ParameterType::String => "STRING",
    };
    write!(f, "{s}")
  }
}

impl ParameterType {
  /// Checks a JSON value against this type. JSON numbers are accepted for
  /// INTEGER/ENUM only when they are integral; this is the single place
  /// where the bridge converts between JSON numbers and parameter values.
  pub fn check_value(&self, value: &Value) -> CcuJackResult {
    let ok = match self {
      ParameterType::Bool | ParameterType::Action => value.is_boolean(),
      ParameterType::Integer | ParameterType::Enum => value.is_i64(),
      ParameterType::Float => value.is_f64() || value.is_i64(),
      ParameterType::String => value.is_string(),
    };
    if ok {
      Ok(())
    } else {
      Err(
        ProtocolError::UnexpectedResponse(format!("Invalid value for type {self}: {value}")).into(),
      )
    }
  }

  /// Converts a JSON number to an integer for INTEGER/ENUM parameters; all
  /// other values pass through unchanged.
  pub fn convert_value(&self, value: Value) -> Value {
    match self {
      ParameterType::Integer | ParameterType::Enum => match value.as_f64() {
        Some(f) if value.is_f64() => Value::from(f as i64),
        _ => value,
      },
      _ => value,
    }
  }
}

/// Special value of a FLOAT/INTEGER parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialValue {
  pub id: String,
  pub value: Value,
}

/// Metadata of a single parameter.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterDescription {
  pub id: String,
  #[serde(rename = "type")]
  pub parameter_type: ParameterType,
  pub operations: u32,
  pub flags: i32,
  pub default: Value,
  pub min: Value,
  pub max: Value,
  pub unit: String,
  pub tab_order: i32,
  pub control: String,
  pub special: Vec<SpecialValue>,
  pub value_list: Vec<String>,
}

impl ParameterDescription {
  pub fn readable(&self) -> bool {
    self.operations & OPERATION_READ != 0
  }

  pub fn writeable(&self) -> bool {
    self.operations & OPERATION_WRITE != 0
  }

  pub fn sends_events(&self) -> bool {
    self.operations & OPERATION_EVENT != 0
  }
}

/// Logical grouping of parameters by id (e.g. `MASTER`, `VALUES`).
pub type ParamsetDescription = HashMap<String, ParameterDescription>;

/// Client of one CCU interface process. The XML-RPC transport behind this
/// trait is an external collaborator.
#[async_trait]
pub trait ItfClient: Send + Sync {
  /// Interface id used in controller callbacks.
  fn interface_id(&self) -> String;

  /// Interface name as used by the ReGaHss for script addressing.
  fn rega_hss_id(&self) -> String;

  async fn get_paramset_description(
    &self,
    address: &str,
    paramset_id: &str,
  ) -> Result<ParamsetDescription, CcuJackError>;

  async fn get_paramset(
    &self,
    address: &str,
    paramset_id: &str,
  ) -> Result<Map<String, Value>, CcuJackError>;

  async fn put_paramset(
    &self,
    address: &str,
    paramset_id: &str,
    values: Map<String, Value>,
  ) -> Result<(), CcuJackError>;

  async fn set_value(&self, address: &str, value_key: &str, value: Value)
  -> Result<(), CcuJackError>;

  /// Liveness probe used by the ready poll.
  async fn ping(&self) -> Result<(), CcuJackError>;
}

/// Receiver for callbacks from the controller. Implementations forward to a
/// next receiver where they only observe the stream.
#[async_trait]
pub trait Receiver: Send + Sync {
  async fn event(
    &self,
    interface_id: &str,
    address: &str,
    value_key: &str,
    value: Value,
  ) -> CcuJackResult;

  async fn new_devices(
    &self,
    interface_id: &str,
    descriptions: Vec<DeviceDescription>,
  ) -> CcuJackResult;

  async fn delete_devices(&self, interface_id: &str, addresses: Vec<String>) -> CcuJackResult;

  async fn update_device(&self, _interface_id: &str, _address: &str, _hint: i32) -> CcuJackResult {
    // not handled at the moment
    Ok(())
  }

  async fn replace_device(
    &self,
    _interface_id: &str,
    _old_device_address: &str,
    _new_device_address: &str,
  ) -> CcuJackResult {
    // not handled at the moment
    Ok(())
  }

  async fn readded_device(
    &self,
    _interface_id: &str,
    _deleted_addresses: Vec<String>,
  ) -> CcuJackResult {
    // not handled at the moment
    Ok(())
  }
}
