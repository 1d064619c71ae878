// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The configuration document. Field names follow the JSON file layout.

use ccujack_core::errors::ConfigError;
use enumflags2::{BitFlags, bitflags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// The CCU3 is a constrained device; the minimal bcrypt cost keeps log-ins
// usable there. This matches the cost the configuration files were created
// with, so hashes stay verifiable.
const BCRYPT_COST: u32 = 4;

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
  #[serde(rename = "CCU")]
  pub ccu: CcuCfg,
  #[serde(rename = "Host")]
  pub host: HostCfg,
  #[serde(rename = "Logging")]
  pub logging: LoggingCfg,
  #[serde(rename = "HTTP")]
  pub http: HttpCfg,
  #[serde(rename = "MQTT")]
  pub mqtt: MqttCfg,
  #[serde(rename = "BINRPC")]
  pub binrpc: BinRpcCfg,
  #[serde(rename = "Certificates")]
  pub certificates: CertificatesCfg,
  #[serde(rename = "Users")]
  pub users: HashMap<String, User>,
  #[serde(rename = "VirtualDevices")]
  pub virtual_devices: VirtualDevicesCfg,
}

impl Config {
  /// Fills in values that must always be present and converts plain text
  /// passwords into bcrypt hashes. Returns true when the document was
  /// changed and should be written back.
  pub fn normalize(&mut self) -> Result<bool, ConfigError> {
    let mut modified = false;
    if self.host.name.is_empty() {
      self.host.name = gethostname::gethostname().to_string_lossy().into_owned();
      modified = true;
    }
    if self.http.port == 0 {
      self.http.port = 2121;
      modified = true;
    }
    if self.http.port_tls == 0 {
      self.http.port_tls = 2122;
      modified = true;
    }
    if self.mqtt.port == 0 {
      self.mqtt.port = 1883;
      modified = true;
    }
    if self.mqtt.port_tls == 0 {
      self.mqtt.port_tls = 8883;
      modified = true;
    }
    if self.binrpc.port == 0 {
      self.binrpc.port = 2123;
      modified = true;
    }
    for user in self.users.values_mut() {
      if !user.password.is_empty() {
        user.set_password(&user.password.clone())?;
        user.password.clear();
        modified = true;
      }
    }
    Ok(modified)
  }

  /// Authenticates a user for an endpoint. Inactive users and users without
  /// a permission on the endpoint never match.
  pub fn authenticate(&self, endpoint: Endpoint, identifier: &str, password: &str) -> Option<&User> {
    let user = self.users.get(identifier)?;
    if !user.active {
      return None;
    }
    if !user
      .permissions
      .values()
      .any(|per| per.endpoint.contains(endpoint))
    {
      return None;
    }
    match bcrypt::verify(password, &user.encrypted_password) {
      Ok(true) => Some(user),
      _ => None,
    }
  }

  pub fn has_active_user(&self) -> bool {
    self.users.values().any(|u| u.active)
  }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CcuCfg {
  #[serde(rename = "Address")]
  pub address: String,
  #[serde(rename = "Interfaces")]
  pub interfaces: Vec<InterfaceType>,
  #[serde(rename = "InitID")]
  pub init_id: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostCfg {
  #[serde(rename = "Name")]
  pub name: String,
  #[serde(rename = "Address")]
  pub address: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingCfg {
  #[serde(rename = "Level")]
  pub level: LogLevel,
  #[serde(rename = "FilePath")]
  pub file_path: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HttpCfg {
  #[serde(rename = "Port")]
  pub port: u16,
  #[serde(rename = "PortTLS")]
  pub port_tls: u16,
  #[serde(rename = "CORSOrigins")]
  pub cors_origins: Vec<String>,
  #[serde(rename = "WebUIDir")]
  pub web_ui_dir: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttCfg {
  #[serde(rename = "Port")]
  pub port: u16,
  #[serde(rename = "PortTLS")]
  pub port_tls: u16,
  #[serde(rename = "WebSocketPath")]
  pub web_socket_path: String,
  #[serde(rename = "Bridge")]
  pub bridge: MqttBridgeCfg,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BinRpcCfg {
  #[serde(rename = "Port")]
  pub port: u16,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CertificatesCfg {
  #[serde(rename = "CACertFile")]
  pub ca_cert_file: String,
  #[serde(rename = "CAKeyFile")]
  pub ca_key_file: String,
  #[serde(rename = "ServerCertFile")]
  pub server_cert_file: String,
  #[serde(rename = "ServerKeyFile")]
  pub server_key_file: String,
}

/// Connection of the embedded MQTT server to a remote one.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MqttBridgeCfg {
  #[serde(rename = "Enable")]
  pub enable: bool,
  #[serde(rename = "Address")]
  pub address: String,
  #[serde(rename = "Port")]
  pub port: u16,
  #[serde(rename = "UseTLS")]
  pub use_tls: bool,
  #[serde(rename = "CACertFile")]
  pub ca_cert_file: String,
  #[serde(rename = "Insecure")]
  pub insecure: bool,
  #[serde(rename = "BufferSize")]
  pub buffer_size: usize,
  #[serde(rename = "CleanSession")]
  pub clean_session: bool,
  #[serde(rename = "ClientID")]
  pub client_id: String,
  #[serde(rename = "Username")]
  pub username: String,
  #[serde(rename = "Password")]
  pub password: String,
  #[serde(rename = "Incoming")]
  pub incoming: Vec<SharedTopic>,
  #[serde(rename = "Outgoing")]
  pub outgoing: Vec<SharedTopic>,
}

/// Topic subtree shared with the remote MQTT server.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SharedTopic {
  #[serde(rename = "Pattern")]
  pub pattern: String,
  #[serde(rename = "LocalPrefix")]
  pub local_prefix: String,
  #[serde(rename = "RemotePrefix")]
  pub remote_prefix: String,
  #[serde(rename = "QoS")]
  pub qos: u8,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VirtualDevicesCfg {
  #[serde(rename = "Enable")]
  pub enable: bool,
  #[serde(rename = "NextSerialNo")]
  pub next_serial_no: u32,
  #[serde(rename = "Devices")]
  pub devices: HashMap<String, VirtualDeviceCfg>,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VirtualDeviceCfg {
  #[serde(rename = "Address")]
  pub address: String,
  #[serde(rename = "HMType")]
  pub hm_type: String,
  #[serde(rename = "Channels")]
  pub channels: Vec<ChannelCfg>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelCfg {
  #[serde(rename = "Kind")]
  pub kind: ChannelKind,
  #[serde(rename = "MasterParamset", default)]
  pub master_paramset: HashMap<String, Value>,
}

/// Closed set of virtual device channel kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelKind {
  #[serde(rename = "KEY")]
  Key,
  #[serde(rename = "SWITCH")]
  Switch,
  #[serde(rename = "ANALOG_INPUT")]
  AnalogInput,
  #[serde(rename = "DOOR_SENSOR")]
  DoorSensor,
  #[serde(rename = "DIMMER")]
  Dimmer,
  #[serde(rename = "TEMPERATURE")]
  Temperature,
  #[serde(rename = "POWER_METER")]
  PowerMeter,
  #[serde(rename = "MQTT_KEY_SENDER")]
  MqttKeySender,
  #[serde(rename = "MQTT_KEY_RECEIVER")]
  MqttKeyReceiver,
  #[serde(rename = "MQTT_SWITCH")]
  MqttSwitch,
  #[serde(rename = "MQTT_SWITCH_FEEDBACK")]
  MqttSwitchFeedback,
  #[serde(rename = "MQTT_ANALOG_RECEIVER")]
  MqttAnalogReceiver,
  #[serde(rename = "MQTT_DOOR_SENSOR")]
  MqttDoorSensor,
  #[serde(rename = "MQTT_DIMMER")]
  MqttDimmer,
  #[serde(rename = "MQTT_TEMPERATURE")]
  MqttTemperature,
  #[serde(rename = "MQTT_POWER_METER")]
  MqttPowerMeter,
  #[serde(rename = "MQTT_ENERGY_COUNTER")]
  MqttEnergyCounter,
  #[serde(rename = "MQTT_GAS_COUNTER")]
  MqttGasCounter,
  #[serde(rename = "MQTT_UNREACH")]
  MqttUnreach,
}

/// A user of the VEAP or MQTT endpoint.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct User {
  #[serde(rename = "Identifier")]
  pub identifier: String,
  #[serde(rename = "Active")]
  pub active: bool,
  #[serde(rename = "Description")]
  pub description: String,
  /// Plain text password; only ever present in hand-edited files. Hashed and
  /// erased on load.
  #[serde(rename = "Password", skip_serializing_if = "String::is_empty")]
  pub password: String,
  #[serde(rename = "EncryptedPassword")]
  pub encrypted_password: String,
  #[serde(rename = "Permissions")]
  pub permissions: HashMap<String, Permission>,
}

impl User {
  /// Generates a new bcrypt hash for the password.
  pub fn set_password(&mut self, password: &str) -> Result<(), ConfigError> {
    let hash = bcrypt::hash(password, BCRYPT_COST)
      .map_err(|err| ConfigError::PasswordHash(err.to_string()))?;
    self.encrypted_password = hash;
    Ok(())
  }

  pub fn add_permission(&mut self, permission: Permission) {
    self
      .permissions
      .insert(permission.identifier.clone(), permission);
  }

  /// Checks whether an authorization exists. The request must contain only a
  /// single endpoint and kind.
  pub fn authorized(&self, endpoint: Endpoint, kind: PermKind, pv_path: &str) -> bool {
    for per in self.permissions.values() {
      if per.endpoint.contains(endpoint) && per.kind.contains(kind) {
        if per.pv_filter.is_empty() {
          return true;
        }
        match glob::Pattern::new(&per.pv_filter) {
          Ok(pattern) => {
            if pattern.matches(pv_path) {
              return true;
            }
          }
          Err(_) => {
            warn!("Invalid PV filter in security configuration: {}", per.pv_filter);
            return false;
          }
        }
      }
    }
    false
  }
}

/// An allowance to access something.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Permission {
  #[serde(rename = "Identifier")]
  pub identifier: String,
  #[serde(rename = "Description")]
  pub description: String,
  #[serde(rename = "Endpoint")]
  pub endpoint: BitFlags<Endpoint>,
  #[serde(rename = "Kind")]
  pub kind: BitFlags<PermKind>,
  /// Pattern syntax q.v. `glob::Pattern`.
  #[serde(rename = "PVFilter")]
  pub pv_filter: String,
}

/// A communication interface/protocol.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
  Veap = 0b01,
  Mqtt = 0b10,
}

/// The kind of a permission.
#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermKind {
  Config = 0b001,
  ReadPv = 0b010,
  WritePv = 0b100,
}

/// Log severity threshold.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Error,
  Warning,
  #[default]
  Info,
  Debug,
  Trace,
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Off => "off",
      LogLevel::Error => "error",
      LogLevel::Warning => "warning",
      LogLevel::Info => "info",
      LogLevel::Debug => "debug",
      LogLevel::Trace => "trace",
    };
    write!(f, "{s}")
  }
}

impl FromStr for LogLevel {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "off" => Ok(LogLevel::Off),
      "error" => Ok(LogLevel::Error),
      "warning" => Ok(LogLevel::Warning),
      "info" => Ok(LogLevel::Info),
      "debug" => Ok(LogLevel::Debug),
      "trace" => Ok(LogLevel::Trace),
      other => Err(ConfigError::InvalidLogLevel(other.to_owned())),
    }
  }
}

/// CCU interface processes the bridge can attach to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum InterfaceType {
  BidCosWired,
  BidCosRF,
  System,
  HmIPRF,
  VirtualDevices,
  CUxD,
}

impl fmt::Display for InterfaceType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      InterfaceType::BidCosWired => "BidCosWired",
      InterfaceType::BidCosRF => "BidCosRF",
      InterfaceType::System => "System",
      InterfaceType::HmIPRF => "HmIPRF",
      InterfaceType::VirtualDevices => "VirtualDevices",
      InterfaceType::CUxD => "CUxD",
    };
    write!(f, "{s}")
  }
}

impl FromStr for InterfaceType {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "BidCosWired" => Ok(InterfaceType::BidCosWired),
      "BidCosRF" => Ok(InterfaceType::BidCosRF),
      "System" => Ok(InterfaceType::System),
      "HmIPRF" => Ok(InterfaceType::HmIPRF),
      "VirtualDevices" => Ok(InterfaceType::VirtualDevices),
      "CUxD" => Ok(InterfaceType::CUxD),
      other => Err(ConfigError::InvalidInterfaceType(other.to_owned())),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalize_fills_defaults_and_hashes_passwords() {
    let mut cfg = Config::default();
    cfg.users.insert(
      "admin".to_owned(),
      User {
        identifier: "admin".to_owned(),
        active: true,
        password: "secret".to_owned(),
        ..User::default()
      },
    );
    assert!(cfg.normalize().unwrap());
    assert_eq!(cfg.http.port, 2121);
    assert_eq!(cfg.mqtt.port, 1883);
    assert!(!cfg.host.name.is_empty());
    let user = &cfg.users["admin"];
    assert!(user.password.is_empty());
    assert!(bcrypt::verify("secret", &user.encrypted_password).unwrap());
    // a second pass changes nothing
    assert!(!cfg.normalize().unwrap());
  }

  #[test]
  fn channel_kind_names_are_stable() {
    let json = serde_json::to_string(&ChannelKind::MqttKeySender).unwrap();
    assert_eq!(json, r#""MQTT_KEY_SENDER""#);
    let kind: ChannelKind = serde_json::from_str(r#""MQTT_UNREACH""#).unwrap();
    assert_eq!(kind, ChannelKind::MqttUnreach);
  }

  #[test]
  fn authorized_requires_endpoint_kind_and_filter() {
    let mut user = User {
      identifier: "sub".to_owned(),
      active: true,
      ..User::default()
    };
    user.set_password("pwd").unwrap();
    user.add_permission(Permission {
      identifier: "per".to_owned(),
      endpoint: Endpoint::Veap.into(),
      kind: PermKind::WritePv.into(),
      pv_filter: "/A[01]/B".to_owned(),
      ..Permission::default()
    });
    assert!(!user.authorized(Endpoint::Mqtt, PermKind::WritePv, "/A0/B"));
    assert!(!user.authorized(Endpoint::Veap, PermKind::ReadPv, "/A0/B"));
    assert!(!user.authorized(Endpoint::Veap, PermKind::WritePv, "/A2/B"));
    assert!(user.authorized(Endpoint::Veap, PermKind::WritePv, "/A1/B"));
  }

  #[test]
  fn empty_filter_matches_all() {
    let mut user = User {
      active: true,
      ..User::default()
    };
    user.add_permission(Permission {
      identifier: "all".to_owned(),
      endpoint: Endpoint::Veap | Endpoint::Mqtt,
      kind: PermKind::Config | PermKind::ReadPv | PermKind::WritePv,
      ..Permission::default()
    });
    assert!(user.authorized(Endpoint::Veap, PermKind::ReadPv, "/anything/at/all"));
  }

  #[test]
  fn authenticate_checks_activity_endpoint_and_password() {
    let mut cfg = Config::default();
    let mut user = User {
      identifier: "sub".to_owned(),
      active: true,
      ..User::default()
    };
    user.set_password("pwd").unwrap();
    user.add_permission(Permission {
      identifier: "per".to_owned(),
      endpoint: Endpoint::Veap.into(),
      kind: PermKind::ReadPv.into(),
      ..Permission::default()
    });
    cfg.users.insert("sub".to_owned(), user);

    assert!(cfg.authenticate(Endpoint::Veap, "unknown-sub", "pwd").is_none());
    assert!(cfg.authenticate(Endpoint::Mqtt, "sub", "pwd").is_none());
    assert!(cfg.authenticate(Endpoint::Veap, "sub", "wrong-pwd").is_none());
    assert!(cfg.authenticate(Endpoint::Veap, "sub", "pwd").is_some());

    cfg.users.get_mut("sub").unwrap().active = false;
    assert!(cfg.authenticate(Endpoint::Veap, "sub", "pwd").is_none());
  }
}
