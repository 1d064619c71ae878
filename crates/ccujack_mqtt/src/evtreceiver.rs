// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Accepts controller callbacks, publishes value events to the MQTT server
//! and then forwards them to the next receiver.

use crate::server::{MqttServer, QoS};
use async_trait::async_trait;
use ccujack_ccu::itf::{DeviceDescription, Receiver, split_address};
use ccujack_core::errors::{CcuJackResult, ProtocolError};
use ccujack_core::{Pv, State, Timestamp};
use serde_json::Value;
use std::sync::Arc;

pub const DEVICE_STATUS_TOPIC: &str = "device/status";
pub const DEVICE_SET_TOPIC: &str = "device/set";
/// Path prefix for device data points in the VEAP address space.
pub const DEVICE_VEAP_PATH: &str = "/device";

/// Retain all values except actions.
pub fn retain_for_key(value_key: &str) -> bool {
  value_key != "INSTALL_TEST" && !value_key.starts_with("PRESS_")
}

pub struct EventReceiver {
  /// Server for publishing events.
  pub server: Arc<MqttServer>,
  /// Next handler for controller events.
  pub next: Arc<dyn Receiver>,
}

impl EventReceiver {
  async fn publish_event(&self, address: &str, value_key: &str, value: &Value) -> CcuJackResult {
    let (dev, ch) = split_address(address).ok_or_else(|| {
      ProtocolError::UnexpectedResponse(format!("Unexpected event from a device: {address}"))
    })?;
    let topic = format!("{DEVICE_STATUS_TOPIC}/{dev}/{ch}/{value_key}");
    let pv = Pv {
      time: Timestamp::now(),
      value: value.clone(),
      state: State::Good,
    };
    self
      .server
      .publish_pv(&topic, pv, QoS::AtLeastOnce, retain_for_key(value_key))
      .await
  }
}

#[async_trait]
impl Receiver for EventReceiver {
  async fn event(
    &self,
    interface_id: &str,
    address: &str,
    value_key: &str,
    value: Value,
  ) -> CcuJackResult {
    if let Err(err) = self.publish_event(address, value_key, &value).await {
      error!("Publish of event failed: {err}");
    }
    // forward event
    self.next.event(interface_id, address, value_key, value).await
  }

  async fn new_devices(
    &self,
    interface_id: &str,
    descriptions: Vec<DeviceDescription>,
  ) -> CcuJackResult {
    // only forward
    self.next.new_devices(interface_id, descriptions).await
  }

  async fn delete_devices(&self, interface_id: &str, addresses: Vec<String>) -> CcuJackResult {
    // only forward
    self.next.delete_devices(interface_id, addresses).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  struct NullReceiver;

  #[async_trait]
  impl Receiver for NullReceiver {
    async fn event(&self, _: &str, _: &str, _: &str, _: Value) -> CcuJackResult {
      Ok(())
    }

    async fn new_devices(&self, _: &str, _: Vec<DeviceDescription>) -> CcuJackResult {
      Ok(())
    }

    async fn delete_devices(&self, _: &str, _: Vec<String>) -> CcuJackResult {
      Ok(())
    }
  }

  #[tokio::test]
  async fn events_are_published_with_retain_policy() {
    let server = MqttServer::new();
    let receiver = EventReceiver {
      server: server.clone(),
      next: Arc::new(NullReceiver),
    };
    receiver
      .event("id", "DEV:2", "PRESS_SHORT", json!(true))
      .await
      .unwrap();
    receiver.event("id", "DEV:2", "STATE", json!(true)).await.unwrap();
    receiver
      .event("id", "DEV:2", "INSTALL_TEST", json!(true))
      .await
      .unwrap();

    // actions are not retained
    assert!(server.retained("device/status/DEV/2/PRESS_SHORT").is_none());
    assert!(server.retained("device/status/DEV/2/INSTALL_TEST").is_none());
    let retained = server.retained("device/status/DEV/2/STATE").unwrap();
    assert_eq!(retained.qos, QoS::AtLeastOnce);
    let pv = ccujack_core::wire::wire_to_pv(&retained.payload);
    assert_eq!(pv.value, json!(true));
    assert_eq!(pv.state, State::Good);
  }

  #[tokio::test]
  async fn device_level_events_are_rejected_but_forwarded() {
    let server = MqttServer::new();
    let receiver = EventReceiver {
      server: server.clone(),
      next: Arc::new(NullReceiver),
    };
    // no channel separator: publish fails internally, forward still happens
    receiver.event("id", "DEV", "STATE", json!(1)).await.unwrap();
    assert!(server.retained("device/status/DEV/STATE").is_none());
  }
}
