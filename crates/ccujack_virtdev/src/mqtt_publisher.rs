// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Publishes value change events of virtual devices to the MQTT server.

use crate::device::EventPublisher;
use ccujack_ccu::itf::split_address;
use ccujack_core::util::async_manager;
use ccujack_core::{Pv, State, Timestamp};
use ccujack_mqtt::bridge::VIRT_DEV_STATUS_TOPIC;
use ccujack_mqtt::{MqttServer, QoS};
use serde_json::Value;
use std::sync::Arc;

pub struct VirtDevEventReceiver {
  /// Server for publishing events.
  pub server: Arc<MqttServer>,
}

impl EventPublisher for VirtDevEventReceiver {
  fn publish_event(&self, address: &str, value_key: &str, value: Value) {
    let Some((dev, ch)) = split_address(address) else {
      error!("Unexpected event from a virtual device: {address}");
      return;
    };
    let topic = format!("{VIRT_DEV_STATUS_TOPIC}/{dev}/{ch}/{value_key}");
    let pv = Pv {
      time: Timestamp::now(),
      value,
      state: State::Good,
    };
    // retain all except actions
    let (qos, retain) = if value_key != "INSTALL_TEST" && !value_key.starts_with("PRESS_") {
      (QoS::AtLeastOnce, true)
    } else {
      (QoS::ExactlyOnce, false)
    };
    let server = self.server.clone();
    async_manager::spawn(async move {
      if let Err(err) = server.publish_pv(&topic, pv, qos, retain).await {
        error!("{err}");
      }
    });
  }
}
