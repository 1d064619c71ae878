// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Connects MQTT and VEAP: set topics for device and virtual device data
//! points, and the set/get/status adapters for system variables and
//! programs.

use crate::adapter::VeapAdapter;
use crate::evtreceiver::{DEVICE_SET_TOPIC, DEVICE_VEAP_PATH};
use crate::server::{MqttServer, PublishHandler, QoS, SubscriptionHandle};
use ccujack_core::wire;
use ccujack_veap::Service;
use std::sync::Arc;
use std::time::Duration;

/// Topic prefix for system variables.
pub const SYS_VAR_TOPIC: &str = "sysvar";
/// Path prefix for system variable data points in the VEAP address space.
pub const SYS_VAR_VEAP_PATH: &str = "/sysvar";
/// Delay time for reading back a written system variable.
const SYS_VAR_READ_BACK: Duration = Duration::from_millis(300);

/// Topic prefix for programs.
pub const PRG_TOPIC: &str = "program";
/// Path prefix for programs in the VEAP address space.
pub const PRG_VEAP_PATH: &str = "/program";

/// Topic prefix for virtual device status events.
pub const VIRT_DEV_STATUS_TOPIC: &str = "virtdev/status";
/// Topic prefix for virtual device writes.
pub const VIRT_DEV_SET_TOPIC: &str = "virtdev/set";
/// Path prefix for virtual devices in the VEAP address space.
pub const VIRT_DEV_VEAP_PATH: &str = "/virtdev";

/// Connects MQTT and VEAP.
pub struct Bridge {
  server: Arc<MqttServer>,
  service: Service,

  on_set_device: Option<SubscriptionHandle>,
  on_set_virtdev: Option<SubscriptionHandle>,
  sysvar_adapter: Option<VeapAdapter>,
  prg_adapter: Option<VeapAdapter>,
}

impl Bridge {
  pub fn new(server: Arc<MqttServer>, service: Service) -> Self {
    Bridge {
      server,
      service,
      on_set_device: None,
      on_set_virtdev: None,
      sysvar_adapter: None,
      prg_adapter: None,
    }
  }

  /// Starts the MQTT/VEAP bridge.
  pub async fn start(&mut self) {
    // subscribe set device topics
    let on_set_device = set_handler(self.service.clone(), DEVICE_SET_TOPIC, DEVICE_VEAP_PATH);
    self.on_set_device = self
      .server
      .subscribe(
        &format!("{DEVICE_SET_TOPIC}/+/+/+"),
        QoS::ExactlyOnce,
        on_set_device,
      )
      .await
      .ok();

    // subscribe set virtual device topics
    let on_set_virtdev = set_handler(self.service.clone(), VIRT_DEV_SET_TOPIC, VIRT_DEV_VEAP_PATH);
    self.on_set_virtdev = self
      .server
      .subscribe(
        &format!("{VIRT_DEV_SET_TOPIC}/+/+/+"),
        QoS::ExactlyOnce,
        on_set_virtdev,
      )
      .await
      .ok();

    // adapt VEAP system variables
    let mut sysvar_adapter = VeapAdapter::new(
      SYS_VAR_TOPIC,
      SYS_VAR_VEAP_PATH,
      SYS_VAR_READ_BACK,
      self.server.clone(),
      self.service.clone(),
    );
    sysvar_adapter.start().await;
    self.sysvar_adapter = Some(sysvar_adapter);

    // adapt VEAP programs (no read back)
    let mut prg_adapter = VeapAdapter::new(
      PRG_TOPIC,
      PRG_VEAP_PATH,
      Duration::ZERO,
      self.server.clone(),
      self.service.clone(),
    );
    prg_adapter.start().await;
    self.prg_adapter = Some(prg_adapter);
  }

  /// Stops the MQTT/VEAP bridge.
  pub fn stop(&mut self) {
    if let Some(mut adapter) = self.prg_adapter.take() {
      adapter.stop();
    }
    if let Some(mut adapter) = self.sysvar_adapter.take() {
      adapter.stop();
    }
    if let Some(handle) = self.on_set_virtdev.take() {
      self.server.unsubscribe(handle);
    }
    if let Some(handle) = self.on_set_device.take() {
      self.server.unsubscribe(handle);
    }
  }
}

fn set_handler(service: Service, set_topic: &'static str, veap_path: &'static str) -> PublishHandler {
  Arc::new(move |msg| {
    let service = service.clone();
    Box::pin(async move {
      trace!(
        "Set message received: {}: {}",
        msg.topic,
        String::from_utf8_lossy(&msg.payload)
      );
      let pv = wire::wire_to_pv(&msg.payload);
      let Some(path) = msg.topic.strip_prefix(set_topic).filter(|p| p.starts_with('/'))
      else {
        warn!("Unexpected topic: {}", msg.topic);
        return;
      };
      let full_path = format!("{veap_path}{path}");
      if let Err(err) = service.write_pv(&full_path, pv).await {
        // MQTT has no reply channel, the error only shows up here
        warn!("Write of {full_path} failed: {err}");
      }
    })
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_core::{Pv, State};
  use ccujack_veap::{Domain, DomainCfg, Variable, VariableCfg, VeapError};
  use serde_json::json;
  use std::sync::{Mutex, Weak};

  fn writable_leaf(
    parent: &Arc<Domain>,
    id: &str,
  ) -> Arc<Mutex<Vec<Pv>>> {
    let written = Arc::new(Mutex::new(Vec::new()));
    let sink = written.clone();
    let var = Variable::new(
      VariableCfg {
        identifier: id.to_owned(),
        title: id.to_owned(),
        description: String::new(),
        read_pv: Box::new(|| Err(VeapError::MethodNotAllowed("write only".to_owned()))),
        write_pv: Box::new(move |pv| {
          sink.lock().unwrap().push(pv);
          Ok(())
        }),
      },
      parent.as_parent(),
    );
    parent.children().put(var);
    written
  }

  fn device_tree() -> (Service, Arc<Mutex<Vec<Pv>>>) {
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
    let device_col = Domain::attached(
      DomainCfg {
        identifier: "device".to_owned(),
        title: "Devices".to_owned(),
        description: "CCU Devices".to_owned(),
        item_role: "domain".to_owned(),
        child_role: "device".to_owned(),
      },
      &root,
    );
    let dev = Domain::attached(
      DomainCfg {
        identifier: "A".to_owned(),
        title: "A".to_owned(),
        description: String::new(),
        item_role: "device".to_owned(),
        child_role: "channel".to_owned(),
      },
      &device_col,
    );
    let ch = Domain::attached(
      DomainCfg {
        identifier: "1".to_owned(),
        title: "A:1".to_owned(),
        description: String::new(),
        item_role: "channel".to_owned(),
        child_role: "parameter".to_owned(),
      },
      &dev,
    );
    let written = writable_leaf(&ch, "K");
    (Service::new(root), written)
  }

  #[tokio::test]
  async fn set_topic_writes_through_to_the_service() {
    let server = MqttServer::new();
    let (service, written) = device_tree();
    let mut bridge = Bridge::new(server.clone(), service);
    bridge.start().await;

    server
      .publish("device/set/A/1/K", br#"{"v":42}"#.to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();

    let written = written.lock().unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].value, json!(42));
    assert_eq!(written[0].state, State::Good);
    assert!(!written[0].time.is_zero());
  }

  #[tokio::test]
  async fn decoder_fallbacks_apply_to_set_payloads() {
    let server = MqttServer::new();
    let (service, written) = device_tree();
    let mut bridge = Bridge::new(server.clone(), service);
    bridge.start().await;

    server
      .publish("device/set/A/1/K", b"42".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    server
      .publish("device/set/A/1/K", b"hello".to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();

    let written = written.lock().unwrap();
    assert_eq!(written[0].value, json!(42));
    assert_eq!(written[1].value, json!("hello"));
  }

  #[tokio::test]
  async fn unknown_paths_are_dropped() {
    let server = MqttServer::new();
    let (service, written) = device_tree();
    let mut bridge = Bridge::new(server.clone(), service);
    bridge.start().await;

    server
      .publish("device/set/B/1/K", br#"{"v":1}"#.to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    assert!(written.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn stop_removes_subscriptions() {
    let server = MqttServer::new();
    let (service, written) = device_tree();
    let mut bridge = Bridge::new(server.clone(), service);
    bridge.start().await;
    bridge.stop();

    server
      .publish("device/set/A/1/K", br#"{"v":1}"#.to_vec(), QoS::ExactlyOnce, false)
      .await
      .unwrap();
    assert!(written.lock().unwrap().is_empty());
  }
}
