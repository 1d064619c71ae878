// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Generic adapter between a VEAP subtree and a set/get/status topic triple.
//! Used for system variables and programs.

use crate::server::{MqttServer, PublishHandler, QoS, SubscriptionHandle};
use ccujack_core::util::async_manager;
use ccujack_core::wire;
use ccujack_veap::Service;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counts active callbacks so `stop` can wait for them to drain. New
/// callbacks fail fast once quit is signalled.
pub(crate) struct CallbackGuard {
  state: Mutex<GuardState>,
  cond: Condvar,
}

struct GuardState {
  quit: bool,
  count: usize,
}

impl CallbackGuard {
  pub(crate) fn new() -> Arc<Self> {
    Arc::new(CallbackGuard {
      state: Mutex::new(GuardState {
        quit: false,
        count: 0,
      }),
      cond: Condvar::new(),
    })
  }

  /// Registers a callback; `None` once quit is signalled. The returned entry
  /// unregisters on drop.
  pub(crate) fn enter(self: &Arc<Self>) -> Option<CallbackEntry> {
    let mut state = self.state.lock().expect("guard lock");
    if state.quit {
      return None;
    }
    state.count += 1;
    Some(CallbackEntry {
      guard: self.clone(),
    })
  }

  /// Signals quit and waits for the completion of pending callbacks.
  pub(crate) fn stop(&self) {
    let mut state = self.state.lock().expect("guard lock");
    state.quit = true;
    while state.count > 0 {
      state = self.cond.wait(state).expect("guard lock");
    }
  }
}

pub(crate) struct CallbackEntry {
  guard: Arc<CallbackGuard>,
}

impl Drop for CallbackEntry {
  fn drop(&mut self) {
    let mut state = self.guard.state.lock().expect("guard lock");
    state.count -= 1;
    self.guard.cond.notify_one();
  }
}

/// Maps `<topic>/set/+` and `<topic>/get/+` to PV writes/reads below a VEAP
/// path prefix and answers on `<topic>/status/+`.
pub struct VeapAdapter {
  mqtt_topic: String,
  veap_path: String,
  /// Read back delay after a set (zero: disabled).
  read_back: Duration,
  server: Arc<MqttServer>,
  service: Service,

  guard: Arc<CallbackGuard>,
  quit: CancellationToken,
  set_handle: Option<SubscriptionHandle>,
  get_handle: Option<SubscriptionHandle>,
}

impl VeapAdapter {
  pub fn new(
    mqtt_topic: &str,
    veap_path: &str,
    read_back: Duration,
    server: Arc<MqttServer>,
    service: Service,
  ) -> Self {
    VeapAdapter {
      mqtt_topic: mqtt_topic.to_owned(),
      veap_path: veap_path.to_owned(),
      read_back,
      server,
      service,
      guard: CallbackGuard::new(),
      quit: CancellationToken::new(),
      set_handle: None,
      get_handle: None,
    }
  }

  pub async fn start(&mut self) {
    let on_set = self.make_set_handler();
    let on_get = self.make_get_handler();
    let set_pattern = format!("{}/set/+", self.mqtt_topic);
    let get_pattern = format!("{}/get/+", self.mqtt_topic);
    self.set_handle = self
      .server
      .subscribe(&set_pattern, QoS::ExactlyOnce, on_set)
      .await
      .ok();
    self.get_handle = self
      .server
      .subscribe(&get_pattern, QoS::ExactlyOnce, on_get)
      .await
      .ok();
  }

  pub fn stop(&mut self) {
    if let Some(handle) = self.set_handle.take() {
      self.server.unsubscribe(handle);
    }
    if let Some(handle) = self.get_handle.take() {
      self.server.unsubscribe(handle);
    }
    self.quit.cancel();
    // wait for completion of pending callbacks
    self.guard.stop();
  }

  fn make_set_handler(&self) -> PublishHandler {
    let guard = self.guard.clone();
    let quit = self.quit.clone();
    let server = self.server.clone();
    let service = self.service.clone();
    let mqtt_topic = self.mqtt_topic.clone();
    let veap_path = self.veap_path.clone();
    let read_back = self.read_back;
    Arc::new(move |msg| {
      let guard = guard.clone();
      let quit = quit.clone();
      let server = server.clone();
      let service = service.clone();
      let mqtt_topic = mqtt_topic.clone();
      let veap_path = veap_path.clone();
      Box::pin(async move {
        let Some(_entered) = guard.enter() else {
          return;
        };
        trace!(
          "Set message received: {}, {}",
          msg.topic,
          String::from_utf8_lossy(&msg.payload)
        );
        let pv = wire::wire_to_pv(&msg.payload);
        let set_topic = format!("{mqtt_topic}/set");
        let Some(path) = msg.topic.strip_prefix(&set_topic).filter(|p| p.starts_with('/'))
        else {
          warn!("Unexpected topic: {}", msg.topic);
          return;
        };
        let full_path = format!("{veap_path}{path}");
        if let Err(err) = service.write_pv(&full_path, pv).await {
          warn!("Write of {full_path} failed: {err}");
          return;
        }
        // read back current value and publish
        if !read_back.is_zero() {
          let status_topic = format!("{mqtt_topic}/status{path}");
          async_manager::spawn(async move {
            tokio::select! {
              _ = quit.cancelled() => return,
              _ = tokio::time::sleep(read_back) => {}
            }
            let Some(_entered) = guard.enter() else {
              return;
            };
            match service.read_pv(&full_path).await {
              Ok(pv) => {
                if let Err(err) = server
                  .publish_pv(&status_topic, pv, QoS::AtLeastOnce, true)
                  .await
                {
                  warn!("Publish of {status_topic} failed: {err}");
                }
              }
              Err(err) => {
                warn!("Read back of {full_path} failed: {err}");
              }
            }
          });
        }
      })
    })
  }

  fn make_get_handler(&self) -> PublishHandler {
    let guard = self.guard.clone();
    let server = self.server.clone();
    let service = self.service.clone();
    let mqtt_topic = self.mqtt_topic.clone();
    let veap_path = self.veap_path.clone();
    Arc::new(move |msg| {
      let guard = guard.clone();
      let server = server.clone();
      let service = service.clone();
      let mqtt_topic = mqtt_topic.clone();
      let veap_path = veap_path.clone();
      Box::pin(async move {
        let Some(_entered) = guard.enter() else {
          return;
        };
        trace!("Get message received: {}", msg.topic);
        let get_topic = format!("{mqtt_topic}/get");
        let Some(path) = msg.topic.strip_prefix(&get_topic).filter(|p| p.starts_with('/'))
        else {
          warn!("Unexpected topic: {}", msg.topic);
          return;
        };
        let full_path = format!("{veap_path}{path}");
        match service.read_pv(&full_path).await {
          Ok(pv) => {
            let status_topic = format!("{mqtt_topic}/status{path}");
            if let Err(err) = server
              .publish_pv(&status_topic, pv, QoS::AtLeastOnce, true)
              .await
            {
              warn!("Publish of {status_topic} failed: {err}");
            }
          }
          Err(err) => {
            warn!("Read of {full_path} failed: {err}");
          }
        }
      })
    })
  }
}
