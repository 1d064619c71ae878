// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Registry of the configured interface clients and the start-up ready poll.

use crate::itf::ItfClient;
use ccujack_core::errors::{CcuJackError, NotFoundError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const READY_POLL_CYCLE: Duration = Duration::from_secs(10);
const READY_WARN_AFTER: Duration = Duration::from_secs(180);

/// Connects the bridge to the interface processes of the controller. One
/// client is registered per configured interface; the callback registration
/// id is derived as `<init id>-<interface>`.
pub struct Interconnector {
  id_prefix: String,
  clients: HashMap<String, Arc<dyn ItfClient>>,
}

impl Interconnector {
  pub fn new(init_id: &str) -> Self {
    Interconnector {
      id_prefix: format!("{init_id}-"),
      clients: HashMap::new(),
    }
  }

  pub fn register(&mut self, client: Arc<dyn ItfClient>) {
    self.clients.insert(client.interface_id(), client);
  }

  /// Resolves the client for an interface id from a callback.
  pub fn client(&self, interface_id: &str) -> Result<Arc<dyn ItfClient>, CcuJackError> {
    // callbacks carry the registration id, strip the prefix
    let id = interface_id
      .strip_prefix(&self.id_prefix)
      .unwrap_or(interface_id);
    self
      .clients
      .get(id)
      .cloned()
      .ok_or_else(|| NotFoundError::Interface(interface_id.to_owned()).into())
  }

  pub fn clients(&self) -> impl Iterator<Item = &Arc<dyn ItfClient>> {
    self.clients.values()
  }

  /// Waits until every interface process answers a ping. Polls every 10 s
  /// without a hard timeout; after 3 minutes a warning is logged once.
  /// Termination is delivered out-of-band via the cancellation token.
  pub async fn wait_for_ready(&self, cancel: CancellationToken) -> bool {
    let started = Instant::now();
    let mut warned = false;
    loop {
      let mut all_ready = true;
      for client in self.clients.values() {
        if cancel.is_cancelled() {
          return false;
        }
        if let Err(err) = client.ping().await {
          debug!("Interface {} not ready: {err}", client.interface_id());
          all_ready = false;
        }
      }
      if all_ready {
        return true;
      }
      if !warned && started.elapsed() >= READY_WARN_AFTER {
        warn!("Controller not ready after {} seconds", READY_WARN_AFTER.as_secs());
        warned = true;
      }
      tokio::select! {
        _ = cancel.cancelled() => return false,
        _ = tokio::time::sleep(READY_POLL_CYCLE) => {}
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::itf::{ItfClient, ParamsetDescription};
  use async_trait::async_trait;
  use ccujack_core::errors::TransportError;
  use serde_json::{Map, Value};
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FlakyClient {
    pings: AtomicUsize,
    ready_after: usize,
  }

  #[async_trait]
  impl ItfClient for FlakyClient {
    fn interface_id(&self) -> String {
      "BidCos-RF".to_owned()
    }

    fn rega_hss_id(&self) -> String {
      "BidCos-RF".to_owned()
    }

    async fn get_paramset_description(
      &self,
      _address: &str,
      _paramset_id: &str,
    ) -> Result<ParamsetDescription, CcuJackError> {
      Ok(ParamsetDescription::new())
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
      _address: &str,
      _value_key: &str,
      _value: Value,
    ) -> Result<(), CcuJackError> {
      Ok(())
    }

    async fn ping(&self) -> Result<(), CcuJackError> {
      let n = self.pings.fetch_add(1, Ordering::SeqCst);
      if n < self.ready_after {
        Err(TransportError::ControllerRequest("not up yet".to_owned()).into())
      } else {
        Ok(())
      }
    }
  }

  #[tokio::test(start_paused = true)]
  async fn ready_poll_retries_every_cycle() {
    let mut intercon = Interconnector::new("CCU-Jack");
    intercon.register(Arc::new(FlakyClient {
      pings: AtomicUsize::new(0),
      ready_after: 3,
    }));
    assert!(intercon.wait_for_ready(CancellationToken::new()).await);
  }

  #[tokio::test]
  async fn ready_poll_aborts_on_cancel() {
    let mut intercon = Interconnector::new("CCU-Jack");
    intercon.register(Arc::new(FlakyClient {
      pings: AtomicUsize::new(0),
      ready_after: usize::MAX,
    }));
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(!intercon.wait_for_ready(cancel).await);
  }

  #[tokio::test]
  async fn callback_ids_resolve_with_and_without_prefix() {
    let mut intercon = Interconnector::new("CCU-Jack");
    intercon.register(Arc::new(FlakyClient {
      pings: AtomicUsize::new(0),
      ready_after: 0,
    }));
    assert!(intercon.client("CCU-Jack-BidCos-RF").is_ok());
    assert!(intercon.client("BidCos-RF").is_ok());
    assert!(intercon.client("CCU-Jack-HmIP-RF").is_err());
  }
}
