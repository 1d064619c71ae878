// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Root and vendor subtree of the VEAP address space.

use crate::rtcfg::{LogLevelListener, new_config_var};
use async_trait::async_trait;
use ccujack_config::Store;
use ccujack_core::diagnostics::LogBuffer;
use ccujack_core::{Pv, State, Timestamp};
use ccujack_veap::{AttrValues, Collection, Domain, DomainCfg, Node, NodeMap, RoVariable};
use serde_json::json;
use std::sync::{Arc, Weak};

pub struct RootCfg {
  pub server_name: String,
  pub server_version: String,
  pub server_description: String,
  pub vendor_name: String,
}

pub struct Root;

impl Root {
  /// Creates the root domain of the VEAP server.
  pub fn new() -> Arc<Domain> {
    Domain::new(
      DomainCfg {
        identifier: "root".to_owned(),
        title: "Root".to_owned(),
        description: "Root of the CCU-Jack VEAP server".to_owned(),
        item_role: "domain".to_owned(),
        child_role: "domain".to_owned(),
      },
      Weak::<Domain>::new(),
    )
  }
}

/// Vendor information subtree (`/~vendor`) holding the `config` and
/// `diagnostics` data points.
pub struct Vendor {
  cfg: RootCfg,
  parent: Weak<dyn Node>,
  children: NodeMap,
}

impl Vendor {
  pub fn new(
    cfg: RootCfg,
    root: &Arc<Domain>,
    store: &Arc<Store>,
    log_buffer: &Arc<LogBuffer>,
    on_log_level: LogLevelListener,
  ) -> Arc<Vendor> {
    let vendor = Arc::new(Vendor {
      cfg,
      parent: root.as_parent(),
      children: NodeMap::new(),
    });
    let vendor_parent: Weak<dyn Node> = {
      let node: Arc<dyn Node> = vendor.clone();
      Arc::downgrade(&node)
    };
    // configuration of the CCU-Jack
    vendor
      .children
      .put(new_config_var(vendor_parent.clone(), store, on_log_level));
    // diagnostics ring buffer
    let buffer = log_buffer.clone();
    vendor.children.put(RoVariable::new(
      "diagnostics",
      "Diagnostics",
      "Diagnostic information about CCU-Jack components and connections",
      Box::new(move || {
        Ok(Pv {
          time: Timestamp::now(),
          value: json!({"log": buffer.messages()}),
          state: State::Good,
        })
      }),
      vendor_parent,
    ));
    root.children().put(vendor.clone());
    vendor
  }
}

#[async_trait]
impl Node for Vendor {
  fn identifier(&self) -> String {
    "~vendor".to_owned()
  }

  fn title(&self) -> String {
    "Vendor Information".to_owned()
  }

  fn description(&self) -> String {
    format!("Information about the server {}", self.cfg.server_name)
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "domain".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = AttrValues::new();
    attrs.insert("serverName".to_owned(), json!(self.cfg.server_name));
    attrs.insert("serverVersion".to_owned(), json!(self.cfg.server_version));
    attrs.insert(
      "serverDescription".to_owned(),
      json!(self.cfg.server_description),
    );
    attrs.insert("vendorName".to_owned(), json!(self.cfg.vendor_name));
    attrs.insert("veapVersion".to_owned(), json!("1"));
    attrs
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for Vendor {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self.children.all()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    self.children.get(id)
  }

  fn child_role(&self) -> String {
    "variable".to_owned()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_veap::Service;
  use std::io::Write;

  #[tokio::test]
  async fn vendor_subtree_exposes_config_and_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    let log_buffer = LogBuffer::new();
    log_buffer
      .writer()
      .write_all(b"10:00 | INFO | main | started")
      .unwrap();

    let root = Root::new();
    Vendor::new(
      RootCfg {
        server_name: "CCU-Jack".to_owned(),
        server_version: "2.12.0".to_owned(),
        server_description: "REST/MQTT-Server for the HomeMatic CCU".to_owned(),
        vendor_name: "CCU-Jack Project".to_owned(),
      },
      &root,
      &store,
      &log_buffer,
      Arc::new(|_| {}),
    );
    let service = Service::new(root);

    let (attrs, links) = service.read_properties("/~vendor").await.unwrap();
    assert_eq!(attrs["serverName"], json!("CCU-Jack"));
    assert_eq!(links.len(), 2);

    let pv = service.read_pv("/~vendor/diagnostics").await.unwrap();
    assert_eq!(pv.value["log"][0][3], json!("started"));

    let pv = service.read_pv("/~vendor/config").await.unwrap();
    assert!(pv.value.is_object());
    store.close();
  }
}
