// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The writable `config` data point below the vendor subtree. Reading
//! exports a snapshot of the runtime configuration; writing applies a
//! partial update.

use ccujack_config::{Config, Endpoint, InterfaceType, LogLevel, PermKind, Permission, Store, User};
use ccujack_core::Pv;
use ccujack_core::util::json::q;
use ccujack_veap::{Node, Variable, VariableCfg, VeapError};
use serde_json::Value;
use std::str::FromStr;
use std::sync::{Arc, Weak};

pub type LogLevelListener = Arc<dyn Fn(LogLevel) + Send + Sync>;

/// Creates the configuration variable. Log level changes are applied live
/// through the listener.
pub fn new_config_var(
  parent: Weak<dyn Node>,
  store: &Arc<Store>,
  on_log_level: LogLevelListener,
) -> Arc<Variable> {
  let read_store = store.clone();
  let write_store = store.clone();
  Variable::new(
    VariableCfg {
      identifier: "config".to_owned(),
      title: "Configuration".to_owned(),
      description: "Configuration of the CCU-Jack".to_owned(),
      read_pv: Box::new(move || {
        let value = read_store.view(|cfg| {
          serde_json::to_value(cfg)
            .map_err(|err| VeapError::Internal(err.to_string()))
        })?;
        Ok(Pv::new(value))
      }),
      write_pv: Box::new(move |pv| {
        write_store
          .update(|cfg| update_config(cfg, &pv.value, &on_log_level))
          .map_err(|err| VeapError::BadRequest(format!("Configuration update failed: {err}")))
      }),
    },
    parent,
  )
}

fn update_config(
  cfg: &mut Config,
  value: &Value,
  on_log_level: &LogLevelListener,
) -> Result<(), String> {
  if !value.is_object() {
    return Err("Expected a JSON object".to_owned());
  }
  let doc = q(value);

  // CCU interface list
  if doc.has("CCU") {
    let mut interfaces = Vec::new();
    for item in doc.key("CCU").key("Interfaces").elements() {
      let name = item.string().map_err(|err| err.to_string())?;
      let itf = InterfaceType::from_str(&name).map_err(|err| err.to_string())?;
      interfaces.push(itf);
    }
    cfg.ccu.interfaces = interfaces;
  }

  // Users
  if doc.has("Users") {
    let mut users = std::collections::HashMap::new();
    for (id, entry) in doc.key("Users").entries() {
      let identifier = entry.key("Identifier").string().map_err(|e| e.to_string())?;
      if id != identifier {
        return Err(format!("User identifier mismatches: {identifier}"));
      }
      let mut user = User {
        identifier,
        active: entry.key("Active").boolean().map_err(|e| e.to_string())?,
        description: entry
          .try_key("Description")
          .string_or_empty()
          .map_err(|e| e.to_string())?,
        ..User::default()
      };
      let password = entry
        .try_key("Password")
        .string_or_empty()
        .map_err(|e| e.to_string())?;
      let encrypted = entry
        .try_key("EncryptedPassword")
        .string_or_empty()
        .map_err(|e| e.to_string())?;
      if password.is_empty() && encrypted.is_empty() {
        return Err(format!("No password provided for user: {}", user.identifier));
      }
      if !password.is_empty() {
        user.set_password(&password).map_err(|e| e.to_string())?;
      } else {
        user.encrypted_password = encrypted;
      }
      // for now all permissions
      user.add_permission(Permission {
        identifier: "all".to_owned(),
        description: "All permissions".to_owned(),
        endpoint: Endpoint::Veap | Endpoint::Mqtt,
        kind: PermKind::Config | PermKind::ReadPv | PermKind::WritePv,
        ..Permission::default()
      });
      users.insert(id, user);
    }
    cfg.users = users;
  }

  // Logging
  if doc.has("Logging") {
    let level = doc
      .key("Logging")
      .try_key("Level")
      .string_or_empty()
      .map_err(|e| e.to_string())?;
    if !level.is_empty() {
      let level = LogLevel::from_str(&level).map_err(|err| err.to_string())?;
      cfg.logging.level = level;
      // activate the log level
      on_log_level(level);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_veap::PvWriter;
  use serde_json::json;
  use std::sync::Mutex;

  fn store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    (dir, store)
  }

  #[tokio::test]
  async fn partial_update_applies_interfaces_users_and_log_level() {
    let (_dir, store) = store();
    let seen_levels = Arc::new(Mutex::new(Vec::new()));
    let listener_levels = seen_levels.clone();
    let var = new_config_var(
      Weak::<Variable>::new(),
      &store,
      Arc::new(move |level| listener_levels.lock().unwrap().push(level)),
    );

    let update = json!({
      "CCU": {"Interfaces": ["BidCosRF", "HmIPRF"]},
      "Users": {"admin": {"Identifier": "admin", "Active": true, "Password": "pw"}},
      "Logging": {"Level": "debug"},
    });
    var.write_pv(Pv::new(update)).await.unwrap();

    store.view(|cfg| {
      assert_eq!(
        cfg.ccu.interfaces,
        vec![InterfaceType::BidCosRF, InterfaceType::HmIPRF]
      );
      let user = &cfg.users["admin"];
      assert!(user.active);
      assert!(user.password.is_empty());
      assert!(!user.encrypted_password.is_empty());
      assert!(user.permissions.contains_key("all"));
      assert_eq!(cfg.logging.level, LogLevel::Debug);
    });
    // the hashed password verifies through the regular authentication path
    assert!(store.authenticate(Endpoint::Veap, "admin", "pw").is_some());
    assert_eq!(&*seen_levels.lock().unwrap(), &[LogLevel::Debug]);
    store.close();
  }

  #[tokio::test]
  async fn invalid_interface_is_rejected() {
    let (_dir, store) = store();
    let var = new_config_var(Weak::<Variable>::new(), &store, Arc::new(|_| {}));
    let err = var
      .write_pv(Pv::new(json!({"CCU": {"Interfaces": ["Bogus"]}})))
      .await
      .unwrap_err();
    assert!(matches!(err, VeapError::BadRequest(_)));
    store.close();
  }
}
