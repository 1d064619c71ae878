// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Authentication of MQTT clients. Authenticators are looked up by string
//! identifier in an explicit registry constructed at start-up; the embedded
//! server's listeners resolve `configAuthHandler` to the configuration
//! store.

use ccujack_config::{Endpoint, Store};
use ccujack_core::errors::{AuthError, CcuJackError};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Identifier of the authenticator backed by the config store.
pub const CONFIG_AUTH_HANDLER: &str = "configAuthHandler";

pub trait Authenticator: Send + Sync {
  fn authenticate(&self, identifier: &str, password: &str) -> Result<(), CcuJackError>;
}

/// Registry of authenticators, keyed by identifier.
#[derive(Default)]
pub struct AuthRegistry {
  handlers: RwLock<HashMap<String, Arc<dyn Authenticator>>>,
}

impl AuthRegistry {
  pub fn new() -> Arc<Self> {
    Arc::new(AuthRegistry::default())
  }

  pub fn register(&self, name: &str, handler: Arc<dyn Authenticator>) {
    self
      .handlers
      .write()
      .expect("auth registry lock")
      .insert(name.to_owned(), handler);
  }

  pub fn authenticate(
    &self,
    name: &str,
    identifier: &str,
    password: &str,
  ) -> Result<(), CcuJackError> {
    let handler = {
      let handlers = self.handlers.read().expect("auth registry lock");
      handlers.get(name).cloned()
    };
    match handler {
      Some(handler) => handler.authenticate(identifier, password),
      None => Err(AuthError::UnknownAuthenticator(name.to_owned()).into()),
    }
  }
}

/// Authenticates MQTT clients against the config store. When no active user
/// is configured, every client is admitted.
pub struct ConfigAuthHandler {
  pub store: Arc<Store>,
}

impl Authenticator for ConfigAuthHandler {
  fn authenticate(&self, identifier: &str, password: &str) -> Result<(), CcuJackError> {
    let allow_all = self.store.view(|cfg| !cfg.has_active_user());
    if allow_all {
      return Ok(());
    }
    match self.store.authenticate(Endpoint::Mqtt, identifier, password) {
      Some(_) => Ok(()),
      None => Err(AuthError::InvalidCredentials(identifier.to_owned()).into()),
    }
  }
}

/// Forces one fixed set of credentials, used by the websocket listener of
/// the frontend.
pub struct SingleAuthHandler {
  pub user: String,
  pub password: String,
}

impl Authenticator for SingleAuthHandler {
  fn authenticate(&self, identifier: &str, password: &str) -> Result<(), CcuJackError> {
    if identifier == self.user && password == self.password {
      Ok(())
    } else {
      Err(AuthError::InvalidCredentials(identifier.to_owned()).into())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_config::{PermKind, Permission, User};
  use ccujack_core::errors::ConfigError;

  #[tokio::test]
  async fn config_handler_allows_all_without_active_users() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    let registry = AuthRegistry::new();
    registry.register(
      CONFIG_AUTH_HANDLER,
      Arc::new(ConfigAuthHandler { store: store.clone() }),
    );
    assert!(registry.authenticate(CONFIG_AUTH_HANDLER, "anyone", "").is_ok());
    store.close();
  }

  #[tokio::test]
  async fn config_handler_checks_mqtt_endpoint() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    store
      .update(|cfg| {
        let mut user = User {
          identifier: "client".to_owned(),
          active: true,
          ..User::default()
        };
        user.set_password("pw")?;
        user.add_permission(Permission {
          identifier: "mqtt".to_owned(),
          endpoint: Endpoint::Mqtt.into(),
          kind: PermKind::ReadPv | PermKind::WritePv,
          ..Permission::default()
        });
        cfg.users.insert("client".to_owned(), user);
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    let handler = ConfigAuthHandler { store: store.clone() };
    assert!(handler.authenticate("client", "pw").is_ok());
    assert!(handler.authenticate("client", "bad").is_err());
    assert!(handler.authenticate("nobody", "pw").is_err());
    store.close();
  }

  #[test]
  fn unknown_authenticator_is_an_error() {
    let registry = AuthRegistry::new();
    assert!(registry.authenticate("nope", "a", "b").is_err());
  }

  #[test]
  fn server_admission_goes_through_the_registry() {
    let server = crate::server::MqttServer::new();
    // without an authenticator every client is admitted
    assert!(server.admit("anyone", "").is_ok());
    let registry = AuthRegistry::new();
    registry.register(
      "single",
      Arc::new(SingleAuthHandler {
        user: "u".to_owned(),
        password: "p".to_owned(),
      }),
    );
    server.set_authenticator("single", registry);
    assert!(server.admit("u", "p").is_ok());
    assert!(server.admit("u", "x").is_err());
  }

  #[test]
  fn single_auth_handler() {
    let handler = SingleAuthHandler {
      user: "u".to_owned(),
      password: "p".to_owned(),
    };
    assert!(handler.authenticate("u", "p").is_ok());
    assert!(handler.authenticate("u", "x").is_err());
  }
}
