// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! File-backed configuration store. Readers and writers access an in-memory
//! snapshot under a reader/writer lock; every mutation schedules a delayed
//! flush to disk.

use crate::model::{Config, Endpoint, User};
use ccujack_core::errors::ConfigError;
use ccujack_core::util::async_manager;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const WRITE_DELAY: Duration = Duration::from_millis(3000);

type UpdateListener = Arc<dyn Fn() + Send + Sync>;

/// Holds the runtime configuration.
pub struct Store {
  file_name: PathBuf,
  config: RwLock<Config>,
  flush: Mutex<FlushState>,
  listeners: RwLock<Vec<UpdateListener>>,
}

#[derive(Default)]
struct FlushState {
  modified: bool,
  pending: Option<CancellationToken>,
}

impl Store {
  pub fn new(file_name: impl Into<PathBuf>) -> Arc<Self> {
    Arc::new(Store {
      file_name: file_name.into(),
      config: RwLock::new(Config::default()),
      flush: Mutex::new(FlushState::default()),
      listeners: RwLock::new(Vec::new()),
    })
  }

  /// Loads the runtime config from file and normalizes it. Normalization
  /// changes are written back via the delayed flush.
  pub fn read(self: &Arc<Self>) -> Result<(), ConfigError> {
    let name = self.file_name.display().to_string();
    let content = fs::read_to_string(&self.file_name)
      .map_err(|err| ConfigError::FileAccess(name.clone(), err.to_string()))?;
    let mut config: Config = serde_json::from_str(&content)
      .map_err(|err| ConfigError::InvalidDocument(name.clone(), err.to_string()))?;
    let modified = config.normalize()?;
    *self.config.write().expect("config lock") = config;
    info!("Configuration loaded from file: {name}");
    if modified {
      self.mark_modified();
    }
    Ok(())
  }

  /// Stores the runtime config immediately into the file.
  pub fn write(&self) -> Result<(), ConfigError> {
    let mut flush = self.flush.lock().expect("flush lock");
    if let Some(pending) = flush.pending.take() {
      pending.cancel();
    }
    if !flush.modified {
      return Ok(());
    }
    let name = self.file_name.display().to_string();
    let config = self.config.read().expect("config lock");
    let content = serde_json::to_string_pretty(&*config)
      .map_err(|err| ConfigError::WriteFailed(name.clone(), err.to_string()))?;
    drop(config);
    // atomic replace
    let tmp_name = self.file_name.with_extension("tmp");
    fs::write(&tmp_name, content)
      .map_err(|err| ConfigError::WriteFailed(name.clone(), err.to_string()))?;
    fs::rename(&tmp_name, &self.file_name)
      .map_err(|err| ConfigError::WriteFailed(name.clone(), err.to_string()))?;
    flush.modified = false;
    debug!("Configuration saved to file: {name}");
    Ok(())
  }

  /// Discards a pending write operation.
  pub fn close(&self) {
    let mut flush = self.flush.lock().expect("flush lock");
    if let Some(pending) = flush.pending.take() {
      pending.cancel();
    }
    flush.modified = false;
  }

  /// Executes a function which reads the runtime config.
  pub fn view<R>(&self, f: impl FnOnce(&Config) -> R) -> R {
    let config = self.config.read().expect("config lock");
    f(&config)
  }

  /// Executes a function which updates the runtime config. If the function
  /// returns no error, a delayed save to file is triggered.
  pub fn update<T, E>(
    self: &Arc<Self>,
    f: impl FnOnce(&mut Config) -> Result<T, E>,
  ) -> Result<T, E> {
    let result = {
      let mut config = self.config.write().expect("config lock");
      f(&mut config)?
    };
    self.mark_modified();
    // listeners run without any store lock held
    let listeners = self.listeners.read().expect("listener lock").clone();
    for listener in listeners {
      listener();
    }
    Ok(result)
  }

  /// Registers a listener invoked after every successful update.
  pub fn add_listener(&self, listener: impl Fn() + Send + Sync + 'static) {
    self
      .listeners
      .write()
      .expect("listener lock")
      .push(Arc::new(listener));
  }

  /// Authenticates a user for an endpoint; the matching user is cloned out
  /// of the snapshot.
  pub fn authenticate(&self, endpoint: Endpoint, identifier: &str, password: &str) -> Option<User> {
    self.view(|cfg| cfg.authenticate(endpoint, identifier, password).cloned())
  }

  fn mark_modified(self: &Arc<Self>) {
    let mut flush = self.flush.lock().expect("flush lock");
    flush.modified = true;
    if let Some(pending) = flush.pending.take() {
      pending.cancel();
    }
    let token = CancellationToken::new();
    flush.pending = Some(token.clone());
    let store: Weak<Store> = Arc::downgrade(self);
    async_manager::spawn(async move {
      tokio::select! {
        _ = token.cancelled() => {}
        _ = tokio::time::sleep(WRITE_DELAY) => {
          if let Some(store) = store.upgrade() {
            if let Err(err) = store.write() {
              error!("{err}");
            }
          }
        }
      }
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{PermKind, Permission};
  use serde_json::json;

  fn tmp_store() -> (tempfile::TempDir, Arc<Store>) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path().join("ccu-jack.cfg"));
    (dir, store)
  }

  #[tokio::test]
  async fn read_of_missing_file_fails() {
    let (_dir, store) = tmp_store();
    assert!(store.read().is_err());
  }

  #[tokio::test]
  async fn write_and_read_round_trip() {
    let (dir, store) = tmp_store();
    store
      .update(|cfg| {
        cfg.users.insert(
          "abc".to_owned(),
          User {
            identifier: "abc".to_owned(),
            ..User::default()
          },
        );
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    store.write().unwrap();
    store.close();

    let store2 = Store::new(dir.path().join("ccu-jack.cfg"));
    store2.read().unwrap();
    store2.view(|cfg| {
      assert_eq!(cfg.users.len(), 1);
      assert_eq!(cfg.users["abc"].identifier, "abc");
    });
    store2.close();
  }

  #[tokio::test]
  async fn update_error_is_passed_through_and_not_persisted() {
    let (_dir, store) = tmp_store();
    let err = store
      .update(|_cfg| Err::<(), _>(ConfigError::InvalidUpdate("nope".to_owned())))
      .unwrap_err();
    assert_eq!(err, ConfigError::InvalidUpdate("nope".to_owned()));
    // nothing was marked modified, so write() must not create the file
    store.write().unwrap();
    assert!(!store.file_name.exists());
  }

  #[tokio::test(start_paused = true)]
  async fn delayed_flush_writes_the_last_state() {
    let (_dir, store) = tmp_store();
    store
      .update(|cfg| {
        cfg.host.name = "first".to_owned();
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    store
      .update(|cfg| {
        cfg.host.name = "second".to_owned();
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    tokio::time::sleep(WRITE_DELAY + Duration::from_millis(500)).await;
    let content = fs::read_to_string(&store.file_name).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(doc["Host"]["Name"], json!("second"));
    store.close();
  }

  #[tokio::test(start_paused = true)]
  async fn close_discards_pending_write() {
    let (_dir, store) = tmp_store();
    store
      .update(|cfg| {
        cfg.host.name = "dirty".to_owned();
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    store.close();
    tokio::time::sleep(WRITE_DELAY + Duration::from_millis(500)).await;
    assert!(!store.file_name.exists());
  }

  #[tokio::test]
  async fn listeners_run_after_successful_updates_only() {
    let (_dir, store) = tmp_store();
    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = count.clone();
    store.add_listener(move || {
      counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    });
    store
      .update(|cfg| {
        cfg.host.name = "x".to_owned();
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    let _ = store.update(|_| Err::<(), _>(ConfigError::InvalidUpdate("no".to_owned())));
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    store.close();
  }

  #[tokio::test]
  async fn authenticate_against_snapshot() {
    let (_dir, store) = tmp_store();
    store
      .update(|cfg| {
        let mut user = User {
          identifier: "sub".to_owned(),
          active: true,
          ..User::default()
        };
        user.set_password("pwd")?;
        user.add_permission(Permission {
          identifier: "per".to_owned(),
          endpoint: Endpoint::Veap.into(),
          kind: PermKind::ReadPv.into(),
          ..Permission::default()
        });
        cfg.users.insert("sub".to_owned(), user);
        Ok::<_, ConfigError>(())
      })
      .unwrap();
    assert!(store.authenticate(Endpoint::Veap, "sub", "pwd").is_some());
    assert!(store.authenticate(Endpoint::Veap, "sub", "bad").is_none());
    assert!(store.authenticate(Endpoint::Mqtt, "sub", "pwd").is_none());
    store.close();
  }
}
