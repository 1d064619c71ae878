// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `/program` domain: ReGaHss programs, discovered by periodic
//! exploration. Writing `true` to a program executes it.

use async_trait::async_trait;
use ccujack_ccu::script::{ProgramDef, ScriptClient};
use ccujack_core::{Pv, State};
use ccujack_veap::{AttrValues, Collection, Node, PvReader, PvWriter, VeapError};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exploration cycle for CCU programs.
const PRG_EXPLORE_CYCLE: Duration = Duration::from_secs(30 * 60);

/// The `/program` domain.
pub struct ProgramCol {
  parent: Weak<dyn Node>,
  script_client: Arc<dyn ScriptClient>,
  programs: RwLock<IndexMap<String, Arc<ProgramNode>>>,

  cancel: CancellationToken,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl ProgramCol {
  pub fn new(parent: Weak<dyn Node>, script_client: Arc<dyn ScriptClient>) -> Arc<ProgramCol> {
    Arc::new(ProgramCol {
      parent,
      script_client,
      programs: RwLock::new(IndexMap::new()),
      cancel: CancellationToken::new(),
      task: Mutex::new(None),
    })
  }

  /// Starts the exploration of the CCU programs.
  pub fn start(self: &Arc<Self>) {
    info!("Starting ReGaHss program explorer");
    let this = self.clone();
    let cancel = self.cancel.clone();
    *self.task.lock().expect("task lock") = Some(tokio::spawn(async move {
      this.explore().await;
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(PRG_EXPLORE_CYCLE) => this.explore().await,
        }
      }
      debug!("Stopping ReGaHss program explorer");
    }));
  }

  pub async fn stop(&self) {
    self.cancel.cancel();
    let task = self.task.lock().expect("task lock").take();
    if let Some(task) = task {
      let _ = task.await;
    }
  }

  pub async fn explore(self: &Arc<Self>) {
    debug!("Exploring ReGaHss programs");
    let defs = match self.script_client.programs().await {
      Ok(defs) => defs,
      Err(err) => {
        error!("{err}");
        return;
      }
    };
    let lookup: HashMap<String, ProgramDef> =
      defs.into_iter().map(|d| (d.ise_id.clone(), d)).collect();
    let mut programs = self.programs.write().expect("program map lock");
    // delete missing programs
    programs.retain(|id, node| {
      let keep = lookup.contains_key(id);
      if !keep {
        debug!("Deleting program: {id} ({})", node.def.display_name);
      }
      keep
    });
    // create new and updated programs
    for (id, def) in lookup {
      let recreate = match programs.get(&id) {
        Some(node) => {
          if node.def == def {
            false
          } else {
            debug!("Updating program: {id} ({})", def.display_name);
            true
          }
        }
        None => {
          debug!("Creating program: {id} ({})", def.display_name);
          true
        }
      };
      if recreate {
        let parent: Weak<dyn Node> = {
          let this: Arc<dyn Node> = self.clone();
          Arc::downgrade(&this)
        };
        programs.insert(
          id,
          Arc::new(ProgramNode {
            def,
            script_client: self.script_client.clone(),
            parent,
          }),
        );
      }
    }
  }
}

#[async_trait]
impl Node for ProgramCol {
  fn identifier(&self) -> String {
    "program".to_owned()
  }

  fn title(&self) -> String {
    "Programs".to_owned()
  }

  fn description(&self) -> String {
    "Programs of the ReGaHss".to_owned()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "domain".to_owned()
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for ProgramCol {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self
      .programs
      .read()
      .expect("program map lock")
      .values()
      .map(|p| p.clone() as Arc<dyn Node>)
      .collect()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    self
      .programs
      .read()
      .expect("program map lock")
      .get(id)
      .map(|p| p.clone() as Arc<dyn Node>)
  }

  fn child_role(&self) -> String {
    "program".to_owned()
  }
}

struct ProgramNode {
  def: ProgramDef,
  script_client: Arc<dyn ScriptClient>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for ProgramNode {
  fn identifier(&self) -> String {
    self.def.ise_id.clone()
  }

  fn title(&self) -> String {
    self.def.display_name.clone()
  }

  fn description(&self) -> String {
    self.def.description.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "program".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = AttrValues::new();
    attrs.insert("active".to_owned(), json!(self.def.active));
    attrs.insert("visible".to_owned(), json!(self.def.visible));
    attrs.insert(
      "mqttGetTopic".to_owned(),
      json!(format!("program/get/{}", self.def.ise_id)),
    );
    attrs.insert(
      "mqttStatusTopic".to_owned(),
      json!(format!("program/status/{}", self.def.ise_id)),
    );
    attrs.insert(
      "mqttSetTopic".to_owned(),
      json!(format!("program/set/{}", self.def.ise_id)),
    );
    attrs
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for ProgramNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    let timestamp = self
      .script_client
      .read_exec_time(&self.def)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))?;
    Ok(Pv {
      time: timestamp,
      value: json!(false),
      state: State::Good,
    })
  }
}

#[async_trait]
impl PvWriter for ProgramNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    let Value::Bool(execute) = pv.value else {
      return Err(VeapError::BadRequest(format!("Expected type bool: {}", pv.value)));
    };
    // execute only if the PV is true
    if execute {
      self
        .script_client
        .exec_program(&self.def)
        .await
        .map_err(|err| VeapError::Internal(err.to_string()))?;
    }
    Ok(())
  }
}
