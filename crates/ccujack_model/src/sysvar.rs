// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The `/sysvar` domain: system variables of the ReGaHss, discovered by
//! periodic exploration.

use async_trait::async_trait;
use ccujack_ccu::script::{ScriptClient, SysVarDef};
use ccujack_core::Pv;
use ccujack_veap::{AttrValues, Collection, Node, PvReader, PvWriter, VeapError};
use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Exploration cycle for system variables.
const SYS_VAR_EXPLORE_CYCLE: Duration = Duration::from_secs(30 * 60);

/// The `/sysvar` domain.
pub struct SysVarCol {
  parent: Weak<dyn Node>,
  script_client: Arc<dyn ScriptClient>,
  vars: RwLock<IndexMap<String, Arc<SysVarNode>>>,

  cancel: CancellationToken,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl SysVarCol {
  pub fn new(parent: Weak<dyn Node>, script_client: Arc<dyn ScriptClient>) -> Arc<SysVarCol> {
    Arc::new(SysVarCol {
      parent,
      script_client,
      vars: RwLock::new(IndexMap::new()),
      cancel: CancellationToken::new(),
      task: Mutex::new(None),
    })
  }

  /// Starts the exploration of the system variables.
  pub fn start(self: &Arc<Self>) {
    info!("Starting system variable explorer");
    let this = self.clone();
    let cancel = self.cancel.clone();
    *self.task.lock().expect("task lock") = Some(tokio::spawn(async move {
      // exploration at startup
      this.explore().await;
      loop {
        tokio::select! {
          _ = cancel.cancelled() => break,
          _ = tokio::time::sleep(SYS_VAR_EXPLORE_CYCLE) => this.explore().await,
        }
      }
      debug!("Stopping system variable explorer");
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
    debug!("Exploring system variables");
    let defs = match self.script_client.system_variables().await {
      Ok(defs) => defs,
      Err(err) => {
        error!("{err}");
        return;
      }
    };
    let lookup: HashMap<String, SysVarDef> =
      defs.into_iter().map(|d| (d.ise_id.clone(), d)).collect();
    let mut vars = self.vars.write().expect("sysvar map lock");
    // delete missing variables
    vars.retain(|id, node| {
      let keep = lookup.contains_key(id);
      if !keep {
        debug!("Deleting system variable: {id} ({})", node.def.name);
      }
      keep
    });
    // create new and updated variables
    for (id, def) in lookup {
      let recreate = match vars.get(&id) {
        Some(node) => {
          if node.def.same_definition(&def) {
            false
          } else {
            debug!("Updating system variable: {id} ({})", def.name);
            true
          }
        }
        None => {
          debug!("Creating system variable: {id} ({})", def.name);
          true
        }
      };
      if recreate {
        let parent: Weak<dyn Node> = {
          let this: Arc<dyn Node> = self.clone();
          Arc::downgrade(&this)
        };
        vars.insert(
          id,
          Arc::new(SysVarNode {
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
impl Node for SysVarCol {
  fn identifier(&self) -> String {
    "sysvar".to_owned()
  }

  fn title(&self) -> String {
    "System variables".to_owned()
  }

  fn description(&self) -> String {
    "System variables of the ReGaHss".to_owned()
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

impl Collection for SysVarCol {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self
      .vars
      .read()
      .expect("sysvar map lock")
      .values()
      .map(|v| v.clone() as Arc<dyn Node>)
      .collect()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    self
      .vars
      .read()
      .expect("sysvar map lock")
      .get(id)
      .map(|v| v.clone() as Arc<dyn Node>)
  }

  fn child_role(&self) -> String {
    "sysvar".to_owned()
  }
}

struct SysVarNode {
  def: SysVarDef,
  script_client: Arc<dyn ScriptClient>,
  parent: Weak<dyn Node>,
}

#[async_trait]
impl Node for SysVarNode {
  fn identifier(&self) -> String {
    self.def.ise_id.clone()
  }

  fn title(&self) -> String {
    self.def.name.clone()
  }

  fn description(&self) -> String {
    self.def.description.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "sysvar".to_owned()
  }

  async fn attributes(&self) -> AttrValues {
    let mut attrs = AttrValues::new();
    attrs.insert("unit".to_owned(), json!(self.def.unit));
    attrs.insert("operations".to_owned(), json!(self.def.operations));
    attrs.insert("type".to_owned(), json!(self.def.var_type));
    attrs.insert(
      "mqttGetTopic".to_owned(),
      json!(format!("sysvar/get/{}", self.def.ise_id)),
    );
    attrs.insert(
      "mqttStatusTopic".to_owned(),
      json!(format!("sysvar/status/{}", self.def.ise_id)),
    );
    attrs.insert(
      "mqttSetTopic".to_owned(),
      json!(format!("sysvar/set/{}", self.def.ise_id)),
    );
    if let Some(minimum) = &self.def.minimum {
      attrs.insert("minimum".to_owned(), minimum.clone());
    }
    if let Some(maximum) = &self.def.maximum {
      attrs.insert("maximum".to_owned(), maximum.clone());
    }
    if let Some(value_name0) = &self.def.value_name0 {
      attrs.insert("valueName0".to_owned(), json!(value_name0));
    }
    if let Some(value_name1) = &self.def.value_name1 {
      attrs.insert("valueName1".to_owned(), json!(value_name1));
    }
    if let Some(value_list) = &self.def.value_list {
      attrs.insert("valueList".to_owned(), json!(value_list));
    }
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
impl PvReader for SysVarNode {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    let reading = self
      .script_client
      .read_sys_var(&self.def)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))?;
    Ok(reading.into_pv())
  }
}

#[async_trait]
impl PvWriter for SysVarNode {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    // convert JSON numbers to int for system variables of type ENUM
    let value = match (&pv.value, self.def.var_type.as_str()) {
      (Value::Number(n), "ENUM") if n.is_f64() => {
        json!(n.as_f64().unwrap_or(0.0) as i64)
      }
      _ => pv.value,
    };
    self
      .script_client
      .write_sys_var(&self.def, value)
      .await
      .map_err(|err| VeapError::Internal(err.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_ccu::script::{ProgramDef, ValObjDef, ValueReading};
  use ccujack_core::Timestamp;
  use ccujack_core::errors::CcuJackError;
  use ccujack_veap::{Domain, DomainCfg};

  struct ScriptedSysVars {
    defs: Mutex<Vec<SysVarDef>>,
  }

  #[async_trait]
  impl ScriptClient for ScriptedSysVars {
    async fn system_variables(&self) -> Result<Vec<SysVarDef>, CcuJackError> {
      Ok(self.defs.lock().unwrap().clone())
    }

    async fn programs(&self) -> Result<Vec<ProgramDef>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn read_values(
      &self,
      _objects: &[ValObjDef],
    ) -> Result<Vec<Result<ValueReading, CcuJackError>>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn read_sys_var(&self, _def: &SysVarDef) -> Result<ValueReading, CcuJackError> {
      Ok(ValueReading {
        value: json!(42),
        timestamp: Timestamp(7),
        uncertain: false,
      })
    }

    async fn write_sys_var(&self, _def: &SysVarDef, _value: Value) -> Result<(), CcuJackError> {
      Ok(())
    }

    async fn read_exec_time(&self, _def: &ProgramDef) -> Result<Timestamp, CcuJackError> {
      unimplemented!()
    }

    async fn exec_program(&self, _def: &ProgramDef) -> Result<(), CcuJackError> {
      unimplemented!()
    }
  }

  fn def(id: &str, name: &str) -> SysVarDef {
    SysVarDef {
      ise_id: id.to_owned(),
      name: name.to_owned(),
      var_type: "FLOAT".to_owned(),
      ..SysVarDef::default()
    }
  }

  #[tokio::test]
  async fn explore_creates_updates_and_deletes() {
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
    let script = Arc::new(ScriptedSysVars {
      defs: Mutex::new(vec![def("100", "a"), def("200", "b")]),
    });
    let col = SysVarCol::new(root.as_parent(), script.clone());
    root.children().put(col.clone());

    col.explore().await;
    assert!(col.item("100").is_some());
    assert!(col.item("200").is_some());

    // variable 200 disappears, 100 is renamed, 300 appears
    *script.defs.lock().unwrap() = vec![def("100", "renamed"), def("300", "c")];
    col.explore().await;
    assert!(col.item("200").is_none());
    assert_eq!(col.item("100").unwrap().title(), "renamed");
    assert!(col.item("300").is_some());
  }

  #[tokio::test]
  async fn sysvar_reads_through_the_script_client() {
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
    let script = Arc::new(ScriptedSysVars {
      defs: Mutex::new(vec![def("100", "a")]),
    });
    let col = SysVarCol::new(root.as_parent(), script);
    root.children().put(col.clone());
    col.explore().await;

    let node = col.item("100").unwrap();
    let pv = node.as_pv_reader().unwrap().read_pv().await.unwrap();
    assert_eq!(pv.value, json!(42));
    assert_eq!(pv.time, Timestamp(7));
  }
}
