// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Cyclic reader for system variables tagged for MQTT. Variables whose
//! description contains `mqtt` are bulk-read through the script client and
//! published on value changes.

use crate::bridge::{SYS_VAR_TOPIC, SYS_VAR_VEAP_PATH};
use crate::server::{MqttServer, QoS};
use ccujack_ccu::script::{ScriptClient, ValObjDef};
use ccujack_core::Pv;
use ccujack_core::util::json::q;
use ccujack_veap::Service;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Cycle time for reading system variables.
const SYS_VAR_READ_CYCLE: Duration = Duration::from_millis(3000);

/// Reads mqtt-tagged system variables cyclically.
pub struct SysVarReader {
  /// Service used to explore the system variables.
  pub service: Service,
  /// Script client used to bulk read system variables.
  pub script_client: Arc<dyn ScriptClient>,
  /// Server used for publishing value changes.
  pub server: Arc<MqttServer>,

  cancel: CancellationToken,
  task: Option<JoinHandle<()>>,
}

impl SysVarReader {
  pub fn new(service: Service, script_client: Arc<dyn ScriptClient>, server: Arc<MqttServer>) -> Self {
    SysVarReader {
      service,
      script_client,
      server,
      cancel: CancellationToken::new(),
      task: None,
    }
  }

  /// Starts the system variable reader.
  pub fn start(&mut self) {
    debug!("Starting system variable reader");
    let service = self.service.clone();
    let script_client = self.script_client.clone();
    let server = self.server.clone();
    let cancel = self.cancel.clone();
    self.task = Some(tokio::spawn(async move {
      // cache of last published PVs, bounded by the number of sysvars
      let mut pv_cache: HashMap<String, Pv> = HashMap::new();
      loop {
        // sleep before next read
        tokio::select! {
          _ = cancel.cancelled() => {
            debug!("Stopping system variable reader");
            return;
          }
          _ = tokio::time::sleep(SYS_VAR_READ_CYCLE) => {}
        }
        let sys_vars = match mqtt_tagged_sysvars(&service).await {
          Ok(sys_vars) => sys_vars,
          Err(err) => {
            error!("System variable reader: {err}");
            return;
          }
        };
        // nothing to do?
        if sys_vars.is_empty() {
          continue;
        }
        // bulk read system variables
        let results = match script_client.read_values(&sys_vars).await {
          Ok(results) => results,
          Err(err) => {
            error!("System variable reader: {err}");
            continue;
          }
        };
        for (def, result) in sys_vars.iter().zip(results) {
          let reading = match result {
            Ok(reading) => reading,
            Err(err) => {
              error!("System variable reader: {err}");
              continue;
            }
          };
          let pv = reading.into_pv();
          // PV changed?
          if pv_cache.get(&def.ise_id) == Some(&pv) {
            continue;
          }
          let topic = format!("{SYS_VAR_TOPIC}/status/{}", def.ise_id);
          match server.publish_pv(&topic, pv.clone(), QoS::ExactlyOnce, true).await {
            Ok(()) => {
              pv_cache.insert(def.ise_id.clone(), pv);
            }
            Err(err) => {
              error!("System variable reader: {err}");
            }
          }
        }
      }
    }));
  }

  /// Stops the system variable reader.
  pub async fn stop(&mut self) {
    self.cancel.cancel();
    if let Some(task) = self.task.take() {
      let _ = task.await;
    }
  }
}

/// Collects the object references of all system variables whose description
/// contains the marker `mqtt` (case-insensitive).
async fn mqtt_tagged_sysvars(service: &Service) -> Result<Vec<ValObjDef>, String> {
  let (_attrs, links) = service
    .read_properties(SYS_VAR_VEAP_PATH)
    .await
    .map_err(|err| err.to_string())?;
  let mut sys_vars = Vec::new();
  for link in links {
    if link.role != "sysvar" {
      continue;
    }
    let path = format!("{SYS_VAR_VEAP_PATH}/{}", link.target);
    let (attrs, _links) = service
      .read_properties(&path)
      .await
      .map_err(|err| err.to_string())?;
    let attrs = Value::Object(attrs);
    let descr = q(&attrs)
      .try_key("description")
      .string_or_empty()
      .map_err(|err| err.to_string())?;
    // "mqtt" in description?
    if descr.to_lowercase().contains("mqtt") {
      let ise_id = q(&attrs).key("identifier").string().map_err(|e| e.to_string())?;
      let var_type = q(&attrs).key("type").string().map_err(|e| e.to_string())?;
      sys_vars.push(ValObjDef { ise_id, var_type });
    }
  }
  Ok(sys_vars)
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use ccujack_ccu::script::{ProgramDef, SysVarDef, ValueReading};
  use ccujack_core::errors::CcuJackError;
  use ccujack_core::{Timestamp, wire};
  use ccujack_veap::{AttrValues, Domain, DomainCfg, Node};
  use serde_json::json;
  use std::sync::{Mutex, Weak};

  struct TestSysVar {
    ise_id: String,
    description: String,
  }

  #[async_trait]
  impl Node for TestSysVar {
    fn identifier(&self) -> String {
      self.ise_id.clone()
    }

    fn description(&self) -> String {
      self.description.clone()
    }

    async fn attributes(&self) -> AttrValues {
      let mut attrs = AttrValues::new();
      attrs.insert("type".to_owned(), json!("FLOAT"));
      attrs
    }
  }

  struct ScriptedValues {
    readings: Mutex<HashMap<String, ValueReading>>,
  }

  #[async_trait]
  impl ScriptClient for ScriptedValues {
    async fn system_variables(&self) -> Result<Vec<SysVarDef>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn programs(&self) -> Result<Vec<ProgramDef>, CcuJackError> {
      Ok(Vec::new())
    }

    async fn read_values(
      &self,
      objects: &[ValObjDef],
    ) -> Result<Vec<Result<ValueReading, CcuJackError>>, CcuJackError> {
      let readings = self.readings.lock().unwrap();
      Ok(
        objects
          .iter()
          .map(|o| Ok(readings.get(&o.ise_id).cloned().expect("reading present")))
          .collect(),
      )
    }

    async fn read_sys_var(&self, _def: &SysVarDef) -> Result<ValueReading, CcuJackError> {
      unimplemented!()
    }

    async fn write_sys_var(&self, _def: &SysVarDef, _value: Value) -> Result<(), CcuJackError> {
      unimplemented!()
    }

    async fn read_exec_time(&self, _def: &ProgramDef) -> Result<Timestamp, CcuJackError> {
      unimplemented!()
    }

    async fn exec_program(&self, _def: &ProgramDef) -> Result<(), CcuJackError> {
      unimplemented!()
    }
  }

  fn sysvar_tree() -> Service {
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
    let sysvars = Domain::attached(
      DomainCfg {
        identifier: "sysvar".to_owned(),
        title: "System variables".to_owned(),
        description: "System variables of the ReGaHss".to_owned(),
        item_role: "domain".to_owned(),
        child_role: "sysvar".to_owned(),
      },
      &root,
    );
    sysvars.children().put(Arc::new(TestSysVar {
      ise_id: "100".to_owned(),
      description: "tagged for MQTT publishing".to_owned(),
    }));
    sysvars.children().put(Arc::new(TestSysVar {
      ise_id: "200".to_owned(),
      description: "plain variable".to_owned(),
    }));
    sysvars.children().put(Arc::new(TestSysVar {
      ise_id: "300".to_owned(),
      description: "also mqtt".to_owned(),
    }));
    Service::new(root)
  }

  fn reading(value: serde_json::Value, ts: i64) -> ValueReading {
    ValueReading {
      value,
      timestamp: Timestamp(ts),
      uncertain: false,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn publishes_only_changed_tagged_variables() {
    let service = sysvar_tree();
    let script = Arc::new(ScriptedValues {
      readings: Mutex::new(HashMap::from([
        ("100".to_owned(), reading(json!(1.0), 10)),
        ("300".to_owned(), reading(json!(7.0), 10)),
      ])),
    });
    let server = MqttServer::new();
    let mut reader = SysVarReader::new(service, script.clone(), server.clone());
    reader.start();

    // first cycle publishes both tagged variables, the untagged one never
    tokio::time::sleep(SYS_VAR_READ_CYCLE + Duration::from_millis(100)).await;
    assert!(server.retained("sysvar/status/100").is_some());
    assert!(server.retained("sysvar/status/300").is_some());
    assert!(server.retained("sysvar/status/200").is_none());

    // change only one value
    script
      .readings
      .lock()
      .unwrap()
      .insert("100".to_owned(), reading(json!(2.0), 20));
    tokio::time::sleep(SYS_VAR_READ_CYCLE + Duration::from_millis(100)).await;
    let pv = wire::wire_to_pv(&server.retained("sysvar/status/100").unwrap().payload);
    assert_eq!(pv.value, json!(2.0));
    // the unchanged variable keeps its first reading
    let pv = wire::wire_to_pv(&server.retained("sysvar/status/300").unwrap().payload);
    assert_eq!(pv.time, Timestamp(10));

    reader.stop().await;
  }

  #[tokio::test]
  async fn tag_match_is_case_insensitive_substring() {
    let service = sysvar_tree();
    let tagged = mqtt_tagged_sysvars(&service).await.unwrap();
    let ids: Vec<&str> = tagged.iter().map(|d| d.ise_id.as_str()).collect();
    assert_eq!(ids, vec!["100", "300"]);
    assert!(tagged.iter().all(|d| d.var_type == "FLOAT"));
  }
}
