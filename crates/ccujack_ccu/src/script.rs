// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! HM script client contract. The script transport is an external
//! collaborator; this crate only fixes the request/response shapes the
//! bridge depends on.

use async_trait::async_trait;
use ccujack_core::errors::CcuJackError;
use ccujack_core::{Pv, State, Timestamp};
use serde_json::Value;

/// Definition of a system variable in the ReGaHss. Identified by a stable
/// iseID.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SysVarDef {
  pub ise_id: String,
  pub name: String,
  pub description: String,
  pub unit: String,
  pub operations: u32,
  pub var_type: String,
  pub minimum: Option<Value>,
  pub maximum: Option<Value>,
  pub value_name0: Option<String>,
  pub value_name1: Option<String>,
  pub value_list: Option<Vec<String>>,
}

impl SysVarDef {
  /// Structural comparison of the definition; the current value and its
  /// timestamp are volatile and not part of the definition.
  pub fn same_definition(&self, other: &SysVarDef) -> bool {
    self == other
  }
}

/// Definition of a ReGaHss program.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgramDef {
  pub ise_id: String,
  pub display_name: String,
  pub description: String,
  pub active: bool,
  pub visible: bool,
}

/// Object reference for a bulk value read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValObjDef {
  pub ise_id: String,
  pub var_type: String,
}

/// Single result of a bulk value read.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueReading {
  pub value: Value,
  pub timestamp: Timestamp,
  pub uncertain: bool,
}

impl ValueReading {
  pub fn into_pv(self) -> Pv {
    let state = if self.uncertain {
      State::Uncertain
    } else {
      State::Good
    };
    Pv {
      time: self.timestamp,
      value: self.value,
      state,
    }
  }
}

/// Client for the ReGaHss scripting interface.
#[async_trait]
pub trait ScriptClient: Send + Sync {
  /// Lists all system variables.
  async fn system_variables(&self) -> Result<Vec<SysVarDef>, CcuJackError>;

  /// Lists all programs.
  async fn programs(&self) -> Result<Vec<ProgramDef>, CcuJackError>;

  /// Reads multiple values in a single request. The result vector matches
  /// the request order; individual reads can fail independently.
  async fn read_values(
    &self,
    objects: &[ValObjDef],
  ) -> Result<Vec<Result<ValueReading, CcuJackError>>, CcuJackError>;

  async fn read_sys_var(&self, def: &SysVarDef) -> Result<ValueReading, CcuJackError>;

  async fn write_sys_var(&self, def: &SysVarDef, value: Value) -> Result<(), CcuJackError>;

  /// Reads the last execution time of a program.
  async fn read_exec_time(&self, def: &ProgramDef) -> Result<Timestamp, CcuJackError>;

  async fn exec_program(&self, def: &ProgramDef) -> Result<(), CcuJackError>;
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn sys_var_definition_equality() {
    let a = SysVarDef {
      ise_id: "1234".to_owned(),
      name: "Humidity".to_owned(),
      description: "mqtt tagged".to_owned(),
      var_type: "FLOAT".to_owned(),
      ..SysVarDef::default()
    };
    let mut b = a.clone();
    assert!(a.same_definition(&b));
    b.description = "changed".to_owned();
    assert!(!a.same_definition(&b));
  }

  #[test]
  fn reading_to_pv_maps_uncertainty() {
    let reading = ValueReading {
      value: json!(42),
      timestamp: Timestamp(1000),
      uncertain: true,
    };
    let pv = reading.into_pv();
    assert_eq!(pv.state, State::Uncertain);
    assert_eq!(pv.time, Timestamp(1000));
  }
}
