// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Closure-backed leaf nodes. Variables adapt simple read/write functions to
//! the node model, e.g. the configuration and diagnostics data points.

use crate::error::VeapError;
use crate::model::{Node, PvReader, PvWriter};
use async_trait::async_trait;
use ccujack_core::Pv;
use std::sync::{Arc, Weak};

pub type ReadPvFn = Box<dyn Fn() -> Result<Pv, VeapError> + Send + Sync>;
pub type WritePvFn = Box<dyn Fn(Pv) -> Result<(), VeapError> + Send + Sync>;

pub struct VariableCfg {
  pub identifier: String,
  pub title: String,
  pub description: String,
  pub read_pv: ReadPvFn,
  pub write_pv: WritePvFn,
}

/// Readable and writable variable.
pub struct Variable {
  cfg: VariableCfg,
  parent: Weak<dyn Node>,
}

impl Variable {
  pub fn new(cfg: VariableCfg, parent: Weak<dyn Node>) -> Arc<Self> {
    Arc::new(Variable { cfg, parent })
  }
}

#[async_trait]
impl Node for Variable {
  fn identifier(&self) -> String {
    self.cfg.identifier.clone()
  }

  fn title(&self) -> String {
    self.cfg.title.clone()
  }

  fn description(&self) -> String {
    self.cfg.description.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "variable".to_owned()
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for Variable {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    (self.cfg.read_pv)()
  }
}

#[async_trait]
impl PvWriter for Variable {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError> {
    (self.cfg.write_pv)(pv)
  }
}

/// Read-only variable.
pub struct RoVariable {
  identifier: String,
  title: String,
  description: String,
  read_pv: ReadPvFn,
  parent: Weak<dyn Node>,
}

impl RoVariable {
  pub fn new(
    identifier: &str,
    title: &str,
    description: &str,
    read_pv: ReadPvFn,
    parent: Weak<dyn Node>,
  ) -> Arc<Self> {
    Arc::new(RoVariable {
      identifier: identifier.to_owned(),
      title: title.to_owned(),
      description: description.to_owned(),
      read_pv,
      parent,
    })
  }
}

#[async_trait]
impl Node for RoVariable {
  fn identifier(&self) -> String {
    self.identifier.clone()
  }

  fn title(&self) -> String {
    self.title.clone()
  }

  fn description(&self) -> String {
    self.description.clone()
  }

  fn parent(&self) -> Option<Arc<dyn Node>> {
    self.parent.upgrade()
  }

  fn item_role(&self) -> String {
    "variable".to_owned()
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    Some(self)
  }
}

#[async_trait]
impl PvReader for RoVariable {
  async fn read_pv(&self) -> Result<Pv, VeapError> {
    (self.read_pv)()
  }
}
