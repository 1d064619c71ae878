// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Path evaluation and the service operations on the VEAP tree.

use crate::error::VeapError;
use crate::model::{AttrValues, Link, Node};
use ccujack_core::Pv;
use std::sync::Arc;

/// VEAP service over a rooted tree.
#[derive(Clone)]
pub struct Service {
  root: Arc<dyn Node>,
}

impl Service {
  pub fn new(root: Arc<dyn Node>) -> Self {
    Service { root }
  }

  pub fn root(&self) -> Arc<dyn Node> {
    self.root.clone()
  }

  /// Resolves a `/`-separated path to a node.
  pub fn eval_path(&self, path: &str) -> Result<Arc<dyn Node>, VeapError> {
    let mut node = self.root.clone();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
      let next = node
        .as_collection()
        .and_then(|col| col.item(segment))
        .ok_or_else(|| VeapError::NotFound(path.to_owned()))?;
      node = next;
    }
    Ok(node)
  }

  /// Reads the attributes and links of the addressed node. The identity
  /// properties of the node are merged into the attributes.
  pub async fn read_properties(&self, path: &str) -> Result<(AttrValues, Vec<Link>), VeapError> {
    let node = self.eval_path(path)?;
    let mut attrs = node.attributes().await;
    attrs.insert("identifier".to_owned(), node.identifier().into());
    attrs.insert("title".to_owned(), node.title().into());
    attrs.insert("description".to_owned(), node.description().into());
    let mut links = node.links();
    // collections additionally link to their items
    if let Some(col) = node.as_collection() {
      let role = col.child_role();
      for item in col.items() {
        links.push(Link {
          target: item.identifier(),
          role: role.clone(),
        });
      }
    }
    Ok((attrs, links))
  }

  pub async fn read_pv(&self, path: &str) -> Result<Pv, VeapError> {
    let node = self.eval_path(path)?;
    match node.as_pv_reader() {
      Some(reader) => reader.read_pv().await,
      None => Err(VeapError::MethodNotAllowed(path.to_owned())),
    }
  }

  pub async fn write_pv(&self, path: &str, pv: Pv) -> Result<(), VeapError> {
    let node = self.eval_path(path)?;
    match node.as_pv_writer() {
      Some(writer) => writer.write_pv(pv).await,
      None => Err(VeapError::MethodNotAllowed(path.to_owned())),
    }
  }
}
