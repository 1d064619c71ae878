// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Node model of the VEAP tree. Nodes are polymorphic over the capability
//! sets collection, PV reader, PV writer, link reader and attribute reader.
//! Owned children live in insertion-ordered maps; parent back-pointers are
//! weak so the tree contains no strong reference cycles.

use crate::error::VeapError;
use async_trait::async_trait;
use ccujack_core::Pv;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock, Weak};

/// Attribute values of a node.
pub type AttrValues = serde_json::Map<String, Value>;

/// Link to another node, addressed by path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
  pub target: String,
  pub role: String,
}

/// An entity in the VEAP tree.
#[async_trait]
pub trait Node: Send + Sync {
  /// Stable identifier, unique among siblings.
  fn identifier(&self) -> String;

  fn title(&self) -> String {
    self.identifier()
  }

  fn description(&self) -> String {
    String::new()
  }

  /// The owning collection; `None` for the root.
  fn parent(&self) -> Option<Arc<dyn Node>> {
    None
  }

  /// Role of this node within its collection (e.g. "device", "parameter").
  fn item_role(&self) -> String {
    String::new()
  }

  async fn attributes(&self) -> AttrValues {
    AttrValues::new()
  }

  fn links(&self) -> Vec<Link> {
    Vec::new()
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    None
  }

  fn as_pv_reader(&self) -> Option<&dyn PvReader> {
    None
  }

  fn as_pv_writer(&self) -> Option<&dyn PvWriter> {
    None
  }
}

impl fmt::Debug for dyn Node {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Node").field("identifier", &self.identifier()).finish()
  }
}

/// Capability of enumerating and resolving child nodes.
pub trait Collection: Send + Sync {
  /// Children in insertion order.
  fn items(&self) -> Vec<Arc<dyn Node>>;

  /// Resolves a child by identifier.
  fn item(&self, id: &str) -> Option<Arc<dyn Node>>;

  /// Role of the children of this collection.
  fn child_role(&self) -> String {
    String::new()
  }
}

#[async_trait]
pub trait PvReader: Send + Sync {
  async fn read_pv(&self) -> Result<Pv, VeapError>;
}

#[async_trait]
pub trait PvWriter: Send + Sync {
  async fn write_pv(&self, pv: Pv) -> Result<(), VeapError>;
}

/// Insertion-ordered child map of a changeable collection. The collection
/// owns its items: removing an entry drops the only strong reference the
/// tree holds.
#[derive(Default)]
pub struct NodeMap {
  inner: RwLock<IndexMap<String, Arc<dyn Node>>>,
}

impl NodeMap {
  pub fn new() -> Self {
    NodeMap::default()
  }

  pub fn put(&self, item: Arc<dyn Node>) {
    let id = item.identifier();
    self.inner.write().expect("node map lock").insert(id, item);
  }

  pub fn remove(&self, id: &str) -> Option<Arc<dyn Node>> {
    // shift_remove keeps the insertion order of the remaining items
    self.inner.write().expect("node map lock").shift_remove(id)
  }

  pub fn get(&self, id: &str) -> Option<Arc<dyn Node>> {
    self.inner.read().expect("node map lock").get(id).cloned()
  }

  pub fn all(&self) -> Vec<Arc<dyn Node>> {
    self.inner.read().expect("node map lock").values().cloned().collect()
  }

  pub fn len(&self) -> usize {
    self.inner.read().expect("node map lock").len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Configuration of a [`Domain`].
pub struct DomainCfg {
  pub identifier: String,
  pub title: String,
  pub description: String,
  pub item_role: String,
  pub child_role: String,
}

/// General purpose changeable collection node. Domains structure the VEAP
/// address space (e.g. `/device`, `/sysvar`).
pub struct Domain {
  cfg: DomainCfg,
  parent: Weak<dyn Node>,
  children: NodeMap,
}

impl Domain {
  pub fn new(cfg: DomainCfg, parent: Weak<dyn Node>) -> Arc<Self> {
    Arc::new(Domain {
      cfg,
      parent,
      children: NodeMap::new(),
    })
  }

  /// Creates a domain and registers it with its parent domain.
  pub fn attached(cfg: DomainCfg, parent: &Arc<Domain>) -> Arc<Self> {
    let parent_node: Arc<dyn Node> = parent.clone();
    let domain = Domain::new(cfg, Arc::downgrade(&parent_node));
    parent.children().put(domain.clone());
    domain
  }

  pub fn children(&self) -> &NodeMap {
    &self.children
  }

  /// Weak handle usable as the parent pointer of a child node.
  pub fn as_parent(self: &Arc<Self>) -> Weak<dyn Node> {
    let node: Arc<dyn Node> = self.clone();
    Arc::downgrade(&node)
  }
}

#[async_trait]
impl Node for Domain {
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
    self.cfg.item_role.clone()
  }

  fn as_collection(&self) -> Option<&dyn Collection> {
    Some(self)
  }
}

impl Collection for Domain {
  fn items(&self) -> Vec<Arc<dyn Node>> {
    self.children.all()
  }

  fn item(&self, id: &str) -> Option<Arc<dyn Node>> {
    self.children.get(id)
  }

  fn child_role(&self) -> String {
    self.cfg.child_role.clone()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn root() -> Arc<Domain> {
    Domain::new(
      DomainCfg {
        identifier: "root".to_owned(),
        title: "Root".to_owned(),
        description: "Root of the VEAP server".to_owned(),
        item_role: "domain".to_owned(),
        child_role: "domain".to_owned(),
      },
      Weak::<Domain>::new(),
    )
  }

  fn domain(id: &str, parent: &Arc<Domain>) -> Arc<Domain> {
    Domain::attached(
      DomainCfg {
        identifier: id.to_owned(),
        title: id.to_owned(),
        description: String::new(),
        item_role: "domain".to_owned(),
        child_role: "item".to_owned(),
      },
      parent,
    )
  }

  #[test]
  fn children_keep_insertion_order() {
    let root = root();
    for id in ["b", "a", "c"] {
      domain(id, &root);
    }
    let ids: Vec<String> = root.children().all().iter().map(|n| n.identifier()).collect();
    assert_eq!(ids, vec!["b", "a", "c"]);
    root.children().remove("a");
    let ids: Vec<String> = root.children().all().iter().map(|n| n.identifier()).collect();
    assert_eq!(ids, vec!["b", "c"]);
  }

  #[test]
  fn parent_links_back_to_owning_collection() {
    let root = root();
    let child = domain("child", &root);
    let parent = child.parent().expect("child must have a parent");
    assert_eq!(parent.identifier(), "root");
    let resolved = parent
      .as_collection()
      .expect("parent is a collection")
      .item("child")
      .expect("child is registered");
    assert!(Arc::ptr_eq(
      &(child as Arc<dyn Node>),
      &resolved
    ));
  }

  #[test]
  fn removing_the_collection_drops_its_items() {
    let root = root();
    let child = domain("child", &root);
    let weak = Arc::downgrade(&child);
    drop(child);
    assert!(weak.upgrade().is_some());
    root.children().remove("child");
    assert!(weak.upgrade().is_none());
  }
}
