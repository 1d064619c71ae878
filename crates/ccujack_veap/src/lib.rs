// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The VEAP object tree: a navigable, named tree of polymorphic nodes
//! exposing attributes, links and process values, addressed by `/`-separated
//! paths.

pub mod error;
pub mod model;
pub mod service;
pub mod variable;

pub use error::VeapError;
pub use model::{AttrValues, Collection, Domain, DomainCfg, Link, Node, NodeMap, PvReader, PvWriter};
pub use service::Service;
pub use variable::{RoVariable, Variable, VariableCfg};
