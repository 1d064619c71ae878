// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Contracts for talking to the controller: the XML-RPC interface client,
//! the HM script client and the callback receiver chain. The wire codecs
//! behind these traits are external collaborators.

#[macro_use]
extern crate tracing;

pub mod interconnector;
pub mod itf;
pub mod script;

pub use interconnector::Interconnector;
pub use itf::{
  DeviceDescription, ItfClient, ParameterDescription, ParameterType, ParamsetDescription, Receiver,
  SpecialValue, OPERATION_EVENT, OPERATION_READ, OPERATION_WRITE,
};
pub use script::{ProgramDef, ScriptClient, SysVarDef, ValObjDef, ValueReading};
