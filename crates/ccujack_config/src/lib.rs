// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Runtime configuration: the document model, the file-backed store with
//! delayed write-back, and user authentication/authorization.

#[macro_use]
extern crate tracing;

pub mod model;
pub mod store;

pub use model::{
  ChannelCfg, ChannelKind, Config, Endpoint, InterfaceType, LogLevel, MqttBridgeCfg, PermKind,
  Permission, SharedTopic, User, VirtualDeviceCfg,
};
pub use store::Store;
