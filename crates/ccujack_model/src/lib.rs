// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The VEAP domains of the bridge: devices fed by the ingestion pipeline,
//! system variables and programs discovered by exploration, the virtual
//! device façade and the vendor subtree.

#[macro_use]
extern crate tracing;

pub mod device;
pub mod program;
pub mod root;
pub mod rtcfg;
pub mod sysvar;
pub mod virtdev;

pub use device::{DeviceCol, Notification};
pub use program::ProgramCol;
pub use root::{Root, RootCfg, Vendor};
pub use sysvar::SysVarCol;
pub use virtdev::VirtualDeviceCol;
