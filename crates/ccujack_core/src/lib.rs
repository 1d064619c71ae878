// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Core types of the CCU-Jack bridge: process values, the MQTT wire envelope,
//! the error taxonomy and small shared utilities.

pub mod diagnostics;
pub mod errors;
pub mod pv;
pub mod util;
pub mod wire;

pub use pv::{Pv, State, Timestamp};
