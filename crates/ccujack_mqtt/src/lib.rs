// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The MQTT side of the bridge: the embedded server façade, the MQTT↔VEAP
//! bridge, the cyclic system variable reader and the bridge to a remote
//! MQTT server.

#[macro_use]
extern crate tracing;

pub mod adapter;
pub mod auth;
pub mod bridge;
pub mod evtreceiver;
pub mod mbridge;
pub mod server;
pub mod sysvar;

pub use auth::{AuthRegistry, Authenticator, ConfigAuthHandler, SingleAuthHandler, CONFIG_AUTH_HANDLER};
pub use bridge::Bridge;
pub use evtreceiver::EventReceiver;
pub use mbridge::RemoteBridge;
pub use server::{MqttServer, PublishHandler, PublishedMessage, QoS, SubscriptionHandle};
pub use sysvar::SysVarReader;
