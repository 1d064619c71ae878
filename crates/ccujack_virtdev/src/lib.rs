// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Virtual devices: a parameter-driven channel runtime plus the MQTT-backed
//! channel kinds that let arbitrary MQTT hardware appear to the controller
//! as native devices.

#[macro_use]
extern crate tracing;

pub mod channels;
pub mod device;
pub mod engine;
pub mod extract;
pub mod interface_list;
pub mod mqtt_publisher;
pub mod tmpl;

pub use device::{
  Channel, Container, ContainerSynchronizer, Device, EventPublisher, Parameter, Paramset,
  TeeEventPublisher,
};
pub use engine::{VirtualDevices, INTERFACE_ID};
pub use mqtt_publisher::VirtDevEventReceiver;
