// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Channel implementations. Static kinds only carry their parameters; the
//! MQTT-backed kinds additionally subscribe to the embedded server and
//! parse payloads.

pub mod analog_receiver;
pub mod base;
pub mod counter;
pub mod digital_input;
pub mod dimmer;
pub mod key_receiver;
pub mod key_sender;
pub mod power_meter;
pub mod switch;
pub mod switch_feedback;
pub mod temperature;
pub mod unreach;

pub use base::{
  AnalogInputChannel, DimmerChannel, DoorSensorChannel, EnergyCounterChannel, GasCounterChannel,
  KeyChannel, MaintenanceChannel, PowerMeterChannel, SwitchChannel, TemperatureChannel,
};
