// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

use displaydoc::Display;
use thiserror::Error;

/// Service errors of the VEAP tree. Each variant maps to an HTTP status for
/// the REST surface; MQTT callers only see them in logs.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum VeapError {
  /// Object not found: {0}
  NotFound(String),
  /// Method not allowed: {0}
  MethodNotAllowed(String),
  /// Bad request: {0}
  BadRequest(String),
  /// Forbidden: {0}
  Forbidden(String),
  /// Internal server error: {0}
  Internal(String),
}

impl VeapError {
  pub fn status(&self) -> u16 {
    match self {
      VeapError::NotFound(_) => 404,
      VeapError::MethodNotAllowed(_) => 405,
      VeapError::BadRequest(_) => 400,
      VeapError::Forbidden(_) => 403,
      VeapError::Internal(_) => 500,
    }
  }
}
