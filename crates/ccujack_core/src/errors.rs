// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! CCU-Jack error structs/enums. Errors carry an explicit kind so that
//! callers can key retry decisions on it (the remote bridge retries on
//! transport errors only).

use displaydoc::Display;
use thiserror::Error;

pub type CcuJackResult<T = ()> = Result<T, CcuJackError>;

/// Configuration errors are reported to the operator at startup and are not
/// recoverable.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum ConfigError {
  /// Opening of configuration file {0} failed: {1}
  FileAccess(String, String),
  /// Reading of configuration file {0} failed: {1}
  InvalidDocument(String, String),
  /// Writing of configuration file {0} failed: {1}
  WriteFailed(String, String),
  /// Invalid interface type: {0}
  InvalidInterfaceType(String),
  /// Invalid logging level: {0}
  InvalidLogLevel(String),
  /// No password provided for user: {0}
  MissingPassword(String),
  /// Password hashing failed: {0}
  PasswordHash(String),
  /// Configuration update failed: {0}
  InvalidUpdate(String),
}

/// Transport errors cover failed connects, failed binds and dropped
/// connections. The top-level supervisor treats them as fatal for the
/// embedded servers; the remote bridge backs off and retries.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// Connecting to MQTT server on address {0} failed: {1}
  ConnectFailed(String, String),
  /// Running server failed: {0}
  ServeFailed(String),
  /// Connection closed: {0}
  ConnectionClosed(String),
  /// Loading of CA certificates from file {0} failed: {1}
  CaCertificates(String, String),
  /// Request to controller failed: {0}
  ControllerRequest(String),
}

/// Protocol errors cover malformed messages and unexpected shapes. The
/// offending message is dropped after logging.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum ProtocolError {
  /// Unexpected topic: {0}
  UnexpectedTopic(String),
  /// Invalid topic: {0}
  InvalidTopic(String),
  /// {0}
  InvalidEnvelope(String),
  /// Unexpected response from controller: {0}
  UnexpectedResponse(String),
}

/// Authentication and authorization failures.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum AuthError {
  /// Authentication failed for user {0}
  InvalidCredentials(String),
  /// Access denied for user {0}
  PermissionDenied(String),
  /// Unknown authenticator: {0}
  UnknownAuthenticator(String),
}

/// Lookup failures in the object model.
#[derive(Debug, Error, Display, Clone, PartialEq, Eq)]
pub enum NotFoundError {
  /// Object not found: {0}
  Path(String),
  /// Device not found: {0}
  Device(String),
  /// Channel not found: {0}
  Channel(String),
  /// Parameter not found: {0}
  Parameter(String),
  /// Interface not found: {0}
  Interface(String),
}

/// Aggregation enum for all error kinds.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CcuJackError {
  #[error(transparent)]
  ConfigError(#[from] ConfigError),
  #[error(transparent)]
  TransportError(#[from] TransportError),
  #[error(transparent)]
  ProtocolError(#[from] ProtocolError),
  #[error(transparent)]
  AuthError(#[from] AuthError),
  #[error(transparent)]
  NotFoundError(#[from] NotFoundError),
}

impl CcuJackError {
  /// True for errors the remote bridge recovers from with a backoff.
  pub fn is_transport(&self) -> bool {
    matches!(self, CcuJackError::TransportError(_))
  }
}
