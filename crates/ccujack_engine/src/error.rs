use ccujack_core::errors::{CcuJackError, ConfigError};
use std::{error::Error, fmt};

/// Engine local error with a plain reason.
#[derive(Debug)]
pub struct EngineError {
  reason: String,
}

impl EngineError {
  pub fn new(reason: &str) -> Self {
    EngineError {
      reason: reason.to_owned(),
    }
  }
}

impl fmt::Display for EngineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.reason)
  }
}

impl Error for EngineError {
  fn source(&self) -> Option<&(dyn Error + 'static)> {
    None
  }
}

#[derive(Debug)]
pub enum CcuJackEngineError {
  IoError(std::io::Error),
  ConfigError(ConfigError),
  CcuJackError(CcuJackError),
  EngineError(EngineError),
}

impl fmt::Display for CcuJackEngineError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CcuJackEngineError::IoError(err) => write!(f, "{err}"),
      CcuJackEngineError::ConfigError(err) => write!(f, "{err}"),
      CcuJackEngineError::CcuJackError(err) => write!(f, "{err}"),
      CcuJackEngineError::EngineError(err) => write!(f, "{err}"),
    }
  }
}

impl Error for CcuJackEngineError {}

impl From<std::io::Error> for CcuJackEngineError {
  fn from(err: std::io::Error) -> Self {
    CcuJackEngineError::IoError(err)
  }
}

impl From<ConfigError> for CcuJackEngineError {
  fn from(err: ConfigError) -> Self {
    CcuJackEngineError::ConfigError(err)
  }
}

impl From<CcuJackError> for CcuJackEngineError {
  fn from(err: CcuJackError) -> Self {
    CcuJackEngineError::CcuJackError(err)
  }
}

impl From<EngineError> for CcuJackEngineError {
  fn from(err: EngineError) -> Self {
    CcuJackEngineError::EngineError(err)
  }
}
