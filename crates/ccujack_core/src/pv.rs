// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Process values. A PV is the triple of timestamp, value and quality state
//! that every data point in the VEAP address space carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Quality state of a process value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum State {
  #[default]
  Good,
  Uncertain,
  Bad,
}

impl State {
  pub fn bad(&self) -> bool {
    matches!(self, State::Bad)
  }

  pub fn uncertain(&self) -> bool {
    matches!(self, State::Uncertain)
  }
}

impl From<State> for u8 {
  fn from(state: State) -> u8 {
    match state {
      State::Good => 0,
      State::Uncertain => 1,
      State::Bad => 2,
    }
  }
}

impl TryFrom<u8> for State {
  type Error = String;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(State::Good),
      1 => Ok(State::Uncertain),
      2 => Ok(State::Bad),
      other => Err(format!("Invalid PV state: {other}")),
    }
  }
}

/// Point in time with millisecond resolution, the resolution of the MQTT wire
/// envelope. A zero timestamp means "not set".
#[derive(
  Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
  pub fn now() -> Self {
    let ms = SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .map(|d| d.as_millis() as i64)
      .unwrap_or(0);
    Timestamp(ms)
  }

  pub fn millis(&self) -> i64 {
    self.0
  }

  pub fn is_zero(&self) -> bool {
    self.0 == 0
  }

  /// Returns self, or the current time when unset.
  pub fn or_now(self) -> Self {
    if self.is_zero() { Timestamp::now() } else { self }
  }
}

/// Process value.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Pv {
  pub time: Timestamp,
  pub value: Value,
  pub state: State,
}

impl Pv {
  pub fn new(value: Value) -> Self {
    Pv {
      time: Timestamp::now(),
      value,
      state: State::Good,
    }
  }

  pub fn with_state(value: Value, state: State) -> Self {
    Pv {
      time: Timestamp::now(),
      value,
      state,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn state_round_trip() {
    for state in [State::Good, State::Uncertain, State::Bad] {
      let n: u8 = state.into();
      assert_eq!(State::try_from(n).unwrap(), state);
    }
    assert!(State::try_from(3).is_err());
  }

  #[test]
  fn pv_equality_covers_time_value_state() {
    let a = Pv {
      time: Timestamp(1000),
      value: json!(21.5),
      state: State::Good,
    };
    let mut b = a.clone();
    assert_eq!(a, b);
    b.time = Timestamp(1001);
    assert_ne!(a, b);
    b.time = a.time;
    b.state = State::Uncertain;
    assert_ne!(a, b);
  }
}
