// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! The compact JSON envelope used for PVs on MQTT topics:
//! `{"ts": <ms since epoch>, "v": <value>, "s": 0|1|2}`.

use crate::errors::ProtocolError;
use crate::pv::{Pv, State, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize, Deserialize)]
struct WirePv {
  #[serde(rename = "ts", default, skip_serializing_if = "Timestamp::is_zero")]
  time: Timestamp,
  #[serde(rename = "v", default)]
  value: Value,
  #[serde(rename = "s", default)]
  state: State,
}

/// Encodes a PV into the wire envelope. A zero timestamp is replaced by the
/// current time.
pub fn pv_to_wire(pv: &Pv) -> Result<Vec<u8>, ProtocolError> {
  let wpv = WirePv {
    time: pv.time.or_now(),
    value: pv.value.clone(),
    state: pv.state,
  };
  serde_json::to_vec(&wpv)
    .map_err(|err| ProtocolError::InvalidEnvelope(format!("Conversion of PV to JSON failed: {err}")))
}

/// Decodes a payload into a PV. The decoder is tolerant: a full envelope, a
/// bare JSON value and raw bytes (as a string value) are all accepted. A
/// missing timestamp becomes "now", a missing state becomes `Good`.
pub fn wire_to_pv(payload: &[u8]) -> Pv {
  let wpv = match serde_json::from_slice::<Value>(payload) {
    Ok(value) => {
      if is_envelope(&value) {
        serde_json::from_value::<WirePv>(value.clone()).unwrap_or(WirePv {
          time: Timestamp::default(),
          value,
          state: State::Good,
        })
      } else {
        WirePv {
          time: Timestamp::default(),
          value,
          state: State::Good,
        }
      }
    }
    Err(_) => WirePv {
      time: Timestamp::default(),
      value: Value::String(String::from_utf8_lossy(payload).into_owned()),
      state: State::Good,
    },
  };
  Pv {
    time: wpv.time.or_now(),
    value: wpv.value,
    state: wpv.state,
  }
}

// An envelope is a JSON object using only the envelope keys. Anything else is
// treated as a bare value.
fn is_envelope(value: &Value) -> bool {
  match value.as_object() {
    Some(obj) => !obj.is_empty() && obj.keys().all(|k| k == "ts" || k == "v" || k == "s"),
    None => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn round_trip_with_timestamp() {
    let pv = Pv {
      time: Timestamp(1689340800000),
      value: json!({"a": [1, 2, 3], "b": "x"}),
      state: State::Uncertain,
    };
    let payload = pv_to_wire(&pv).unwrap();
    assert_eq!(wire_to_pv(&payload), pv);
  }

  #[test]
  fn missing_fields_default_to_now_and_good() {
    let before = Timestamp::now();
    let pv = wire_to_pv(br#"{"v":42}"#);
    assert_eq!(pv.value, json!(42));
    assert_eq!(pv.state, State::Good);
    assert!(pv.time >= before);
  }

  #[test]
  fn bare_json_value_fallback() {
    let pv = wire_to_pv(b"42");
    assert_eq!(pv.value, json!(42));
    let pv = wire_to_pv(b"true");
    assert_eq!(pv.value, json!(true));
    let pv = wire_to_pv(br#"{"brightness":77}"#);
    assert_eq!(pv.value, json!({"brightness": 77}));
  }

  #[test]
  fn raw_bytes_fallback() {
    let pv = wire_to_pv(b"hello");
    assert_eq!(pv.value, json!("hello"));
  }

  #[test]
  fn explicit_state() {
    let pv = wire_to_pv(br#"{"ts":1000,"v":false,"s":2}"#);
    assert_eq!(pv.time, Timestamp(1000));
    assert_eq!(pv.value, json!(false));
    assert_eq!(pv.state, State::Bad);
  }
}
