// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Payload parsing primitives of the virtual device channels: matchers for
//! boolean routing and number extractors.

use crate::tmpl;
use ccujack_core::errors::{CcuJackError, ProtocolError};
use regex::Regex;

/// Matcher kinds; aligned with the MATCHER enum parameter value list.
pub const MATCHER_VALUE_LIST: [&str; 3] = ["EXACT", "CONTAINS", "REGEXP"];

/// Extractor kinds; aligned with the EXTRACTOR enum parameter value list.
pub const EXTRACTOR_VALUE_LIST: [&str; 5] = ["AFTER", "BEFORE", "REGEXP", "ALL", "TEMPLATE"];

const NUMBER_PATTERN: &str = r"([+-]?(\d+(\.\d*)?|\.\d+))";
const SKIP_PATTERN: &str = r"[^\d.+-]*";

/// Payload matcher for boolean routing.
pub enum Matcher {
  Exact(String),
  Contains(String),
  Regexp(Regex),
}

impl Matcher {
  /// Builds a matcher; `kind` indexes [`MATCHER_VALUE_LIST`].
  pub fn new(kind: i64, pattern: &str) -> Result<Matcher, CcuJackError> {
    match kind {
      0 => Ok(Matcher::Exact(pattern.to_owned())),
      1 => Ok(Matcher::Contains(pattern.to_owned())),
      2 => {
        let regex = Regex::new(pattern).map_err(|_| {
          CcuJackError::from(ProtocolError::UnexpectedResponse(format!(
            "Invalid regular expression: {pattern}"
          )))
        })?;
        Ok(Matcher::Regexp(regex))
      }
      other => Err(
        ProtocolError::UnexpectedResponse(format!("Invalid matcher kind: {other}")).into(),
      ),
    }
  }

  pub fn matches(&self, payload: &[u8]) -> bool {
    let payload = String::from_utf8_lossy(payload);
    match self {
      Matcher::Exact(pattern) => payload == *pattern,
      Matcher::Contains(pattern) => payload.contains(pattern.as_str()),
      Matcher::Regexp(regex) => regex.is_match(&payload),
    }
  }
}

/// Number extractor for analog targets.
pub enum Extractor {
  Regex { regex: Regex, group: usize },
  Template { source: String },
}

impl Extractor {
  /// Builds an extractor; `kind` indexes [`EXTRACTOR_VALUE_LIST`]. The
  /// pattern parameter carries the literal, regular expression or template
  /// depending on the kind; `group` is only used by REGEXP.
  pub fn new(kind: i64, pattern: &str, group: i64) -> Result<Extractor, CcuJackError> {
    let (regex_pattern, group) = match kind {
      // first number after the literal, skipping non-numeric characters
      0 => (
        format!("{}{}{}", regex::escape(pattern), SKIP_PATTERN, NUMBER_PATTERN),
        1,
      ),
      // first number before the literal
      1 => (
        format!("{}{}{}", NUMBER_PATTERN, SKIP_PATTERN, regex::escape(pattern)),
        1,
      ),
      2 => (pattern.to_owned(), group.max(0) as usize),
      // the entire payload must be a number after trimming
      3 => (format!(r"^\s*{}\s*$", NUMBER_PATTERN), 1),
      4 => {
        return Ok(Extractor::Template {
          source: pattern.to_owned(),
        });
      }
      other => {
        return Err(
          ProtocolError::UnexpectedResponse(format!("Invalid extractor kind: {other}")).into(),
        );
      }
    };
    trace!("Creating extractor with regular expression {regex_pattern} and group {group}");
    let regex = Regex::new(&regex_pattern).map_err(|_| {
      CcuJackError::from(ProtocolError::UnexpectedResponse(format!(
        "Invalid regular expression: {regex_pattern}"
      )))
    })?;
    Ok(Extractor::Regex { regex, group })
  }

  pub fn extract(&self, payload: &[u8]) -> Result<f64, CcuJackError> {
    let payload = String::from_utf8_lossy(payload);
    match self {
      Extractor::Regex { regex, group } => {
        let captures = regex.captures(&payload).ok_or_else(|| {
          CcuJackError::from(ProtocolError::UnexpectedResponse(format!(
            "Regexp does not match: {payload}"
          )))
        })?;
        let capture = captures.get(*group).ok_or_else(|| {
          CcuJackError::from(ProtocolError::UnexpectedResponse(format!(
            "Invalid group index: {group}"
          )))
        })?;
        parse_number(capture.as_str())
      }
      Extractor::Template { source } => {
        let rendered = tmpl::render_payload(source, &payload)?;
        parse_number(rendered.trim())
      }
    }
  }
}

fn parse_number(literal: &str) -> Result<f64, CcuJackError> {
  literal.parse::<f64>().map_err(|_| {
    ProtocolError::UnexpectedResponse(format!("Invalid number literal: {literal}")).into()
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn matcher_exact() {
    let m = Matcher::new(0, "on").unwrap();
    assert!(m.matches(b"on"));
    assert!(!m.matches(b"turn on"));
  }

  #[test]
  fn matcher_contains() {
    let m = Matcher::new(1, "on").unwrap();
    assert!(m.matches(b"turn on"));
    assert!(!m.matches(b"of"));
  }

  #[test]
  fn matcher_regexp() {
    let m = Matcher::new(2, "^err$").unwrap();
    assert!(m.matches(b"err"));
    assert!(!m.matches(b"error"));
    assert!(Matcher::new(2, "(").is_err());
    assert!(Matcher::new(7, "x").is_err());
  }

  #[test]
  fn extractor_after_keyword() {
    let e = Extractor::new(0, "T=", 0).unwrap();
    assert_eq!(e.extract("hello T= 12.5 °C".as_bytes()).unwrap(), 12.5);
    assert!(e.extract(b"no keyword 12.5").is_err());
  }

  #[test]
  fn extractor_before_keyword() {
    let e = Extractor::new(1, " V", 0).unwrap();
    assert_eq!(e.extract(b"-3.2 V").unwrap(), -3.2);
  }

  #[test]
  fn extractor_regexp_group() {
    let e = Extractor::new(2, r"brightness=(\d+)", 1).unwrap();
    assert_eq!(e.extract(b"brightness=512").unwrap(), 512.0);
    assert!(e.extract(b"dim=512").is_err());
    let e = Extractor::new(2, r"(\d+)", 5).unwrap();
    assert!(e.extract(b"42").is_err());
  }

  #[test]
  fn extractor_full_match() {
    let e = Extractor::new(3, "", 0).unwrap();
    assert_eq!(e.extract(b" 7.0 ").unwrap(), 7.0);
    assert!(e.extract(b"a 7 b").is_err());
  }

  #[test]
  fn extractor_template() {
    let e = Extractor::new(
      4,
      r#"{% set data = parseJSON(payload) %}{% if data.ison %}{{ data.brightness }}{% else %}0{% endif %}"#,
      0,
    )
    .unwrap();
    assert_eq!(e.extract(br#"{"brightness":42,"ison":true}"#).unwrap(), 42.0);
    assert_eq!(e.extract(br#"{"brightness":21,"ison":false}"#).unwrap(), 0.0);
    assert!(e.extract(b"").is_err());
  }

  #[test]
  fn invalid_extractor_kind() {
    assert!(Extractor::new(9, "", 0).is_err());
  }
}
