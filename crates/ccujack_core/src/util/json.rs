// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Typed query helper for dynamically shaped JSON. Navigation accumulates the
//! first error; terminal accessors surface it. No accessor coerces types.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryError {
  path: String,
  reason: String,
}

impl fmt::Display for QueryError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Query of {} failed: {}", self.path, self.reason)
  }
}

impl std::error::Error for QueryError {}

/// Starts a query on a JSON value.
pub fn q(value: &Value) -> Query<'_> {
  Query {
    value: Some(value),
    path: "$".to_owned(),
    error: None,
  }
}

#[derive(Clone)]
pub struct Query<'a> {
  value: Option<&'a Value>,
  path: String,
  error: Option<QueryError>,
}

impl<'a> Query<'a> {
  fn fail(&self, reason: &str) -> Query<'a> {
    Query {
      value: None,
      path: self.path.clone(),
      error: self.error.clone().or_else(|| {
        Some(QueryError {
          path: self.path.clone(),
          reason: reason.to_owned(),
        })
      }),
    }
  }

  /// Navigates to a required object key.
  pub fn key(&self, key: &str) -> Query<'a> {
    match self.value.and_then(|v| v.as_object()) {
      Some(obj) => match obj.get(key) {
        Some(child) => Query {
          value: Some(child),
          path: format!("{}.{}", self.path, key),
          error: self.error.clone(),
        },
        None => self.fail(&format!("missing key: {key}")),
      },
      None if self.error.is_some() => self.fail(""),
      None => self.fail("not an object"),
    }
  }

  /// Navigates to an optional object key; a missing key yields JSON null.
  pub fn try_key(&self, key: &str) -> Query<'a> {
    match self.value.and_then(|v| v.as_object()) {
      Some(obj) => Query {
        value: Some(obj.get(key).unwrap_or(&Value::Null)),
        path: format!("{}.{}", self.path, key),
        error: self.error.clone(),
      },
      None if self.error.is_some() => self.fail(""),
      None => self.fail("not an object"),
    }
  }

  pub fn has(&self, key: &str) -> bool {
    self
      .value
      .and_then(|v| v.as_object())
      .map(|obj| obj.contains_key(key))
      .unwrap_or(false)
  }

  /// Iterates the entries of an object.
  pub fn entries(&self) -> Vec<(String, Query<'a>)> {
    match self.value.and_then(|v| v.as_object()) {
      Some(obj) => obj
        .iter()
        .map(|(k, v)| {
          (
            k.clone(),
            Query {
              value: Some(v),
              path: format!("{}.{}", self.path, k),
              error: self.error.clone(),
            },
          )
        })
        .collect(),
      None => Vec::new(),
    }
  }

  /// Iterates the elements of an array.
  pub fn elements(&self) -> Vec<Query<'a>> {
    match self.value.and_then(|v| v.as_array()) {
      Some(items) => items
        .iter()
        .enumerate()
        .map(|(idx, v)| Query {
          value: Some(v),
          path: format!("{}[{}]", self.path, idx),
          error: self.error.clone(),
        })
        .collect(),
      None => Vec::new(),
    }
  }

  pub fn string(&self) -> Result<String, QueryError> {
    self.terminal(|v| v.as_str().map(str::to_owned), "not a string")
  }

  /// Like [`Query::string`], but null yields an empty string.
  pub fn string_or_empty(&self) -> Result<String, QueryError> {
    if matches!(self.value, Some(Value::Null)) {
      return Ok(String::new());
    }
    self.string()
  }

  pub fn boolean(&self) -> Result<bool, QueryError> {
    self.terminal(|v| v.as_bool(), "not a boolean")
  }

  pub fn float(&self) -> Result<f64, QueryError> {
    self.terminal(|v| v.as_f64(), "not a number")
  }

  pub fn integer(&self) -> Result<i64, QueryError> {
    self.terminal(|v| v.as_i64(), "not an integer")
  }

  pub fn value(&self) -> Result<Value, QueryError> {
    self.terminal(|v| Some(v.clone()), "no value")
  }

  fn terminal<T>(&self, get: impl Fn(&Value) -> Option<T>, reason: &str) -> Result<T, QueryError> {
    if let Some(err) = &self.error {
      return Err(err.clone());
    }
    match self.value.and_then(get) {
      Some(v) => Ok(v),
      None => Err(QueryError {
        path: self.path.clone(),
        reason: reason.to_owned(),
      }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn navigates_objects() {
    let doc = json!({"Users": {"u1": {"Active": true, "Description": "x"}}});
    assert!(q(&doc).key("Users").key("u1").key("Active").boolean().unwrap());
    assert_eq!(
      q(&doc).key("Users").key("u1").key("Description").string().unwrap(),
      "x"
    );
  }

  #[test]
  fn reports_first_error_with_path() {
    let doc = json!({"a": {"b": 1}});
    let err = q(&doc).key("a").key("missing").key("deeper").string().unwrap_err();
    assert!(err.to_string().contains("$.a"));
    assert!(err.to_string().contains("missing"));
  }

  #[test]
  fn does_not_coerce() {
    let doc = json!({"n": 1});
    assert!(q(&doc).key("n").string().is_err());
    assert_eq!(q(&doc).key("n").integer().unwrap(), 1);
  }

  #[test]
  fn try_key_tolerates_absence() {
    let doc = json!({});
    assert_eq!(q(&doc).try_key("d").string_or_empty().unwrap(), "");
  }
}
