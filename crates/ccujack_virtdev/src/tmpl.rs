// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Templating for payload shaping. The environment exposes a fixed function
//! set; templates receive `payload` (extractors), `value` (outbound command
//! templates) or the channel context (key sender payloads).

use crate::device::Device;
use ccujack_core::errors::{CcuJackError, ProtocolError};
use minijinja::{Environment, ErrorKind, context};
use std::sync::Arc;

/// Builds the template environment with the fixed function set.
pub fn environment() -> Environment<'static> {
  let mut env = Environment::new();
  env.add_function("contains", |s: String, sub: String| s.contains(&sub));
  env.add_function("fields", |s: String| {
    s.split_whitespace().map(str::to_owned).collect::<Vec<_>>()
  });
  env.add_function("split", |s: String, sep: String| {
    s.split(&sep).map(str::to_owned).collect::<Vec<_>>()
  });
  env.add_function("toLower", |s: String| s.to_lowercase());
  env.add_function("toUpper", |s: String| s.to_uppercase());
  env.add_function("trimSpace", |s: String| s.trim().to_owned());
  env.add_function("parseJSON", |s: String| {
    serde_json::from_str::<serde_json::Value>(&s)
      .map(minijinja::Value::from_serialize)
      .map_err(|err| minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string()))
  });
  env.add_function("round", |v: f64| v.round());
  env.add_function("add", |a: f64, b: f64| a + b);
  env.add_function("sub", |a: f64, b: f64| a - b);
  env.add_function("mul", |a: f64, b: f64| a * b);
  env.add_function("div", |a: f64, b: f64| {
    if b == 0.0 {
      Err(minijinja::Error::new(ErrorKind::InvalidOperation, "division by zero"))
    } else {
      Ok(a / b)
    }
  });
  env.add_function(
    "mapRange",
    |in_min: f64, in_max: f64, out_min: f64, out_max: f64, value: f64| {
      if in_min == in_max {
        return Err(minijinja::Error::new(ErrorKind::InvalidOperation, "input range is empty"));
      }
      if out_min == out_max {
        return Err(minijinja::Error::new(ErrorKind::InvalidOperation, "output range is empty"));
      }
      if value < in_min.min(in_max) || value > in_min.max(in_max) {
        return Err(minijinja::Error::new(
          ErrorKind::InvalidOperation,
          format!("value {value} outside of input range [{in_min}, {in_max}]"),
        ));
      }
      Ok(out_min + (value - in_min) * (out_max - out_min) / (in_max - in_min))
    },
  );
  env
}

/// Renders a template with a payload string as context.
pub fn render_payload(source: &str, payload: &str) -> Result<String, CcuJackError> {
  environment()
    .render_str(source, context! { payload => payload })
    .map_err(template_error(source))
}

/// Renders a template with a numeric value as context.
pub fn render_value(source: &str, value: f64) -> Result<String, CcuJackError> {
  environment()
    .render_str(source, context! { value => value })
    .map_err(template_error(source))
}

/// Renders a template with the channel as data context. Values of sibling
/// channels are reachable through the bound `channelValue` function.
pub fn render_channel(
  source: &str,
  device: &Arc<Device>,
  channel_index: i32,
) -> Result<String, CcuJackError> {
  let mut env = environment();
  let dev = device.clone();
  env.add_function(
    "channelValue",
    move |index: i64, parameter: String| -> Result<minijinja::Value, minijinja::Error> {
      let channel = dev.channel(&index.to_string()).map_err(|err| {
        minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
      })?;
      let param = channel.value_paramset().parameter(&parameter).map_err(|err| {
        minijinja::Error::new(ErrorKind::InvalidOperation, err.to_string())
      })?;
      Ok(minijinja::Value::from_serialize(param.value()))
    },
  );
  let descr = device.description();
  env
    .render_str(
      source,
      context! {
        channel => context! {
          address => format!("{}:{}", descr.address, channel_index),
          index => channel_index,
          device => descr.address,
        },
      },
    )
    .map_err(template_error(source))
}

fn template_error(source: &str) -> impl Fn(minijinja::Error) -> CcuJackError + '_ {
  move |err| {
    ProtocolError::UnexpectedResponse(format!("Execution of template '{source}' failed: {err}"))
      .into()
  }
}
