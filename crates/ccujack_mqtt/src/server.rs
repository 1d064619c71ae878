// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Façade over the embedded MQTT server. This is the in-process message
//! router all subsystems talk to; the TCP and websocket listeners are
//! external collaborators that attach to it. Subscriptions are removed
//! through the opaque handle returned by `subscribe`.

use ccujack_core::errors::{CcuJackError, ProtocolError};
use ccujack_core::{Pv, wire};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// MQTT delivery guarantees.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
  #[default]
  AtMostOnce,
  AtLeastOnce,
  ExactlyOnce,
}

impl QoS {
  pub fn from_byte(qos: u8) -> QoS {
    match qos {
      2 => QoS::ExactlyOnce,
      1 => QoS::AtLeastOnce,
      _ => QoS::AtMostOnce,
    }
  }

  pub fn byte(&self) -> u8 {
    match self {
      QoS::AtMostOnce => 0,
      QoS::AtLeastOnce => 1,
      QoS::ExactlyOnce => 2,
    }
  }
}

/// A message delivered to a subscription handler.
#[derive(Debug, Clone)]
pub struct PublishedMessage {
  pub topic: String,
  pub payload: Arc<Vec<u8>>,
  pub qos: QoS,
  pub retain: bool,
}

pub type PublishHandler = Arc<dyn Fn(PublishedMessage) -> BoxFuture<'static, ()> + Send + Sync>;

/// Opaque subscription identity; the sole removal API is
/// [`MqttServer::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

struct Subscription {
  handle: SubscriptionHandle,
  pattern: String,
  handler: PublishHandler,
}

/// The embedded MQTT server.
pub struct MqttServer {
  subscriptions: RwLock<Vec<Subscription>>,
  retained: RwLock<HashMap<String, PublishedMessage>>,
  next_handle: AtomicU64,
  authenticator: RwLock<Option<(String, Arc<crate::auth::AuthRegistry>)>>,
}

impl MqttServer {
  pub fn new() -> Arc<Self> {
    Arc::new(MqttServer {
      subscriptions: RwLock::new(Vec::new()),
      retained: RwLock::new(HashMap::new()),
      next_handle: AtomicU64::new(1),
      authenticator: RwLock::new(None),
    })
  }

  /// Selects the authenticator the TCP and websocket listeners use to admit
  /// clients.
  pub fn set_authenticator(&self, name: &str, registry: Arc<crate::auth::AuthRegistry>) {
    *self.authenticator.write().expect("authenticator lock") =
      Some((name.to_owned(), registry));
  }

  /// Admission check for a connecting client. Without a configured
  /// authenticator every client is admitted.
  pub fn admit(&self, identifier: &str, password: &str) -> Result<(), CcuJackError> {
    let authenticator = self.authenticator.read().expect("authenticator lock");
    match &*authenticator {
      Some((name, registry)) => registry.authenticate(name, identifier, password),
      None => Ok(()),
    }
  }

  /// Publishes a generic payload. Handlers of matching subscriptions run in
  /// subscription order; the router introduces no reordering.
  pub async fn publish(
    &self,
    topic: &str,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
  ) -> Result<(), CcuJackError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
      return Err(ProtocolError::InvalidTopic(topic.to_owned()).into());
    }
    trace!("Publishing {}: {}", topic, String::from_utf8_lossy(&payload));
    let msg = PublishedMessage {
      topic: topic.to_owned(),
      payload: Arc::new(payload),
      qos,
      retain,
    };
    if retain {
      let mut retained = self.retained.write().expect("retained lock");
      if msg.payload.is_empty() {
        retained.remove(topic);
      } else {
        retained.insert(topic.to_owned(), msg.clone());
      }
    }
    let handlers: Vec<PublishHandler> = {
      let subs = self.subscriptions.read().expect("subscription lock");
      subs
        .iter()
        .filter(|s| topic_matches(&s.pattern, topic))
        .map(|s| s.handler.clone())
        .collect()
    };
    for handler in handlers {
      handler(msg.clone()).await;
    }
    Ok(())
  }

  /// Publishes a PV in the wire envelope.
  pub async fn publish_pv(
    &self,
    topic: &str,
    pv: Pv,
    qos: QoS,
    retain: bool,
  ) -> Result<(), CcuJackError> {
    let payload = wire::pv_to_wire(&pv)?;
    self.publish(topic, payload, qos, retain).await
  }

  /// Registers a subscription. Retained messages matching the pattern are
  /// delivered to the new subscription right away.
  pub async fn subscribe(
    &self,
    pattern: &str,
    _qos: QoS,
    handler: PublishHandler,
  ) -> Result<SubscriptionHandle, CcuJackError> {
    if pattern.is_empty() {
      return Err(ProtocolError::InvalidTopic(pattern.to_owned()).into());
    }
    let handle = SubscriptionHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
    {
      let mut subs = self.subscriptions.write().expect("subscription lock");
      subs.push(Subscription {
        handle,
        pattern: pattern.to_owned(),
        handler: handler.clone(),
      });
    }
    let retained: Vec<PublishedMessage> = {
      let retained = self.retained.read().expect("retained lock");
      retained
        .values()
        .filter(|msg| topic_matches(pattern, &msg.topic))
        .cloned()
        .collect()
    };
    for msg in retained {
      handler(msg).await;
    }
    Ok(handle)
  }

  /// Removes a subscription. Returns false when the handle is unknown.
  pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
    let mut subs = self.subscriptions.write().expect("subscription lock");
    let before = subs.len();
    subs.retain(|s| s.handle != handle);
    subs.len() != before
  }

  /// Currently retained message on a topic, if any.
  pub fn retained(&self, topic: &str) -> Option<PublishedMessage> {
    self.retained.read().expect("retained lock").get(topic).cloned()
  }
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
  let mut pattern_parts = pattern.split('/');
  let mut topic_parts = topic.split('/');
  loop {
    match (pattern_parts.next(), topic_parts.next()) {
      (Some("#"), _) => return true,
      (Some("+"), Some(_)) => {}
      (Some(p), Some(t)) if p == t => {}
      (None, None) => return true,
      _ => return false,
    }
  }
}

/// True when two topic filters can match a common topic. Used to reject
/// overlapping command and feedback topics of virtual devices.
pub fn topics_overlap(a: &str, b: &str) -> bool {
  let a_parts: Vec<&str> = a.split('/').collect();
  let b_parts: Vec<&str> = b.split('/').collect();
  overlap(&a_parts, &b_parts)
}

fn overlap(a: &[&str], b: &[&str]) -> bool {
  match (a.first(), b.first()) {
    (Some(&"#"), _) | (_, Some(&"#")) => true,
    (Some(&pa), Some(&pb)) => {
      if pa == "+" || pb == "+" || pa == pb {
        overlap(&a[1..], &b[1..])
      } else {
        false
      }
    }
    (None, None) => true,
    _ => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use std::sync::Mutex;

  fn recording_handler() -> (PublishHandler, Arc<Mutex<Vec<PublishedMessage>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let handler: PublishHandler = Arc::new(move |msg| {
      let sink = sink.clone();
      Box::pin(async move {
        sink.lock().unwrap().push(msg);
      })
    });
    (handler, seen)
  }

  #[test]
  fn filter_matching() {
    assert!(topic_matches("device/set/+/+/+", "device/set/ABC/1/STATE"));
    assert!(!topic_matches("device/set/+/+/+", "device/set/ABC/1"));
    assert!(!topic_matches("device/set/+/+/+", "device/status/ABC/1/STATE"));
    assert!(topic_matches("device/#", "device/status/ABC/1/STATE"));
    assert!(topic_matches("#", "anything/at/all"));
    assert!(topic_matches("a/b", "a/b"));
    assert!(!topic_matches("a/b", "a/b/c"));
  }

  #[test]
  fn filter_overlap() {
    assert!(topics_overlap("stat/light", "stat/light"));
    assert!(topics_overlap("stat/+", "stat/light"));
    assert!(topics_overlap("stat/#", "stat/light/power"));
    assert!(!topics_overlap("cmnd/light", "stat/light"));
    assert!(!topics_overlap("stat/light", "stat/light/power"));
  }

  #[tokio::test]
  async fn publish_reaches_matching_subscriptions_in_order() {
    let server = MqttServer::new();
    let (handler, seen) = recording_handler();
    server
      .subscribe("device/status/#", QoS::AtLeastOnce, handler)
      .await
      .unwrap();
    server
      .publish("device/status/A/1/STATE", b"1".to_vec(), QoS::AtLeastOnce, false)
      .await
      .unwrap();
    server
      .publish("device/status/A/1/LEVEL", b"2".to_vec(), QoS::AtLeastOnce, false)
      .await
      .unwrap();
    server
      .publish("other/topic", b"3".to_vec(), QoS::AtLeastOnce, false)
      .await
      .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].topic, "device/status/A/1/STATE");
    assert_eq!(seen[1].topic, "device/status/A/1/LEVEL");
  }

  #[tokio::test]
  async fn unsubscribe_by_handle_stops_delivery() {
    let server = MqttServer::new();
    let (handler, seen) = recording_handler();
    let handle = server.subscribe("a/+", QoS::AtMostOnce, handler).await.unwrap();
    server.publish("a/1", b"x".to_vec(), QoS::AtMostOnce, false).await.unwrap();
    assert!(server.unsubscribe(handle));
    assert!(!server.unsubscribe(handle));
    server.publish("a/2", b"y".to_vec(), QoS::AtMostOnce, false).await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
  }

  #[tokio::test]
  async fn retained_messages_replay_on_subscribe() {
    let server = MqttServer::new();
    server
      .publish_pv("sysvar/status/1234", Pv::new(json!(21.5)), QoS::ExactlyOnce, true)
      .await
      .unwrap();
    let (handler, seen) = recording_handler();
    server
      .subscribe("sysvar/status/+", QoS::AtLeastOnce, handler)
      .await
      .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].retain);
    let pv = ccujack_core::wire::wire_to_pv(&seen[0].payload);
    assert_eq!(pv.value, json!(21.5));
  }

  #[tokio::test]
  async fn empty_retained_payload_clears() {
    let server = MqttServer::new();
    server.publish("t/1", b"x".to_vec(), QoS::AtMostOnce, true).await.unwrap();
    assert!(server.retained("t/1").is_some());
    server.publish("t/1", Vec::new(), QoS::AtMostOnce, true).await.unwrap();
    assert!(server.retained("t/1").is_none());
  }

  #[tokio::test]
  async fn publish_rejects_wildcard_topics() {
    let server = MqttServer::new();
    assert!(server.publish("a/+", b"x".to_vec(), QoS::AtMostOnce, false).await.is_err());
    assert!(server.publish("", b"x".to_vec(), QoS::AtMostOnce, false).await.is_err());
  }
}
