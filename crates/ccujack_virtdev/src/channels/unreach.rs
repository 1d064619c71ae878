// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Connection monitoring channel. Error and OK messages drive a debounced
//! state machine with independent delays; transitions set the door-sensor
//! style STATE of this channel together with UNREACH on the maintenance
//! channel.

use crate::channels::DoorSensorChannel;
use crate::channels::base::{ChannelWorker, new_matcher_kind_parameter, setup_mqtt_channel};
use crate::device::{Channel, Device, Parameter};
use crate::engine::VirtualDevices;
use crate::extract::Matcher;
use async_trait::async_trait;
use ccujack_mqtt::{MqttServer, QoS, SubscriptionHandle};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UdEvent {
  Ok,
  Error,
}

type TransitionFn = Arc<dyn Fn(bool) + Send + Sync>;

/// Debounced OK/error state machine. An error is reported only when no OK
/// arrives within the error delay; after an OK, the OK state is re-asserted
/// once the OK delay expires.
struct UnreachDelay {
  cmd: Mutex<Option<mpsc::Sender<UdEvent>>>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl UnreachDelay {
  fn new() -> UnreachDelay {
    UnreachDelay {
      cmd: Mutex::new(None),
      task: Mutex::new(None),
    }
  }

  fn start(&self, ok_delay: Duration, error_delay: Duration, on_transition: TransitionFn) {
    let (tx, rx) = mpsc::channel(16);
    *self.cmd.lock().expect("delay lock") = Some(tx);
    *self.task.lock().expect("delay lock") =
      Some(tokio::spawn(run(rx, ok_delay, error_delay, on_transition)));
  }

  fn send(&self, event: UdEvent) {
    if let Some(cmd) = &*self.cmd.lock().expect("delay lock") {
      if cmd.try_send(event).is_err() {
        warn!("Connection state machine busy, event dropped");
      }
    }
  }

  async fn stop(&self) {
    let task = {
      *self.cmd.lock().expect("delay lock") = None;
      self.task.lock().expect("delay lock").take()
    };
    if let Some(task) = task {
      // closing the command channel ends the task
      let _ = task.await;
    }
  }
}

async fn run(
  mut cmd: mpsc::Receiver<UdEvent>,
  ok_delay: Duration,
  error_delay: Duration,
  on_transition: TransitionFn,
) {
  let mut ok_deadline: Option<Instant> = None;
  let mut error_deadline: Option<Instant> = None;
  loop {
    let ok_timer = sleep_opt(ok_deadline);
    let error_timer = sleep_opt(error_deadline);
    tokio::select! {
      event = cmd.recv() => match event {
        None => break,
        Some(UdEvent::Ok) => {
          error_deadline = None;
          on_transition(false);
          if !ok_delay.is_zero() {
            ok_deadline = Some(Instant::now() + ok_delay);
          }
        }
        Some(UdEvent::Error) => {
          if error_deadline.is_none() {
            error_deadline = Some(Instant::now() + error_delay);
          }
        }
      },
      _ = ok_timer => {
        ok_deadline = None;
        error_deadline = None;
        on_transition(false);
      }
      _ = error_timer => {
        error_deadline = None;
        on_transition(true);
      }
    }
  }
}

async fn sleep_opt(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => futures::future::pending().await,
  }
}

struct MqttUnreach {
  server: Arc<MqttServer>,
  channel: Arc<Channel>,

  topic: Arc<Parameter>,
  error_pattern: Arc<Parameter>,
  ok_pattern: Arc<Parameter>,
  matcher_kind: Arc<Parameter>,
  ok_delay: Arc<Parameter>,
  error_delay: Arc<Parameter>,

  delay: UnreachDelay,
  on_transition: TransitionFn,
  sub: Mutex<Option<SubscriptionHandle>>,
}

#[async_trait]
impl ChannelWorker for MqttUnreach {
  async fn start(self: Arc<Self>) {
    let topic = self.topic.string_value();
    if topic.is_empty() {
      return;
    }
    let error_matcher =
      match Matcher::new(self.matcher_kind.int_value(), &self.error_pattern.string_value()) {
        Ok(matcher) => Arc::new(matcher),
        Err(err) => {
          error!("Creation of matcher for 'error' failed: {err}");
          return;
        }
      };
    let ok_matcher = match Matcher::new(self.matcher_kind.int_value(), &self.ok_pattern.string_value())
    {
      Ok(matcher) => Arc::new(matcher),
      Err(err) => {
        error!("Creation of matcher for 'ok' failed: {err}");
        return;
      }
    };
    let ok_delay = Duration::from_secs_f64(self.ok_delay.float_value().max(0.0));
    let error_delay = Duration::from_secs_f64(self.error_delay.float_value().max(0.0));
    self.delay.start(ok_delay, error_delay, self.on_transition.clone());

    let this = self.clone();
    let result = self
      .server
      .subscribe(
        &topic,
        QoS::ExactlyOnce,
        Arc::new(move |msg| {
          let this = this.clone();
          let error_matcher = error_matcher.clone();
          let ok_matcher = ok_matcher.clone();
          Box::pin(async move {
            debug!(
              "Message for connection state {} received: {}, {}",
              this.channel.address(),
              msg.topic,
              String::from_utf8_lossy(&msg.payload)
            );
            if error_matcher.matches(&msg.payload) {
              debug!("Setting connection error {}", this.channel.address());
              this.delay.send(UdEvent::Error);
            } else if ok_matcher.matches(&msg.payload) {
              debug!("Clearing connection error {}", this.channel.address());
              this.delay.send(UdEvent::Ok);
            } else {
              warn!(
                "Invalid message for connection state {} received: {}",
                this.channel.address(),
                String::from_utf8_lossy(&msg.payload)
              );
            }
          })
        }),
      )
      .await;
    match result {
      Ok(handle) => *self.sub.lock().expect("sub lock") = Some(handle),
      Err(err) => error!("Subscribe failed on topic {topic}: {err}"),
    }
  }

  async fn stop(&self) {
    let handle = self.sub.lock().expect("sub lock").take();
    if let Some(handle) = handle {
      self.server.unsubscribe(handle);
      self.delay.stop().await;
    }
  }
}

/// Connection monitoring channel driven by error/ok patterns on an MQTT
/// topic.
pub(crate) async fn add_mqtt_unreach(vd: &VirtualDevices, dev: &Arc<Device>) -> Arc<Channel> {
  let dch = DoorSensorChannel::new(dev);
  let channel = dch.channel.clone();

  let mut ok_delay = Parameter::new_float("OK_DELAY");
  ok_delay.description.min = json!(0.0);
  ok_delay.description.unit = "s".to_owned();
  let mut error_delay = Parameter::new_float("ERROR_DELAY");
  error_delay.description.min = json!(0.0);
  error_delay.description.unit = "s".to_owned();

  // STATE of this channel and UNREACH of the maintenance channel are set
  // together on each transition
  let on_transition: TransitionFn = {
    let device = dev.clone();
    let state = channel.value_paramset().parameter("STATE").expect("door sensor channel");
    let channel = channel.clone();
    Arc::new(move |conn_error: bool| {
      {
        let _guard = channel.lock();
        state.update(json!(conn_error));
      }
      crate::channels::base::set_device_unreach(&device, conn_error);
    })
  };

  let worker = Arc::new(MqttUnreach {
    server: vd.mqtt_server.clone(),
    channel: channel.clone(),
    topic: channel.add_master_param(Parameter::new_string("TOPIC")),
    error_pattern: channel.add_master_param(Parameter::new_string("ERROR_PATTERN")),
    ok_pattern: channel.add_master_param(Parameter::new_string("OK_PATTERN")),
    matcher_kind: channel.add_master_param(new_matcher_kind_parameter("MATCHER")),
    ok_delay: channel.add_master_param(ok_delay),
    error_delay: channel.add_master_param(error_delay),
    delay: UnreachDelay::new(),
    on_transition,
    sub: Mutex::new(None),
  });
  setup_mqtt_channel(vd, &channel, worker).await;
  channel
}
