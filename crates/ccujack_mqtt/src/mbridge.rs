// CCU-Jack Rust Source Code File - See https://ccu-jack.io for more info.
//
// Copyright 2020-2026 CCU-Jack Project Contributors. All rights reserved.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Bridge between the embedded MQTT server and a remote one. Messages on
//! the configured shared topics are exchanged in both directions with the
//! topic prefixes rewritten. The connection is re-established with a fixed
//! backoff after any error.

use crate::server::{MqttServer, PublishHandler, QoS, topic_matches};
use ccujack_config::MqttBridgeCfg;
use ccujack_core::errors::{CcuJackError, TransportError};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, TlsConfiguration, Transport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BRIDGE_KEEP_ALIVE: Duration = Duration::from_secs(60);
const BRIDGE_RECOVER_DURATION: Duration = Duration::from_secs(60);
const DEFAULT_BUFFER_SIZE: usize = 100;

/// Daemon connecting the embedded MQTT server with a remote one.
pub struct RemoteBridge {
  server: Arc<MqttServer>,
  cancel: CancellationToken,
  task: Option<JoinHandle<()>>,
}

impl RemoteBridge {
  pub fn new(server: Arc<MqttServer>) -> Self {
    RemoteBridge {
      server,
      cancel: CancellationToken::new(),
      task: None,
    }
  }

  /// Starts the bridge with the specified configuration. The shared topic
  /// lists are cloned; later config changes do not affect a running bridge.
  pub fn start(&mut self, cfg: &MqttBridgeCfg) {
    if !cfg.enable {
      return;
    }
    let server = self.server.clone();
    let cancel = self.cancel.clone();
    let cfg = cfg.clone();
    self.task = Some(tokio::spawn(async move {
      info!("Starting MQTT bridge");
      // rerun client on transport errors
      loop {
        match run_client(&server, &cfg, &cancel).await {
          Ok(()) => break,
          Err(err) => {
            error!("{err}");
            if !err.is_transport() {
              break;
            }
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tokio::time::sleep(BRIDGE_RECOVER_DURATION) => {}
            }
          }
        }
      }
      debug!("Stopping MQTT bridge");
    }));
  }

  pub async fn stop(&mut self) {
    if let Some(task) = self.task.take() {
      self.cancel.cancel();
      let _ = task.await;
    }
  }
}

async fn run_client(
  server: &Arc<MqttServer>,
  cfg: &MqttBridgeCfg,
  cancel: &CancellationToken,
) -> Result<(), CcuJackError> {
  let addr = format!("{}:{}", cfg.address, cfg.port);
  debug!("Connecting to MQTT server on {addr} with client ID {}", cfg.client_id);
  let mut options = MqttOptions::new(cfg.client_id.clone(), cfg.address.clone(), cfg.port);
  options.set_keep_alive(BRIDGE_KEEP_ALIVE);
  options.set_clean_session(cfg.clean_session);
  if !cfg.username.is_empty() {
    options.set_credentials(cfg.username.clone(), cfg.password.clone());
  }
  if cfg.use_tls {
    options.set_transport(Transport::tls_with_config(tls_configuration(cfg)?));
  }
  let cap = if cfg.buffer_size > 0 {
    cfg.buffer_size
  } else {
    DEFAULT_BUFFER_SIZE
  };
  let (client, mut eventloop) = AsyncClient::new(options, cap);

  // subscribe remote topics and publish local
  for t in &cfg.incoming {
    let remote_filter = format!("{}{}", t.remote_prefix, t.pattern);
    client
      .subscribe(remote_filter.clone(), rumqttc_qos(t.qos))
      .await
      .map_err(|err| {
        TransportError::ConnectFailed(addr.clone(), format!("Subscribing remote topic {remote_filter} failed: {err}"))
      })?;
  }

  // subscribe local topics and publish remote
  let mut local_subs = Vec::new();
  for t in &cfg.outgoing {
    let local_filter = format!("{}{}", t.local_prefix, t.pattern);
    let remote_prefix = t.remote_prefix.clone();
    let local_prefix = t.local_prefix.clone();
    let publisher = client.clone();
    let handler: PublishHandler = Arc::new(move |msg| {
      let publisher = publisher.clone();
      let remote_topic = format!("{}{}", remote_prefix, strip_prefix(&msg.topic, &local_prefix));
      Box::pin(async move {
        trace!(
          "Outgoing local message on topic {} with retain {}, QoS {} and payload {}",
          msg.topic,
          msg.retain,
          msg.qos.byte(),
          String::from_utf8_lossy(&msg.payload)
        );
        let payload: Vec<u8> = msg.payload.as_ref().clone();
        if let Err(err) = publisher
          .publish(remote_topic.clone(), rumqttc_qos(msg.qos.byte()), msg.retain, payload)
          .await
        {
          error!("Publishing message on remote topic {remote_topic} failed: {err}");
        }
      })
    });
    match server
      .subscribe(&local_filter, QoS::from_byte(t.qos), handler)
      .await
    {
      Ok(handle) => local_subs.push(handle),
      Err(err) => {
        error!("Subscribing outgoing local topic {local_filter} failed: {err}");
      }
    }
  }

  // drive the connection; keep alive pings are sent by the event loop
  let result = drive(server, cfg, cancel, &mut eventloop).await;

  // remove local subscriptions on stop
  for handle in local_subs {
    server.unsubscribe(handle);
  }
  let _ = client.disconnect().await;
  result
}

async fn drive(
  server: &Arc<MqttServer>,
  cfg: &MqttBridgeCfg,
  cancel: &CancellationToken,
  eventloop: &mut rumqttc::EventLoop,
) -> Result<(), CcuJackError> {
  loop {
    tokio::select! {
      _ = cancel.cancelled() => return Ok(()),
      event = eventloop.poll() => match event {
        Ok(Event::Incoming(Packet::Publish(publish))) => {
          trace!(
            "Incoming remote message on topic {} with retain {}, QoS {:?} and payload {}",
            publish.topic,
            publish.retain,
            publish.qos,
            String::from_utf8_lossy(&publish.payload)
          );
          for t in &cfg.incoming {
            let remote_filter = format!("{}{}", t.remote_prefix, t.pattern);
            if topic_matches(&remote_filter, &publish.topic) {
              let local_topic =
                format!("{}{}", t.local_prefix, strip_prefix(&publish.topic, &t.remote_prefix));
              if let Err(err) = server
                .publish(
                  &local_topic,
                  publish.payload.to_vec(),
                  QoS::from_byte(publish.qos as u8),
                  publish.retain,
                )
                .await
              {
                error!("Publishing message on local topic {local_topic} failed: {err}");
              }
              break;
            }
          }
        }
        Ok(_) => {}
        Err(err) => {
          return Err(
            TransportError::ConnectionClosed(format!("MQTT bridge connection failed: {err}")).into(),
          );
        }
      }
    }
  }
}

fn strip_prefix<'a>(topic: &'a str, prefix: &str) -> &'a str {
  topic.strip_prefix(prefix).unwrap_or(topic)
}

fn rumqttc_qos(qos: u8) -> rumqttc::QoS {
  match qos {
    2 => rumqttc::QoS::ExactlyOnce,
    1 => rumqttc::QoS::AtLeastOnce,
    _ => rumqttc::QoS::AtMostOnce,
  }
}

fn tls_configuration(cfg: &MqttBridgeCfg) -> Result<TlsConfiguration, CcuJackError> {
  // allow insecure connections?
  if cfg.insecure {
    warn!("TLS certificate verification for the MQTT bridge is disabled");
    let config = rustls::ClientConfig::builder()
      .dangerous()
      .with_custom_certificate_verifier(Arc::new(NoVerification))
      .with_no_client_auth();
    return Ok(TlsConfiguration::Rustls(Arc::new(config)));
  }
  // CA certificates provided? The PEM file is pinned.
  if !cfg.ca_cert_file.is_empty() {
    let ca = fs::read(&cfg.ca_cert_file).map_err(|err| {
      TransportError::CaCertificates(cfg.ca_cert_file.clone(), err.to_string())
    })?;
    return Ok(TlsConfiguration::Simple {
      ca,
      alpn: None,
      client_auth: None,
    });
  }
  // public trust roots otherwise
  let mut roots = rustls::RootCertStore::empty();
  roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
  let config = rustls::ClientConfig::builder()
    .with_root_certificates(roots)
    .with_no_client_auth();
  Ok(TlsConfiguration::Rustls(Arc::new(config)))
}

#[derive(Debug)]
struct NoVerification;

impl ServerCertVerifier for NoVerification {
  fn verify_server_cert(
    &self,
    _end_entity: &CertificateDer<'_>,
    _intermediates: &[CertificateDer<'_>],
    _server_name: &ServerName<'_>,
    _ocsp_response: &[u8],
    _now: UnixTime,
  ) -> Result<ServerCertVerified, rustls::Error> {
    Ok(ServerCertVerified::assertion())
  }

  fn verify_tls12_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn verify_tls13_signature(
    &self,
    _message: &[u8],
    _cert: &CertificateDer<'_>,
    _dss: &DigitallySignedStruct,
  ) -> Result<HandshakeSignatureValid, rustls::Error> {
    Ok(HandshakeSignatureValid::assertion())
  }

  fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
    vec![
      SignatureScheme::RSA_PKCS1_SHA256,
      SignatureScheme::RSA_PKCS1_SHA384,
      SignatureScheme::RSA_PKCS1_SHA512,
      SignatureScheme::ECDSA_NISTP256_SHA256,
      SignatureScheme::ECDSA_NISTP384_SHA384,
      SignatureScheme::RSA_PSS_SHA256,
      SignatureScheme::RSA_PSS_SHA384,
      SignatureScheme::RSA_PSS_SHA512,
      SignatureScheme::ED25519,
    ]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use ccujack_config::SharedTopic;

  #[test]
  fn prefix_rewriting() {
    assert_eq!(strip_prefix("remote/device/status/a", "remote/"), "device/status/a");
    assert_eq!(strip_prefix("device/status/a", "remote/"), "device/status/a");
    let t = SharedTopic {
      pattern: "device/status/#".to_owned(),
      local_prefix: String::new(),
      remote_prefix: "site1/".to_owned(),
      qos: 1,
    };
    let remote_topic = format!("{}{}", t.remote_prefix, strip_prefix("device/status/A/1/K", &t.local_prefix));
    assert_eq!(remote_topic, "site1/device/status/A/1/K");
    let local_topic = format!("{}{}", t.local_prefix, strip_prefix("site1/device/status/A/1/K", &t.remote_prefix));
    assert_eq!(local_topic, "device/status/A/1/K");
  }

  #[test]
  fn qos_mapping() {
    assert_eq!(rumqttc_qos(0), rumqttc::QoS::AtMostOnce);
    assert_eq!(rumqttc_qos(1), rumqttc::QoS::AtLeastOnce);
    assert_eq!(rumqttc_qos(2), rumqttc::QoS::ExactlyOnce);
    assert_eq!(rumqttc_qos(9), rumqttc::QoS::AtMostOnce);
  }

  #[test]
  fn missing_ca_file_is_a_transport_error() {
    let cfg = MqttBridgeCfg {
      use_tls: true,
      ca_cert_file: "/does/not/exist.pem".to_owned(),
      ..MqttBridgeCfg::default()
    };
    let err = tls_configuration(&cfg).unwrap_err();
    assert!(err.is_transport());
  }

  #[tokio::test]
  async fn disabled_bridge_does_not_start() {
    let server = MqttServer::new();
    let mut bridge = RemoteBridge::new(server);
    bridge.start(&MqttBridgeCfg::default());
    assert!(bridge.task.is_none());
    bridge.stop().await;
  }
}
