use crate::error::CcuJackEngineError;
use crate::http::{AppState, veap_router};
use crate::logging::LogHandle;
use crate::options::EngineOptions;
use crate::{APP_DESCRIPTION, APP_DISPLAY_NAME, APP_VENDOR};
use async_trait::async_trait;
use ccujack_ccu::interconnector::Interconnector;
use ccujack_ccu::itf::{ItfClient, Receiver};
use ccujack_ccu::script::{ProgramDef, ScriptClient, SysVarDef, ValObjDef, ValueReading};
use ccujack_config::Store;
use ccujack_core::diagnostics::LogBuffer;
use ccujack_core::errors::{CcuJackError, TransportError};
use ccujack_core::util::async_manager;
use ccujack_core::Timestamp;
use ccujack_model::{DeviceCol, ProgramCol, Root, RootCfg, SysVarCol, Vendor, VirtualDeviceCol};
use ccujack_mqtt::{
  AuthRegistry, Bridge, CONFIG_AUTH_HANDLER, ConfigAuthHandler, EventReceiver, MqttServer,
  RemoteBridge, SysVarReader,
};
use ccujack_veap::{Node, Service};
use ccujack_virtdev::device::{NullEventPublisher, TeeEventPublisher};
use ccujack_virtdev::{VirtDevEventReceiver, VirtualDevices};
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The transports talking to the controller. The XML-RPC and HM script wire
/// codecs are external; they attach here by implementing the client traits.
pub struct ControllerClients {
  pub itf_clients: Vec<Arc<dyn ItfClient>>,
  pub script_client: Arc<dyn ScriptClient>,
}

impl ControllerClients {
  /// Clients used when no controller transport is attached. The bridge then
  /// serves MQTT and virtual devices only; every controller request fails
  /// with a transport error.
  pub fn detached() -> ControllerClients {
    ControllerClients {
      itf_clients: Vec::new(),
      script_client: Arc::new(DetachedScriptClient),
    }
  }
}

struct DetachedScriptClient;

fn detached_error() -> CcuJackError {
  TransportError::ControllerRequest("Controller script transport not attached".to_owned()).into()
}

#[async_trait]
impl ScriptClient for DetachedScriptClient {
  async fn system_variables(&self) -> Result<Vec<SysVarDef>, CcuJackError> {
    Err(detached_error())
  }

  async fn programs(&self) -> Result<Vec<ProgramDef>, CcuJackError> {
    Err(detached_error())
  }

  async fn read_values(
    &self,
    _objects: &[ValObjDef],
  ) -> Result<Vec<Result<ValueReading, CcuJackError>>, CcuJackError> {
    Err(detached_error())
  }

  async fn read_sys_var(&self, _def: &SysVarDef) -> Result<ValueReading, CcuJackError> {
    Err(detached_error())
  }

  async fn write_sys_var(&self, _def: &SysVarDef, _value: Value) -> Result<(), CcuJackError> {
    Err(detached_error())
  }

  async fn read_exec_time(&self, _def: &ProgramDef) -> Result<Timestamp, CcuJackError> {
    Err(detached_error())
  }

  async fn exec_program(&self, _def: &ProgramDef) -> Result<(), CcuJackError> {
    Err(detached_error())
  }
}

#[derive(Default)]
pub struct CcuJackEngine {
  stop_token: CancellationToken,
  callback_receiver: OnceLock<Arc<dyn Receiver>>,
  auth_registry: OnceLock<Arc<AuthRegistry>>,
}

impl CcuJackEngine {
  /// Receiver for controller callbacks; the XML-RPC callback codec feeds
  /// events into it. Available once the engine is running.
  pub fn callback_receiver(&self) -> Option<Arc<dyn Receiver>> {
    self.callback_receiver.get().cloned()
  }

  /// Authenticator registry of the embedded MQTT server; its listeners
  /// resolve client credentials through it. Available once the engine is
  /// running.
  pub fn auth_registry(&self) -> Option<Arc<AuthRegistry>> {
    self.auth_registry.get().cloned()
  }

  pub fn stop(&self) {
    info!("Engine stop called, cancelling token.");
    self.stop_token.cancel();
  }

  pub async fn run(
    &self,
    options: &EngineOptions,
    store: Arc<Store>,
    clients: ControllerClients,
    log_buffer: Arc<LogBuffer>,
    log_handle: LogHandle,
  ) -> Result<(), CcuJackEngineError> {
    // startup message
    info!("{APP_DISPLAY_NAME} V{VERSION}");
    info!("{APP_VENDOR}");
    store.view(|cfg| {
      info!("Configuration:");
      info!("  Log level: {}", cfg.logging.level);
      info!("  Log file: {}", cfg.logging.file_path);
      info!("  Server host name: {}", cfg.host.name);
      info!("  Server address: {}", cfg.host.address);
      info!("  HTTP port: {}", cfg.http.port);
      info!("  HTTPS port: {}", cfg.http.port_tls);
      info!("  CORS origins: {}", cfg.http.cors_origins.join(","));
      info!("  MQTT port: {}", cfg.mqtt.port);
      info!("  Secure MQTT port: {}", cfg.mqtt.port_tls);
      info!("  CCU address: {}", cfg.ccu.address);
      let interfaces: Vec<String> = cfg.ccu.interfaces.iter().map(|i| i.to_string()).collect();
      info!("  Interfaces: {}", interfaces.join(","));
      info!("  Init ID: {}", cfg.ccu.init_id);
    });

    let (init_id, http_port, web_ui_dir, cors_origins, bridge_cfg) = store.view(|cfg| {
      (
        cfg.ccu.init_id.clone(),
        cfg.http.port,
        if cfg.http.web_ui_dir.is_empty() {
          "webui".to_owned()
        } else {
          cfg.http.web_ui_dir.clone()
        },
        cfg.http.cors_origins.clone(),
        cfg.mqtt.bridge.clone(),
      )
    });

    // VEAP root with vendor subtree
    let root = Root::new();
    let level_handle = log_handle.clone();
    Vendor::new(
      RootCfg {
        server_name: APP_DISPLAY_NAME.to_owned(),
        server_version: VERSION.to_owned(),
        server_description: APP_DESCRIPTION.to_owned(),
        vendor_name: APP_VENDOR.to_owned(),
      },
      &root,
      &store,
      &log_buffer,
      Arc::new(move |level| level_handle.set_level(level)),
    );

    // embedded MQTT server and its authenticator
    let mqtt_server = MqttServer::new();
    let auth_registry = AuthRegistry::new();
    auth_registry.register(
      CONFIG_AUTH_HANDLER,
      Arc::new(ConfigAuthHandler {
        store: store.clone(),
      }),
    );
    mqtt_server.set_authenticator(CONFIG_AUTH_HANDLER, auth_registry.clone());
    let _ = self.auth_registry.set(auth_registry);

    // interconnector with the configured interface clients
    let mut interconnector = Interconnector::new(&init_id);
    for client in clients.itf_clients {
      interconnector.register(client);
    }
    let interconnector = Arc::new(interconnector);

    // domains
    let device_col = DeviceCol::new(
      root.as_parent(),
      interconnector.clone(),
      clients.script_client.clone(),
    );
    root.children().put(device_col.clone());
    let sysvar_col = SysVarCol::new(root.as_parent(), clients.script_client.clone());
    root.children().put(sysvar_col.clone());
    let program_col = ProgramCol::new(root.as_parent(), clients.script_client.clone());
    root.children().put(program_col.clone());

    // virtual devices publish to the controller layer and to MQTT
    let event_publisher = Arc::new(TeeEventPublisher {
      // attachment point of the controller device layer
      first: Arc::new(NullEventPublisher),
      second: Arc::new(VirtDevEventReceiver {
        server: mqtt_server.clone(),
      }),
    });
    let virtual_devices = Arc::new(VirtualDevices::new(
      store.clone(),
      event_publisher,
      mqtt_server.clone(),
    ));
    let virtdev_col = VirtualDeviceCol::new(root.as_parent(), virtual_devices.devices.clone());
    root.children().put(virtdev_col);

    // configuration changes synchronize the virtual devices
    {
      let virtual_devices = virtual_devices.clone();
      store.add_listener(move || {
        let virtual_devices = virtual_devices.clone();
        async_manager::spawn(async move {
          virtual_devices.synchronize_devices().await;
        });
      });
    }

    let root_node: Arc<dyn Node> = root.clone();
    let service = Service::new(root_node);

    // start the workers
    device_col.start();
    sysvar_col.start();
    program_col.start();
    let callback_receiver: Arc<dyn Receiver> = Arc::new(EventReceiver {
      server: mqtt_server.clone(),
      next: device_col.clone(),
    });
    let _ = self.callback_receiver.set(callback_receiver);

    let mut bridge = Bridge::new(mqtt_server.clone(), service.clone());
    bridge.start().await;
    let mut sysvar_reader = SysVarReader::new(
      service.clone(),
      clients.script_client.clone(),
      mqtt_server.clone(),
    );
    sysvar_reader.start();
    let mut remote_bridge = RemoteBridge::new(mqtt_server.clone());
    remote_bridge.start(&bridge_cfg);
    virtual_devices.start().await;

    // wait for the controller interfaces in the background
    if !options.skip_ready_poll() {
      let interconnector = interconnector.clone();
      let ready_token = self.stop_token.child_token();
      async_manager::spawn(async move {
        if interconnector.wait_for_ready(ready_token).await {
          info!("All controller interfaces are ready");
        }
      });
    }

    // HTTP server; fatal serve errors end the engine
    let (serve_err_tx, mut serve_err_rx) = mpsc::channel::<std::io::Error>(1);
    let app = veap_router(
      AppState {
        service,
        store: store.clone(),
      },
      &web_ui_dir,
      &cors_origins,
    );
    info!("Starting HTTP listener on port {http_port}");
    let listener = TcpListener::bind(("0.0.0.0", http_port)).await?;
    let shutdown = self.stop_token.child_token();
    tokio::spawn(async move {
      let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await;
      if let Err(err) = result {
        let _ = serve_err_tx.send(err).await;
      }
    });

    info!("CCU-Jack setup finished, running server tasks");
    let mut run_result: Result<(), CcuJackEngineError> = Ok(());
    tokio::select! {
      _ = self.stop_token.cancelled() => {
        info!("Owner requested process exit, exiting.");
      }
      Some(err) = serve_err_rx.recv() => {
        error!("Running HTTP server failed: {err}");
        run_result = Err(err.into());
      }
    }

    // shut down in reverse start order
    info!("Shutting down");
    self.stop_token.cancel();
    virtual_devices.stop().await;
    remote_bridge.stop().await;
    sysvar_reader.stop().await;
    bridge.stop();
    program_col.stop().await;
    sysvar_col.stop().await;
    device_col.stop().await;

    // flush a pending configuration write
    if let Err(err) = store.write() {
      error!("{err}");
    }
    store.close();
    info!("Exiting");
    run_result
  }
}
