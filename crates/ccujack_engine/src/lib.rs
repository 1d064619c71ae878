#[macro_use]
extern crate tracing;

mod engine;
mod error;
mod http;
mod logging;
mod options;

pub use engine::{CcuJackEngine, ControllerClients};
pub use error::{CcuJackEngineError, EngineError};
pub use http::{AppState, veap_router};
pub use logging::{LogHandle, setup_logging};
pub use options::{EngineOptions, EngineOptionsBuilder};

/// Display name of the application.
pub const APP_DISPLAY_NAME: &str = "CCU-Jack";
/// Short name of the application.
pub const APP_NAME: &str = "ccu-jack";
/// One line description of the application.
pub const APP_DESCRIPTION: &str = "REST/MQTT-Server for the HomeMatic CCU";
/// Vendor contact.
pub const APP_VENDOR: &str = "CCU-Jack Project Contributors";

/// Default name of the configuration file.
pub const CONFIG_FILE: &str = "ccu-jack.cfg";
