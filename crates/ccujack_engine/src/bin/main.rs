use argh::FromArgs;
use ccujack_config::Store;
use ccujack_engine::{
  APP_DESCRIPTION, APP_DISPLAY_NAME, CcuJackEngine, ControllerClients, EngineOptions,
  EngineOptionsBuilder, setup_logging,
};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal::ctrl_c;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// CCU-Jack - REST/MQTT-Server for the HomeMatic CCU.
#[derive(FromArgs)]
struct CliArguments {
  /// print version and exit.
  #[argh(switch)]
  version: bool,

  /// path of the configuration file.
  #[argh(option, default = "ccujack_engine::CONFIG_FILE.to_owned()")]
  config: String,

  /// do not wait for the controller interfaces at startup.
  #[argh(switch)]
  skip_ready_poll: bool,
}

fn parse_args() -> Result<CliArguments, ExitCode> {
  let args: Vec<String> = std::env::args().collect();
  let strs: Vec<&str> = args.iter().map(String::as_str).collect();
  match CliArguments::from_args(&strs[..1], &strs[1..]) {
    Ok(args) => Ok(args),
    Err(early_exit) => {
      if early_exit.status.is_ok() {
        // --help
        println!("{}", early_exit.output);
        Err(ExitCode::SUCCESS)
      } else {
        eprintln!("{}", early_exit.output);
        // invalid arguments
        Err(ExitCode::from(2))
      }
    }
  }
}

#[tokio::main]
async fn main() -> ExitCode {
  let args = match parse_args() {
    Ok(args) => args,
    Err(code) => return code,
  };
  if args.version {
    println!("{APP_DISPLAY_NAME} {VERSION} - {APP_DESCRIPTION}");
    return ExitCode::SUCCESS;
  }

  // the configuration determines the log destination, so it is read first
  let store = Store::new(&args.config);
  if let Err(err) = store.read() {
    eprintln!("{err}");
    return ExitCode::FAILURE;
  }
  let (level, log_file) = store.view(|cfg| (cfg.logging.level, cfg.logging.file_path.clone()));
  let (log_buffer, log_handle) = match setup_logging(level, &log_file) {
    Ok(logging) => logging,
    Err(err) => {
      eprintln!("Opening log file failed: {err}");
      return ExitCode::FAILURE;
    }
  };

  let options: EngineOptions = EngineOptionsBuilder::default()
    .config_file(&args.config)
    .skip_ready_poll(args.skip_ready_poll)
    .finish();

  let engine = Arc::new(CcuJackEngine::default());
  {
    let engine = engine.clone();
    tokio::spawn(async move {
      if ctrl_c().await.is_ok() {
        engine.stop();
      }
    });
  }

  // the controller wire codecs attach here; without them the bridge serves
  // MQTT and virtual devices only
  let clients = ControllerClients::detached();

  match engine.run(&options, store, clients, log_buffer, log_handle).await {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      eprintln!("{err}");
      ExitCode::FAILURE
    }
  }
}
