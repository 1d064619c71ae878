use ccujack_config::LogLevel;
use ccujack_core::diagnostics::{LogBuffer, LogBufferWriter};
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

/// Handle for changing the log level at runtime (the `config` data point
/// applies `Logging.Level` live).
#[derive(Clone)]
pub struct LogHandle {
  reload: reload::Handle<LevelFilter, tracing_subscriber::Registry>,
}

impl LogHandle {
  pub fn set_level(&self, level: LogLevel) {
    let filter = level_filter(level);
    if self.reload.reload(filter).is_err() {
      eprintln!("Changing the log level failed");
    }
  }
}

pub fn level_filter(level: LogLevel) -> LevelFilter {
  match level {
    LogLevel::Off => LevelFilter::OFF,
    LogLevel::Error => LevelFilter::ERROR,
    LogLevel::Warning => LevelFilter::WARN,
    LogLevel::Info => LevelFilter::INFO,
    LogLevel::Debug => LevelFilter::DEBUG,
    LogLevel::Trace => LevelFilter::TRACE,
  }
}

struct BufferedMakeWriter {
  writer: LogBufferWriter,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for BufferedMakeWriter {
  type Writer = LogBufferWriter;

  fn make_writer(&'a self) -> Self::Writer {
    self.writer.clone()
  }
}

/// Initializes logging: all output runs through the diagnostics ring buffer
/// and is forwarded to stderr or, when configured, a log file.
pub fn setup_logging(
  level: LogLevel,
  log_file: &str,
) -> Result<(Arc<LogBuffer>, LogHandle), io::Error> {
  let buffer = if log_file.is_empty() {
    LogBuffer::with_next(Box::new(io::stderr()))
  } else {
    let file = OpenOptions::new().append(true).create(true).open(log_file)?;
    LogBuffer::with_next(Box::new(file))
  };
  let (filter, reload) = reload::Layer::new(level_filter(level));
  tracing_subscriber::registry()
    .with(filter)
    .with(
      tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(BufferedMakeWriter {
          writer: buffer.writer(),
        }),
    )
    .init();
  Ok((buffer, LogHandle { reload }))
}
