use crate::CONFIG_FILE;
use getset::{CopyGetters, Getters};

#[derive(Getters, CopyGetters, Debug, Clone)]
pub struct EngineOptions {
  /// Path of the configuration file.
  #[getset(get = "pub")]
  config_file: String,
  /// Do not wait for the controller interfaces to become ready.
  #[getset(get_copy = "pub")]
  skip_ready_poll: bool,
}

impl Default for EngineOptions {
  fn default() -> Self {
    EngineOptions {
      config_file: CONFIG_FILE.to_owned(),
      skip_ready_poll: false,
    }
  }
}

#[derive(Default)]
pub struct EngineOptionsBuilder {
  options: EngineOptions,
}

impl EngineOptionsBuilder {
  pub fn config_file(&mut self, value: &str) -> &mut Self {
    self.options.config_file = value.to_owned();
    self
  }

  pub fn skip_ready_poll(&mut self, value: bool) -> &mut Self {
    self.options.skip_ready_poll = value;
    self
  }

  pub fn finish(&mut self) -> EngineOptions {
    self.options.clone()
  }
}
