//! Configuration system for the treadle workflow engine.
//!
//! Provides TOML-based configuration with:
//! - One section per subsystem (`[store]`, `[controller]`, `[dispatcher]`,
//!   `[executor]`, `[launcher]`, `[logging]`)
//! - Config file layering (user config dir + project-local `treadle.toml`)
//! - Defaults for every field, so an empty file is a valid config
//!
//! The CLI builds one [`EngineConfig`] per invocation and passes it down
//! explicitly; nothing here is global.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    LoadedConfig, data_dir, load_config, load_config_file, load_config_with_options,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
