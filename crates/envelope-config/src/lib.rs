//! Configuration system for the Envelope client.
//!
//! TOML files are layered: the user config directory first, then a
//! project-local `envelope.toml`. Each section (`[backend]`, `[session]`,
//! `[retry]`, `[cache]`) is optional and falls back to built-in defaults.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, data_dir, load_config, load_config_file,
    load_config_with_options, user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
