//! Config file discovery and layered merging.
//!
//! Resolution order (later overrides earlier):
//! 1. `~/.config/envelope/config.toml` (user config, or `$ENVELOPE_CONFIG_DIR/config.toml`)
//! 2. `./envelope.toml` (project-local)
//! 3. CLI arguments (handled externally)

use std::path::{Path, PathBuf};

use crate::{ConfigError, EnvelopeConfig, Result};

/// Default config filename for project-local config.
const PROJECT_CONFIG_FILE: &str = "envelope.toml";

/// Default config filename within the user config directory.
const USER_CONFIG_FILE: &str = "config.toml";

/// Application name for platform directory resolution.
const APP_NAME: &str = "envelope";

/// Environment variable to override the config directory.
const CONFIG_DIR_ENV: &str = "ENVELOPE_CONFIG_DIR";

/// Tracks where each config layer was loaded from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub loaded: bool,
}

/// Result of config discovery and loading.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// The merged configuration.
    pub config: EnvelopeConfig,
    /// Sources that were checked, lowest precedence first.
    pub sources: Vec<ConfigSource>,
    /// Layers that existed but could not be loaded.
    pub warnings: Vec<String>,
}

impl LoadedConfig {
    /// Paths of sources that were actually loaded.
    pub fn loaded_from(&self) -> Vec<&Path> {
        self.sources
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.path.as_path())
            .collect()
    }
}

/// Discover, merge and validate every config layer.
pub fn load_config(project_dir: Option<&Path>) -> Result<LoadedConfig> {
    load_config_with_options(project_dir, None)
}

/// Like [`load_config`], with `config_dir` overriding both
/// `ENVELOPE_CONFIG_DIR` and the platform default.
pub fn load_config_with_options(
    project_dir: Option<&Path>,
    config_dir: Option<&Path>,
) -> Result<LoadedConfig> {
    let mut config = EnvelopeConfig::new();
    let mut sources = Vec::new();
    let mut warnings = Vec::new();

    let user_config_path = match config_dir {
        Some(dir) => Some(dir.join(USER_CONFIG_FILE)),
        None => user_config_path(),
    };
    if let Some(path) = user_config_path {
        sources.push(load_layer(&mut config, &path, &mut warnings));
    }

    let project_path = project_dir
        .map(|d| d.join(PROJECT_CONFIG_FILE))
        .unwrap_or_else(|| PathBuf::from(PROJECT_CONFIG_FILE));
    sources.push(load_layer(&mut config, &project_path, &mut warnings));

    config.validate()?;

    Ok(LoadedConfig {
        config,
        sources,
        warnings,
    })
}

/// Load config from a specific file path (no discovery).
pub fn load_config_file(path: &Path) -> Result<EnvelopeConfig> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.display().to_string(),
        source: e,
    })?;
    EnvelopeConfig::from_toml(&contents)
}

/// `config.toml` inside [`user_config_dir`].
pub fn user_config_path() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join(USER_CONFIG_FILE))
}

/// `ENVELOPE_CONFIG_DIR` if set, else the platform config dir.
pub fn user_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Directory for persisted client state (credentials, logs).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join(APP_NAME))
}

fn load_layer(config: &mut EnvelopeConfig, path: &Path, warnings: &mut Vec<String>) -> ConfigSource {
    if !path.is_file() {
        return ConfigSource {
            path: path.to_path_buf(),
            loaded: false,
        };
    }

    match load_config_file(path) {
        Ok(layer) => {
            tracing::debug!(path = %path.display(), "Loaded config layer");
            config.merge(layer);
            ConfigSource {
                path: path.to_path_buf(),
                loaded: true,
            }
        }
        Err(e) => {
            warnings.push(format!("Failed to load {}: {}", path.display(), e));
            ConfigSource {
                path: path.to_path_buf(),
                loaded: false,
            }
        }
    }
}
