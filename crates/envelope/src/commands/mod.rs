//! CLI command handlers.

pub mod auth;
pub mod config;
pub mod request;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use envelope_client::{HttpAuthBackend, RequestGateway};
use envelope_config::LoadedConfig;
use envelope_session::FileCredentialStore;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Merged configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Directory for the credential file and logs.
    pub data_dir: PathBuf,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    /// Gateway backed by the on-disk credential store.
    pub fn gateway(&self) -> Result<RequestGateway> {
        let store = Arc::new(FileCredentialStore::new(self.data_dir.join("session")));
        RequestGateway::from_config(&self.loaded.config, store)
            .context("Could not set up the API client (is [backend] configured?)")
    }

    pub fn auth_backend(&self) -> Result<HttpAuthBackend> {
        let backend = self.loaded.config.backend()?;
        Ok(HttpAuthBackend::from_config(backend)?)
    }
}

/// Print a JSON value, pretty unless `compact`.
pub fn print_json(value: &serde_json::Value, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", text);
    Ok(())
}
