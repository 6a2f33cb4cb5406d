//! Durable credential storage.
//!
//! The session manager reads the store once when it has nothing in memory,
//! writes it on every successful sign-in or refresh, and clears it on
//! sign-out or invalidation.

use std::collections::HashMap;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use envelope_types::Credential;
use parking_lot::Mutex;

use crate::error::StoreError;

/// Key-value storage for a persisted credential.
#[async_trait]
pub trait CredentialStore: Send + Sync + Debug {
    /// Load the credential stored under `key`.
    async fn get_session(&self, key: &str) -> Result<Option<Credential>, StoreError>;

    /// Store `credential` under `key`, replacing any previous value.
    async fn set_session(&self, key: &str, credential: &Credential) -> Result<(), StoreError>;

    /// Remove the credential under `key`. Removing a missing key succeeds.
    async fn remove_session(&self, key: &str) -> Result<(), StoreError>;
}

/// Shared store handle.
pub type SharedCredentialStore = Arc<dyn CredentialStore>;

// ============================================================================
// MemoryCredentialStore
// ============================================================================

/// In-process store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: Mutex<HashMap<String, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credential(key: &str, credential: Credential) -> Self {
        let store = Self::new();
        store.entries.lock().insert(key.to_string(), credential);
        store
    }

    /// Synchronous read, usable from inside a session-change handler.
    pub fn peek(&self, key: &str) -> Option<Credential> {
        self.entries.lock().get(key).cloned()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get_session(&self, key: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.peek(key))
    }

    async fn set_session(&self, key: &str, credential: &Credential) -> Result<(), StoreError> {
        self.entries
            .lock()
            .insert(key.to_string(), credential.clone());
        Ok(())
    }

    async fn remove_session(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// FileCredentialStore
// ============================================================================

/// Stores each credential as `<dir>/<key>.json`.
#[derive(Debug)]
pub struct FileCredentialStore {
    dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file backing `key`.
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
            && !key.starts_with('.');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn get_session(&self, key: &str) -> Result<Option<Credential>, StoreError> {
        let path = self.path_for(key)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path, e)),
        };

        let credential = serde_json::from_str(&content)?;
        Ok(Some(credential))
    }

    async fn set_session(&self, key: &str, credential: &Credential) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| io_error(&self.dir, e))?;

        let json = serde_json::to_string_pretty(credential)?;

        // Write then rename so a reader never sees a half-written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error(&path, e))?;

        tracing::debug!(path = %path.display(), "Credential persisted");
        Ok(())
    }

    async fn remove_session(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(path = %path.display(), "Credential removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(&path, e)),
        }
    }
}
