//! Shared fakes for session integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use envelope_retry::{BackoffKind, RetryExecutor, RetryPolicy};
use envelope_session::{
    AuthBackend, AuthBackendError, Credential, CredentialStore, MemoryCredentialStore,
    SessionConfig, SessionManager, StoreError, TokenGrant,
};
use envelope_types::ManualClock;
use parking_lot::Mutex;

pub const KEY: &str = "envelope.session";
pub const NOW_SECS: i64 = 1_700_000_000;

/// Auth backend that replays scripted refresh outcomes.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<TokenGrant, AuthBackendError>>>,
    refresh_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn push(&self, response: Result<TokenGrant, AuthBackendError>) {
        self.responses.lock().push_back(response);
    }

    pub fn push_grant(&self, access_token: &str) {
        self.push(Ok(fresh_grant(access_token)));
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for ScriptedBackend {
    async fn refresh(&self, _refresh_token: &str) -> Result<TokenGrant, AuthBackendError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AuthBackendError::Transient("no scripted response".into())))
    }

    async fn revoke(&self, _access_token: &str) -> Result<(), AuthBackendError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn fresh_grant(access_token: &str) -> TokenGrant {
    TokenGrant::new(access_token, Some(format!("{}-refresh", access_token)), "user-1", Some(3600))
}

/// Credential expiring `expires_in` seconds after [`NOW_SECS`] (negative = already expired).
pub fn credential(access_token: &str, expires_in: i64) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        refresh_token: Some(format!("{}-refresh", access_token)),
        subject_id: "user-1".to_string(),
        expires_at: NOW_SECS + expires_in,
        last_activity_ms: NOW_SECS * 1000,
        degraded_expiry: false,
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_backoff(BackoffKind::Exponential)
            .with_base_delay(Duration::from_millis(100)),
    )
}

pub struct Harness {
    pub session: SessionManager,
    pub store: Arc<MemoryCredentialStore>,
    pub backend: Arc<ScriptedBackend>,
    pub clock: Arc<ManualClock>,
}

pub fn harness(backend: ScriptedBackend) -> Harness {
    harness_with(backend, MemoryCredentialStore::new(), SessionConfig::default(), 3)
}

pub fn harness_with(
    backend: ScriptedBackend,
    store: MemoryCredentialStore,
    config: SessionConfig,
    max_attempts: u32,
) -> Harness {
    let store = Arc::new(store);
    let backend = Arc::new(backend);
    let clock = Arc::new(ManualClock::at_secs(NOW_SECS));
    let session = SessionManager::builder(store.clone(), backend.clone())
        .config(config.with_storage_key(KEY))
        .clock(clock.clone())
        .retry(fast_retry(max_attempts))
        .build();

    Harness {
        session,
        store,
        backend,
        clock,
    }
}

/// Store whose writes always fail, holding whatever it was seeded with.
#[derive(Debug, Default)]
pub struct ReadOnlyStore {
    stored: Mutex<Option<Credential>>,
}

impl ReadOnlyStore {
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            stored: Mutex::new(Some(credential)),
        }
    }

    pub fn peek(&self) -> Option<Credential> {
        self.stored.lock().clone()
    }

    fn denied() -> StoreError {
        StoreError::Io {
            path: "session.json".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
        }
    }
}

#[async_trait]
impl CredentialStore for ReadOnlyStore {
    async fn get_session(&self, _key: &str) -> Result<Option<Credential>, StoreError> {
        Ok(self.peek())
    }

    async fn set_session(&self, _key: &str, _credential: &Credential) -> Result<(), StoreError> {
        Err(Self::denied())
    }

    async fn remove_session(&self, _key: &str) -> Result<(), StoreError> {
        Err(Self::denied())
    }
}
