//! Shared fakes for gateway integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use envelope_cache::{CacheConfig, CacheStore, InvalidationGroups};
use envelope_client::{OutboundRequest, RequestGateway, Transport, TransportError};
use envelope_retry::{BackoffKind, RetryExecutor, RetryPolicy};
use envelope_session::{
    AuthBackend, AuthBackendError, Credential, MemoryCredentialStore, SessionConfig,
    SessionManager, TokenGrant,
};
use envelope_types::ManualClock;
use parking_lot::Mutex;
use serde_json::{Value, json};

pub const KEY: &str = "envelope.session";
pub const NOW_SECS: i64 = 1_700_000_000;

/// Transport that replays scripted responses and records every request.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<(Result<Value, TransportError>, Option<Duration>)>>,
    requests: Mutex<Vec<OutboundRequest>>,
    delay: Mutex<Duration>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<Value, TransportError>) {
        self.responses.lock().push_back((response, None));
    }

    /// Queue a success that takes `delay` to arrive, overriding `set_delay`.
    pub fn push_ok_after(&self, delay: Duration, value: Value) {
        self.responses.lock().push_back((Ok(value), Some(delay)));
    }

    pub fn push_ok(&self, value: Value) {
        self.push(Ok(value));
    }

    pub fn push_transient(&self, times: usize) {
        for _ in 0..times {
            self.push(Err(TransportError::Transient("503 Service Unavailable".into())));
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<Value, TransportError> {
        self.requests.lock().push(request);
        // Responses are matched to requests in the order they were issued.
        let (response, delay) = self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| (Ok(json!([])), None));
        let delay = delay.unwrap_or_else(|| *self.delay.lock());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

/// Auth backend that replays scripted refresh outcomes.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<TokenGrant, AuthBackendError>>>,
    refresh_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: Result<TokenGrant, AuthBackendError>) {
        self.responses.lock().push_back(response);
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

/// Credential for `subject` expiring `expires_in` seconds after `NOW_SECS`.
pub fn credential_for(subject: &str, token: &str, expires_in: i64) -> Credential {
    Credential {
        access_token: token.to_string(),
        refresh_token: Some(format!("{}-refresh", token)),
        subject_id: subject.to_string(),
        expires_at: NOW_SECS + expires_in,
        last_activity_ms: NOW_SECS * 1000,
        degraded_expiry: false,
    }
}

pub fn credential(token: &str, expires_in: i64) -> Credential {
    credential_for("user-1", token, expires_in)
}

pub fn fast_retry(max_attempts: u32) -> RetryExecutor {
    RetryExecutor::new(
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(100))
            .with_backoff(BackoffKind::Exponential),
    )
}

pub struct Harness {
    pub gateway: RequestGateway,
    pub session: SessionManager,
    pub transport: Arc<ScriptedTransport>,
    pub backend: Arc<ScriptedBackend>,
    pub store: Arc<MemoryCredentialStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    harness_with(SessionConfig::default(), 3, Duration::from_secs(30))
}

pub fn harness_with(config: SessionConfig, max_attempts: u32, request_timeout: Duration) -> Harness {
    let clock = Arc::new(ManualClock::at_secs(NOW_SECS));
    let store = Arc::new(MemoryCredentialStore::new());
    let backend = Arc::new(ScriptedBackend::new());
    let transport = Arc::new(ScriptedTransport::new());

    let session = SessionManager::builder(store.clone(), backend.clone())
        .config(config)
        .clock(clock.clone())
        .retry(fast_retry(max_attempts))
        .build();

    let gateway = RequestGateway::builder(session.clone(), transport.clone())
        .cache(CacheStore::new(
            CacheConfig::default(),
            InvalidationGroups::default(),
            clock.clone(),
        ))
        .retry(fast_retry(max_attempts))
        .request_timeout(request_timeout)
        .build();

    Harness {
        gateway,
        session,
        transport,
        backend,
        store,
        clock,
    }
}

impl Harness {
    pub async fn sign_in(&self, token: &str, expires_in: i64) {
        self.session
            .set_credential(Some(credential(token, expires_in)))
            .await
            .unwrap();
    }
}
