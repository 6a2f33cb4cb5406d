//! Session manager: in-memory credential, validity state machine and
//! single-flight refresh.
//!
//! Concurrency model:
//! - The credential is only ever replaced wholesale under `write_gate`, which
//!   also covers persistence and broadcast so two replacements never
//!   interleave their store writes.
//! - At most one refresh runs per manager. The first caller that needs one
//!   spawns it and parks a shared handle in `pending` before yielding; later
//!   callers clone that handle. The spawned task clears `pending` itself
//!   before its result becomes visible, so no waiter can observe a stale
//!   handle, and dropping every waiter never cancels a refresh midway.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use envelope_retry::RetryExecutor;
use envelope_types::{Credential, SharedClock, SystemClock, TokenGrant};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};

use crate::backend::{AuthBackendError, SharedAuthBackend};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::state::{SessionInfo, SessionState};
use crate::store::SharedCredentialStore;
use crate::subscribers::{SessionHandler, SubscriberList, Subscription, dispatch};

/// After a failed proactive refresh, wait this long before trying again
/// while the credential is still usable.
const PROACTIVE_REFRESH_COOLDOWN: Duration = Duration::from_secs(30);

/// With an idle timeout configured, recorded activity is written to the
/// store at most this often.
const ACTIVITY_PERSIST_INTERVAL: Duration = Duration::from_secs(60);

type SharedRefresh = Shared<BoxFuture<'static, Result<Credential>>>;

struct PendingRefresh {
    id: u64,
    outcome: SharedRefresh,
}

/// Which replacements are allowed to land.
enum ReplaceIf<'a> {
    Always,
    /// Only if the in-memory credential still carries this access token.
    Current(&'a str),
}

struct Inner {
    config: SessionConfig,
    store: SharedCredentialStore,
    backend: SharedAuthBackend,
    clock: SharedClock,
    retry: RetryExecutor,

    credential: RwLock<Option<Credential>>,
    pending: Mutex<Option<PendingRefresh>>,
    next_refresh_id: AtomicU64,
    refresh_calls: AtomicU64,
    last_refresh_failure_ms: AtomicI64,
    activity_persisted_ms: AtomicI64,
    subscribers: Arc<Mutex<SubscriberList>>,

    write_gate: tokio::sync::Mutex<()>,
    restore_gate: tokio::sync::Mutex<()>,
}

/// Owns the authenticated session for one process (or one test).
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager with default configuration, system clock and retry policy.
    pub fn new(store: SharedCredentialStore, backend: SharedAuthBackend) -> Self {
        Self::builder(store, backend).build()
    }

    pub fn builder(
        store: SharedCredentialStore,
        backend: SharedAuthBackend,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            backend,
            config: SessionConfig::default(),
            clock: None,
            retry: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reading
    // ─────────────────────────────────────────────────────────────────────────

    /// The in-memory credential, without any I/O.
    pub fn current_credential(&self) -> Option<Credential> {
        self.inner.credential.read().clone()
    }

    /// State of the in-memory credential right now.
    pub fn state(&self) -> SessionState {
        let guard = self.inner.credential.read();
        SessionState::evaluate(
            guard.as_ref(),
            self.inner.clock.now_millis(),
            self.inner.config.refresh_lookahead,
        )
    }

    pub fn session_info(&self) -> SessionInfo {
        let now = self.inner.clock.now_millis();
        let guard = self.inner.credential.read();
        SessionInfo {
            subject_id: guard.as_ref().map(|c| c.subject_id.clone()),
            state: SessionState::evaluate(guard.as_ref(), now, self.inner.config.refresh_lookahead),
            expires_in_secs: guard.as_ref().map(|c| c.expires_in(now)).unwrap_or(0),
            degraded_expiry: guard.as_ref().is_some_and(|c| c.degraded_expiry),
        }
    }

    /// Whether a refresh is currently in flight.
    pub fn is_refreshing(&self) -> bool {
        self.inner.pending.lock().is_some()
    }

    /// Number of refresh network calls started so far (retries included).
    pub fn refresh_calls(&self) -> u64 {
        self.inner.refresh_calls.load(Ordering::SeqCst)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Main entry point
    // ─────────────────────────────────────────────────────────────────────────

    /// Return a credential that can be attached to a request.
    ///
    /// - nothing in memory: restore from the store, refreshing it if expired
    /// - valid: returned immediately
    /// - expiring soon: a background refresh is started (or joined) and the
    ///   current credential is returned without waiting for it
    /// - expired: waits for the shared refresh; on failure the session is
    ///   cleared. A definitive rejection is returned as `SessionExpired`,
    ///   exhausted transient failures as `RefreshFailed`.
    pub async fn ensure_valid_credential(&self) -> Result<Credential> {
        let (credential, restored) = match self.current_credential() {
            Some(credential) => (credential, false),
            None => (self.restore().await?, true),
        };

        let now = self.inner.clock.now_millis();
        if let Some(idle) = self.inner.config.idle_timeout
            && now - credential.last_activity_ms > idle.as_millis() as i64
        {
            tracing::info!(
                subject = %credential.subject_id,
                idle_secs = idle.as_secs(),
                "Session idle timeout reached, signing out"
            );
            self.clear_session().await?;
            return Err(SessionError::NoActiveSession);
        }

        match SessionState::evaluate(Some(&credential), now, self.inner.config.refresh_lookahead)
        {
            SessionState::Valid => Ok(self.record_activity(&credential, now)),
            SessionState::ExpiringSoon => {
                self.start_proactive_refresh(&credential, now);
                Ok(self.record_activity(&credential, now))
            }
            SessionState::Expired => {
                tracing::debug!(subject = %credential.subject_id, "Credential expired, refresh required");
                match Inner::refresh_handle(&self.inner, &credential).await {
                    Ok(fresh) => Ok(fresh),
                    Err(e) if restored => {
                        tracing::info!(error = %e, "Stored session could not be refreshed");
                        Err(SessionError::NoActiveSession)
                    }
                    Err(e @ SessionError::RefreshFailed { .. }) => Err(e),
                    Err(e) => Err(SessionError::SessionExpired(e.to_string())),
                }
            }
            SessionState::Unauthenticated => Err(SessionError::NoActiveSession),
        }
    }

    /// Refresh now, joining any refresh already in flight.
    pub async fn refresh_now(&self) -> Result<Credential> {
        let credential = match self.current_credential() {
            Some(credential) => credential,
            None => self.restore().await?,
        };
        Inner::refresh_handle(&self.inner, &credential).await
    }

    /// Touch the in-memory credential. With an idle timeout, the activity is
    /// also persisted in the background so it survives a restart.
    fn record_activity(&self, credential: &Credential, now: i64) -> Credential {
        let touched = self.inner.touch(credential, now);
        if self.inner.config.idle_timeout.is_none() {
            return touched;
        }

        let persisted = self.inner.activity_persisted_ms.load(Ordering::SeqCst);
        if now - persisted >= ACTIVITY_PERSIST_INTERVAL.as_millis() as i64
            && self
                .inner
                .activity_persisted_ms
                .compare_exchange(persisted, now, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let inner = Arc::clone(&self.inner);
            let token = touched.access_token.clone();
            tokio::spawn(async move { inner.persist_activity(&token).await });
        }
        touched
    }

    fn start_proactive_refresh(&self, credential: &Credential, now: i64) {
        if credential.refresh_token.is_none() {
            return;
        }
        let last_failure = self.inner.last_refresh_failure_ms.load(Ordering::SeqCst);
        if last_failure > 0 && now - last_failure < PROACTIVE_REFRESH_COOLDOWN.as_millis() as i64 {
            tracing::trace!("Proactive refresh cooling down after failure");
            return;
        }

        tracing::debug!(
            subject = %credential.subject_id,
            expires_in = credential.expires_in(now),
            "Credential expiring soon, refreshing in background"
        );
        // Detached: the spawned task owns the refresh, the handle is not awaited.
        drop(Inner::refresh_handle(&self.inner, credential));
    }

    /// Load the persisted credential into memory, without refreshing it.
    ///
    /// Returns the in-memory credential if one is already present.
    pub async fn restore(&self) -> Result<Credential> {
        let _gate = self.inner.restore_gate.lock().await;

        // Another caller may have restored or signed in while we waited.
        if let Some(credential) = self.current_credential() {
            return Ok(credential);
        }

        let key = &self.inner.config.storage_key;
        let stored = match self.inner.store.get_session(key).await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored session");
                return Err(SessionError::NoActiveSession);
            }
        };

        let Some(credential) = stored else {
            tracing::debug!("No stored session");
            return Err(SessionError::NoActiveSession);
        };

        let expired = credential.is_expired(self.inner.clock.now_millis());
        tracing::info!(subject = %credential.subject_id, expired, "Restoring stored session");

        // Expired credentials are installed quietly: the refresh that follows
        // broadcasts either the new credential or the sign-out.
        Ok(self.inner.install_restored(credential, !expired).await)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writing
    // ─────────────────────────────────────────────────────────────────────────

    /// Replace the credential, persist it (or clear the store), then notify
    /// subscribers.
    ///
    /// When the store write succeeds, a subscriber that reads the store from
    /// its handler sees the new value.
    ///
    /// When it fails, the in-memory replacement and the broadcast still
    /// happen and the store error is returned afterwards. Subscribers then
    /// observe the in-memory session, which is what requests use, while the
    /// store still holds the previous value. A sign-out is never withheld
    /// from subscribers because the store could not be cleared.
    pub async fn set_credential(&self, credential: Option<Credential>) -> Result<()> {
        self.inner
            .replace(credential, ReplaceIf::Always)
            .await
            .map(|_| ())
    }

    /// Install a credential from a sign-in grant.
    pub async fn set_grant(&self, grant: TokenGrant) -> Result<Credential> {
        let credential = Credential::from_grant(
            grant,
            self.inner.clock.now_millis(),
            self.inner.config.fallback_lifetime,
        );
        self.set_credential(Some(credential.clone())).await?;
        tracing::info!(subject = %credential.subject_id, "Signed in");
        Ok(credential)
    }

    /// Sign out: clear the credential, then revoke it on the backend (best effort).
    pub async fn clear_session(&self) -> Result<()> {
        let previous = self.current_credential();
        let result = self.set_credential(None).await;

        if let Some(previous) = previous {
            if let Err(e) = self.inner.backend.revoke(&previous.access_token).await {
                tracing::debug!(error = %e, "Session revocation failed");
            }
            tracing::info!(subject = %previous.subject_id, "Session cleared");
        }

        result
    }

    /// Sign out only if `access_token` is still the active credential.
    ///
    /// Used when the backend rejects a token: requests that raced with a
    /// refresh or a new sign-in must not clear the newer session. Returns
    /// whether the session was cleared.
    pub async fn clear_session_if_current(&self, access_token: &str) -> Result<bool> {
        let cleared = self
            .inner
            .replace(None, ReplaceIf::Current(access_token))
            .await?;

        if cleared {
            if let Err(e) = self.inner.backend.revoke(access_token).await {
                tracing::debug!(error = %e, "Session revocation failed");
            }
            tracing::info!("Session cleared after backend rejected the credential");
        }

        Ok(cleared)
    }

    /// Register a handler called after every credential replacement,
    /// including sign-out (`None`).
    ///
    /// The handler receives the in-memory credential; see
    /// [`set_credential`](Self::set_credential) for how it relates to the
    /// store when persisting fails.
    pub fn on_session_change<F>(&self, handler: F) -> Subscription
    where
        F: Fn(Option<&Credential>) + Send + Sync + 'static,
    {
        let handler: SessionHandler = Arc::new(handler);
        let id = self.inner.subscribers.lock().add(handler);
        Subscription::new(id, Arc::downgrade(&self.inner.subscribers))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("refreshing", &self.is_refreshing())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl Inner {
    /// Compare-and-replace the activity timestamp in memory only.
    fn touch(&self, credential: &Credential, now: i64) -> Credential {
        let touched = credential.with_activity(now);
        let mut guard = self.credential.write();
        if guard
            .as_ref()
            .is_some_and(|c| c.access_token == credential.access_token)
        {
            *guard = Some(touched.clone());
        }
        touched
    }

    /// Write the in-memory credential back to the store if it still carries
    /// `access_token`. No broadcast: only the activity timestamp changed.
    async fn persist_activity(&self, access_token: &str) {
        let _write = self.write_gate.lock().await;
        let current = self
            .credential
            .read()
            .clone()
            .filter(|c| c.access_token == access_token);
        let Some(current) = current else {
            return;
        };
        if let Err(e) = self.store.set_session(&self.config.storage_key, &current).await {
            tracing::debug!(error = %e, "Failed to persist session activity");
        }
    }

    async fn replace(&self, next: Option<Credential>, condition: ReplaceIf<'_>) -> Result<bool> {
        let _write = self.write_gate.lock().await;

        if let ReplaceIf::Current(token) = condition {
            let still_current = self
                .credential
                .read()
                .as_ref()
                .is_some_and(|c| c.access_token == token);
            if !still_current {
                return Ok(false);
            }
        }

        *self.credential.write() = next.clone();

        let key = &self.config.storage_key;
        let persisted = match &next {
            Some(credential) => self.store.set_session(key, credential).await,
            None => self.store.remove_session(key).await,
        };
        if let Err(e) = &persisted {
            tracing::warn!(error = %e, "Failed to persist session change");
        }

        self.broadcast(next.as_ref());
        persisted.map(|()| true).map_err(SessionError::from)
    }

    async fn install_restored(&self, credential: Credential, broadcast: bool) -> Credential {
        let _write = self.write_gate.lock().await;

        if let Some(existing) = self.credential.read().clone() {
            return existing;
        }
        *self.credential.write() = Some(credential.clone());
        if broadcast {
            self.broadcast(Some(&credential));
        }
        credential
    }

    fn broadcast(&self, credential: Option<&Credential>) {
        let handlers = self.subscribers.lock().snapshot();
        tracing::trace!(
            subscribers = handlers.len(),
            signed_in = credential.is_some(),
            "Broadcasting session change"
        );
        dispatch(&handlers, credential);
    }

    /// Join the in-flight refresh, or start one from `source`.
    fn refresh_handle(this: &Arc<Self>, source: &Credential) -> SharedRefresh {
        let mut pending = this.pending.lock();
        if let Some(existing) = pending.as_ref() {
            tracing::trace!(refresh_id = existing.id, "Joining in-flight refresh");
            return existing.outcome.clone();
        }

        // The caller's view may be stale: a refresh finished or the user signed
        // out between its read and now.
        let current = this.credential.read().clone();
        match current {
            Some(c) if c.access_token == source.access_token => {}
            Some(c) => return futures::future::ready(Ok(c)).boxed().shared(),
            None => {
                return futures::future::ready(Err(SessionError::NoActiveSession))
                    .boxed()
                    .shared();
            }
        }

        let id = this.next_refresh_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(this);
        let source = source.clone();
        let task = tokio::spawn(async move {
            let result = inner.run_refresh(&source).await;
            inner.finish_refresh(id);
            result
        });

        let outcome = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(SessionError::RefreshFailed {
                    message: format!("refresh task aborted: {}", e),
                    attempts: 0,
                }),
            }
        }
        .boxed()
        .shared();

        *pending = Some(PendingRefresh {
            id,
            outcome: outcome.clone(),
        });
        outcome
    }

    fn finish_refresh(&self, id: u64) {
        let mut pending = self.pending.lock();
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
        }
    }

    async fn run_refresh(&self, source: &Credential) -> Result<Credential> {
        let Some(refresh_token) = source.refresh_token.clone() else {
            let err = SessionError::RefreshRejected("credential has no refresh token".to_string());
            if source.is_expired(self.clock.now_millis()) {
                self.clear_after_failure(source, &err).await;
            }
            return Err(err);
        };

        tracing::info!(subject = %source.subject_id, "Refreshing session credential");

        let result = self
            .retry
            .run_with(
                || {
                    self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                    let backend = self.backend.clone();
                    let token = refresh_token.clone();
                    async move { backend.refresh(&token).await }
                },
                |e: &AuthBackendError| e.is_transient(),
            )
            .await;

        let grant = match result {
            Ok(grant) => grant,
            Err(failure) => {
                let err = match failure.error {
                    AuthBackendError::Rejected(message) => SessionError::RefreshRejected(message),
                    AuthBackendError::Transient(message) => SessionError::RefreshFailed {
                        message,
                        attempts: failure.attempts,
                    },
                };
                self.last_refresh_failure_ms
                    .store(self.clock.now_millis(), Ordering::SeqCst);
                self.clear_after_failure(source, &err).await;
                return Err(err);
            }
        };

        let mut credential =
            Credential::from_grant(grant, self.clock.now_millis(), self.config.fallback_lifetime);
        if credential.refresh_token.is_none() {
            credential.refresh_token = Some(refresh_token);
        }
        if credential.subject_id != source.subject_id {
            tracing::warn!(
                previous = %source.subject_id,
                subject = %credential.subject_id,
                "Refresh returned a different subject"
            );
        }
        self.last_refresh_failure_ms.store(0, Ordering::SeqCst);

        match self
            .replace(
                Some(credential.clone()),
                ReplaceIf::Current(&source.access_token),
            )
            .await
        {
            Ok(true) => {
                tracing::info!(subject = %credential.subject_id, "Session credential refreshed");
                Ok(credential)
            }
            Ok(false) => {
                tracing::debug!("Session changed during refresh, discarding result");
                self.credential
                    .read()
                    .clone()
                    .ok_or(SessionError::NoActiveSession)
            }
            // Installed and broadcast, only the store write failed.
            Err(_) => Ok(credential),
        }
    }

    /// Definitive rejections always end the session; transient failures only
    /// once the source credential can no longer be used.
    async fn clear_after_failure(&self, source: &Credential, err: &SessionError) {
        let definitive = matches!(err, SessionError::RefreshRejected(_));
        let expired = source.is_expired(self.clock.now_millis());

        if !definitive && !expired {
            tracing::warn!(
                error = %err,
                subject = %source.subject_id,
                "Refresh failed, keeping still-valid credential"
            );
            return;
        }

        tracing::warn!(error = %err, subject = %source.subject_id, "Refresh failed, clearing session");
        if let Err(e) = self
            .replace(None, ReplaceIf::Current(&source.access_token))
            .await
        {
            tracing::warn!(error = %e, "Failed to clear session after refresh failure");
        }
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    store: SharedCredentialStore,
    backend: SharedAuthBackend,
    config: SessionConfig,
    clock: Option<SharedClock>,
    retry: Option<RetryExecutor>,
}

impl SessionManagerBuilder {
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Retry executor used for the refresh call.
    pub fn retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn build(self) -> SessionManager {
        SessionManager {
            inner: Arc::new(Inner {
                config: self.config,
                store: self.store,
                backend: self.backend,
                clock: self.clock.unwrap_or_else(SystemClock::shared),
                retry: self
                    .retry
                    .unwrap_or_default()
                    .named("session-refresh"),
                credential: RwLock::new(None),
                pending: Mutex::new(None),
                next_refresh_id: AtomicU64::new(1),
                refresh_calls: AtomicU64::new(0),
                last_refresh_failure_ms: AtomicI64::new(0),
                activity_persisted_ms: AtomicI64::new(0),
                subscribers: Arc::new(Mutex::new(SubscriberList::default())),
                write_gate: tokio::sync::Mutex::new(()),
                restore_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }
}
