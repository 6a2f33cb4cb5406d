//! The request gateway.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use envelope_cache::CacheStore;
use envelope_retry::{RetryExecutor, RetryFailure};
use envelope_session::{Credential, SessionManager, Subscription};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, Result, TransportError};
use crate::request::{RequestKind, RequestSpec};
use crate::transport::{DEFAULT_TIMEOUT, SharedTransport};

/// Response cache used by the gateway.
pub type ResponseCache = CacheStore<Value>;

/// Single entry point for authenticated API calls.
///
/// Reads go through the response cache; writes invalidate their group.
/// Every call carries a credential obtained from the [`SessionManager`], and
/// a backend rejection of that credential signs the session out.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct RequestGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    session: SessionManager,
    transport: SharedTransport,
    cache: ResponseCache,
    retry: RetryExecutor,
    request_timeout: Duration,
    subscription: Subscription,
}

impl Drop for GatewayInner {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

impl RequestGateway {
    pub fn builder(session: SessionManager, transport: SharedTransport) -> GatewayBuilder {
        GatewayBuilder {
            session,
            transport,
            cache: None,
            retry: None,
            request_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.inner.session
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Execute a request and return the raw JSON payload.
    pub async fn execute(&self, spec: RequestSpec) -> Result<Value> {
        match spec.kind() {
            RequestKind::Read { namespace } => self.execute_read(&spec, namespace).await,
            RequestKind::Write { group } => self.execute_write(&spec, group).await,
        }
    }

    /// Execute a request and decode the payload.
    pub async fn execute_as<T: DeserializeOwned>(&self, spec: RequestSpec) -> Result<T> {
        let value = self.execute(spec).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn execute_read(&self, spec: &RequestSpec, namespace: &str) -> Result<Value> {
        let key = spec.resolved_cache_key();
        if let Some(value) = self.inner.cache.get(namespace, &key) {
            tracing::debug!(namespace, key = %key, "Served from cache");
            return Ok(value);
        }

        let generation = self.inner.cache.generation(namespace);
        let (value, credential) = self.send(spec).await?;

        // A sign-out or account switch during the call must not leave the
        // previous subject's data in the cache. A write that invalidated the
        // namespace in the meantime makes this payload stale.
        let same_subject = self
            .inner
            .session
            .current_credential()
            .is_some_and(|c| c.subject_id == credential.subject_id);
        if same_subject {
            self.inner
                .cache
                .insert_if_generation(namespace, key, value.clone(), generation);
        }

        Ok(value)
    }

    async fn execute_write(&self, spec: &RequestSpec, group: &str) -> Result<Value> {
        match self.send(spec).await {
            Ok((value, _)) => {
                self.inner.cache.invalidate_group(group);
                Ok(value)
            }
            Err(e @ GatewayError::TransientNetwork { .. }) => {
                tracing::warn!(
                    group,
                    method = %spec.method(),
                    path = spec.path(),
                    "Write outcome unknown, invalidating anyway"
                );
                self.inner.cache.invalidate_group(group);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Obtain a credential and run the call under the retry policy.
    async fn send(&self, spec: &RequestSpec) -> Result<(Value, Credential)> {
        let credential = self.inner.session.ensure_valid_credential().await?;
        let request = spec.to_outbound(vec![("Authorization".to_string(), credential.bearer())]);
        let timeout = self.inner.request_timeout;

        let outcome = self
            .inner
            .retry
            .run_with(
                || {
                    let request = request.clone();
                    let transport = Arc::clone(&self.inner.transport);
                    async move {
                        match tokio::time::timeout(timeout, transport.send(request)).await {
                            Ok(result) => result,
                            Err(_) => Err(TransportError::Transient(format!(
                                "request timed out after {}ms",
                                timeout.as_millis()
                            ))),
                        }
                    }
                },
                TransportError::is_transient,
            )
            .await;

        match outcome {
            Ok(value) => Ok((value, credential)),
            Err(failure) => Err(self.on_failure(spec, &credential, failure).await),
        }
    }

    async fn on_failure(
        &self,
        spec: &RequestSpec,
        credential: &Credential,
        failure: RetryFailure<TransportError>,
    ) -> GatewayError {
        let attempts = failure.attempts;
        let retries_exhausted = failure.exhausted;
        let message = failure.to_string();

        match failure.into_inner() {
            TransportError::CredentialRejected(reason) => {
                tracing::warn!(
                    subject = %credential.subject_id,
                    path = spec.path(),
                    reason = %reason,
                    "Backend rejected credential, signing out"
                );
                if let Err(e) = self
                    .inner
                    .session
                    .clear_session_if_current(&credential.access_token)
                    .await
                {
                    tracing::warn!(error = %e, "Failed to clear rejected session");
                }
                GatewayError::AuthorizationRejected(reason)
            }
            TransportError::Rejected { status, message } => {
                GatewayError::ValidationRejected { status, message }
            }
            TransportError::Transient(_) => GatewayError::TransientNetwork {
                message,
                attempts,
                retries_exhausted,
            },
        }
    }
}

impl fmt::Debug for RequestGateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("session", &self.inner.session)
            .field("transport", &self.inner.transport)
            .field("cache", &self.inner.cache)
            .field("request_timeout", &self.inner.request_timeout)
            .finish()
    }
}

/// Builder for [`RequestGateway`].
pub struct GatewayBuilder {
    session: SessionManager,
    transport: SharedTransport,
    cache: Option<ResponseCache>,
    retry: Option<RetryExecutor>,
    request_timeout: Duration,
}

impl GatewayBuilder {
    pub fn cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Retry executor for data calls.
    pub fn retry(mut self, retry: RetryExecutor) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Wall-clock budget for a single transport attempt.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(self) -> RequestGateway {
        let cache = self.cache.unwrap_or_else(|| {
            CacheStore::new(
                Default::default(),
                Default::default(),
                envelope_types::SystemClock::shared(),
            )
        });

        let subscription = subscribe_cache_reset(&self.session, cache.clone());

        RequestGateway {
            inner: Arc::new(GatewayInner {
                session: self.session,
                transport: self.transport,
                cache,
                retry: self.retry.unwrap_or_default().named("request"),
                request_timeout: self.request_timeout,
                subscription,
            }),
        }
    }
}

/// Drop every cached response when the session ends or changes hands.
fn subscribe_cache_reset(session: &SessionManager, cache: ResponseCache) -> Subscription {
    let last_subject = Mutex::new(session.current_credential().map(|c| c.subject_id));

    session.on_session_change(move |credential| {
        let subject = credential.map(|c| c.subject_id.clone());
        let mut last = last_subject.lock();
        if *last != subject {
            let removed = cache.clear();
            tracing::debug!(removed, "Session changed hands, cache cleared");
        } else if subject.is_none() {
            cache.clear();
        }
        *last = subject;
    })
}
