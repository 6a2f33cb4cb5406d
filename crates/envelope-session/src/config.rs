//! Configuration for the session manager.

use std::time::Duration;

/// Default key under which the credential is persisted.
pub const DEFAULT_STORAGE_KEY: &str = "envelope.session";

/// Default window before expiry in which a proactive refresh starts.
pub const DEFAULT_REFRESH_LOOKAHEAD: Duration = Duration::from_secs(5 * 60);

/// Lifetime assumed when the backend omits one.
pub const DEFAULT_FALLBACK_LIFETIME: Duration = Duration::from_secs(60 * 60);

/// Configuration for [`SessionManager`](crate::SessionManager).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Key used with the credential store.
    pub storage_key: String,

    /// A credential expiring within this window is `ExpiringSoon`.
    pub refresh_lookahead: Duration,

    /// Expiry assumed for grants without a lifetime (degraded mode).
    pub fallback_lifetime: Duration,

    /// Sign out after this long without a credential request.
    /// `None` disables the idle check.
    pub idle_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            refresh_lookahead: DEFAULT_REFRESH_LOOKAHEAD,
            fallback_lifetime: DEFAULT_FALLBACK_LIFETIME,
            idle_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    pub fn with_refresh_lookahead(mut self, lookahead: Duration) -> Self {
        self.refresh_lookahead = lookahead;
        self
    }

    pub fn with_fallback_lifetime(mut self, lifetime: Duration) -> Self {
        self.fallback_lifetime = lifetime;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }
}
