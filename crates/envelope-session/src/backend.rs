//! Backend calls the session manager depends on.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use envelope_types::TokenGrant;

/// Failure from an [`AuthBackend`] call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthBackendError {
    /// The backend refused the token; retrying will not help.
    #[error("rejected: {0}")]
    Rejected(String),

    /// Network error, timeout or server-side failure.
    #[error("transient failure: {0}")]
    Transient(String),
}

impl AuthBackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthBackendError::Transient(_))
    }
}

/// Token endpoint operations.
#[async_trait]
pub trait AuthBackend: Send + Sync + Debug {
    /// Exchange a refresh token for a new grant.
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant, AuthBackendError>;

    /// Revoke the session behind `access_token`.
    async fn revoke(&self, access_token: &str) -> Result<(), AuthBackendError>;
}

/// Shared backend handle.
pub type SharedAuthBackend = Arc<dyn AuthBackend>;
