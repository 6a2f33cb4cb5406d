//! Error types for the session lifecycle.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Errors surfaced by [`SessionManager`](crate::SessionManager).
///
/// Cloneable so that one refresh outcome can be handed to every caller
/// attached to it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// No credential in memory and none could be restored.
    #[error("No active session")]
    NoActiveSession,

    /// The credential expired and could not be refreshed; sign in again.
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// The backend definitively refused the refresh token.
    #[error("Refresh token rejected: {0}")]
    RefreshRejected(String),

    /// Refresh kept failing with transient errors.
    #[error("Refresh failed after {attempts} attempt(s): {message}")]
    RefreshFailed { message: String, attempts: u32 },

    /// The credential store could not be read or written.
    #[error("Credential store error: {0}")]
    Store(String),
}

impl SessionError {
    /// Whether the user has to sign in again to recover.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            SessionError::NoActiveSession
                | SessionError::SessionExpired(_)
                | SessionError::RefreshRejected(_)
        )
    }
}

impl From<StoreError> for SessionError {
    fn from(e: StoreError) -> Self {
        SessionError::Store(e.to_string())
    }
}

/// Errors raised by a [`CredentialStore`](crate::CredentialStore).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}
