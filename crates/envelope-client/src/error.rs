//! Client error types.

use envelope_session::SessionError;
use thiserror::Error;

/// Outcome of a single transport call that did not succeed.
///
/// The transport owns status-code classification; the gateway only looks at
/// the variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network failure, timeout, rate limit or server error. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The backend refused the bearer credential.
    #[error("credential rejected: {0}")]
    CredentialRejected(String),

    /// The backend refused the request itself (4xx other than auth).
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient failures outlasted the retry policy.
    #[error("Transient network error: {message}")]
    TransientNetwork {
        message: String,
        attempts: u32,
        retries_exhausted: bool,
    },

    /// The backend rejected the credential. The session has been cleared.
    #[error("Authorization rejected: {0}")]
    AuthorizationRejected(String),

    /// The backend rejected the request. Not retried, not cached.
    #[error("Validation rejected ({status}): {message}")]
    ValidationRejected { status: u16, message: String },

    /// No usable credential could be obtained.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Response payload did not match the expected type.
    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<envelope_config::ConfigError> for GatewayError {
    fn from(e: envelope_config::ConfigError) -> Self {
        GatewayError::Config(e.to_string())
    }
}

/// Coarse category of a [`GatewayError`], for callers deciding on remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Try again later.
    TransientNetwork,
    /// Sign in again.
    AuthorizationRejected,
    /// Fix the request.
    ValidationRejected,
    /// No session, or it could not be restored.
    NoActiveSession,
    /// The session expired and could not be refreshed.
    SessionExpired,
    /// Refresh kept failing with transient errors.
    RefreshFailed,
    /// Credential storage failed.
    Storage,
    Decode,
    Config,
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::TransientNetwork { .. } => ErrorKind::TransientNetwork,
            GatewayError::AuthorizationRejected(_) => ErrorKind::AuthorizationRejected,
            GatewayError::ValidationRejected { .. } => ErrorKind::ValidationRejected,
            GatewayError::Session(e) => match e {
                SessionError::NoActiveSession => ErrorKind::NoActiveSession,
                SessionError::SessionExpired(_) | SessionError::RefreshRejected(_) => {
                    ErrorKind::SessionExpired
                }
                SessionError::RefreshFailed { .. } => ErrorKind::RefreshFailed,
                SessionError::Store(_) => ErrorKind::Storage,
            },
            GatewayError::Decode(_) => ErrorKind::Decode,
            GatewayError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether the user must sign in again.
    pub fn requires_reauthentication(&self) -> bool {
        match self {
            GatewayError::AuthorizationRejected(_) => true,
            GatewayError::Session(e) => e.requires_reauthentication(),
            _ => false,
        }
    }

    /// Whether retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TransientNetwork | ErrorKind::RefreshFailed
        )
    }
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;
