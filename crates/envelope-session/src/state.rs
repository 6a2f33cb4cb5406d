//! Derived session state.

use std::fmt;
use std::time::Duration;

use envelope_types::Credential;
use serde::Serialize;

/// Validity of the in-memory credential at a point in time.
///
/// Always computed from the credential and the clock; never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SessionState {
    Unauthenticated,
    Valid,
    ExpiringSoon,
    Expired,
}

impl SessionState {
    pub fn evaluate(credential: Option<&Credential>, now_ms: i64, lookahead: Duration) -> Self {
        let Some(credential) = credential else {
            return SessionState::Unauthenticated;
        };

        let now_secs = now_ms.div_euclid(1000);
        if now_secs >= credential.expires_at {
            SessionState::Expired
        } else if now_secs + lookahead.as_secs() as i64 >= credential.expires_at {
            SessionState::ExpiringSoon
        } else {
            SessionState::Valid
        }
    }

    /// Whether a credential in this state may still be attached to a request.
    pub fn is_usable(self) -> bool {
        matches!(self, SessionState::Valid | SessionState::ExpiringSoon)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Unauthenticated => "unauthenticated",
            SessionState::Valid => "valid",
            SessionState::ExpiringSoon => "expiring-soon",
            SessionState::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub subject_id: Option<String>,
    pub state: SessionState,
    pub expires_in_secs: u64,
    pub degraded_expiry: bool,
}

impl SessionInfo {
    pub fn expires_in_display(&self) -> String {
        match self.state {
            SessionState::Unauthenticated => "Not signed in".to_string(),
            SessionState::Expired => "Expired (will refresh on next use)".to_string(),
            _ => {
                let hours = self.expires_in_secs / 3600;
                let minutes = (self.expires_in_secs % 3600) / 60;
                format!("{}h {}m", hours, minutes)
            }
        }
    }
}
