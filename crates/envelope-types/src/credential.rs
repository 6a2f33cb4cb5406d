//! Bearer credential and backend token grants.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One authenticated principal's tokens.
///
/// A credential is never edited field by field once shared: every change
/// produces a new value that replaces the old one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub subject_id: String,
    /// Absolute expiry in epoch seconds.
    pub expires_at: i64,
    /// Last recorded use in epoch milliseconds.
    #[serde(default)]
    pub last_activity_ms: i64,
    /// Set when the backend omitted the lifetime and a local fallback was used.
    #[serde(default)]
    pub degraded_expiry: bool,
}

impl Credential {
    /// Derive a credential from a backend grant.
    ///
    /// Expiry comes from `expires_at`, else `now + expires_in`. Only when the
    /// backend gives neither is `fallback_lifetime` applied, and the result is
    /// flagged as degraded.
    pub fn from_grant(grant: TokenGrant, now_ms: i64, fallback_lifetime: Duration) -> Self {
        let now_secs = now_ms.div_euclid(1000);
        let (expires_at, degraded_expiry) = match (grant.expires_at, grant.expires_in) {
            (Some(at), _) => (at, false),
            (None, Some(secs)) => (add_secs(now_secs, secs), false),
            (None, None) => {
                tracing::warn!(
                    fallback_secs = fallback_lifetime.as_secs(),
                    "Backend grant has no lifetime, using fallback expiry"
                );
                (add_secs(now_secs, fallback_lifetime.as_secs()), true)
            }
        };

        Self {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.filter(|t| !t.is_empty()),
            subject_id: grant.user.id,
            expires_at,
            last_activity_ms: now_ms,
            degraded_expiry,
        }
    }

    /// Seconds remaining until expiry (zero once expired).
    pub fn expires_in(&self, now_ms: i64) -> u64 {
        let remaining = self.expires_at.saturating_sub(now_ms.div_euclid(1000));
        remaining.max(0) as u64
    }

    /// Whether the credential is past its expiry.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms.div_euclid(1000) >= self.expires_at
    }

    /// A copy of this credential with the activity timestamp updated.
    pub fn with_activity(&self, now_ms: i64) -> Self {
        Self {
            last_activity_ms: now_ms,
            ..self.clone()
        }
    }

    /// Value for an `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Backend response to a sign-in or refresh call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Absolute expiry in epoch seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: GrantUser,
}

/// Identity attached to a grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl TokenGrant {
    /// Minimal grant, mostly useful in tests and fakes.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        subject_id: impl Into<String>,
        expires_in: Option<u64>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_in,
            expires_at: None,
            user: GrantUser {
                id: subject_id.into(),
                email: None,
            },
        }
    }
}

/// `base + secs`, saturating at `i64::MAX`.
fn add_secs(base: i64, secs: u64) -> i64 {
    i64::try_from(secs)
        .map(|secs| base.saturating_add(secs))
        .unwrap_or(i64::MAX)
}
