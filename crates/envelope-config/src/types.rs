//! Configuration types.

use std::collections::BTreeMap;
use std::time::Duration;

use envelope_retry::BackoffKind;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Environment variable consulted before `[backend].api_key`.
pub const API_KEY_ENV: &str = "ENVELOPE_API_KEY";

/// Root configuration.
///
/// Every section is optional so that layered files can override only the
/// tables they mention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheSection>,
}

impl EnvelopeConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole, except cache namespaces and groups which
    /// are merged key by key.
    pub fn merge(&mut self, other: EnvelopeConfig) {
        if other.backend.is_some() {
            self.backend = other.backend;
        }

        if other.session.is_some() {
            self.session = other.session;
        }

        if other.retry.is_some() {
            self.retry = other.retry;
        }

        if let Some(theirs) = other.cache {
            match self.cache.as_mut() {
                Some(ours) => {
                    ours.default_ttl_secs = theirs.default_ttl_secs;
                    ours.default_max_entries = theirs.default_max_entries;
                    ours.namespaces.extend(theirs.namespaces);
                    ours.groups.extend(theirs.groups);
                }
                None => self.cache = Some(theirs),
            }
        }
    }

    /// The `[backend]` section, or an error naming it when absent.
    pub fn backend(&self) -> Result<&BackendConfig> {
        self.backend.as_ref().ok_or_else(|| ConfigError::MissingField {
            field: "url".to_string(),
            context: "[backend]".to_string(),
        })
    }

    pub fn session(&self) -> SessionSection {
        self.session.clone().unwrap_or_default()
    }

    pub fn retry(&self) -> RetrySection {
        self.retry.clone().unwrap_or_default()
    }

    pub fn cache(&self) -> CacheSection {
        self.cache.clone().unwrap_or_default()
    }

    /// Reject values that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if let Some(backend) = &self.backend {
            backend.validate()?;
        }

        let retry = self.retry();
        if retry.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_attempts",
                "must be at least 1",
            ));
        }

        let cache = self.cache();
        if cache.default_max_entries == 0 {
            return Err(ConfigError::invalid(
                "cache.default_max_entries",
                "must be at least 1",
            ));
        }
        for (name, ns) in &cache.namespaces {
            if ns.max_entries == Some(0) {
                return Err(ConfigError::invalid(
                    format!("cache.namespaces.{name}.max_entries"),
                    "must be at least 1",
                ));
            }
        }
        for (name, namespaces) in &cache.groups {
            if namespaces.is_empty() {
                return Err(ConfigError::invalid(
                    format!("cache.groups.{name}"),
                    "must list at least one namespace",
                ));
            }
        }

        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [backend]
// ─────────────────────────────────────────────────────────────────────────────

/// Default per-attempt request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Backend connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the backend, e.g. `https://project.example.co`.
    pub url: String,

    /// Public API key sent as the `apikey` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            api_key: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// API key from `ENVELOPE_API_KEY`, falling back to the config file.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV)
            && !key.is_empty()
        {
            return Some(key);
        }
        self.api_key.clone().filter(|k| !k.is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::invalid("backend.url", "must not be empty"));
        }
        url::Url::parse(&self.url)
            .map_err(|e| ConfigError::invalid("backend.url", e.to_string()))?;
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::invalid(
                "backend.request_timeout_secs",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [session]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Key under which the credential is persisted.
    pub storage_key: String,

    /// Refresh this many seconds before expiry.
    pub refresh_lookahead_secs: u64,

    /// Lifetime assumed when the backend omits one.
    pub fallback_lifetime_secs: u64,

    /// Sign out after this much inactivity. Disabled when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            storage_key: "envelope.session".to_string(),
            refresh_lookahead_secs: 300,
            fallback_lifetime_secs: 3600,
            idle_timeout_secs: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [retry]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff: BackoffKind,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: envelope_retry::DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: envelope_retry::DEFAULT_BASE_DELAY.as_millis() as u64,
            backoff: BackoffKind::default(),
            max_delay_ms: envelope_retry::DEFAULT_MAX_DELAY.as_millis() as u64,
        }
    }
}

impl RetrySection {
    pub fn to_policy(&self) -> envelope_retry::RetryPolicy {
        envelope_retry::RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_backoff(self.backoff)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [cache]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub default_ttl_secs: u64,
    pub default_max_entries: usize,

    /// Per-namespace overrides (`[cache.namespaces.reports]`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub namespaces: BTreeMap<String, NamespaceSection>,

    /// Extra or replacement invalidation groups (`[cache.groups]`).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, Vec<String>>,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            default_ttl_secs: 60,
            default_max_entries: 256,
            namespaces: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}
