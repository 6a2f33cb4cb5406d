//! Configuration for the response cache.

use std::collections::HashMap;
use std::time::Duration;

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default maximum number of entries per namespace.
pub const DEFAULT_MAX_ENTRIES: usize = 256;

/// Limits for a single namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

/// Configuration for [`CacheStore`](crate::CacheStore).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// TTL for namespaces without an override.
    pub default_ttl: Duration,

    /// Capacity for namespaces without an override.
    pub default_max_entries: usize,

    /// Per-namespace overrides.
    pub namespaces: HashMap<String, NamespaceConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL,
            default_max_entries: DEFAULT_MAX_ENTRIES,
            namespaces: HashMap::new(),
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_default_max_entries(mut self, max: usize) -> Self {
        self.default_max_entries = max;
        self
    }

    pub fn with_namespace(mut self, name: impl Into<String>, config: NamespaceConfig) -> Self {
        self.namespaces.insert(name.into(), config);
        self
    }

    /// Effective limits for `namespace`.
    pub fn namespace(&self, namespace: &str) -> NamespaceConfig {
        self.namespaces
            .get(namespace)
            .copied()
            .unwrap_or(NamespaceConfig {
                ttl: self.default_ttl,
                max_entries: self.default_max_entries,
            })
    }
}
