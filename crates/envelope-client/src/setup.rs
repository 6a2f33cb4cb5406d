//! Assembling a gateway from [`EnvelopeConfig`].

use std::sync::Arc;
use std::time::Duration;

use envelope_cache::{CacheConfig, CacheStore, InvalidationGroups, NamespaceConfig};
use envelope_config::{CacheSection, EnvelopeConfig, SessionSection};
use envelope_retry::RetryExecutor;
use envelope_session::{SessionConfig, SessionManager, SharedCredentialStore};
use envelope_types::{SharedClock, SystemClock};

use crate::auth::HttpAuthBackend;
use crate::error::Result;
use crate::gateway::RequestGateway;
use crate::transport::HttpTransport;

impl RequestGateway {
    /// Build the full stack (auth backend, session, transport, cache) from
    /// configuration.
    pub fn from_config(config: &EnvelopeConfig, store: SharedCredentialStore) -> Result<Self> {
        Self::from_config_with_clock(config, store, SystemClock::shared())
    }

    pub fn from_config_with_clock(
        config: &EnvelopeConfig,
        store: SharedCredentialStore,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        let backend_config = config.backend()?;
        let policy = config.retry().to_policy();

        let auth = Arc::new(HttpAuthBackend::from_config(backend_config)?);
        let session = SessionManager::builder(store, auth)
            .config(session_config(&config.session()))
            .clock(Arc::clone(&clock))
            .retry(RetryExecutor::new(policy.clone()))
            .build();

        let transport = Arc::new(HttpTransport::from_config(backend_config)?);
        let (cache_config, groups) = cache_config(&config.cache());

        tracing::debug!(url = %backend_config.url, "Request gateway configured");

        Ok(RequestGateway::builder(session, transport)
            .cache(CacheStore::new(cache_config, groups, clock))
            .retry(RetryExecutor::new(policy))
            .request_timeout(backend_config.request_timeout())
            .build())
    }
}

pub fn session_config(section: &SessionSection) -> SessionConfig {
    let mut config = SessionConfig::new()
        .with_storage_key(section.storage_key.clone())
        .with_refresh_lookahead(Duration::from_secs(section.refresh_lookahead_secs))
        .with_fallback_lifetime(Duration::from_secs(section.fallback_lifetime_secs));
    if let Some(idle) = section.idle_timeout_secs {
        config = config.with_idle_timeout(Duration::from_secs(idle));
    }
    config
}

/// Cache limits plus the default invalidation table extended by `[cache.groups]`.
pub fn cache_config(section: &CacheSection) -> (CacheConfig, InvalidationGroups) {
    let default_ttl = Duration::from_secs(section.default_ttl_secs);
    let mut config = CacheConfig::new()
        .with_default_ttl(default_ttl)
        .with_default_max_entries(section.default_max_entries);

    for (name, ns) in &section.namespaces {
        config = config.with_namespace(
            name.clone(),
            NamespaceConfig {
                ttl: ns.ttl_secs.map(Duration::from_secs).unwrap_or(default_ttl),
                max_entries: ns.max_entries.unwrap_or(section.default_max_entries),
            },
        );
    }

    let groups = section
        .groups
        .iter()
        .fold(InvalidationGroups::default(), |groups, (name, namespaces)| {
            groups.with_group(name.clone(), namespaces.iter().cloned())
        });

    (config, groups)
}
