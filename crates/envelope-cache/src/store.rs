//! Namespaced cache with LRU eviction and TTL.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use std::time::Duration;

use envelope_types::SharedClock;
use lru::LruCache;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::groups::InvalidationGroups;

/// Entry stored in the cache.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cached value.
    pub value: V,

    /// Insertion time in epoch milliseconds.
    pub inserted_at_ms: i64,

    /// Lifetime fixed at insertion.
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// An entry inserted at `t0` with lifetime `T` is absent from `t0 + T` on.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.inserted_at_ms.saturating_add(self.ttl.as_millis() as i64)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Live entries across all namespaces (expired but unswept entries included).
    pub size: usize,

    /// Namespaces holding at least one entry.
    pub namespaces: usize,

    pub hits: u64,
    pub misses: u64,

    /// Entries dropped to respect a namespace capacity.
    pub evictions: u64,

    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,

    /// Entries dropped by `invalidate*` or `clear`.
    pub invalidations: u64,
}

/// Invalidation epoch of a namespace, see [`CacheStore::generation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

struct CacheInner<V> {
    namespaces: HashMap<String, LruCache<String, CacheEntry<V>>>,
    counters: Counters,
    /// Bumped by every invalidation.
    epoch: u64,
    /// Epoch of the last invalidation of each namespace.
    invalidated_at: HashMap<String, u64>,
    /// Epoch of the last `clear`.
    cleared_at: u64,
}

#[derive(Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    invalidations: u64,
}

impl<V> CacheInner<V> {
    fn generation(&self, namespace: &str) -> Generation {
        let invalidated = self.invalidated_at.get(namespace).copied().unwrap_or(0);
        Generation(invalidated.max(self.cleared_at))
    }

    fn drop_namespace(&mut self, namespace: &str) -> usize {
        self.epoch += 1;
        self.invalidated_at.insert(namespace.to_string(), self.epoch);
        let removed = self
            .namespaces
            .remove(namespace)
            .map(|lru| lru.len())
            .unwrap_or(0);
        self.counters.invalidations += removed as u64;
        removed
    }

    fn drop_all(&mut self) -> usize {
        self.epoch += 1;
        self.cleared_at = self.epoch;
        self.invalidated_at.clear();
        let removed: usize = self.namespaces.values().map(LruCache::len).sum();
        self.namespaces.clear();
        self.counters.invalidations += removed as u64;
        removed
    }
}

/// Response cache keyed by `(namespace, key)`.
///
/// Each namespace is its own LRU with its own capacity and default TTL. Reads
/// and writes are synchronous and never block on I/O, so callers can use the
/// cache from any task. Clones share the same storage.
pub struct CacheStore<V> {
    inner: Arc<Mutex<CacheInner<V>>>,
    config: Arc<CacheConfig>,
    groups: Arc<InvalidationGroups>,
    clock: SharedClock,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: Arc::clone(&self.config),
            groups: Arc::clone(&self.groups),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<V: Clone> std::fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("config", &self.config)
            .field("groups", &self.groups.names())
            .field("size", &self.len())
            .finish()
    }
}

impl<V: Clone> CacheStore<V> {
    pub fn new(config: CacheConfig, groups: InvalidationGroups, clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner {
                namespaces: HashMap::new(),
                counters: Counters::default(),
                epoch: 0,
                invalidated_at: HashMap::new(),
                cleared_at: 0,
            })),
            config: Arc::new(config),
            groups: Arc::new(groups),
            clock,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn groups(&self) -> &InvalidationGroups {
        &self.groups
    }

    /// Look up a value. Marks the entry as recently used.
    ///
    /// Expired entries are removed on the way out and reported as a miss.
    pub fn get(&self, namespace: &str, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let Some(lru) = inner.namespaces.get_mut(namespace) else {
            inner.counters.misses += 1;
            return None;
        };

        let found = match lru.get(key) {
            Some(entry) if entry.is_expired(now) => Lookup::Expired,
            Some(entry) => Lookup::Hit(entry.value.clone()),
            None => Lookup::Miss,
        };

        match found {
            Lookup::Hit(value) => {
                trace!(namespace, key, "Cache hit");
                inner.counters.hits += 1;
                Some(value)
            }
            Lookup::Expired => {
                lru.pop(key);
                trace!(namespace, key, "Cache entry expired");
                inner.counters.expirations += 1;
                inner.counters.misses += 1;
                None
            }
            Lookup::Miss => {
                inner.counters.misses += 1;
                None
            }
        }
    }

    /// Whether a live entry exists. Does not touch LRU order or statistics.
    pub fn contains(&self, namespace: &str, key: &str) -> bool {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();
        inner
            .namespaces
            .get(namespace)
            .and_then(|lru| lru.peek(key))
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Store a value using the namespace's configured TTL.
    pub fn insert(&self, namespace: &str, key: impl Into<String>, value: V) {
        let ttl = self.config.namespace(namespace).ttl;
        self.set(namespace, key, value, ttl);
    }

    /// Store a value with an explicit TTL, replacing any previous entry.
    ///
    /// When the namespace is full the least recently used entry is evicted.
    pub fn set(&self, namespace: &str, key: impl Into<String>, value: V, ttl: Duration) {
        let mut guard = self.inner.lock();
        self.push_locked(&mut guard, namespace, key.into(), value, ttl);
    }

    /// Current invalidation generation of `namespace`.
    ///
    /// Changes whenever the namespace is invalidated (directly, through a
    /// group, or by `clear`), whether or not it held entries.
    pub fn generation(&self, namespace: &str) -> Generation {
        self.inner.lock().generation(namespace)
    }

    /// Store a value with the namespace TTL, but only if `namespace` has not
    /// been invalidated since `generation` was read. Returns whether the value
    /// was stored.
    pub fn insert_if_generation(
        &self,
        namespace: &str,
        key: impl Into<String>,
        value: V,
        generation: Generation,
    ) -> bool {
        let mut guard = self.inner.lock();
        if guard.generation(namespace) != generation {
            let key: String = key.into();
            debug!(
                namespace,
                key = %key,
                "Namespace invalidated since the read began, not caching"
            );
            return false;
        }
        let ttl = self.config.namespace(namespace).ttl;
        self.push_locked(&mut guard, namespace, key.into(), value, ttl);
        true
    }

    fn push_locked(
        &self,
        inner: &mut CacheInner<V>,
        namespace: &str,
        key: String,
        value: V,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            value,
            inserted_at_ms: self.clock.now_millis(),
            ttl,
        };
        let lru = inner
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| LruCache::new(capacity(self.config.namespace(namespace).max_entries)));

        if let Some((evicted, _)) = lru.push(key.clone(), entry)
            && evicted != key
        {
            debug!(namespace, key = %evicted, "Evicted least recently used entry");
            inner.counters.evictions += 1;
        }
    }

    /// Drop every entry in `namespace`. Returns how many entries were removed.
    pub fn invalidate(&self, namespace: &str) -> usize {
        let removed = self.inner.lock().drop_namespace(namespace);
        if removed > 0 {
            debug!(namespace, removed, "Invalidated cache namespace");
        }
        removed
    }

    /// Drop every namespace mapped to `group`.
    ///
    /// An unknown group clears the whole cache.
    pub fn invalidate_group(&self, group: &str) -> usize {
        let Some(namespaces) = self.groups.resolve(group) else {
            warn!(group, "Unknown invalidation group, clearing entire cache");
            return self.clear();
        };

        let mut inner = self.inner.lock();
        let removed: usize = namespaces.iter().map(|ns| inner.drop_namespace(ns)).sum();
        debug!(group, removed, "Invalidated cache group");
        removed
    }

    /// Drop everything.
    pub fn clear(&self) -> usize {
        let removed = self.inner.lock().drop_all();
        if removed > 0 {
            debug!(removed, "Cleared cache");
        }
        removed
    }

    /// Sweep expired entries from every namespace.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        let mut removed = 0;

        for lru in inner.namespaces.values_mut() {
            let expired: Vec<String> = lru
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                lru.pop(key);
            }
            removed += expired.len();
        }
        inner.namespaces.retain(|_, lru| !lru.is_empty());
        inner.counters.expirations += removed as u64;

        if removed > 0 {
            debug!(count = removed, "Cleaned up expired cache entries");
        }
        removed
    }

    /// Entries across all namespaces.
    pub fn len(&self) -> usize {
        self.inner.lock().namespaces.values().map(LruCache::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn namespace_len(&self, namespace: &str) -> usize {
        self.inner
            .lock()
            .namespaces
            .get(namespace)
            .map(LruCache::len)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            size: inner.namespaces.values().map(LruCache::len).sum(),
            namespaces: inner.namespaces.len(),
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            evictions: inner.counters.evictions,
            expirations: inner.counters.expirations,
            invalidations: inner.counters.invalidations,
        }
    }
}

impl<V: Clone + Send + 'static> CacheStore<V> {
    /// Sweep expired entries every `interval` until the last clone of the
    /// cache is dropped.
    pub fn spawn_cleanup(&self, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Mutex<CacheInner<V>>> = Arc::downgrade(&self.inner);
        let config = Arc::clone(&self.config);
        let groups = Arc::clone(&self.groups);
        let clock = Arc::clone(&self.clock);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    debug!("Cache dropped, stopping cleanup task");
                    break;
                };
                let cache = CacheStore {
                    inner,
                    config: Arc::clone(&config),
                    groups: Arc::clone(&groups),
                    clock: Arc::clone(&clock),
                };
                cache.cleanup_expired();
            }
        })
    }
}

enum Lookup<V> {
    Hit(V),
    Expired,
    Miss,
}

fn capacity(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NamespaceConfig;
    use crate::groups::{group, namespace};
    use envelope_types::ManualClock;

    const T0: i64 = 1_700_000_000_000;

    fn cache_with(config: CacheConfig) -> (CacheStore<String>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let cache = CacheStore::new(config, InvalidationGroups::default(), clock.clone());
        (cache, clock)
    }

    #[test]
    fn test_insert_and_get() {
        let (cache, _) = cache_with(CacheConfig::new());
        cache.insert(namespace::ACCOUNTS, "list", "[]".to_string());

        assert_eq!(cache.get(namespace::ACCOUNTS, "list").as_deref(), Some("[]"));
        assert!(cache.get(namespace::ACCOUNTS, "other").is_none());
        assert!(cache.get(namespace::DEBTS, "list").is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
    }

    #[test]
    fn test_ttl_boundary() {
        let (cache, clock) = cache_with(CacheConfig::new());
        cache.set("reports", "monthly", "v".to_string(), Duration::from_secs(10));

        clock.set_millis(T0 + 9_999);
        assert!(cache.get("reports", "monthly").is_some());

        clock.set_millis(T0 + 10_000);
        assert!(cache.get("reports", "monthly").is_none());
        assert_eq!(cache.namespace_len("reports"), 0);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_lru_eviction_respects_recency() {
        let config = CacheConfig::new().with_namespace(
            "envelopes",
            NamespaceConfig {
                ttl: Duration::from_secs(60),
                max_entries: 2,
            },
        );
        let (cache, _) = cache_with(config);

        cache.insert("envelopes", "a", "1".to_string());
        cache.insert("envelopes", "b", "2".to_string());
        // Touch "a" so "b" becomes least recently used.
        assert!(cache.get("envelopes", "a").is_some());
        cache.insert("envelopes", "c", "3".to_string());

        assert_eq!(cache.namespace_len("envelopes"), 2);
        assert!(cache.contains("envelopes", "a"));
        assert!(!cache.contains("envelopes", "b"));
        assert!(cache.contains("envelopes", "c"));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_replacing_key_is_not_eviction() {
        let (cache, _) = cache_with(CacheConfig::new().with_default_max_entries(1));
        cache.insert("profile", "me", "old".to_string());
        cache.insert("profile", "me", "new".to_string());

        assert_eq!(cache.get("profile", "me").as_deref(), Some("new"));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_invalidate_group() {
        let (cache, _) = cache_with(CacheConfig::new());
        cache.insert(namespace::ENVELOPES, "list", "e".to_string());
        cache.insert(namespace::TRANSACTIONS, "list", "t".to_string());
        cache.insert(namespace::PROFILE, "me", "p".to_string());

        let removed = cache.invalidate_group(group::TRANSACTION_WRITTEN);
        assert_eq!(removed, 2);
        assert!(cache.get(namespace::ENVELOPES, "list").is_none());
        assert!(cache.get(namespace::TRANSACTIONS, "list").is_none());
        assert!(cache.get(namespace::PROFILE, "me").is_some());
    }

    #[test]
    fn test_unknown_group_clears_everything() {
        let (cache, _) = cache_with(CacheConfig::new());
        cache.insert(namespace::PROFILE, "me", "p".to_string());
        cache.insert(namespace::DEBTS, "list", "d".to_string());

        assert_eq!(cache.invalidate_group("goal_written"), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[test]
    fn test_cleanup_expired() {
        let (cache, clock) = cache_with(CacheConfig::new());
        cache.set("accounts", "short", "s".to_string(), Duration::from_secs(5));
        cache.set("accounts", "long", "l".to_string(), Duration::from_secs(500));
        cache.set("debts", "short", "s".to_string(), Duration::from_secs(5));

        clock.advance(Duration::from_secs(5));
        assert_eq!(cache.cleanup_expired(), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().namespaces, 1);
    }

    #[test]
    fn test_clones_share_storage() {
        let (cache, _) = cache_with(CacheConfig::new());
        let other = cache.clone();
        other.insert("accounts", "list", "x".to_string());
        assert!(cache.contains("accounts", "list"));
        assert_eq!(cache.clear(), 1);
        assert!(other.is_empty());
    }

    #[test]
    fn test_insert_refused_after_invalidation() {
        let (cache, _) = cache_with(CacheConfig::new());
        let before = cache.generation(namespace::ENVELOPES);

        // Empty namespaces still move to a new generation.
        cache.invalidate_group(group::TRANSACTION_WRITTEN);
        assert_ne!(cache.generation(namespace::ENVELOPES), before);
        assert!(!cache.insert_if_generation(
            namespace::ENVELOPES,
            "list",
            "stale".to_string(),
            before
        ));
        assert!(cache.get(namespace::ENVELOPES, "list").is_none());

        let current = cache.generation(namespace::ENVELOPES);
        assert!(cache.insert_if_generation(
            namespace::ENVELOPES,
            "list",
            "fresh".to_string(),
            current
        ));
        assert_eq!(cache.get(namespace::ENVELOPES, "list").as_deref(), Some("fresh"));
    }

    #[test]
    fn test_generation_scoped_to_namespace() {
        let (cache, _) = cache_with(CacheConfig::new());
        let profile = cache.generation(namespace::PROFILE);
        let debts = cache.generation(namespace::DEBTS);

        cache.invalidate(namespace::DEBTS);
        assert_eq!(cache.generation(namespace::PROFILE), profile);
        assert_ne!(cache.generation(namespace::DEBTS), debts);

        let debts = cache.generation(namespace::DEBTS);
        cache.clear();
        assert_ne!(cache.generation(namespace::PROFILE), profile);
        assert_ne!(cache.generation(namespace::DEBTS), debts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_task_stops_when_cache_dropped() {
        let (cache, clock) = cache_with(CacheConfig::new());
        cache.set("accounts", "k", "v".to_string(), Duration::from_secs(1));
        let handle = cache.spawn_cleanup(Duration::from_secs(30));

        clock.advance(Duration::from_secs(2));
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.is_empty());

        drop(cache);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(handle.is_finished());
    }
}
