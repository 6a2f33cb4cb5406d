//! Response cache for the Envelope client.
//!
//! Cached API responses live in namespaces (`accounts`, `envelopes`, ...).
//! Each namespace has its own capacity and TTL. A successful write names an
//! invalidation group, and every namespace in that group is dropped.

mod config;
mod groups;
mod store;

pub use config::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL, NamespaceConfig};
pub use groups::{InvalidationGroups, group, namespace};
pub use store::{CacheEntry, CacheStats, CacheStore, Generation};
