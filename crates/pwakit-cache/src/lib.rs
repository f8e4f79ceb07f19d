//! # PwaKit Cache
//!
//! Named-cache storage for the PwaKit cache/update engine.
//!
//! ## Features
//!
//! - **CacheStorage**: named caches holding request-URL → response entries
//! - **CachedResponse**: stored response snapshots
//! - **Metadata**: per-cache `created` / `lastAccessed` timestamps, kept in
//!   the page-local store because the cache facility itself has none
//! - **Age derivation**: `CacheInfo` with age and the "old cache" predicate
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     └── Cache ("app-static-v2", "app-dynamic-v2", ...)
//!             └── URL → CachedResponse
//!
//! MetadataStore (page-local, out of band)
//!     └── "cache_metadata_<name>" → { created, lastAccessed }
//! ```

use hashbrown::HashMap;
use pwakit_common::LocalStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Prefix for per-cache metadata records in the page-local store.
pub const METADATA_KEY_PREFIX: &str = "cache_metadata_";

// ==================== Cached responses ====================

/// A stored response snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Request URL the response was stored under.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// When the entry was stored (ms since epoch).
    pub cached_at: u64,
}

impl CachedResponse {
    /// Create a successful GET snapshot.
    pub fn ok(url: &str, body: Vec<u8>, cached_at: u64) -> Self {
        Self {
            url: url.to_string(),
            method: "GET".to_string(),
            status: 200,
            headers: HashMap::new(),
            body,
            cached_at,
        }
    }

    /// Get a header value.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    /// Whether the status is 200.
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

// ==================== Cache ====================

/// A named cache of URL → response entries.
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CachedResponse>,
}

impl Cache {
    /// Create a new empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_url(&self, url: &str) -> Option<&CachedResponse> {
        self.entries.get(url)
    }

    /// Store a response, replacing any previous entry for the URL.
    pub fn put(&mut self, url: &str, response: CachedResponse) {
        self.entries.insert(url.to_string(), response);
    }

    /// Delete an entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All entry URLs.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache storage ====================

/// The set of named caches.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a cache, creating it on first use.
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check whether a cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache. Deleting a missing cache is not an error.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names.
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    /// Number of caches.
    pub fn len(&self) -> usize {
        self.caches.len()
    }

    /// Whether there are no caches.
    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    /// Match a URL across all caches.
    pub fn match_url(&self, url: &str) -> Option<&CachedResponse> {
        self.caches.values().find_map(|c| c.match_url(url))
    }
}

// ==================== Metadata ====================

/// Out-of-band timestamps for one cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// When the cache was first observed (ms since epoch).
    pub created: u64,

    /// When the cache was last read through the serving path (ms since epoch).
    #[serde(rename = "lastAccessed")]
    pub last_accessed: u64,
}

/// Metadata records in the page-local store, keyed by cache name.
///
/// The worker context never reads these; aging is a page-side concern.
#[derive(Clone)]
pub struct MetadataStore {
    store: Arc<dyn LocalStore>,
}

impl MetadataStore {
    /// Create a metadata store over the given local store.
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    fn key(name: &str) -> String {
        format!("{METADATA_KEY_PREFIX}{name}")
    }

    /// Read metadata for a cache, if any exists.
    pub fn get(&self, name: &str) -> Option<CacheMetadata> {
        let value = self.store.get(&Self::key(name))?;
        match serde_json::from_value(value) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!("ignoring malformed metadata for cache {name}: {e}");
                None
            }
        }
    }

    /// Read metadata, creating a fresh record if none exists yet.
    pub fn ensure(&self, name: &str, now: u64) -> CacheMetadata {
        if let Some(meta) = self.get(name) {
            return meta;
        }
        let meta = CacheMetadata {
            created: now,
            last_accessed: now,
        };
        self.put(name, meta);
        meta
    }

    /// Mark the cache as accessed now.
    pub fn touch(&self, name: &str, now: u64) {
        let mut meta = self.ensure(name, now);
        meta.last_accessed = now;
        self.put(name, meta);
    }

    /// Write a metadata record.
    pub fn put(&self, name: &str, meta: CacheMetadata) {
        match serde_json::to_value(meta) {
            Ok(value) => self.store.set(&Self::key(name), value),
            Err(e) => warn!("failed to serialize metadata for cache {name}: {e}"),
        }
    }

    /// Remove a metadata record.
    pub fn remove(&self, name: &str) {
        self.store.remove(&Self::key(name));
    }
}

// ==================== Cache info ====================

/// A cache joined with its derived age.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    /// Cache name.
    pub name: String,

    /// Number of entries.
    pub size: usize,

    /// Creation time (ms since epoch), if known.
    pub created: Option<u64>,

    /// Last access time (ms since epoch), if known.
    pub last_accessed: Option<u64>,

    /// Age in milliseconds, if the creation time is known.
    pub age: Option<u64>,
}

impl CacheInfo {
    /// Join a cache with its metadata.
    pub fn derive(name: &str, size: usize, meta: Option<CacheMetadata>, now: u64) -> Self {
        let created = meta.map(|m| m.created);
        Self {
            name: name.to_string(),
            size,
            created,
            last_accessed: meta.map(|m| m.last_accessed),
            age: created.map(|c| now.saturating_sub(c)),
        }
    }

    /// Whether this cache counts as old.
    ///
    /// Unknown age never counts as old, and `age == max_age_ms` is on the
    /// young side of the boundary.
    pub fn is_older_than(&self, max_age_ms: u64) -> bool {
        matches!(self.age, Some(age) if age > max_age_ms)
    }
}
