//! Page-local key-value storage.
//!
//! The page context keeps small JSON records outside the cache facility:
//! per-cache metadata (the cache storage itself exposes no timestamps) and
//! development-time configuration overrides. This module provides the seam
//! for that storage plus an in-memory implementation.

use hashbrown::HashMap;
use serde_json::Value as JsonValue;
use std::sync::Mutex;

/// Key-value store scoped to the page context.
///
/// Implementations must tolerate missing keys; all operations are
/// infallible from the caller's point of view (a backend that loses writes
/// degrades to "no metadata", which callers already treat as unknown).
pub trait LocalStore: Send + Sync {
    /// Look up a value by key.
    fn get(&self, key: &str) -> Option<JsonValue>;

    /// Store a value, replacing any previous one.
    fn set(&self, key: &str, value: JsonValue);

    /// Remove a value. Removing a missing key is not an error.
    fn remove(&self, key: &str);
}

/// In-memory [`LocalStore`].
#[derive(Debug, Default)]
pub struct MemoryLocalStore {
    records: Mutex<HashMap<String, JsonValue>>,
}

impl MemoryLocalStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, key: &str) -> Option<JsonValue> {
        self.records.lock().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: JsonValue) {
        if let Ok(mut records) = self.records.lock() {
            records.insert(key.to_string(), value);
        }
    }

    fn remove(&self, key: &str) {
        if let Ok(mut records) = self.records.lock() {
            records.remove(key);
        }
    }
}
