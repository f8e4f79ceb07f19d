//! Cache management operations.
//!
//! Page-side operations layer over the shared cache storage and the
//! out-of-band metadata records. Everything here absorbs failure: a
//! platform without a cache facility degrades to empty lists and no-op
//! clears instead of failing callers.

use pwakit_cache::{CacheInfo, CacheStorage, MetadataStore};
use pwakit_common::epoch_ms;
use pwakit_sw::ServiceWorkerHost;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{info, warn};

use crate::PageAction;

/// Cache operations layer.
pub struct CacheManager {
    storage: Option<Arc<RwLock<CacheStorage>>>,
    metadata: MetadataStore,
    host: Arc<ServiceWorkerHost>,
    actions: mpsc::UnboundedSender<PageAction>,
}

impl CacheManager {
    /// Create a manager over the platform cache storage.
    pub fn new(
        storage: Arc<RwLock<CacheStorage>>,
        metadata: MetadataStore,
        host: Arc<ServiceWorkerHost>,
        actions: mpsc::UnboundedSender<PageAction>,
    ) -> Self {
        Self {
            storage: Some(storage),
            metadata,
            host,
            actions,
        }
    }

    /// Create a manager for a platform without persistent cache storage.
    ///
    /// Listing returns nothing and clears are no-ops; callers see "nothing
    /// to report" rather than errors.
    pub fn without_cache_storage(
        metadata: MetadataStore,
        host: Arc<ServiceWorkerHost>,
        actions: mpsc::UnboundedSender<PageAction>,
    ) -> Self {
        Self {
            storage: None,
            metadata,
            host,
            actions,
        }
    }

    /// The worker host this manager operates against.
    pub fn host(&self) -> &Arc<ServiceWorkerHost> {
        &self.host
    }

    /// List all caches joined with their metadata and derived age.
    ///
    /// Reading metadata creates it on first observation, so every listed
    /// cache gains an age from this point on.
    pub async fn list_caches(&self) -> Vec<CacheInfo> {
        let Some(storage) = &self.storage else {
            return Vec::new();
        };
        let storage = storage.read().await;
        let now = epoch_ms();
        storage
            .keys()
            .into_iter()
            .map(|name| {
                let size = storage.get(&name).map(|c| c.len()).unwrap_or(0);
                let meta = self.metadata.ensure(&name, now);
                CacheInfo::derive(&name, size, Some(meta), now)
            })
            .collect()
    }

    /// Names of caches older than `max_age_ms`.
    ///
    /// A cache whose age cannot be established is never reported old.
    pub async fn get_old_caches(&self, max_age_ms: u64) -> Vec<String> {
        self.list_caches()
            .await
            .into_iter()
            .filter(|info| info.is_older_than(max_age_ms))
            .map(|info| info.name)
            .collect()
    }

    /// Delete one cache. Deleting a missing cache is not an error.
    pub async fn clear_specific_cache(&self, name: &str) -> bool {
        let Some(storage) = &self.storage else {
            return false;
        };
        let deleted = storage.write().await.delete(name);
        if deleted {
            info!(cache = %name, "cache cleared");
        }
        deleted
    }

    /// Delete every cache.
    pub async fn clear_all_caches(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let mut storage = storage.write().await;
        let names = storage.keys();
        for name in &names {
            storage.delete(name);
        }
        info!(count = names.len(), "all caches cleared");
    }

    /// Delete caches older than `max_age_ms` along with their metadata.
    ///
    /// Best-effort: an entry that fails to clear is logged and skipped; the
    /// result holds only the names actually cleared.
    pub async fn clear_old_caches(&self, max_age_ms: u64) -> Vec<String> {
        let old = self.get_old_caches(max_age_ms).await;
        let mut cleared = Vec::with_capacity(old.len());
        for name in old {
            if self.clear_specific_cache(&name).await {
                self.metadata.remove(&name);
                cleared.push(name);
            } else {
                warn!(cache = %name, "old cache vanished before it could be cleared");
            }
        }
        cleared
    }

    /// Mark a cache as read through the normal serving path.
    pub async fn update_cache_access(&self, name: &str) {
        self.metadata.touch(name, epoch_ms());
    }

    /// Drive a registration update check; reports whether a new worker is
    /// now waiting.
    pub async fn check_for_updates(&self) -> bool {
        match self.host.update().await {
            Ok(_) => self.host.waiting_worker().await.is_some(),
            Err(e) => {
                warn!("update check failed: {e}");
                false
            }
        }
    }

    /// The nuclear option: clear every cache, unregister every worker, and
    /// request a full reload. Irreversible; in-flight cached content is
    /// discarded.
    pub async fn force_update(&self) {
        info!("forcing full update");
        self.clear_all_caches().await;
        let removed = self.host.unregister_all().await;
        info!(removed, "service workers unregistered");
        let _ = self.actions.send(PageAction::Reload);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{harness, manager};
    use pwakit_cache::{CacheMetadata, CachedResponse};

    #[tokio::test]
    async fn test_list_caches_creates_metadata_lazily() {
        let h = harness();
        {
            let mut storage = h.storage.write().await;
            storage
                .open("app-static-v1")
                .put("/", CachedResponse::ok("/", Vec::new(), 0));
        }
        let m = manager(&h);

        let infos = m.list_caches().await;
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].size, 1);
        // The first read created the metadata record.
        assert!(h.metadata.get("app-static-v1").is_some());
        assert!(infos[0].age.is_some());
    }

    #[tokio::test]
    async fn test_get_old_caches_uses_age() {
        let h = harness();
        let now = epoch_ms();
        {
            let mut storage = h.storage.write().await;
            storage.open("old-cache");
            storage.open("fresh-cache");
        }
        h.metadata.put(
            "old-cache",
            CacheMetadata {
                created: now - 3 * 60 * 60 * 1000,
                last_accessed: now - 3 * 60 * 60 * 1000,
            },
        );
        let m = manager(&h);

        let old = m.get_old_caches(2 * 60 * 60 * 1000).await;
        assert_eq!(old, vec!["old-cache".to_string()]);
    }

    #[tokio::test]
    async fn test_clear_old_caches_is_idempotent() {
        let h = harness();
        let now = epoch_ms();
        {
            h.storage.write().await.open("old-cache");
        }
        h.metadata.put(
            "old-cache",
            CacheMetadata {
                created: now - 10_000,
                last_accessed: now - 10_000,
            },
        );
        let m = manager(&h);

        let cleared = m.clear_old_caches(5000).await;
        assert_eq!(cleared, vec!["old-cache".to_string()]);
        assert!(h.metadata.get("old-cache").is_none());

        // Nothing new appeared; the second pass clears nothing.
        assert!(m.clear_old_caches(5000).await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_specific_missing_cache_is_not_an_error() {
        let h = harness();
        let m = manager(&h);
        assert!(!m.clear_specific_cache("never-existed").await);
    }

    #[tokio::test]
    async fn test_update_cache_access_touches_metadata() {
        let h = harness();
        let m = manager(&h);

        m.update_cache_access("app-dynamic-v1").await;
        let meta = h.metadata.get("app-dynamic-v1").unwrap();
        assert!(meta.last_accessed > 0);
    }

    #[tokio::test]
    async fn test_force_update_clears_unregisters_reloads() {
        let mut h = harness();
        h.host.register().await.unwrap();
        {
            let mut storage = h.storage.write().await;
            storage.open("extra-1");
            storage.open("extra-2");
        }
        let m = manager(&h);
        assert!(m.list_caches().await.len() >= 3);

        m.force_update().await;

        assert!(h.storage.read().await.is_empty());
        assert!(h.host.registrations().await.is_empty());
        assert_eq!(h.actions.recv().await, Some(PageAction::Reload));
    }

    #[tokio::test]
    async fn test_check_for_updates_reports_waiting() {
        let h = harness();
        h.host.register().await.unwrap();
        let m = manager(&h);

        assert!(!m.check_for_updates().await);

        h.host.deploy(crate::testutil::deployment("v2")).await;
        assert!(m.check_for_updates().await);
    }

    #[tokio::test]
    async fn test_degraded_manager_is_noop() {
        let h = harness();
        let m = CacheManager::without_cache_storage(
            h.metadata.clone(),
            Arc::clone(&h.host),
            h.actions_tx.clone(),
        );

        assert!(m.list_caches().await.is_empty());
        assert!(m.get_old_caches(0).await.is_empty());
        m.clear_all_caches().await;
        assert!(m.clear_old_caches(0).await.is_empty());
    }
}
