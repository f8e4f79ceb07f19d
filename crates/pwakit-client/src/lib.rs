//! # PwaKit Client
//!
//! Page-context policy layer for the PwaKit cache/update engine.
//!
//! ## Features
//!
//! - **CacheManager**: cache listing, age-based eviction, full reset
//! - **CacheMonitor**: periodic and event-triggered cache-age enforcement
//! - **UpdateManager**: worker update detection and the apply handshake
//! - **PwaRuntime**: composition root wiring the pieces together
//!
//! ## Architecture
//!
//! ```text
//! PwaRuntime (composition root)
//!     ├── CacheManager ── CacheStorage + MetadataStore + ServiceWorkerHost
//!     ├── CacheMonitor ── timer + PageEvent driven policy loop
//!     └── UpdateManager ── update detection, strategy, apply sequence
//!
//! PageEvent  (embedder → policy, broadcast)
//! PageAction (policy → embedder, mpsc: reload, notify)
//! ```
//!
//! Policy code never reloads or notifies directly; it emits [`PageAction`]
//! values the embedder executes, which keeps every decision testable
//! without a real page environment.

pub mod manager;
pub mod monitor;
pub mod runtime;
pub mod update;

pub use manager::CacheManager;
pub use monitor::{CacheMonitor, MonitorStatus};
pub use runtime::{PwaRuntime, RuntimeChannels};
pub use update::{UpdateManager, UpdatePhase, UpdateStatus};

/// Events the embedder publishes into the page context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageEvent {
    /// The window regained focus.
    Focus,
    /// The page's visibility changed.
    VisibilityChange {
        /// Whether the page is now hidden.
        hidden: bool,
    },
    /// The network came back.
    Online,
    /// The network went away.
    Offline,
}

/// Effects requested by the policy layer, executed by the embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageAction {
    /// Reload the page.
    Reload,
    /// Surface a passive notification.
    Notify {
        /// Notification title.
        title: String,
        /// Notification body.
        body: String,
    },
}

#[cfg(test)]
pub(crate) mod testutil {
    use pwakit_cache::{CacheStorage, MetadataStore};
    use pwakit_common::MemoryLocalStore;
    use pwakit_sw::{
        Deployment, FetchRequest, FetchResponse, Network, ServiceWorkerHost, SwError, SwEvent,
        VersionTags,
    };
    use std::sync::Arc;
    use tokio::sync::{broadcast, mpsc, RwLock};
    use url::Url;

    use crate::manager::CacheManager;
    use crate::{PageAction, PageEvent};

    /// Network that answers 200 for everything.
    pub struct OkNetwork;

    impl Network for OkNetwork {
        fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, SwError> {
            Ok(FetchResponse::ok(b"ok".to_vec()))
        }
    }

    pub fn origin() -> Url {
        Url::parse("https://example.com/").unwrap()
    }

    pub fn deployment(revision: &str) -> Deployment {
        Deployment {
            version: VersionTags::new("app", revision),
            shell_manifest: vec!["/".to_string(), "/manifest.json".to_string()],
        }
    }

    pub struct Harness {
        pub storage: Arc<RwLock<CacheStorage>>,
        pub host: Arc<ServiceWorkerHost>,
        pub sw_events: mpsc::UnboundedReceiver<SwEvent>,
        pub local: Arc<MemoryLocalStore>,
        pub metadata: MetadataStore,
        pub events: broadcast::Sender<PageEvent>,
        pub actions_tx: mpsc::UnboundedSender<PageAction>,
        pub actions: mpsc::UnboundedReceiver<PageAction>,
    }

    pub fn harness() -> Harness {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let (host, sw_events) = ServiceWorkerHost::new(
            origin(),
            "sw.js",
            deployment("v1"),
            Arc::clone(&storage),
            Arc::new(OkNetwork),
        );
        let local = Arc::new(MemoryLocalStore::new());
        let metadata = MetadataStore::new(local.clone());
        let (events, _) = broadcast::channel(16);
        let (actions_tx, actions) = mpsc::unbounded_channel();
        Harness {
            storage,
            host: Arc::new(host),
            sw_events,
            local,
            metadata,
            events,
            actions_tx,
            actions,
        }
    }

    pub fn manager(h: &Harness) -> Arc<CacheManager> {
        Arc::new(CacheManager::new(
            Arc::clone(&h.storage),
            h.metadata.clone(),
            Arc::clone(&h.host),
            h.actions_tx.clone(),
        ))
    }
}
