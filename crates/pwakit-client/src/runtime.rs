//! Composition root.
//!
//! Wires the worker host, cache manager, monitor, and update manager into
//! one runtime the embedding page drives: construct with [`PwaRuntime::bootstrap`],
//! call [`PwaRuntime::register`] on page load, then [`PwaRuntime::start`] the
//! background loops and forward page events via [`PwaRuntime::publish`].

use pwakit_cache::{CacheStorage, MetadataStore};
use pwakit_common::LocalStore;
use pwakit_config::{cache_config, update_config, Environment, UpdatePreset};
use pwakit_sw::{Deployment, Network, ServiceWorkerHost, SwError, SwEvent};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::info;
use url::Url;

use crate::manager::CacheManager;
use crate::monitor::CacheMonitor;
use crate::update::UpdateManager;
use crate::{PageAction, PageEvent};

/// Worker script path relative to the origin.
const SCRIPT_PATH: &str = "/sw.js";

/// Everything the page side of the PWA needs, wired together.
pub struct PwaRuntime {
    env: Environment,
    host: Arc<ServiceWorkerHost>,
    manager: Arc<CacheManager>,
    monitor: Arc<CacheMonitor>,
    updates: Arc<UpdateManager>,
    events: broadcast::Sender<PageEvent>,
    client_id: RwLock<Option<String>>,
}

/// Receiving ends handed to the embedder at bootstrap.
pub struct RuntimeChannels {
    /// Effects the embedder must perform on the page.
    pub actions: mpsc::UnboundedReceiver<PageAction>,
    /// Worker lifecycle events, for surfacing state in the UI.
    pub sw_events: mpsc::UnboundedReceiver<SwEvent>,
}

impl PwaRuntime {
    /// Build the full runtime for one origin.
    ///
    /// Configs are loaded from `store` (environment baseline plus any
    /// persisted dev override); `update_preset` applies on top for the
    /// update side. In production the current static cache is excluded
    /// from the monitor's sweep so the app shell survives age-based
    /// eviction between visits.
    pub fn bootstrap(
        env: Environment,
        store: Arc<dyn LocalStore>,
        network: Arc<dyn Network>,
        origin: Url,
        deployment: Deployment,
        update_preset: Option<UpdatePreset>,
    ) -> (Arc<Self>, RuntimeChannels) {
        let storage = Arc::new(RwLock::new(CacheStorage::new()));
        let metadata = MetadataStore::new(Arc::clone(&store));

        let mut cache_cfg = cache_config(env, store.as_ref());
        if env == Environment::Production {
            cache_cfg
                .excluded_caches
                .push(deployment.version.static_cache());
        }
        let update_cfg = update_config(env, update_preset, store.as_ref());

        let (host, sw_events) = ServiceWorkerHost::new(
            origin,
            SCRIPT_PATH,
            deployment,
            Arc::clone(&storage),
            network,
        );
        let host = Arc::new(host);

        let (events, _) = broadcast::channel(16);
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();

        let manager = Arc::new(CacheManager::new(
            storage,
            metadata,
            Arc::clone(&host),
            actions_tx.clone(),
        ));
        let monitor = Arc::new(CacheMonitor::new(
            Arc::clone(&manager),
            cache_cfg,
            events.clone(),
            actions_tx.clone(),
        ));
        let updates = Arc::new(UpdateManager::new(
            Arc::clone(&manager),
            update_cfg,
            events.clone(),
            actions_tx,
        ));

        info!(env = ?env, "pwa runtime bootstrapped");
        (
            Arc::new(Self {
                env,
                host,
                manager,
                monitor,
                updates,
                events,
                client_id: RwLock::new(None),
            }),
            RuntimeChannels {
                actions: actions_rx,
                sw_events,
            },
        )
    }

    /// Register the worker for this page.
    ///
    /// Connects the page as a client, registers (which runs the initial
    /// install), and stamps access on the current generation's caches so
    /// the monitor sees them as fresh.
    pub async fn register(&self) -> Result<(), SwError> {
        let origin = self.host.origin().clone();
        let id = self.host.connect_client(origin).await;
        *self.client_id.write().await = Some(id);

        self.host.register().await?;

        if let Some(version) = self.host.active_version().await {
            self.manager
                .update_cache_access(&version.static_cache())
                .await;
            self.manager
                .update_cache_access(&version.dynamic_cache())
                .await;
        }
        Ok(())
    }

    /// Start the monitor and update loops.
    pub async fn start(&self) {
        self.monitor.start().await;
        self.updates.start().await;
    }

    /// Stop all background loops.
    pub async fn stop(&self) {
        self.monitor.stop().await;
        self.updates.stop().await;
    }

    /// Forward a page lifecycle event to all listeners.
    pub fn publish(&self, event: PageEvent) {
        let _ = self.events.send(event);
    }

    pub fn environment(&self) -> Environment {
        self.env
    }

    pub fn host(&self) -> &Arc<ServiceWorkerHost> {
        &self.host
    }

    pub fn cache_manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    pub fn cache_monitor(&self) -> &Arc<CacheMonitor> {
        &self.monitor
    }

    pub fn update_manager(&self) -> &Arc<UpdateManager> {
        &self.updates
    }

    /// Whether this page is controlled by an active worker.
    pub async fn is_controlled(&self) -> bool {
        match self.client_id.read().await.as_ref() {
            Some(id) => self.host.is_controlled(id).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{deployment, origin, OkNetwork};
    use pwakit_common::MemoryLocalStore;

    fn bootstrap(env: Environment) -> (Arc<PwaRuntime>, RuntimeChannels) {
        PwaRuntime::bootstrap(
            env,
            Arc::new(MemoryLocalStore::new()),
            Arc::new(OkNetwork),
            origin(),
            deployment("v1"),
            None,
        )
    }

    #[tokio::test]
    async fn test_register_installs_and_controls() {
        let (runtime, _channels) = bootstrap(Environment::Development);
        runtime.register().await.unwrap();

        assert!(runtime.is_controlled().await);
        assert_eq!(
            runtime.host().active_version().await.unwrap().tag(),
            "app-v1"
        );
    }

    #[tokio::test]
    async fn test_register_stamps_cache_access() {
        let (runtime, _channels) = bootstrap(Environment::Development);
        runtime.register().await.unwrap();

        let infos = runtime.cache_manager().list_caches().await;
        let static_info = infos
            .iter()
            .find(|i| i.name == "app-static-v1")
            .expect("static cache present");
        assert!(static_info.age.is_some());
    }

    #[tokio::test]
    async fn test_production_excludes_static_cache_from_monitor() {
        let (runtime, _channels) = bootstrap(Environment::Production);
        let status = runtime.cache_monitor().status().await;
        assert!(status
            .config
            .excluded_caches
            .contains(&"app-static-v1".to_string()));
    }

    #[tokio::test]
    async fn test_sw_events_reach_the_embedder() {
        let (runtime, mut channels) = bootstrap(Environment::Development);
        runtime.register().await.unwrap();

        let mut saw_controller_change = false;
        while let Ok(event) = channels.sw_events.try_recv() {
            if matches!(event, SwEvent::ControllerChange { .. }) {
                saw_controller_change = true;
            }
        }
        assert!(saw_controller_change);
    }
}
