//! # PwaKit Service Worker
//!
//! Worker-context engine for the PwaKit cache/update system.
//!
//! ## Features
//!
//! - **Lifecycle**: explicit install → waiting → activate state machine with
//!   legal-transition checking
//! - **Install**: pre-populates the static shell cache, then supersedes any
//!   waiting predecessor
//! - **Activate**: sweeps caches from other version generations, claims
//!   open clients
//! - **Fetch routing**: network-first for HTML, cache-first for assets
//! - **Messages**: `SKIP_WAITING` and `GET_VERSION` from the page
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerHost
//!     │
//!     └── ServiceWorkerRegistration (per scope)
//!             ├── installing (ServiceWorker)
//!             ├── waiting (ServiceWorker)
//!             └── active (ServiceWorker)
//!
//! ServiceWorkerEngine (per worker version)
//!     ├── CacheStorage (shared with the page)
//!     └── Network
//! ```

use hashbrown::HashMap;
use pwakit_cache::{CacheStorage, CachedResponse};
use pwakit_common::epoch_ms;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};
use url::Url;

// ==================== Errors ====================

/// Errors from worker lifecycle and fetch routing.
#[derive(Error, Debug, Clone)]
pub enum SwError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

// ==================== Version tags ====================

/// Cache-name contract for one deployable revision.
///
/// Exactly two live caches exist per generation, both suffixed with the
/// revision so activation can recognize strangers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionTags {
    /// Application prefix (e.g. `app`).
    pub app: String,

    /// Revision suffix (e.g. `v2`), changed on every deployable revision.
    pub revision: String,
}

impl VersionTags {
    /// Create tags for an app/revision pair.
    pub fn new(app: &str, revision: &str) -> Self {
        Self {
            app: app.to_string(),
            revision: revision.to_string(),
        }
    }

    /// Name of the install-time shell cache.
    pub fn static_cache(&self) -> String {
        format!("{}-static-{}", self.app, self.revision)
    }

    /// Name of the runtime-populated cache.
    pub fn dynamic_cache(&self) -> String {
        format!("{}-dynamic-{}", self.app, self.revision)
    }

    /// The version tag reported over `GET_VERSION`.
    pub fn tag(&self) -> String {
        format!("{}-{}", self.app, self.revision)
    }

    /// Whether a cache name belongs to this generation.
    pub fn owns(&self, cache_name: &str) -> bool {
        cache_name == self.static_cache() || cache_name == self.dynamic_cache()
    }
}

// ==================== Lifecycle states ====================

/// Service worker lifecycle state.
///
/// The platform drives these transitions; this engine models them as a
/// first-class machine so update negotiation can be tested with injected
/// transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Script parsed, nothing run yet.
    Parsed,
    /// Install event in flight.
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activate event in flight.
    Activating,
    /// Active; may be controlling pages.
    Activated,
    /// Superseded or failed. Terminal.
    Redundant,
}

impl ServiceWorkerState {
    /// Whether moving to `next` is a legal transition.
    ///
    /// Legal chain: Parsed → Installing → Installed → Activating →
    /// Activated; any non-terminal state may become Redundant.
    pub fn can_transition_to(self, next: ServiceWorkerState) -> bool {
        use ServiceWorkerState::*;
        match (self, next) {
            (Parsed, Installing) => true,
            (Installing, Installed) => true,
            (Installed, Activating) => true,
            (Activating, Activated) => true,
            (Redundant, _) => false,
            (_, Redundant) => true,
            _ => false,
        }
    }
}

/// Unique identifier for a worker instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One worker instance: a parsed script bound to a version generation.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Unique id.
    pub id: ServiceWorkerId,

    /// Script URL the worker was fetched from.
    pub script_url: Url,

    /// Version generation this worker serves.
    pub version: VersionTags,

    /// Shell URLs baked into the worker script, cached at install.
    pub shell_manifest: Vec<String>,

    /// Current lifecycle state.
    pub state: ServiceWorkerState,

    /// Time of the last state change.
    pub state_changed_at: Instant,
}

impl ServiceWorker {
    /// Create a freshly parsed worker.
    pub fn new(script_url: Url, version: VersionTags, shell_manifest: Vec<String>) -> Self {
        Self {
            id: ServiceWorkerId::next(),
            script_url,
            version,
            shell_manifest,
            state: ServiceWorkerState::Parsed,
            state_changed_at: Instant::now(),
        }
    }

    /// Transition to a new state, rejecting illegal moves.
    pub fn transition(&mut self, next: ServiceWorkerState) -> Result<(), SwError> {
        if !self.state.can_transition_to(next) {
            return Err(SwError::State(format!(
                "illegal transition {:?} -> {:?}",
                self.state, next
            )));
        }
        self.state = next;
        self.state_changed_at = Instant::now();
        Ok(())
    }

    /// Whether the worker is activated.
    pub fn is_active(&self) -> bool {
        self.state == ServiceWorkerState::Activated
    }

    /// Whether the worker is terminally redundant.
    pub fn is_redundant(&self) -> bool {
        self.state == ServiceWorkerState::Redundant
    }

    fn retire(&mut self) {
        // Redundant is reachable from anywhere but itself.
        let _ = self.transition(ServiceWorkerState::Redundant);
    }
}

// ==================== Fetch model ====================

/// A request reaching the worker's fetch handler.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    /// A plain GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
        }
    }

    /// A navigation/document request (accepts HTML).
    pub fn document(url: Url) -> Self {
        let mut request = Self::get(url);
        request.headers.insert(
            "accept".to_string(),
            "text/html,application/xhtml+xml".to_string(),
        );
        request
    }

    /// Whether the request method is GET.
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }

    /// Whether the request accepts an HTML response.
    pub fn accepts_html(&self) -> bool {
        self.headers
            .get("accept")
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false)
    }
}

/// A response produced by the worker's fetch handler.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// Status code.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether the response was served from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// A successful network response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// A response with the given status.
    pub fn with_status(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body,
            from_cache: false,
        }
    }

    /// Rehydrate a response from a cache entry.
    pub fn from_cached(entry: &CachedResponse) -> Self {
        Self {
            status: entry.status,
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    fn to_cached(&self, url: &str, now: u64) -> CachedResponse {
        CachedResponse {
            url: url.to_string(),
            method: "GET".to_string(),
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            cached_at: now,
        }
    }
}

/// Network access as seen from the worker context.
pub trait Network: Send + Sync {
    /// Perform a network fetch. `Err` means the network itself failed;
    /// HTTP error statuses come back as `Ok` responses.
    fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, SwError>;
}

// ==================== Clients ====================

/// An open page the worker may control.
#[derive(Debug, Clone)]
pub struct PageClient {
    /// Client id.
    pub id: String,

    /// Page URL.
    pub url: Url,

    /// Worker currently controlling this page, if any.
    pub controlled_by: Option<ServiceWorkerId>,
}

/// Registry of open pages.
#[derive(Debug, Default)]
pub struct Clients {
    clients: HashMap<String, PageClient>,
}

impl Clients {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open page.
    pub fn connect(&mut self, url: Url) -> String {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = format!("client-{}", COUNTER.fetch_add(1, Ordering::Relaxed));
        self.clients.insert(
            id.clone(),
            PageClient {
                id: id.clone(),
                url,
                controlled_by: None,
            },
        );
        id
    }

    /// Remove a page.
    pub fn disconnect(&mut self, id: &str) -> Option<PageClient> {
        self.clients.remove(id)
    }

    /// Get a page by id.
    pub fn get(&self, id: &str) -> Option<&PageClient> {
        self.clients.get(id)
    }

    /// Take control of every open page without a reload.
    pub fn claim(&mut self, worker: ServiceWorkerId) -> usize {
        for client in self.clients.values_mut() {
            client.controlled_by = Some(worker);
        }
        self.clients.len()
    }

    /// Number of open pages.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no pages are open.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

// ==================== Messages ====================

/// Version reply delivered over a `GET_VERSION` reply port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionReply {
    /// The live worker's version tag.
    pub version: String,
}

/// Page → worker messages.
#[derive(Debug)]
pub enum ClientMessage {
    /// Force a waiting worker to activate immediately.
    SkipWaiting,
    /// Ask the live worker which generation it serves; the reply comes back
    /// over the provided port.
    GetVersion { reply: oneshot::Sender<VersionReply> },
}

/// Worker lifecycle events observed by the page.
#[derive(Debug, Clone)]
pub enum SwEvent {
    /// A worker changed state.
    StateChange {
        scope: String,
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
    },
    /// A new worker version started installing.
    UpdateFound { scope: String },
    /// A different worker took control of open pages.
    ControllerChange { scope: String },
}

// ==================== Engine ====================

/// The worker-context logic for one version generation.
///
/// Holds no mutable state of its own; everything it needs across events
/// lives in the shared cache storage, since the platform may tear the
/// worker down between events.
pub struct ServiceWorkerEngine {
    version: VersionTags,
    origin: Url,
    shell_manifest: Vec<String>,
    caches: Arc<RwLock<CacheStorage>>,
    network: Arc<dyn Network>,
}

impl ServiceWorkerEngine {
    /// Create an engine for a worker.
    pub fn new(
        version: VersionTags,
        origin: Url,
        shell_manifest: Vec<String>,
        caches: Arc<RwLock<CacheStorage>>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            version,
            origin,
            shell_manifest,
            caches,
            network,
        }
    }

    /// The version generation this engine serves.
    pub fn version(&self) -> &VersionTags {
        &self.version
    }

    /// Install: pre-populate the static cache with the shell manifest.
    ///
    /// Any failed shell fetch fails the whole install, leaving the previous
    /// generation in charge.
    pub async fn install(&self) -> Result<(), SwError> {
        info!(version = %self.version.tag(), "service worker installing");
        let static_cache = self.version.static_cache();
        let now = epoch_ms();

        let mut fetched = Vec::with_capacity(self.shell_manifest.len());
        for path in &self.shell_manifest {
            let url = self
                .origin
                .join(path)
                .map_err(|e| SwError::Network(format!("bad shell URL {path}: {e}")))?;
            let request = FetchRequest::get(url.clone());
            let response = self.network.fetch(&request)?;
            fetched.push((url, response));
        }

        let mut caches = self.caches.write().await;
        let cache = caches.open(&static_cache);
        for (url, response) in fetched {
            cache.put(url.as_str(), response.to_cached(url.as_str(), now));
        }
        debug!(cache = %static_cache, entries = cache.len(), "shell cached");
        Ok(())
    }

    /// Activate: delete every cache from another generation.
    ///
    /// This is the authoritative eviction for version rollover, independent
    /// of the page-side age-based monitor.
    pub async fn activate(&self) -> Vec<String> {
        info!(version = %self.version.tag(), "service worker activating");
        let mut caches = self.caches.write().await;
        let stale: Vec<String> = caches
            .keys()
            .into_iter()
            .filter(|name| !self.version.owns(name))
            .collect();
        for name in &stale {
            info!(cache = %name, "deleting old cache");
            caches.delete(name);
        }
        stale
    }

    /// Route a fetch. `None` means the request is not intercepted and goes
    /// straight to the network (non-GET or cross-origin).
    pub async fn handle_fetch(
        &self,
        request: &FetchRequest,
    ) -> Option<Result<FetchResponse, SwError>> {
        if !request.is_get() {
            return None;
        }
        if request.url.origin() != self.origin.origin() {
            return None;
        }

        if request.accepts_html() {
            Some(self.network_first(request).await)
        } else {
            Some(self.cache_first(request).await)
        }
    }

    /// Network-first: HTML must reflect the latest deployment; the cache is
    /// only a fallback when the network is down.
    async fn network_first(&self, request: &FetchRequest) -> Result<FetchResponse, SwError> {
        match self.network.fetch(request) {
            Ok(response) => {
                self.store_dynamic(request.url.as_str(), &response).await;
                Ok(response)
            }
            Err(network_err) => {
                let caches = self.caches.read().await;
                match caches.match_url(request.url.as_str()) {
                    Some(entry) => {
                        debug!(url = %request.url, "network failed, serving cached document");
                        Ok(FetchResponse::from_cached(entry))
                    }
                    None => Err(network_err),
                }
            }
        }
    }

    /// Cache-first: static assets are content-hashed or low-churn, so a
    /// cached copy wins; misses repopulate the dynamic cache.
    async fn cache_first(&self, request: &FetchRequest) -> Result<FetchResponse, SwError> {
        {
            let caches = self.caches.read().await;
            if let Some(entry) = caches.match_url(request.url.as_str()) {
                return Ok(FetchResponse::from_cached(entry));
            }
        }

        let response = self.network.fetch(request)?;
        if response.status == 200 {
            self.store_dynamic(request.url.as_str(), &response).await;
        }
        Ok(response)
    }

    async fn store_dynamic(&self, url: &str, response: &FetchResponse) {
        let mut caches = self.caches.write().await;
        caches
            .open(&self.version.dynamic_cache())
            .put(url, response.to_cached(url, epoch_ms()));
    }
}

// ==================== Registration ====================

/// A registration: the installing/waiting/active worker slots for a scope.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Worker currently installing.
    pub installing: Option<ServiceWorker>,

    /// Worker installed and waiting to activate.
    pub waiting: Option<ServiceWorker>,

    /// Worker currently active.
    pub active: Option<ServiceWorker>,

    /// Last time an update check ran.
    pub last_update_check: Option<Instant>,
}

impl ServiceWorkerRegistration {
    /// Create an empty registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
            last_update_check: None,
        }
    }

    /// The newest worker version known to this registration.
    pub fn newest_version(&self) -> Option<&VersionTags> {
        self.installing
            .as_ref()
            .or(self.waiting.as_ref())
            .or(self.active.as_ref())
            .map(|w| &w.version)
    }

    /// Whether an installed worker is waiting.
    pub fn has_waiting(&self) -> bool {
        self.waiting.is_some()
    }

    /// Whether a waiting worker coexists with an active one: the
    /// "update available" condition.
    pub fn update_available(&self) -> bool {
        self.waiting.is_some() && self.active.is_some()
    }

    /// Retire every worker slot.
    pub fn retire_all(&mut self) {
        for slot in [&mut self.installing, &mut self.waiting, &mut self.active] {
            if let Some(mut worker) = slot.take() {
                worker.retire();
            }
        }
    }
}

// ==================== Host ====================

/// The deployed worker script as served from the origin.
///
/// The script path must be served non-cacheable so browsers always see the
/// latest revision.
#[derive(Debug, Clone)]
pub struct Deployment {
    /// Version generation currently published.
    pub version: VersionTags,

    /// Shell URLs the worker caches at install.
    pub shell_manifest: Vec<String>,
}

/// Container coordinating registrations, workers, clients, and caches.
pub struct ServiceWorkerHost {
    origin: Url,
    script_path: String,
    deployed: RwLock<Deployment>,
    registrations: RwLock<HashMap<String, ServiceWorkerRegistration>>,
    clients: RwLock<Clients>,
    caches: Arc<RwLock<CacheStorage>>,
    network: Arc<dyn Network>,
    event_tx: mpsc::UnboundedSender<SwEvent>,
}

impl ServiceWorkerHost {
    /// Create a host for one origin.
    pub fn new(
        origin: Url,
        script_path: &str,
        deployment: Deployment,
        caches: Arc<RwLock<CacheStorage>>,
        network: Arc<dyn Network>,
    ) -> (Self, mpsc::UnboundedReceiver<SwEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                origin,
                script_path: script_path.to_string(),
                deployed: RwLock::new(deployment),
                registrations: RwLock::new(HashMap::new()),
                clients: RwLock::new(Clients::new()),
                caches,
                network,
                event_tx,
            },
            event_rx,
        )
    }

    /// The origin this host serves.
    pub fn origin(&self) -> &Url {
        &self.origin
    }

    /// Shared cache storage.
    pub fn caches(&self) -> Arc<RwLock<CacheStorage>> {
        Arc::clone(&self.caches)
    }

    fn scope_key(&self) -> String {
        self.origin.to_string()
    }

    fn engine(&self, worker: &ServiceWorker) -> ServiceWorkerEngine {
        ServiceWorkerEngine::new(
            worker.version.clone(),
            self.origin.clone(),
            worker.shell_manifest.clone(),
            Arc::clone(&self.caches),
            Arc::clone(&self.network),
        )
    }

    /// Publish a new revision of the worker script.
    pub async fn deploy(&self, deployment: Deployment) {
        info!(version = %deployment.version.tag(), "new worker revision deployed");
        *self.deployed.write().await = deployment;
    }

    /// Register the worker for this origin and run an initial update check.
    pub async fn register(&self) -> Result<(), SwError> {
        let scope = self.scope_key();
        {
            let mut registrations = self.registrations.write().await;
            registrations
                .entry(scope.clone())
                .or_insert_with(|| ServiceWorkerRegistration::new(self.origin.clone()));
        }
        info!(scope = %scope, "service worker registered");
        self.update().await.map(|_| ())
    }

    /// Check the deployed script against the registration and install a new
    /// worker if the revision changed. Returns whether an install ran.
    pub async fn update(&self) -> Result<bool, SwError> {
        let scope = self.scope_key();
        let deployment = self.deployed.read().await.clone();

        let worker = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(&scope)
                .ok_or_else(|| SwError::NotFound(scope.clone()))?;
            registration.last_update_check = Some(Instant::now());

            if registration.newest_version() == Some(&deployment.version) {
                return Ok(false);
            }

            let script_url = self
                .origin
                .join(&self.script_path)
                .map_err(|e| SwError::RegistrationFailed(e.to_string()))?;
            let mut worker = ServiceWorker::new(
                script_url,
                deployment.version.clone(),
                deployment.shell_manifest.clone(),
            );
            worker.transition(ServiceWorkerState::Installing)?;
            let snapshot = worker.clone();
            registration.installing = Some(worker);
            snapshot
        };

        let _ = self.event_tx.send(SwEvent::UpdateFound {
            scope: scope.clone(),
        });

        // Install outside the registration lock; only the cache storage is
        // touched here.
        let install_result = self.engine(&worker).install().await;

        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .get_mut(&scope)
            .ok_or_else(|| SwError::NotFound(scope.clone()))?;

        match install_result {
            Ok(()) => {
                if let Some(mut installed) = registration.installing.take() {
                    installed.transition(ServiceWorkerState::Installed)?;
                    self.emit_state(&scope, &installed);
                    if let Some(previous) = registration.waiting.replace(installed) {
                        let mut previous = previous;
                        previous.retire();
                        self.emit_state(&scope, &previous);
                    }
                }
                drop(registrations);

                // A fresh install always supersedes its predecessor
                // (skip-waiting semantics); with no active worker it simply
                // becomes the first controller.
                let first_install = {
                    let registrations = self.registrations.read().await;
                    registrations
                        .get(&scope)
                        .map(|r| r.active.is_none())
                        .unwrap_or(false)
                };
                if first_install {
                    self.activate_waiting().await?;
                }
                Ok(true)
            }
            Err(e) => {
                warn!(scope = %scope, "service worker install failed: {e}");
                if let Some(mut failed) = registration.installing.take() {
                    failed.retire();
                    self.emit_state(&scope, &failed);
                }
                Err(e)
            }
        }
    }

    /// Activate the waiting worker: sweep stale caches, then claim clients.
    ///
    /// Both steps complete before the worker is reported activated, so an
    /// activated worker never serves against an unvalidated cache set.
    pub async fn activate_waiting(&self) -> Result<(), SwError> {
        let scope = self.scope_key();

        let worker = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(&scope)
                .ok_or_else(|| SwError::NotFound(scope.clone()))?;
            let Some(mut worker) = registration.waiting.take() else {
                return Ok(());
            };
            worker.transition(ServiceWorkerState::Activating)?;
            if let Some(mut old) = registration.active.take() {
                old.retire();
                self.emit_state(&scope, &old);
            }
            let snapshot = worker.clone();
            registration.active = Some(worker);
            snapshot
        };
        self.emit_state(&scope, &worker);

        self.engine(&worker).activate().await;
        let claimed = self.clients.write().await.claim(worker.id);
        debug!(scope = %scope, claimed, "clients claimed");

        let mut registrations = self.registrations.write().await;
        if let Some(registration) = registrations.get_mut(&scope) {
            if let Some(active) = registration.active.as_mut() {
                active.transition(ServiceWorkerState::Activated)?;
                let snapshot = active.clone();
                self.emit_state(&scope, &snapshot);
            }
        }
        let _ = self.event_tx.send(SwEvent::ControllerChange { scope });
        Ok(())
    }

    /// Deliver a page → worker message.
    pub async fn post_message(&self, message: ClientMessage) -> Result<(), SwError> {
        match message {
            ClientMessage::SkipWaiting => self.activate_waiting().await,
            ClientMessage::GetVersion { reply } => {
                let scope = self.scope_key();
                let registrations = self.registrations.read().await;
                let registration = registrations
                    .get(&scope)
                    .ok_or_else(|| SwError::NotFound(scope))?;
                let version = registration
                    .active
                    .as_ref()
                    .map(|w| w.version.tag())
                    .ok_or_else(|| SwError::State("no active worker".to_string()))?;
                let _ = reply.send(VersionReply { version });
                Ok(())
            }
        }
    }

    /// Route a fetch through the active worker. `None` when no worker
    /// controls the origin or the request is passed through.
    pub async fn handle_fetch(
        &self,
        request: &FetchRequest,
    ) -> Option<Result<FetchResponse, SwError>> {
        let worker = {
            let registrations = self.registrations.read().await;
            let registration = registrations.get(&self.scope_key())?;
            registration.active.as_ref()?.clone()
        };
        self.engine(&worker).handle_fetch(request).await
    }

    /// Whether an update is available: a waiting worker while another is
    /// already controlling the page.
    pub async fn update_available(&self) -> bool {
        let registrations = self.registrations.read().await;
        registrations
            .get(&self.scope_key())
            .map(|r| r.update_available())
            .unwrap_or(false)
    }

    /// The waiting worker's id, if any.
    pub async fn waiting_worker(&self) -> Option<ServiceWorkerId> {
        let registrations = self.registrations.read().await;
        registrations
            .get(&self.scope_key())
            .and_then(|r| r.waiting.as_ref())
            .map(|w| w.id)
    }

    /// The active worker's version tag, if any.
    pub async fn active_version(&self) -> Option<VersionTags> {
        let registrations = self.registrations.read().await;
        registrations
            .get(&self.scope_key())
            .and_then(|r| r.active.as_ref())
            .map(|w| w.version.clone())
    }

    /// Register an open page client.
    pub async fn connect_client(&self, url: Url) -> String {
        self.clients.write().await.connect(url)
    }

    /// Whether the given client is controlled by the active worker.
    pub async fn is_controlled(&self, client_id: &str) -> bool {
        let clients = self.clients.read().await;
        clients
            .get(client_id)
            .and_then(|c| c.controlled_by)
            .is_some()
    }

    /// Unregister this origin's registration.
    pub async fn unregister(&self) -> bool {
        let scope = self.scope_key();
        let mut registrations = self.registrations.write().await;
        match registrations.remove(&scope) {
            Some(mut registration) => {
                registration.retire_all();
                info!(scope = %scope, "service worker unregistered");
                true
            }
            None => false,
        }
    }

    /// Unregister everything. Returns the number of registrations removed.
    pub async fn unregister_all(&self) -> usize {
        let mut registrations = self.registrations.write().await;
        let count = registrations.len();
        for (_, mut registration) in registrations.drain() {
            registration.retire_all();
        }
        count
    }

    /// Scopes with a live registration.
    pub async fn registrations(&self) -> Vec<String> {
        self.registrations.read().await.keys().cloned().collect()
    }

    fn emit_state(&self, scope: &str, worker: &ServiceWorker) {
        let _ = self.event_tx.send(SwEvent::StateChange {
            scope: scope.to_string(),
            worker_id: worker.id,
            state: worker.state,
        });
    }
}
