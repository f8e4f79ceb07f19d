//! Periodic cache-age enforcement.
//!
//! The monitor is a long-lived object constructed once by the composition
//! root. While running it checks on a timer and on page events (focus,
//! visibility), throttled so event storms cannot trigger redundant work.

use pwakit_common::epoch_ms;
use pwakit_config::{CacheConfig, CacheConfigOverride};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::CacheManager;
use crate::{PageAction, PageEvent};

/// Minimum time between checks, regardless of trigger source.
const CHECK_THROTTLE_MS: u64 = 30_000;

/// Snapshot of the monitor's current state.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    /// Whether the monitor loop is running.
    pub monitoring: bool,
    /// Effective config.
    pub config: CacheConfig,
    /// Time of the last completed check (ms since epoch; 0 if none).
    pub last_check: u64,
    /// Expected time of the next timer-driven check, if armed.
    pub next_check: Option<u64>,
}

struct MonitorState {
    config: CacheConfig,
    last_check: u64,
    monitoring: bool,
}

/// Age-based cache eviction policy loop.
pub struct CacheMonitor {
    manager: Arc<CacheManager>,
    state: RwLock<MonitorState>,
    events: broadcast::Sender<PageEvent>,
    actions: mpsc::UnboundedSender<PageAction>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl CacheMonitor {
    /// Create a stopped monitor with the given policy.
    pub fn new(
        manager: Arc<CacheManager>,
        config: CacheConfig,
        events: broadcast::Sender<PageEvent>,
        actions: mpsc::UnboundedSender<PageAction>,
    ) -> Self {
        Self {
            manager,
            state: RwLock::new(MonitorState {
                config,
                last_check: 0,
                monitoring: false,
            }),
            events,
            actions,
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Start monitoring: arm the timer and event listeners, then run an
    /// immediate check.
    pub async fn start(self: &Arc<Self>) {
        let config = {
            let mut state = self.state.write().await;
            if !state.config.enable_auto_monitoring {
                info!("cache monitoring disabled by config");
                return;
            }
            if state.monitoring {
                info!("cache monitoring already running");
                return;
            }
            state.monitoring = true;
            state.config.clone()
        };

        info!(
            max_cache_age = config.max_cache_age,
            check_interval = config.check_interval,
            auto_clear = config.auto_clear_old_caches,
            "cache monitor started"
        );

        let mut tasks = Vec::new();

        if config.check_interval > 0 {
            let monitor = Arc::clone(self);
            let period = Duration::from_millis(config.check_interval);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                // The first tick completes immediately; the initial check
                // below covers it.
                interval.tick().await;
                loop {
                    interval.tick().await;
                    monitor.check_and_clear_old_caches().await;
                }
            }));
        }

        if config.clear_on_focus || config.clear_on_visibility_change {
            let monitor = Arc::clone(self);
            let mut rx = self.events.subscribe();
            let on_focus = config.clear_on_focus;
            let on_visibility = config.clear_on_visibility_change;
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(PageEvent::Focus) if on_focus => {
                            debug!("window focused, checking for old caches");
                            monitor.check_and_clear_old_caches().await;
                        }
                        Ok(PageEvent::VisibilityChange { hidden: false }) if on_visibility => {
                            debug!("page became visible, checking for old caches");
                            monitor.check_and_clear_old_caches().await;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "page event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        if let Ok(mut slot) = self.tasks.lock() {
            slot.extend(tasks);
        }

        self.check_and_clear_old_caches().await;
    }

    /// Stop monitoring and disarm all timers and listeners.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().await;
            if !state.monitoring {
                return;
            }
            state.monitoring = false;
        }
        info!("cache monitor stopped");
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }

    /// Run one check cycle now.
    pub async fn check_and_clear_old_caches(&self) {
        self.check_at(epoch_ms()).await;
    }

    pub(crate) async fn check_at(&self, now: u64) {
        let config = {
            let mut state = self.state.write().await;
            // Throttle: event storms and overlapping triggers collapse into
            // one check per window.
            if now.saturating_sub(state.last_check) < CHECK_THROTTLE_MS {
                return;
            }
            state.last_check = now;
            state.config.clone()
        };

        let old_caches = self.manager.get_old_caches(config.max_cache_age).await;
        if old_caches.is_empty() {
            return;
        }

        let to_clear: Vec<String> = old_caches
            .into_iter()
            .filter(|name| !config.excluded_caches.contains(name))
            .collect();

        if to_clear.len() < config.min_caches_for_auto_clear {
            info!(
                found = to_clear.len(),
                minimum = config.min_caches_for_auto_clear,
                "old caches below auto-clear threshold"
            );
            return;
        }

        if config.auto_clear_old_caches {
            let mut cleared = Vec::with_capacity(to_clear.len());
            for name in &to_clear {
                if self.manager.clear_specific_cache(name).await {
                    cleared.push(name.clone());
                }
            }
            info!(count = cleared.len(), "old caches cleared");

            if !cleared.is_empty() && config.show_notifications {
                self.notify(format!("Cleared {} old cache(s)", cleared.len()));
            }
            if !cleared.is_empty() && config.force_reload_after_clear {
                info!("reloading page after cache clear");
                let _ = self.actions.send(PageAction::Reload);
            }
        } else {
            info!(caches = ?to_clear, "old caches detected, auto-clear disabled");
            if config.show_notifications {
                self.notify(format!("{} old cache(s) detected", to_clear.len()));
            }
        }
    }

    fn notify(&self, body: String) {
        let _ = self.actions.send(PageAction::Notify {
            title: "Cache Monitor".to_string(),
            body,
        });
    }

    /// Merge a config change; a running monitor restarts so timers and
    /// listeners re-arm under the new policy.
    pub async fn update_config(self: &Arc<Self>, over: &CacheConfigOverride) {
        let restart = {
            let mut state = self.state.write().await;
            state.config = state.config.clone().merged(over);
            state.monitoring
        };
        if restart {
            self.stop().await;
            self.start().await;
        }
    }

    /// Reset the throttle and check immediately.
    pub async fn trigger_check(&self) {
        info!("manually triggering cache check");
        self.state.write().await.last_check = 0;
        self.check_and_clear_old_caches().await;
    }

    /// Current status snapshot.
    pub async fn status(&self) -> MonitorStatus {
        let state = self.state.read().await;
        let next_check = (state.monitoring && state.config.check_interval > 0)
            .then(|| state.last_check + state.config.check_interval);
        MonitorStatus {
            monitoring: state.monitoring,
            config: state.config.clone(),
            last_check: state.last_check,
            next_check,
        }
    }
}
