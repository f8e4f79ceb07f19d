//! New-version detection and rollout.
//!
//! Watches the registration for a waiting worker and drives the configured
//! rollout strategy: prompt the user, schedule an automatic apply, or apply
//! near-immediately. Applying an update promotes the waiting worker, clears
//! caches, and asks the page to reload.

use pwakit_common::epoch_ms;
use pwakit_config::{UpdateConfig, UpdateStrategy};
use pwakit_sw::ClientMessage;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::manager::CacheManager;
use crate::{PageAction, PageEvent};

/// Fixed apply delay for the aggressive strategy.
const AGGRESSIVE_DELAY_MS: u64 = 1000;

/// Where the manager is in the rollout of a detected update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    /// No update in flight.
    Idle,
    /// Waiting for the user to accept or dismiss.
    Prompting,
    /// Apply timer armed.
    AutoCountdown,
    /// SKIP_WAITING sent, reload pending.
    Applying,
}

/// Snapshot of the update manager's state.
#[derive(Debug, Clone)]
pub struct UpdateStatus {
    pub phase: UpdatePhase,
    pub update_available: bool,
    pub dismissed: bool,
    pub online: bool,
    /// Last completed check (ms since epoch; 0 if none).
    pub last_update_check: u64,
    pub strategy: UpdateStrategy,
}

struct UpdateState {
    phase: UpdatePhase,
    update_available: bool,
    dismissed: bool,
    online: bool,
    last_update_check: u64,
    prompts_shown: u32,
}

/// Drives the page-side update lifecycle against the worker host.
pub struct UpdateManager {
    manager: Arc<CacheManager>,
    config: UpdateConfig,
    state: RwLock<UpdateState>,
    events: broadcast::Sender<PageEvent>,
    actions: mpsc::UnboundedSender<PageAction>,
    apply_timer: StdMutex<Option<JoinHandle<()>>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl UpdateManager {
    pub fn new(
        manager: Arc<CacheManager>,
        config: UpdateConfig,
        events: broadcast::Sender<PageEvent>,
        actions: mpsc::UnboundedSender<PageAction>,
    ) -> Self {
        Self {
            manager,
            config,
            state: RwLock::new(UpdateState {
                phase: UpdatePhase::Idle,
                update_available: false,
                dismissed: false,
                online: true,
                last_update_check: 0,
                prompts_shown: 0,
            }),
            events,
            actions,
            apply_timer: StdMutex::new(None),
            tasks: StdMutex::new(Vec::new()),
        }
    }

    /// Start periodic and event-driven update checks, plus an immediate one.
    pub async fn start(self: &Arc<Self>) {
        if self.config.strategy.is_disabled() {
            info!("update checks disabled by config");
            return;
        }
        info!(
            strategy = self.config.strategy.label(),
            check_interval = self.config.check_interval,
            "update manager started"
        );

        let mut tasks = Vec::new();

        {
            let updates = Arc::clone(self);
            let check_on_focus = self.config.check_on_focus;
            let check_on_reconnect = self.config.check_on_reconnect;
            let mut rx = self.events.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(PageEvent::Online) => {
                            updates.state.write().await.online = true;
                            if check_on_reconnect {
                                debug!("back online, checking for updates");
                                updates.check_for_updates().await;
                            }
                        }
                        Ok(PageEvent::Offline) => {
                            updates.state.write().await.online = false;
                        }
                        Ok(PageEvent::Focus) if check_on_focus => {
                            debug!("window focused, checking for updates");
                            updates.check_for_updates().await;
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

        if self.config.check_interval > 0 {
            let updates = Arc::clone(self);
            let period = Duration::from_millis(self.config.check_interval);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await;
                loop {
                    interval.tick().await;
                    updates.check_for_updates().await;
                }
            }));
        }

        if let Ok(mut slot) = self.tasks.lock() {
            slot.extend(tasks);
        }

        self.check_for_updates().await;
    }

    /// Stop all background checks and cancel a pending apply.
    pub async fn stop(&self) {
        self.cancel_apply_timer();
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        info!("update manager stopped");
    }

    /// Ask the host to re-evaluate the deployed version. Returns whether a
    /// new worker is now waiting.
    pub async fn check_for_updates(self: &Arc<Self>) -> bool {
        if self.config.strategy.is_disabled() {
            return false;
        }
        match self.manager.host().update().await {
            Ok(_) => {}
            Err(err) => {
                warn!(%err, "update check failed");
                self.state.write().await.last_update_check = epoch_ms();
                return false;
            }
        }
        self.state.write().await.last_update_check = epoch_ms();

        let available = self.manager.host().update_available().await;
        if available {
            self.handle_update_found().await;
        }
        available
    }

    async fn handle_update_found(self: &Arc<Self>) {
        let notify = {
            let mut state = self.state.write().await;
            // A rollout is already in progress; don't restart timers or
            // re-prompt for the same (or a newer) waiting worker.
            if state.phase != UpdatePhase::Idle {
                return;
            }
            state.update_available = true;
            state.dismissed = false;
            match self.config.strategy {
                UpdateStrategy::Prompt => {
                    if state.prompts_shown >= self.config.max_prompts_per_session {
                        info!("update prompt budget exhausted for this session");
                        return;
                    }
                    state.prompts_shown += 1;
                    state.phase = UpdatePhase::Prompting;
                    info!("update available, prompting user");
                    true
                }
                UpdateStrategy::Auto => {
                    state.phase = UpdatePhase::AutoCountdown;
                    info!(
                        delay_ms = self.config.auto_update_delay,
                        "update available, applying after delay"
                    );
                    self.arm_apply_timer(self.config.auto_update_delay);
                    true
                }
                UpdateStrategy::Aggressive => {
                    state.phase = UpdatePhase::AutoCountdown;
                    info!("update available, applying immediately");
                    self.arm_apply_timer(AGGRESSIVE_DELAY_MS);
                    false
                }
                UpdateStrategy::Disabled => return,
            }
        };

        if notify && self.config.show_notifications {
            let _ = self.actions.send(PageAction::Notify {
                title: "Update Available".to_string(),
                body: "A new version is ready to install".to_string(),
            });
        }
    }

    fn arm_apply_timer(self: &Arc<Self>, delay_ms: u64) {
        let updates = Arc::clone(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            // Hand the slot back before applying. The apply path cancels any
            // pending timer, and it must never abort the task running it.
            if let Ok(mut slot) = updates.apply_timer.lock() {
                slot.take();
            }
            updates.apply_update().await;
        });
        if let Ok(mut slot) = self.apply_timer.lock() {
            if let Some(old) = slot.replace(handle) {
                old.abort();
            }
        }
    }

    fn cancel_apply_timer(&self) {
        if let Ok(mut slot) = self.apply_timer.lock() {
            if let Some(timer) = slot.take() {
                timer.abort();
            }
        }
    }

    /// Promote the waiting worker and reload the page.
    ///
    /// Failures degrade to a bare reload so the page never ends up stuck
    /// behind a half-applied update.
    pub async fn apply_update(&self) {
        {
            let mut state = self.state.write().await;
            if state.phase == UpdatePhase::Applying {
                return;
            }
            state.phase = UpdatePhase::Applying;
        }
        self.cancel_apply_timer();
        info!("applying update");

        let result = self.manager.host().post_message(ClientMessage::SkipWaiting).await;
        match result {
            Ok(()) => {
                if self.config.clear_caches_on_update {
                    self.manager.clear_all_caches().await;
                }
                if self.config.force_reload_after_update {
                    let _ = self.actions.send(PageAction::Reload);
                }
            }
            Err(err) => {
                warn!(%err, "update apply failed, reloading anyway");
                let _ = self.actions.send(PageAction::Reload);
            }
        }

        let mut state = self.state.write().await;
        state.phase = UpdatePhase::Idle;
        state.update_available = false;
    }

    /// User declined the prompt; the waiting worker stays put until the
    /// next detection or page load.
    pub async fn dismiss(&self) {
        self.cancel_apply_timer();
        let mut state = self.state.write().await;
        state.phase = UpdatePhase::Idle;
        state.dismissed = true;
        info!("update dismissed");
    }

    pub async fn status(&self) -> UpdateStatus {
        let state = self.state.read().await;
        UpdateStatus {
            phase: state.phase,
            update_available: state.update_available,
            dismissed: state.dismissed,
            online: state.online,
            last_update_check: state.last_update_check,
            strategy: self.config.strategy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{deployment, harness, manager, Harness};
    use pwakit_config::UpdateConfig;

    fn updates_with(h: &Harness, config: UpdateConfig) -> Arc<UpdateManager> {
        Arc::new(UpdateManager::new(
            manager(h),
            config,
            h.events.clone(),
            h.actions_tx.clone(),
        ))
    }

    async fn install_v1(h: &Harness) {
        h.host.deploy(deployment("v1")).await;
        h.host.register().await.unwrap();
    }

    fn prompt_config() -> UpdateConfig {
        UpdateConfig {
            strategy: UpdateStrategy::Prompt,
            check_interval: 0,
            ..UpdateConfig::development()
        }
    }

    #[tokio::test]
    async fn test_check_detects_waiting_worker() {
        let mut h = harness();
        install_v1(&h).await;
        let updates = updates_with(&h, prompt_config());

        assert!(!updates.check_for_updates().await);

        h.host.deploy(deployment("v2")).await;
        assert!(updates.check_for_updates().await);

        let status = updates.status().await;
        assert_eq!(status.phase, UpdatePhase::Prompting);
        assert!(status.update_available);
        assert!(matches!(
            h.actions.try_recv().unwrap(),
            PageAction::Notify { .. }
        ));
    }

    #[tokio::test]
    async fn test_apply_activates_and_reloads() {
        let mut h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let updates = updates_with(&h, prompt_config());
        updates.check_for_updates().await;

        updates.apply_update().await;

        assert_eq!(h.host.active_version().await.unwrap().tag(), "app-v2");
        // Cache clear happened before the reload request.
        assert!(h.storage.read().await.is_empty());
        let mut saw_reload = false;
        while let Ok(action) = h.actions.try_recv() {
            if action == PageAction::Reload {
                saw_reload = true;
            }
        }
        assert!(saw_reload);
        assert_eq!(updates.status().await.phase, UpdatePhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aggressive_applies_within_a_second() {
        let mut h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            strategy: UpdateStrategy::Aggressive,
            check_interval: 0,
            ..UpdateConfig::development()
        };
        let updates = updates_with(&h, config);

        updates.check_for_updates().await;
        assert_eq!(updates.status().await.phase, UpdatePhase::AutoCountdown);

        tokio::time::sleep(Duration::from_millis(AGGRESSIVE_DELAY_MS + 100)).await;

        assert_eq!(h.host.active_version().await.unwrap().tag(), "app-v2");
        let mut saw_reload = false;
        while let Ok(action) = h.actions.try_recv() {
            if action == PageAction::Reload {
                saw_reload = true;
            }
        }
        assert!(saw_reload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_apply_survives_storage_contention() {
        let mut h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            strategy: UpdateStrategy::Auto,
            check_interval: 0,
            auto_update_delay: 100,
            show_notifications: false,
            ..UpdateConfig::development()
        };
        let updates = updates_with(&h, config);
        updates.check_for_updates().await;
        assert_eq!(updates.status().await.phase, UpdatePhase::AutoCountdown);

        // Hold the cache storage across the timer firing so the apply
        // sequence blocks mid-handshake on activation's cache sweep.
        let guard = h.storage.read().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(guard);

        // The blocked apply must resume and run to completion.
        for _ in 0..50 {
            if updates.status().await.phase == UpdatePhase::Idle {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(updates.status().await.phase, UpdatePhase::Idle);
        assert_eq!(h.host.active_version().await.unwrap().tag(), "app-v2");
        let mut saw_reload = false;
        while let Ok(action) = h.actions.try_recv() {
            if action == PageAction::Reload {
                saw_reload = true;
            }
        }
        assert!(saw_reload);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dismiss_cancels_auto_countdown() {
        let mut h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            strategy: UpdateStrategy::Auto,
            check_interval: 0,
            auto_update_delay: 10_000,
            show_notifications: false,
            ..UpdateConfig::development()
        };
        let updates = updates_with(&h, config);

        updates.check_for_updates().await;
        assert_eq!(updates.status().await.phase, UpdatePhase::AutoCountdown);
        updates.dismiss().await;

        tokio::time::sleep(Duration::from_millis(20_000)).await;

        // Still on v1, no reload requested.
        assert_eq!(h.host.active_version().await.unwrap().tag(), "app-v1");
        assert!(h.host.update_available().await);
        assert!(h.actions.try_recv().is_err());
        assert!(updates.status().await.dismissed);
    }

    #[tokio::test]
    async fn test_disabled_strategy_never_detects() {
        let h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            strategy: UpdateStrategy::Disabled,
            ..UpdateConfig::development()
        };
        let updates = updates_with(&h, config);

        assert!(!updates.check_for_updates().await);
        assert_eq!(updates.status().await.phase, UpdatePhase::Idle);
        assert_eq!(updates.status().await.last_update_check, 0);
    }

    #[tokio::test]
    async fn test_prompt_budget_exhaustion() {
        let h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            max_prompts_per_session: 1,
            show_notifications: false,
            ..prompt_config()
        };
        let updates = updates_with(&h, config);

        updates.check_for_updates().await;
        assert_eq!(updates.status().await.phase, UpdatePhase::Prompting);
        updates.dismiss().await;

        // Budget spent: further detections stay quiet.
        updates.check_for_updates().await;
        assert_eq!(updates.status().await.phase, UpdatePhase::Idle);
    }

    #[tokio::test]
    async fn test_rollout_in_progress_is_not_restarted() {
        let h = harness();
        install_v1(&h).await;
        h.host.deploy(deployment("v2")).await;
        let config = UpdateConfig {
            show_notifications: false,
            ..prompt_config()
        };
        let updates = updates_with(&h, config);

        updates.check_for_updates().await;
        updates.check_for_updates().await;

        // Only one prompt consumed despite two detections.
        assert_eq!(updates.state.read().await.prompts_shown, 1);
    }

    #[tokio::test]
    async fn test_offline_online_tracking() {
        let h = harness();
        install_v1(&h).await;
        let config = UpdateConfig {
            check_on_reconnect: true,
            check_interval: 0,
            ..prompt_config()
        };
        let updates = updates_with(&h, config);
        updates.start().await;

        h.events.send(PageEvent::Offline).unwrap();
        tokio::task::yield_now().await;
        for _ in 0..10 {
            if !updates.status().await.online {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!updates.status().await.online);

        h.events.send(PageEvent::Online).unwrap();
        for _ in 0..10 {
            if updates.status().await.online {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(updates.status().await.online);
        updates.stop().await;
    }
}
