//! # PwaKit Config
//!
//! Policy configuration for the cache monitor and the update manager.
//!
//! Configuration is pure data layered in a fixed order:
//!
//! ```text
//! environment baseline  (development | production)
//!     └── named preset  (optional, exhaustive enum)
//!             └── local override  (development only, persisted JSON)
//! ```
//!
//! Each layer is a shallow merge over the previous one. Overrides are kept
//! in the page-local store under `dev_cache_config` / `dev_update_config`
//! and are ignored outside development.

use pwakit_common::LocalStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Store key for the persisted cache config override.
pub const CACHE_CONFIG_KEY: &str = "dev_cache_config";

/// Store key for the persisted update config override.
pub const UPDATE_CONFIG_KEY: &str = "dev_update_config";

// ==================== Environment ====================

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    /// Whether local persisted overrides apply.
    pub fn allows_overrides(self) -> bool {
        self == Environment::Development
    }
}

// ==================== Cache config ====================

/// Policy for age-based cache monitoring and eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    /// Enable the automatic cache monitor.
    pub enable_auto_monitoring: bool,

    /// Maximum age before a cache is considered old (milliseconds).
    pub max_cache_age: u64,

    /// How often the monitor checks for old caches (milliseconds).
    pub check_interval: u64,

    /// Whether old caches are cleared automatically (vs. notify-only).
    pub auto_clear_old_caches: bool,

    /// Whether to surface notifications for monitor actions.
    pub show_notifications: bool,

    /// Whether to reload the page after caches were cleared.
    pub force_reload_after_clear: bool,

    /// Minimum number of clearable old caches before the monitor acts.
    pub min_caches_for_auto_clear: usize,

    /// Cache names the monitor must never clear.
    pub excluded_caches: Vec<String>,

    /// Run a check when the window regains focus.
    pub clear_on_focus: bool,

    /// Run a check when the page becomes visible again.
    pub clear_on_visibility_change: bool,
}

impl CacheConfig {
    /// Development baseline: short ages, frequent checks, aggressive.
    pub fn development() -> Self {
        Self {
            enable_auto_monitoring: true,
            max_cache_age: 2 * 60 * 60 * 1000,
            check_interval: 5 * 60 * 1000,
            auto_clear_old_caches: true,
            show_notifications: true,
            force_reload_after_clear: false,
            min_caches_for_auto_clear: 1,
            excluded_caches: Vec::new(),
            clear_on_focus: true,
            clear_on_visibility_change: false,
        }
    }

    /// Production baseline: long ages, infrequent checks, conservative.
    ///
    /// The composition root is expected to add the live static cache name to
    /// `excluded_caches` so version-current shell assets are never aged out.
    pub fn production() -> Self {
        Self {
            enable_auto_monitoring: false,
            max_cache_age: 24 * 60 * 60 * 1000,
            check_interval: 60 * 60 * 1000,
            auto_clear_old_caches: false,
            show_notifications: false,
            force_reload_after_clear: false,
            min_caches_for_auto_clear: 3,
            excluded_caches: Vec::new(),
            clear_on_focus: false,
            clear_on_visibility_change: false,
        }
    }

    /// Environment baseline.
    pub fn baseline(env: Environment) -> Self {
        match env {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
        }
    }

    /// Shallow-merge an override onto this config.
    pub fn merged(mut self, over: &CacheConfigOverride) -> Self {
        if let Some(v) = over.enable_auto_monitoring {
            self.enable_auto_monitoring = v;
        }
        if let Some(v) = over.max_cache_age {
            self.max_cache_age = v;
        }
        if let Some(v) = over.check_interval {
            self.check_interval = v;
        }
        if let Some(v) = over.auto_clear_old_caches {
            self.auto_clear_old_caches = v;
        }
        if let Some(v) = over.show_notifications {
            self.show_notifications = v;
        }
        if let Some(v) = over.force_reload_after_clear {
            self.force_reload_after_clear = v;
        }
        if let Some(v) = over.min_caches_for_auto_clear {
            self.min_caches_for_auto_clear = v;
        }
        if let Some(ref v) = over.excluded_caches {
            self.excluded_caches = v.clone();
        }
        if let Some(v) = over.clear_on_focus {
            self.clear_on_focus = v;
        }
        if let Some(v) = over.clear_on_visibility_change {
            self.clear_on_visibility_change = v;
        }
        self
    }
}

/// Partial [`CacheConfig`] used for presets and persisted overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfigOverride {
    pub enable_auto_monitoring: Option<bool>,
    pub max_cache_age: Option<u64>,
    pub check_interval: Option<u64>,
    pub auto_clear_old_caches: Option<bool>,
    pub show_notifications: Option<bool>,
    pub force_reload_after_clear: Option<bool>,
    pub min_caches_for_auto_clear: Option<usize>,
    pub excluded_caches: Option<Vec<String>>,
    pub clear_on_focus: Option<bool>,
    pub clear_on_visibility_change: Option<bool>,
}

/// Named cache-monitoring presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePreset {
    /// Very aggressive clearing, for active development.
    Aggressive,
    /// The development baseline.
    Moderate,
    /// Slow clearing, for testing.
    Conservative,
    /// No automatic clearing at all.
    Disabled,
}

impl CachePreset {
    /// The override this preset applies on top of a baseline.
    pub fn overrides(self) -> CacheConfigOverride {
        match self {
            CachePreset::Aggressive => CacheConfigOverride {
                max_cache_age: Some(30 * 60 * 1000),
                check_interval: Some(2 * 60 * 1000),
                auto_clear_old_caches: Some(true),
                clear_on_focus: Some(true),
                force_reload_after_clear: Some(true),
                ..Default::default()
            },
            CachePreset::Moderate => CacheConfigOverride::default(),
            CachePreset::Conservative => CacheConfigOverride {
                max_cache_age: Some(6 * 60 * 60 * 1000),
                check_interval: Some(30 * 60 * 1000),
                auto_clear_old_caches: Some(true),
                clear_on_focus: Some(false),
                force_reload_after_clear: Some(false),
                ..Default::default()
            },
            CachePreset::Disabled => CacheConfigOverride {
                enable_auto_monitoring: Some(false),
                auto_clear_old_caches: Some(false),
                clear_on_focus: Some(false),
                clear_on_visibility_change: Some(false),
                ..Default::default()
            },
        }
    }
}

// ==================== Update config ====================

/// Update negotiation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// The user decides when to apply an update.
    Prompt,
    /// Apply automatically after a fixed delay unless dismissed.
    Auto,
    /// Apply almost immediately, without user interaction.
    Aggressive,
    /// Never check for or apply updates.
    Disabled,
}

impl UpdateStrategy {
    /// Whether this strategy applies updates without a user decision.
    pub fn is_auto(self) -> bool {
        matches!(self, UpdateStrategy::Auto | UpdateStrategy::Aggressive)
    }

    /// Whether this strategy surfaces an update prompt.
    pub fn should_prompt(self) -> bool {
        matches!(self, UpdateStrategy::Prompt | UpdateStrategy::Auto)
    }

    /// Whether update handling is off entirely.
    pub fn is_disabled(self) -> bool {
        self == UpdateStrategy::Disabled
    }

    /// Human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            UpdateStrategy::Prompt => "User Controlled",
            UpdateStrategy::Auto => "Automatic",
            UpdateStrategy::Aggressive => "Immediate",
            UpdateStrategy::Disabled => "Disabled",
        }
    }
}

/// Policy for service-worker update negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfig {
    /// Update strategy.
    pub strategy: UpdateStrategy,

    /// How often to check for updates (milliseconds).
    pub check_interval: u64,

    /// Delay before an automatic apply under the auto strategy (milliseconds).
    pub auto_update_delay: u64,

    /// Whether to clear all caches while applying an update.
    pub clear_caches_on_update: bool,

    /// Whether to surface update notifications.
    pub show_notifications: bool,

    /// Check for updates when the window regains focus.
    pub check_on_focus: bool,

    /// Check for updates when the network reconnects.
    pub check_on_reconnect: bool,

    /// Maximum number of update prompts per session.
    pub max_prompts_per_session: u32,

    /// Whether to reload after a successfully applied update.
    pub force_reload_after_update: bool,
}

impl UpdateConfig {
    /// Development baseline.
    pub fn development() -> Self {
        Self {
            strategy: UpdateStrategy::Prompt,
            check_interval: 5 * 60 * 1000,
            auto_update_delay: 10 * 1000,
            clear_caches_on_update: true,
            show_notifications: true,
            check_on_focus: true,
            check_on_reconnect: true,
            max_prompts_per_session: 5,
            force_reload_after_update: true,
        }
    }

    /// Production baseline.
    pub fn production() -> Self {
        Self {
            strategy: UpdateStrategy::Prompt,
            check_interval: 30 * 60 * 1000,
            auto_update_delay: 30 * 1000,
            clear_caches_on_update: true,
            show_notifications: true,
            check_on_focus: false,
            check_on_reconnect: true,
            max_prompts_per_session: 2,
            force_reload_after_update: true,
        }
    }

    /// Environment baseline.
    pub fn baseline(env: Environment) -> Self {
        match env {
            Environment::Development => Self::development(),
            Environment::Production => Self::production(),
        }
    }

    /// Shallow-merge an override onto this config.
    pub fn merged(mut self, over: &UpdateConfigOverride) -> Self {
        if let Some(v) = over.strategy {
            self.strategy = v;
        }
        if let Some(v) = over.check_interval {
            self.check_interval = v;
        }
        if let Some(v) = over.auto_update_delay {
            self.auto_update_delay = v;
        }
        if let Some(v) = over.clear_caches_on_update {
            self.clear_caches_on_update = v;
        }
        if let Some(v) = over.show_notifications {
            self.show_notifications = v;
        }
        if let Some(v) = over.check_on_focus {
            self.check_on_focus = v;
        }
        if let Some(v) = over.check_on_reconnect {
            self.check_on_reconnect = v;
        }
        if let Some(v) = over.max_prompts_per_session {
            self.max_prompts_per_session = v;
        }
        if let Some(v) = over.force_reload_after_update {
            self.force_reload_after_update = v;
        }
        self
    }
}

/// Partial [`UpdateConfig`] used for presets and persisted overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateConfigOverride {
    pub strategy: Option<UpdateStrategy>,
    pub check_interval: Option<u64>,
    pub auto_update_delay: Option<u64>,
    pub clear_caches_on_update: Option<bool>,
    pub show_notifications: Option<bool>,
    pub check_on_focus: Option<bool>,
    pub check_on_reconnect: Option<bool>,
    pub max_prompts_per_session: Option<u32>,
    pub force_reload_after_update: Option<bool>,
}

/// Named update-strategy presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdatePreset {
    /// User controls all updates.
    Prompt,
    /// Automatic updates after a delay, with notification.
    Auto,
    /// Immediate updates, for critical deployments.
    Aggressive,
    /// No automatic updates.
    Disabled,
    /// Infrequent prompt-only checks for high-traffic production.
    Conservative,
}

impl UpdatePreset {
    /// The override this preset applies on top of a baseline.
    pub fn overrides(self) -> UpdateConfigOverride {
        match self {
            UpdatePreset::Prompt => UpdateConfigOverride {
                strategy: Some(UpdateStrategy::Prompt),
                check_interval: Some(30 * 60 * 1000),
                auto_update_delay: Some(0),
                show_notifications: Some(true),
                max_prompts_per_session: Some(3),
                ..Default::default()
            },
            UpdatePreset::Auto => UpdateConfigOverride {
                strategy: Some(UpdateStrategy::Auto),
                check_interval: Some(15 * 60 * 1000),
                auto_update_delay: Some(30 * 1000),
                show_notifications: Some(true),
                max_prompts_per_session: Some(2),
                ..Default::default()
            },
            UpdatePreset::Aggressive => UpdateConfigOverride {
                strategy: Some(UpdateStrategy::Aggressive),
                check_interval: Some(5 * 60 * 1000),
                auto_update_delay: Some(1000),
                show_notifications: Some(true),
                max_prompts_per_session: Some(1),
                ..Default::default()
            },
            UpdatePreset::Disabled => UpdateConfigOverride {
                strategy: Some(UpdateStrategy::Disabled),
                check_interval: Some(0),
                auto_update_delay: Some(0),
                show_notifications: Some(false),
                max_prompts_per_session: Some(0),
                ..Default::default()
            },
            UpdatePreset::Conservative => UpdateConfigOverride {
                strategy: Some(UpdateStrategy::Prompt),
                check_interval: Some(60 * 60 * 1000),
                auto_update_delay: Some(0),
                show_notifications: Some(true),
                max_prompts_per_session: Some(1),
                check_on_focus: Some(false),
                ..Default::default()
            },
        }
    }
}

// ==================== Loading and persistence ====================

fn load_override<T: serde::de::DeserializeOwned>(
    store: &dyn LocalStore,
    key: &str,
) -> Option<T> {
    let value = store.get(key)?;
    match serde_json::from_value(value) {
        Ok(over) => Some(over),
        Err(e) => {
            warn!("ignoring malformed config override at {key}: {e}");
            None
        }
    }
}

/// Effective cache config: environment baseline, shallow-merged with the
/// persisted local override when in development.
pub fn cache_config(env: Environment, store: &dyn LocalStore) -> CacheConfig {
    let base = CacheConfig::baseline(env);
    if !env.allows_overrides() {
        return base;
    }
    match load_override::<CacheConfigOverride>(store, CACHE_CONFIG_KEY) {
        Some(over) => base.merged(&over),
        None => base,
    }
}

/// Persist a cache config override (development only).
///
/// The stored record is the full effective config after the merge, so later
/// loads see one flat override rather than a chain.
pub fn save_cache_config(
    env: Environment,
    store: &dyn LocalStore,
    over: &CacheConfigOverride,
) {
    if !env.allows_overrides() {
        return;
    }
    let updated = cache_config(env, store).merged(over);
    match serde_json::to_value(&updated) {
        Ok(value) => {
            store.set(CACHE_CONFIG_KEY, value);
            info!("cache config override saved");
        }
        Err(e) => warn!("failed to serialize cache config override: {e}"),
    }
}

/// Apply a named cache preset as the persisted override (development only).
pub fn apply_cache_preset(env: Environment, store: &dyn LocalStore, preset: CachePreset) {
    save_cache_config(env, store, &preset.overrides());
}

/// Remove the persisted cache config override.
pub fn reset_cache_config(env: Environment, store: &dyn LocalStore) {
    if env.allows_overrides() {
        store.remove(CACHE_CONFIG_KEY);
        info!("cache config reset to defaults");
    }
}

/// Effective update config: environment baseline, then an optional explicit
/// preset, then the persisted local override when in development.
pub fn update_config(
    env: Environment,
    preset: Option<UpdatePreset>,
    store: &dyn LocalStore,
) -> UpdateConfig {
    let mut config = UpdateConfig::baseline(env);
    if let Some(preset) = preset {
        config = config.merged(&preset.overrides());
    }
    if !env.allows_overrides() {
        return config;
    }
    match load_override::<UpdateConfigOverride>(store, UPDATE_CONFIG_KEY) {
        Some(over) => config.merged(&over),
        None => config,
    }
}

/// Persist an update config override (development only).
pub fn save_update_config(
    env: Environment,
    store: &dyn LocalStore,
    over: &UpdateConfigOverride,
) {
    if !env.allows_overrides() {
        return;
    }
    let updated = update_config(env, None, store).merged(over);
    match serde_json::to_value(&updated) {
        Ok(value) => {
            store.set(UPDATE_CONFIG_KEY, value);
            info!("update config override saved");
        }
        Err(e) => warn!("failed to serialize update config override: {e}"),
    }
}

/// Apply a named update preset as the persisted override (development only).
pub fn apply_update_preset(env: Environment, store: &dyn LocalStore, preset: UpdatePreset) {
    save_update_config(env, store, &preset.overrides());
}

/// Remove the persisted update config override.
pub fn reset_update_config(env: Environment, store: &dyn LocalStore) {
    if env.allows_overrides() {
        store.remove(UPDATE_CONFIG_KEY);
        info!("update config reset to defaults");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pwakit_common::MemoryLocalStore;
    use serde_json::json;

    #[test]
    fn test_baselines_differ() {
        let dev = CacheConfig::development();
        let prod = CacheConfig::production();
        assert!(dev.enable_auto_monitoring);
        assert!(!prod.enable_auto_monitoring);
        assert!(dev.max_cache_age < prod.max_cache_age);
        assert_eq!(prod.min_caches_for_auto_clear, 3);
    }

    #[test]
    fn test_override_merge_is_shallow() {
        let base = CacheConfig::development();
        let over = CacheConfigOverride {
            max_cache_age: Some(1000),
            excluded_caches: Some(vec!["app-static-v2".to_string()]),
            ..Default::default()
        };
        let merged = base.clone().merged(&over);
        assert_eq!(merged.max_cache_age, 1000);
        assert_eq!(merged.excluded_caches, vec!["app-static-v2".to_string()]);
        // Untouched fields come from the baseline.
        assert_eq!(merged.check_interval, base.check_interval);
    }

    #[test]
    fn test_dev_local_override_applies() {
        let store = MemoryLocalStore::new();
        store.set(CACHE_CONFIG_KEY, json!({ "maxCacheAge": 12345 }));

        let config = cache_config(Environment::Development, &store);
        assert_eq!(config.max_cache_age, 12345);
    }

    #[test]
    fn test_prod_ignores_local_override() {
        let store = MemoryLocalStore::new();
        store.set(CACHE_CONFIG_KEY, json!({ "maxCacheAge": 12345 }));

        let config = cache_config(Environment::Production, &store);
        assert_eq!(config, CacheConfig::production());
    }

    #[test]
    fn test_malformed_override_is_ignored() {
        let store = MemoryLocalStore::new();
        store.set(CACHE_CONFIG_KEY, json!("not an object"));

        let config = cache_config(Environment::Development, &store);
        assert_eq!(config, CacheConfig::development());
    }

    #[test]
    fn test_apply_cache_preset_persists() {
        let store = MemoryLocalStore::new();
        apply_cache_preset(Environment::Development, &store, CachePreset::Aggressive);

        let config = cache_config(Environment::Development, &store);
        assert_eq!(config.max_cache_age, 30 * 60 * 1000);
        assert!(config.force_reload_after_clear);
    }

    #[test]
    fn test_preset_persistence_is_dev_only() {
        let store = MemoryLocalStore::new();
        apply_cache_preset(Environment::Production, &store, CachePreset::Aggressive);
        assert!(store.get(CACHE_CONFIG_KEY).is_none());
    }

    #[test]
    fn test_reset_cache_config() {
        let store = MemoryLocalStore::new();
        apply_cache_preset(Environment::Development, &store, CachePreset::Conservative);
        reset_cache_config(Environment::Development, &store);
        assert_eq!(
            cache_config(Environment::Development, &store),
            CacheConfig::development()
        );
    }

    #[test]
    fn test_update_layering_order() {
        let store = MemoryLocalStore::new();
        // Local override wins over preset, which wins over baseline.
        store.set(UPDATE_CONFIG_KEY, json!({ "checkInterval": 42 }));

        let config = update_config(
            Environment::Development,
            Some(UpdatePreset::Aggressive),
            &store,
        );
        assert_eq!(config.strategy, UpdateStrategy::Aggressive);
        assert_eq!(config.check_interval, 42);
        assert_eq!(config.auto_update_delay, 1000);
    }

    #[test]
    fn test_update_preset_in_production() {
        let store = MemoryLocalStore::new();
        let config = update_config(
            Environment::Production,
            Some(UpdatePreset::Conservative),
            &store,
        );
        assert_eq!(config.check_interval, 60 * 60 * 1000);
        assert_eq!(config.max_prompts_per_session, 1);
        assert!(!config.check_on_focus);
        // Baseline fields the preset does not name survive.
        assert!(config.clear_caches_on_update);
    }

    #[test]
    fn test_strategy_predicates() {
        assert!(UpdateStrategy::Auto.is_auto());
        assert!(UpdateStrategy::Aggressive.is_auto());
        assert!(!UpdateStrategy::Prompt.is_auto());
        assert!(UpdateStrategy::Prompt.should_prompt());
        assert!(UpdateStrategy::Auto.should_prompt());
        assert!(!UpdateStrategy::Aggressive.should_prompt());
        assert!(UpdateStrategy::Disabled.is_disabled());
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(
            serde_json::to_value(UpdateStrategy::Aggressive).unwrap(),
            json!("aggressive")
        );
        let s: UpdateStrategy = serde_json::from_value(json!("prompt")).unwrap();
        assert_eq!(s, UpdateStrategy::Prompt);
    }

    #[test]
    fn test_full_config_roundtrips_as_override() {
        // Saving persists the full merged config; loading it back as a
        // partial override must reproduce every field.
        let store = MemoryLocalStore::new();
        let over = UpdateConfigOverride {
            strategy: Some(UpdateStrategy::Auto),
            ..Default::default()
        };
        save_update_config(Environment::Development, &store, &over);

        let config = update_config(Environment::Development, None, &store);
        assert_eq!(
            config,
            UpdateConfig::development().merged(&over)
        );
    }
}
