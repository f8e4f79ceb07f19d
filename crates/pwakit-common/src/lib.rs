//! # PwaKit Common
//!
//! Common utilities shared by the PwaKit cache/update engine crates.
//!
//! ## Features
//!
//! - Logging configuration and setup (`tracing`)
//! - Wall-clock helpers (epoch milliseconds)
//! - The page-local key-value store seam used for cache metadata and
//!   development config overrides

pub mod logging;
pub mod store;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use store::{LocalStore, MemoryLocalStore};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in milliseconds since the Unix epoch.
///
/// Clamps to zero if the system clock reads before the epoch.
pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
