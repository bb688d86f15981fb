//! Config struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the serial bus lock.
///
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Queue file location
    // =========================================================================
    /// Directory holding the per-device queue files.
    #[serde(default = "default_lock_dir")]
    pub lock_dir: String,

    /// File name prefix placed before the device basename.
    #[serde(default = "default_lock_prefix")]
    pub lock_prefix: String,

    // =========================================================================
    // Acquire loop
    // =========================================================================
    /// Seconds to wait for the bus before giving up (0 = fail at once if busy).
    #[serde(default)]
    pub wait_seconds: u64,

    /// Consecutive stale observations of the same head before it is purged.
    #[serde(default = "default_stale_confirmations")]
    pub stale_confirmations: u32,

    /// Consecutive unreadable heads tolerated before re-enqueueing.
    #[serde(default = "default_missing_head_retries")]
    pub missing_head_retries: u32,

    /// Base delay between head checks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    // =========================================================================
    // Advisory lock contention
    // =========================================================================
    /// Base delay before retrying a contended flock, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Upper bound of the random multiplier applied to both base delays.
    #[serde(default = "default_jitter_max")]
    pub jitter_max: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_dir: default_lock_dir(),
            lock_prefix: default_lock_prefix(),
            wait_seconds: 0,
            stale_confirmations: default_stale_confirmations(),
            missing_head_retries: default_missing_head_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            backoff_ms: default_backoff_ms(),
            jitter_max: default_jitter_max(),
        }
    }
}

impl Config {
    pub fn lock_dir(&self) -> PathBuf {
        PathBuf::from(&self.lock_dir)
    }

    pub fn wait_budget(&self) -> Duration {
        Duration::from_secs(self.wait_seconds)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}
