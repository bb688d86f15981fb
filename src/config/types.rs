//! Configuration constants and defaults for buslock.

/// Largest accepted wait budget, in seconds.
pub const MAX_WAIT_SECONDS: u64 = 30;

// Default value functions for serde
pub(crate) fn default_lock_dir() -> String {
    "/var/lock".to_string()
}
pub(crate) fn default_lock_prefix() -> String {
    "LCK..".to_string()
}
pub(crate) fn default_stale_confirmations() -> u32 {
    2
}
pub(crate) fn default_missing_head_retries() -> u32 {
    2
}
pub(crate) fn default_poll_interval_ms() -> u64 {
    25
}
pub(crate) fn default_backoff_ms() -> u64 {
    25
}
pub(crate) fn default_jitter_max() -> u32 {
    10
}
