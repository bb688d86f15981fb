//! Configuration model for buslock.
//!
//! This module defines the Config struct read from `/etc/buslock.yaml` (or the
//! file given with `--config`). It supports forward-compatible YAML parsing
//! (unknown fields are ignored), defaults for every field, and validation of
//! config values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::Config;
pub use operations::DEFAULT_CONFIG_PATH;
pub use types::MAX_WAIT_SECONDS;
