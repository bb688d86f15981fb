//! Config loading, validation, and utility operations.

use super::model::Config;
use super::types::MAX_WAIT_SECONDS;
use crate::error::{BusLockError, Result};
use std::path::Path;

/// System-wide config consulted when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/buslock.yaml";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Successfully loaded and validated config
    /// * `Err(BusLockError::UserError)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            BusLockError::UserError(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Resolve the effective config.
    ///
    /// An explicit path must exist. Without one, the system config is used
    /// when present and the built-in defaults otherwise.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => {
                let system = Path::new(DEFAULT_CONFIG_PATH);
                if system.exists() {
                    Self::load(system)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a map.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(yaml)
            .map_err(|e| BusLockError::UserError(format!("failed to parse config YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            BusLockError::UserError(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - `lock_dir` must be non-empty
    /// - `lock_prefix` must not contain a path separator
    /// - `wait_seconds` must be at most `MAX_WAIT_SECONDS`
    /// - `stale_confirmations` must be at least 2
    /// - `poll_interval_ms`, `backoff_ms` and `jitter_max` must be positive
    pub fn validate(&self) -> Result<()> {
        if self.lock_dir.trim().is_empty() {
            return Err(invalid("lock_dir must not be empty"));
        }

        if self.lock_prefix.contains('/') {
            return Err(BusLockError::UserError(format!(
                "config validation failed: lock_prefix must not contain '/' (found '{}')",
                self.lock_prefix
            )));
        }

        if self.wait_seconds > MAX_WAIT_SECONDS {
            return Err(BusLockError::UserError(format!(
                "config validation failed: wait_seconds ({}) out of range, 0-{}",
                self.wait_seconds, MAX_WAIT_SECONDS
            )));
        }

        // A single sighting can be a writer caught mid-append.
        if self.stale_confirmations < 2 {
            return Err(invalid("stale_confirmations must be at least 2"));
        }

        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms must be greater than 0"));
        }

        if self.backoff_ms == 0 {
            return Err(invalid("backoff_ms must be greater than 0"));
        }

        if self.jitter_max == 0 {
            return Err(invalid("jitter_max must be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> BusLockError {
    BusLockError::UserError(format!("config validation failed: {}", message))
}
