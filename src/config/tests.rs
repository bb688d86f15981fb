//! Tests for config functionality.

use crate::config::{Config, MAX_WAIT_SECONDS};
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.lock_dir, "/var/lock");
    assert_eq!(config.lock_prefix, "LCK..");
    assert_eq!(config.wait_seconds, 0);
    assert_eq!(config.stale_confirmations, 2);
    assert_eq!(config.missing_head_retries, 2);
    assert_eq!(config.poll_interval_ms, 25);
    assert_eq!(config.backoff_ms, 25);
    assert_eq!(config.jitter_max, 10);
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_minimal_yaml() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config, Config::default());
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
lock_dir: /run/lock
wait_seconds: 5
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.lock_dir, "/run/lock");
    assert_eq!(config.wait_budget(), Duration::from_secs(5));

    // Unspecified values should use defaults
    assert_eq!(config.lock_prefix, "LCK..");
    assert_eq!(config.stale_confirmations, 2);
}

#[test]
fn test_parse_full_yaml() {
    let yaml = r#"
lock_dir: /tmp/locks
lock_prefix: "BUS-"
wait_seconds: 30
stale_confirmations: 4
missing_head_retries: 5
poll_interval_ms: 10
backoff_ms: 3
jitter_max: 2
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.lock_dir(), std::path::PathBuf::from("/tmp/locks"));
    assert_eq!(config.lock_prefix, "BUS-");
    assert_eq!(config.wait_seconds, 30);
    assert_eq!(config.stale_confirmations, 4);
    assert_eq!(config.missing_head_retries, 5);
    assert_eq!(config.poll_interval(), Duration::from_millis(10));
    assert_eq!(config.backoff(), Duration::from_millis(3));
    assert_eq!(config.jitter_max, 2);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
wait_seconds: 2
future_option: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.wait_seconds, 2);
}

#[test]
fn test_invalid_yaml_fails() {
    let result = Config::from_yaml("wait_seconds: [1, 2");
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("failed to parse"));
}

#[test]
fn test_wait_seconds_out_of_range() {
    let yaml = format!("wait_seconds: {}", MAX_WAIT_SECONDS + 1);
    let err = Config::from_yaml(&yaml).unwrap_err();
    assert!(err.to_string().contains("out of range"));
}

#[test]
fn test_single_stale_confirmation_rejected() {
    let err = Config::from_yaml("stale_confirmations: 1").unwrap_err();
    assert!(err.to_string().contains("stale_confirmations"));
}

#[test]
fn test_zero_delays_rejected() {
    assert!(Config::from_yaml("poll_interval_ms: 0").is_err());
    assert!(Config::from_yaml("backoff_ms: 0").is_err());
    assert!(Config::from_yaml("jitter_max: 0").is_err());
}

#[test]
fn test_prefix_with_separator_rejected() {
    let err = Config::from_yaml("lock_prefix: \"a/b\"").unwrap_err();
    assert!(err.to_string().contains("lock_prefix"));
}

#[test]
fn test_empty_lock_dir_rejected() {
    assert!(Config::from_yaml("lock_dir: \"\"").is_err());
}

#[test]
fn test_load_from_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("buslock.yaml");
    std::fs::write(&path, "wait_seconds: 7\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.wait_seconds, 7);
}

#[test]
fn test_resolve_explicit_missing_file_fails() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("nope.yaml");

    let err = Config::resolve(Some(&missing)).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_yaml_round_trip() {
    let config = Config {
        wait_seconds: 12,
        lock_prefix: "Q_".to_string(),
        ..Config::default()
    };
    let yaml = config.to_yaml().unwrap();
    assert_eq!(Config::from_yaml(&yaml).unwrap(), config);
}
