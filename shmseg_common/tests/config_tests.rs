//! Configuration loading and object naming, exercised through the public API.

use serde::Deserialize;
use shmseg_common::config::{ConfigError, ConfigLoader, LogLevel};
use shmseg_common::naming::{KeyError, ObjectNames, validate_key};
use shmseg_common::prelude::{DEFAULT_LOCK_RETRY, DEFAULT_LOCK_TIMEOUT};
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
struct ToolConfig {
    logging: Logging,
    #[serde(default)]
    keys: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq)]
struct Logging {
    log_level: LogLevel,
}

#[test]
fn test_load_nested_config_from_dir() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shmseg.toml");
    fs::write(
        &path,
        r#"
keys = ["buf-a", "telemetry"]

[logging]
log_level = "warn"
"#,
    )
    .unwrap();

    let config = ToolConfig::load(&path).unwrap();
    assert_eq!(config.logging.log_level, LogLevel::Warn);
    assert_eq!(config.keys, ["buf-a", "telemetry"]);
    for key in &config.keys {
        assert!(validate_key(key).is_ok());
    }
}

#[test]
fn test_unknown_fields_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("shmseg.toml");
    fs::write(&path, "[logging]\nlog_level = \"info\"\n\n[extra]\nx = 1\n").unwrap();

    assert!(matches!(
        ToolConfig::load(&path),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_missing_file_in_dir() {
    let dir = TempDir::new().unwrap();
    let result = ToolConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}

#[test]
fn test_names_follow_keys() {
    let key = "sensor-7";
    let posix = ObjectNames::posix(key);
    let windows = ObjectNames::windows(key);

    assert!(posix.memory.starts_with('/'));
    assert!(posix.mutex.ends_with(".lock"));
    assert!(posix.memory.ends_with(key));
    assert_eq!(&posix.memory[1..], windows.memory);
    assert_eq!(&posix.mutex[1..], windows.mutex);
}

#[test]
fn test_key_errors_display() {
    assert_eq!(
        validate_key("").unwrap_err().to_string(),
        "segment key must not be empty"
    );
    assert!(matches!(
        validate_key("bad\\key"),
        Err(KeyError::InvalidChar { ch: '\\' })
    ));
}

#[test]
fn test_default_timeouts() {
    assert_eq!(DEFAULT_LOCK_TIMEOUT, Duration::from_secs(5));
    assert_eq!(DEFAULT_LOCK_RETRY, Duration::from_millis(2));
    assert!(DEFAULT_LOCK_RETRY < DEFAULT_LOCK_TIMEOUT);
}
