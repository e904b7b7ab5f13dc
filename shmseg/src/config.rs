//! Runtime configuration for the shared memory service.
//!
//! ```toml
//! [logging]
//! log_level = "debug"
//! json = false
//!
//! [segments]
//! lock_timeout_ms = 5000
//! lock_retry_ms = 2
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.

use common::config::{ConfigError, LogLevel};
use common::consts::{DEFAULT_LOCK_RETRY_MS, DEFAULT_LOCK_TIMEOUT_MS};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    /// `[logging]` section
    pub logging: LoggingConfig,
    /// `[segments]` section
    pub segments: SegmentConfig,
}

/// Diagnostics output settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level; `RUST_LOG` directives override it
    pub log_level: LogLevel,
    /// JSON lines instead of the compact format
    pub json: bool,
}

/// Structural mutex settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Upper bound on waiting for a segment's structural mutex
    pub lock_timeout_ms: u64,
    /// Polling interval while waiting, where the platform polls
    pub lock_retry_ms: u64,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            lock_retry_ms: DEFAULT_LOCK_RETRY_MS,
        }
    }
}

impl SegmentConfig {
    /// Mutex timeout as a Duration.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    /// Polling interval as a Duration.
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

impl ShmConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let segments = &self.segments;
        if segments.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "segments.lock_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if segments.lock_retry_ms == 0 || segments.lock_retry_ms > segments.lock_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "segments.lock_retry_ms must be in 1..={}, got {}",
                segments.lock_timeout_ms, segments.lock_retry_ms
            )));
        }
        Ok(())
    }
}
