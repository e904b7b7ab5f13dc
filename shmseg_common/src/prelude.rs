//! Prelude module for common re-exports.
//!
//! ```rust
//! use shmseg_common::prelude::*;
//! ```

use std::time::Duration;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, LogLevel};

// ─── Naming ─────────────────────────────────────────────────────────
pub use crate::naming::{KeyError, ObjectNames, validate_key};

// ─── Segment Constants ──────────────────────────────────────────────
pub use crate::consts::{FORMAT_VERSION, MAX_KEY_LEN};

/// Default structural mutex timeout as Duration.
pub const DEFAULT_LOCK_TIMEOUT: Duration =
    Duration::from_millis(crate::consts::DEFAULT_LOCK_TIMEOUT_MS);

/// Default structural mutex polling interval as Duration.
pub const DEFAULT_LOCK_RETRY: Duration = Duration::from_millis(crate::consts::DEFAULT_LOCK_RETRY_MS);
