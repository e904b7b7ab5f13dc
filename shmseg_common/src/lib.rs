//! shmseg Common Library
//!
//! This crate provides shared constants, kernel object naming and
//! configuration loading utilities for the shmseg workspace crates.
//!
//! # Module Structure
//!
//! - [`consts`] - Header format version, timeouts and key limits
//! - [`naming`] - Segment key validation and per-platform object names
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! Add to your `Cargo.toml` with alias for shorter imports:
//! ```toml
//! [dependencies]
//! common = { package = "shmseg_common", path = "../shmseg_common" }
//! ```
//!
//! Then import:
//! ```rust
//! use shmseg_common::consts::*;
//! use shmseg_common::config::{ConfigLoader, LogLevel};
//! ```

pub mod config;
pub mod consts;
pub mod naming;
pub mod prelude;
