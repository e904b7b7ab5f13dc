//! # shmseg: named cross-process shared memory segments
//!
//! Unrelated processes on one host agree on a string key and get the same
//! block of memory. Every segment starts with a small header recording the
//! payload length and a format version, so a process that opens a segment
//! learns its size without any side channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐   create / open / remove
//! │  SharedMemory    │──────────────────────────────┐
//! │  (handlers)      │                              │
//! └────────┬─────────┘                              ▼
//!          │ ByteView (Arc)              ┌─────────────────────┐
//!          ▼                             │ Backend             │
//! ┌──────────────────┐  acquire/map/...  │  PosixBackend       │
//! │ SegmentManager   │──────────────────►│  WindowsBackend     │
//! │ Mapped → Closed  │                   └─────────────────────┘
//! └────────┬─────────┘
//!          │ register / unregister
//!          ▼
//! ┌──────────────────┐
//! │ AddressRegistry  │  key → live payload addresses
//! └──────────────────┘
//! ```
//!
//! Memory layout of one segment:
//!
//! ```text
//! ┌──────────────┬────────────────┬──────────┬──────────────────────────┐
//! │ payload_size │ format_version │ reserved │ payload (payload_size B) │
//! │ u64          │ i32            │ u32      │                          │
//! └──────────────┴────────────────┴──────────┴──────────────────────────┘
//!  0              8                12         16
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shmseg::{SharedMemory, ShmConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let shm = SharedMemory::new(&ShmConfig::default());
//!
//! // Producer
//! let view = shm.create("buf-a", 64)?;
//! view.write_at(0, &[0xFF])?;
//!
//! // Another process (or the same one)
//! let other = shm.open("buf-a")?;
//! assert_eq!(other.len(), 64);
//! assert_eq!(other.to_vec()[0], 0xFF);
//!
//! // Unlink the kernel object; mapped views stay valid until dropped
//! assert!(shm.remove("buf-a")?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! All fallible operations return [`ShmResult`]. The handlers wrap platform
//! failures in [`ShmError::SegmentCreation`], [`ShmError::SegmentOpen`] and
//! [`ShmError::SegmentRemoval`]; bad keys are [`ShmError::InvalidArgument`]
//! and a missing segment on open is [`ShmError::SegmentNotFound`].
//!
//! ## Synchronisation
//!
//! Each key has a named mutex (a POSIX semaphore or a Win32 mutex) that is
//! held only while a segment is being created or opened. Payload access is
//! not synchronised: processes sharing a segment coordinate themselves.
//!
//! ## Platform Support
//!
//! - **Unix**: `shm_open` + `mmap`, named semaphores
//! - **Windows**: page-file-backed `CreateFileMappingW`, named mutexes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod header;
pub mod manager;
pub mod platform;
pub mod registry;
mod rollback;
pub mod service;
pub mod view;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::{LoggingConfig, SegmentConfig, ShmConfig};
pub use diagnostics::DiagnosticsSink;
pub use error::{ShmError, ShmResult};
pub use header::{HEADER_SIZE, SegmentHeader};
pub use manager::{SegmentContext, SegmentManager, SegmentState};
pub use platform::{Backend, Mapping, NativeBackend};
pub use registry::AddressRegistry;
pub use service::{SegmentInfo, SharedMemory};
pub use view::{ByteView, KeepAlive};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` directives take precedence over `config.log_level`. When a
/// diagnostics sink is given it receives every event that passes the filter.
/// Returns false if a global subscriber was already installed, in which case
/// nothing changes.
pub fn init_tracing(config: &LoggingConfig, sink: Option<&DiagnosticsSink>) -> bool {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::Layer;
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_directive()));

    let fmt_layer = if config.json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(sink.cloned())
        .try_init()
        .is_ok()
}
