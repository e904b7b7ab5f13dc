//! Operation handlers: the public create / open / remove surface.
//!
//! [`SharedMemory`] is the process-wide service object. It is built once
//! from a [`ShmConfig`] and owns the address registry every manager it
//! creates registers with. Each handler validates its arguments, runs the
//! segment lifecycle, and maps failures to the wrapping error categories.
//! Panics inside a handler are caught at this boundary and returned as
//! [`ShmError::Operation`].

use crate::config::ShmConfig;
use crate::diagnostics::DiagnosticsSink;
use crate::error::{ShmError, ShmResult};
use crate::manager::{SegmentContext, SegmentManager};
use crate::platform::{Backend, NativeBackend};
use crate::registry::AddressRegistry;
use crate::view::ByteView;
use common::naming::validate_key;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Header facts about an existing segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    /// Segment key
    pub key: String,
    /// Payload length from the header
    pub payload_size: u64,
    /// Header format version
    pub format_version: i32,
    /// Bytes mapped for the whole object, header included
    pub mapped_len: usize,
}

/// Shared memory segment service.
#[derive(Debug)]
pub struct SharedMemory<B: Backend = NativeBackend> {
    ctx: SegmentContext<B>,
    diagnostics: DiagnosticsSink,
}

impl SharedMemory<NativeBackend> {
    /// Service over the platform's native primitives.
    pub fn new(config: &ShmConfig) -> Self {
        Self::with_backend(NativeBackend::new(config.segments.lock_retry()), config)
    }
}

impl<B: Backend> SharedMemory<B> {
    /// Service over a caller-supplied backend.
    pub fn with_backend(backend: B, config: &ShmConfig) -> Self {
        Self {
            ctx: SegmentContext::new(
                backend,
                Arc::new(AddressRegistry::new()),
                config.segments.lock_timeout(),
            ),
            diagnostics: DiagnosticsSink::new(),
        }
    }

    /// Create the segment `key` with a zeroed payload of `length` bytes.
    ///
    /// Any existing object of the same name is replaced. The returned view
    /// keeps the mapping alive; the object itself stays in the system until
    /// [`remove`](Self::remove) is called.
    pub fn create(&self, key: &str, length: usize) -> ShmResult<ByteView<B>> {
        validate_key(key)?;
        guarded("create", || SegmentManager::new(&self.ctx, key, true, length))
            .map(ByteView::new)
            .map_err(|e| match e {
                e @ (ShmError::InvalidArgument { .. } | ShmError::Operation { .. }) => e,
                other => {
                    error!(key, length, error = %other, "create failed");
                    ShmError::SegmentCreation {
                        key: key.to_string(),
                        source: Box::new(other),
                    }
                }
            })
    }

    /// Open the existing segment `key`. The view length comes from its header.
    pub fn open(&self, key: &str) -> ShmResult<ByteView<B>> {
        self.open_manager(key).map(ByteView::new)
    }

    fn open_manager(&self, key: &str) -> ShmResult<SegmentManager<B>> {
        validate_key(key)?;
        guarded("open", || SegmentManager::new(&self.ctx, key, false, 0)).map_err(|e| match e {
            e @ (ShmError::InvalidArgument { .. }
            | ShmError::SegmentNotFound { .. }
            | ShmError::Operation { .. }) => e,
            other => {
                error!(key, error = %other, "open failed");
                ShmError::SegmentOpen {
                    key: key.to_string(),
                    source: Box::new(other),
                }
            }
        })
    }

    /// Remove the segment `key` from the system.
    ///
    /// Returns whether an object was actually removed; an absent segment is
    /// `Ok(false)`. Views already mapped in this or other processes stay
    /// valid until they are dropped.
    pub fn remove(&self, key: &str) -> ShmResult<bool> {
        validate_key(key)?;
        guarded("remove", || {
            match self.ctx.backend.remove_named_mutex(key) {
                Ok(removed) => debug!(key, removed, "structural mutex unlinked"),
                Err(e) => warn!(key, error = %e, "could not remove structural mutex"),
            }
            self.ctx
                .backend
                .remove_named_object(key)
                .map_err(|e| ShmError::SegmentRemoval {
                    key: key.to_string(),
                    source: Box::new(e),
                })
        })
        .inspect(|removed| info!(key, removed, "segment remove"))
    }

    /// Header facts for `key`, read through a short-lived mapping.
    pub fn inspect(&self, key: &str) -> ShmResult<SegmentInfo> {
        let manager = self.open_manager(key)?;
        let info = SegmentInfo {
            key: key.to_string(),
            payload_size: manager.header().payload_size,
            format_version: manager.format_version(),
            mapped_len: manager.mapped_len(),
        };
        manager.close();
        Ok(info)
    }

    /// Payload address of the most recent live mapping of `key` in this process.
    pub fn resolve(&self, key: &str) -> Option<NonNull<u8>> {
        self.ctx.registry.resolve(key)
    }

    /// The address registry shared by every segment of this service.
    pub fn registry(&self) -> &Arc<AddressRegistry> {
        &self.ctx.registry
    }

    /// Platform backend.
    pub fn backend(&self) -> &B {
        &self.ctx.backend
    }

    /// Route formatted diagnostics to `callback`.
    ///
    /// Lines arrive only once the sink from [`diagnostics`](Self::diagnostics)
    /// is part of the installed subscriber (see [`crate::init_tracing`]).
    pub fn set_diagnostics_sink<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.diagnostics.set_callback(callback);
    }

    /// Stop routing diagnostics.
    pub fn clear_diagnostics_sink(&self) {
        self.diagnostics.clear_callback();
    }

    /// The sink handle to install as a tracing layer.
    pub fn diagnostics(&self) -> &DiagnosticsSink {
        &self.diagnostics
    }
}

/// Run `op`, turning a panic into [`ShmError::Operation`].
fn guarded<T>(operation: &'static str, op: impl FnOnce() -> ShmResult<T>) -> ShmResult<T> {
    panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        error!(operation, %message, "operation panicked");
        Err(ShmError::Operation { operation, message })
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
