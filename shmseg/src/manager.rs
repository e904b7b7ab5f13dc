//! Segment manager: owns one mapping from initialisation to teardown.
//!
//! ```text
//!  Uninitialized ──new()──► Mapped ──drop / close()──► Closed
//!        │
//!        └── any failure: rollback, nothing observable
//! ```
//!
//! Initialisation runs under the segment's named mutex:
//!
//! 1. acquire (create) or open the structural mutex
//! 2. create: remove a stale object, create, map, zero, write header;
//!    open: open, map, read and validate the header
//! 3. register the payload address
//! 4. release the mutex
//!
//! A mutex that step 1 brought into existence and each OS resource obtained
//! in step 2 push an [`Undo`] entry; a failure
//! unwinds them newest first before the error is returned. Teardown
//! deregisters, unmaps and closes the handle. It never unlinks the kernel
//! object; that is what `remove` is for.

use crate::error::{ShmError, ShmResult};
use crate::header::{HEADER_SIZE, SegmentHeader};
use crate::platform::{Backend, Mapping, NativeBackend};
use crate::registry::AddressRegistry;
use crate::rollback::{Rollback, Undo};
use common::naming::validate_key;
use common::prelude::DEFAULT_LOCK_TIMEOUT;
use std::ptr::NonNull;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Shared collaborators every manager is built with.
#[derive(Debug, Clone)]
pub struct SegmentContext<B: Backend = NativeBackend> {
    /// Platform primitives
    pub backend: B,
    /// Process-wide address registry
    pub registry: Arc<AddressRegistry>,
    /// Bound on structural mutex acquisition
    pub lock_timeout: Duration,
}

impl<B: Backend> SegmentContext<B> {
    /// Bundle the collaborators.
    pub fn new(backend: B, registry: Arc<AddressRegistry>, lock_timeout: Duration) -> Self {
        Self {
            backend,
            registry,
            lock_timeout,
        }
    }
}

impl Default for SegmentContext<NativeBackend> {
    fn default() -> Self {
        Self::new(
            NativeBackend::default(),
            Arc::new(AddressRegistry::new()),
            DEFAULT_LOCK_TIMEOUT,
        )
    }
}

/// Lifecycle state of a [`SegmentManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// Initialisation in progress; never observable from outside `new`
    Uninitialized,
    /// Mapped and registered
    Mapped,
    /// Torn down
    Closed,
}

/// Releases the structural mutex when initialisation ends, however it ends.
struct HeldMutex<'a, B: Backend> {
    backend: &'a B,
    key: &'a str,
    mutex: Option<B::Mutex>,
}

impl<B: Backend> Drop for HeldMutex<'_, B> {
    fn drop(&mut self) {
        if let Some(mutex) = self.mutex.take()
            && let Err(e) = self.backend.release_named_mutex(mutex)
        {
            warn!(key = self.key, error = %e, "failed to release structural mutex");
        }
    }
}

/// Sole owner of one mapped segment in this process.
pub struct SegmentManager<B: Backend = NativeBackend> {
    key: String,
    backend: B,
    registry: Arc<AddressRegistry>,
    handle: B::Handle,
    base: NonNull<u8>,
    mapped_len: usize,
    header: SegmentHeader,
    state: SegmentState,
}

// SAFETY: the manager is the only owner of the mapping and its handle. The
// mapped region is shared memory by nature; payload synchronisation is the
// caller's contract. All remaining fields are Send + Sync.
unsafe impl<B: Backend> Send for SegmentManager<B> {}
unsafe impl<B: Backend> Sync for SegmentManager<B> {}

impl<B: Backend> SegmentManager<B> {
    /// Create (`create == true`) or open the segment named `key`.
    ///
    /// `payload_size` is the exact payload length on create and ignored on
    /// open, where the header is authoritative.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for a bad key or an overflowing size
    /// - `SynchronizationFailed` if the structural mutex is not acquired in time
    /// - `SegmentNotFound` on open when the object or its mutex is absent
    /// - `ResourceCreationFailed` / `MappingFailed` from the platform
    /// - `InvalidHeader` on open when the header is missing or incompatible
    pub fn new(
        ctx: &SegmentContext<B>,
        key: &str,
        create: bool,
        payload_size: usize,
    ) -> ShmResult<Self> {
        validate_key(key)?;
        let total_size = if create {
            SegmentHeader::total_size(payload_size)?
        } else {
            0
        };

        let mutex = ctx
            .backend
            .acquire_named_mutex(key, create, ctx.lock_timeout)?;
        let created_mutex = ctx.backend.mutex_created(&mutex);
        debug!(key, create, created_mutex, "structural mutex acquired");
        let _held = HeldMutex {
            backend: &ctx.backend,
            key,
            mutex: Some(mutex),
        };

        Self::initialize(ctx, key, create, created_mutex, payload_size, total_size)
    }

    fn initialize(
        ctx: &SegmentContext<B>,
        key: &str,
        create: bool,
        created_mutex: bool,
        payload_size: usize,
        total_size: usize,
    ) -> ShmResult<Self> {
        let backend = &ctx.backend;
        let mut rollback = Rollback::new(backend, key);
        if created_mutex {
            rollback.push(Undo::RemoveMutex(key.to_string()));
        }

        let (mapping, header) =
            match Self::map_segment(backend, &mut rollback, key, create, payload_size, total_size)
            {
                Ok(mapped) => mapped,
                Err(e) => {
                    rollback.unwind();
                    return Err(e);
                }
            };

        // Ownership of the mapping moves to the manager from here on.
        rollback.commit();
        let manager = Self {
            key: key.to_string(),
            backend: backend.clone(),
            registry: Arc::clone(&ctx.registry),
            handle: mapping.handle,
            base: mapping.address,
            mapped_len: mapping.len,
            header,
            state: SegmentState::Mapped,
        };
        ctx.registry.register(key, manager.payload_ptr());

        info!(
            key,
            len = manager.payload_len(),
            version = header.format_version,
            created = create,
            "segment mapped"
        );
        Ok(manager)
    }

    /// Step 2 of initialisation. Every acquired resource is pushed onto `rollback`.
    fn map_segment(
        backend: &B,
        rollback: &mut Rollback<'_, B>,
        key: &str,
        create: bool,
        payload_size: usize,
        total_size: usize,
    ) -> ShmResult<(Mapping<B::Handle>, SegmentHeader)> {
        if create {
            match backend.remove_named_object(key) {
                Ok(true) => debug!(key, "removed stale segment object"),
                Ok(false) => {}
                Err(e) => warn!(key, error = %e, "could not remove stale segment object"),
            }
        }

        let mapping = backend.create_or_open(key, create, total_size)?;
        if create {
            rollback.push(Undo::RemoveObject(key.to_string()));
        }
        rollback.push(Undo::CloseHandle(mapping.handle));
        rollback.push(Undo::Unmap {
            address: mapping.address,
            len: mapping.len,
        });

        let header = if create {
            if mapping.len < total_size {
                return Err(ShmError::MappingFailed {
                    name: key.to_string(),
                    source: std::io::Error::other(format!(
                        "mapped {} bytes, need {total_size}",
                        mapping.len
                    )),
                });
            }
            let header = SegmentHeader::new(payload_size as u64);
            // SAFETY: the view is at least total_size >= HEADER_SIZE bytes,
            // writable and page aligned.
            unsafe {
                std::ptr::write_bytes(mapping.address.as_ptr(), 0, mapping.len);
                header.write_to(mapping.address);
            }
            header
        } else {
            if mapping.len < HEADER_SIZE {
                return Err(ShmError::InvalidHeader {
                    key: key.to_string(),
                    reason: format!("object is {} bytes, smaller than a header", mapping.len),
                });
            }
            // SAFETY: at least HEADER_SIZE readable bytes at a page aligned base.
            let header = unsafe { SegmentHeader::read_from(mapping.address) };
            header.validate(key, mapping.len)?;
            header
        };

        Ok((mapping, header))
    }

    /// Segment key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Start of the payload region (`base + HEADER_SIZE`).
    pub fn payload_ptr(&self) -> NonNull<u8> {
        // SAFETY: mapped_len >= HEADER_SIZE, so the offset stays within (or
        // one past the end of) the mapping.
        unsafe { self.base.add(HEADER_SIZE) }
    }

    /// Payload length from the header.
    pub fn payload_len(&self) -> usize {
        self.header.payload_len()
    }

    /// Header format version.
    pub fn format_version(&self) -> i32 {
        self.header.format_version
    }

    /// Length of the whole mapped view, header included.
    pub fn mapped_len(&self) -> usize {
        self.mapped_len
    }

    /// Copy of the header as read or written at initialisation.
    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Tear the segment down now instead of at drop.
    pub fn close(mut self) {
        self.teardown();
    }

    /// Mapped -> Closed. Runs at most once; failures are logged and swallowed.
    fn teardown(&mut self) {
        if self.state != SegmentState::Mapped {
            return;
        }
        self.state = SegmentState::Closed;

        if !self.registry.unregister(&self.key, self.payload_ptr()) {
            debug!(key = %self.key, "registry entry already gone");
        }
        if let Err(e) = self.backend.unmap(self.base, self.mapped_len) {
            warn!(key = %self.key, error = %e, "unmap failed during teardown");
        }
        if let Err(e) = self.backend.close_handle(self.handle) {
            warn!(key = %self.key, error = %e, "handle close failed during teardown");
        }
        debug!(key = %self.key, "segment closed");
    }
}

impl<B: Backend> Drop for SegmentManager<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl<B: Backend> std::fmt::Debug for SegmentManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentManager")
            .field("key", &self.key)
            .field("base", &self.base)
            .field("mapped_len", &self.mapped_len)
            .field("header", &self.header)
            .field("state", &self.state)
            .finish()
    }
}
