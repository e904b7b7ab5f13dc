//! Platform primitive adapters.
//!
//! One contract, two implementations selected at compile time:
//!
//! - Unix: `shm_open` / `ftruncate` / `mmap` with a named POSIX semaphore
//!   as the structural mutex ([`posix::PosixBackend`])
//! - Windows: page-file-backed `CreateFileMappingW` / `MapViewOfFile` with a
//!   named Win32 mutex ([`windows::WindowsBackend`])
//!
//! [`NativeBackend`] names the implementation for the build target.

use crate::error::ShmResult;
use std::fmt;
use std::ptr::NonNull;
use std::time::Duration;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod windows;

#[cfg(unix)]
pub use posix::PosixBackend as NativeBackend;
#[cfg(windows)]
pub use windows::WindowsBackend as NativeBackend;

/// A named memory object mapped into this process.
///
/// Plain data: dropping it releases nothing. The owner hands the pieces back
/// to [`Backend::unmap`] and [`Backend::close_handle`].
#[derive(Debug, Clone, Copy)]
pub struct Mapping<H> {
    /// OS handle of the memory object
    pub handle: H,
    /// Base address of the mapped view
    pub address: NonNull<u8>,
    /// Length of the mapped view in bytes
    pub len: usize,
}

/// Capability interface over one OS shared memory model.
///
/// Implementations are stateless beyond configuration and cheap to clone.
/// Handle types are raw and `Copy` so that the rollback stack can record
/// them without taking ownership.
pub trait Backend: Clone + Send + Sync + fmt::Debug + 'static {
    /// Raw handle of an open memory object.
    type Handle: Copy + Send + Sync + fmt::Debug + 'static;
    /// An acquired structural mutex.
    type Mutex: Send + fmt::Debug;

    /// Create (`create == true`) or open the memory object for `key` and map it.
    ///
    /// On create, `total_size` is the exact object size and an existing object
    /// of the same name is an error. On open, `total_size` is ignored and the
    /// object's current size is mapped. A mapping failure after a successful
    /// create removes the just-created object before returning.
    fn create_or_open(
        &self,
        key: &str,
        create: bool,
        total_size: usize,
    ) -> ShmResult<Mapping<Self::Handle>>;

    /// Unmap a view returned by [`create_or_open`](Self::create_or_open).
    fn unmap(&self, address: NonNull<u8>, len: usize) -> ShmResult<()>;

    /// Close a memory object handle.
    fn close_handle(&self, handle: Self::Handle) -> ShmResult<()>;

    /// Remove the named memory object so no later open finds it.
    ///
    /// Returns `Ok(false)` when no object of that name existed.
    fn remove_named_object(&self, key: &str) -> ShmResult<bool>;

    /// Create (or open when `create == false`) the named mutex for `key` and
    /// acquire it, waiting at most `timeout`.
    fn acquire_named_mutex(
        &self,
        key: &str,
        create: bool,
        timeout: Duration,
    ) -> ShmResult<Self::Mutex>;

    /// Whether acquiring `mutex` brought the named mutex into existence.
    ///
    /// A failed create removes such a mutex again so it does not outlive the
    /// attempt.
    fn mutex_created(&self, mutex: &Self::Mutex) -> bool;

    /// Release and close a mutex returned by [`acquire_named_mutex`](Self::acquire_named_mutex).
    fn release_named_mutex(&self, mutex: Self::Mutex) -> ShmResult<()>;

    /// Remove the named mutex for `key` without acquiring it.
    ///
    /// Returns `Ok(false)` when no mutex of that name existed.
    fn remove_named_mutex(&self, key: &str) -> ShmResult<bool>;
}

/// Last OS error as `std::io::Error`.
pub(crate) fn last_os_error() -> std::io::Error {
    std::io::Error::last_os_error()
}
