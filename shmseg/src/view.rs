//! Zero-copy byte views over a segment's payload

use crate::error::{ShmError, ShmResult};
use crate::manager::SegmentManager;
use crate::platform::{Backend, NativeBackend};
use std::any::Any;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

/// Type-erased token keeping a segment mapped while it is held.
///
/// Handed to binding layers together with a raw pointer so they can tie the
/// mapping's lifetime to a foreign buffer object without naming the backend.
#[derive(Clone)]
pub struct KeepAlive(Arc<dyn Any + Send + Sync>);

impl KeepAlive {
    /// Number of views and tokens currently keeping the segment mapped.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl fmt::Debug for KeepAlive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeepAlive")
            .field("holders", &self.holders())
            .finish()
    }
}

/// Window onto the payload of a mapped segment.
///
/// Clones share the same [`SegmentManager`]; the segment is torn down when
/// the last view and the last [`KeepAlive`] token are gone. Writes are plain
/// stores into shared memory: other processes mapping the same key see them,
/// and ordering between processes is the caller's business.
#[derive(Clone)]
pub struct ByteView<B: Backend = NativeBackend> {
    manager: Arc<SegmentManager<B>>,
}

impl<B: Backend> ByteView<B> {
    pub(crate) fn new(manager: SegmentManager<B>) -> Self {
        Self {
            manager: Arc::new(manager),
        }
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.manager.payload_len()
    }

    /// True for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segment key.
    pub fn key(&self) -> &str {
        self.manager.key()
    }

    /// Header format version.
    pub fn format_version(&self) -> i32 {
        self.manager.format_version()
    }

    /// Start of the payload.
    pub fn as_ptr(&self) -> *mut u8 {
        self.manager.payload_ptr().as_ptr()
    }

    /// The owning manager.
    pub fn manager(&self) -> &SegmentManager<B> {
        &self.manager
    }

    fn check_range(&self, offset: usize, len: usize) -> ShmResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len() => Ok(()),
            _ => Err(ShmError::invalid_argument(format!(
                "range {offset}+{len} is outside the {}-byte segment '{}'",
                self.len(),
                self.key()
            ))),
        }
    }

    /// Copy `buf.len()` bytes starting at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> ShmResult<()> {
        self.check_range(offset, buf.len())?;
        // SAFETY: range checked against the mapped payload.
        unsafe {
            ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len());
        }
        Ok(())
    }

    /// Copy `data` into the payload at `offset`.
    pub fn write_at(&self, offset: usize, data: &[u8]) -> ShmResult<()> {
        self.check_range(offset, data.len())?;
        // SAFETY: range checked against the mapped payload.
        unsafe {
            ptr::copy_nonoverlapping(data.as_ptr(), self.as_ptr().add(offset), data.len());
        }
        Ok(())
    }

    /// Set every payload byte to `value`.
    pub fn fill(&self, value: u8) {
        // SAFETY: exactly the mapped payload.
        unsafe { ptr::write_bytes(self.as_ptr(), value, self.len()) }
    }

    /// Copy of the whole payload.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len()];
        // SAFETY: `out` has exactly len() bytes.
        unsafe { ptr::copy_nonoverlapping(self.as_ptr(), out.as_mut_ptr(), out.len()) };
        out
    }

    /// Borrow the payload as a slice.
    ///
    /// # Safety
    ///
    /// No other thread or process may write the payload while the slice is
    /// alive.
    pub unsafe fn as_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len()) }
    }

    /// Borrow the payload mutably.
    ///
    /// # Safety
    ///
    /// The caller must guarantee exclusive access to the payload, in this
    /// process and every other process mapping the same key, while the slice
    /// is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.as_ptr(), self.len()) }
    }

    /// A token keeping the segment mapped independently of this view.
    pub fn keep_alive(&self) -> KeepAlive {
        KeepAlive(self.manager.clone())
    }

    /// Decompose into raw pointer, length and lifetime token.
    ///
    /// The pointer is valid for `len` bytes for as long as the token (or any
    /// clone of it) is alive.
    pub fn into_raw_parts(self) -> (NonNull<u8>, usize, KeepAlive) {
        let ptr = self.manager.payload_ptr();
        let len = self.len();
        (ptr, len, KeepAlive(self.manager))
    }
}

impl<B: Backend> fmt::Debug for ByteView<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteView")
            .field("key", &self.key())
            .field("len", &self.len())
            .field("ptr", &self.as_ptr())
            .finish()
    }
}
