//! Segment header placed at the start of every mapped region

use crate::error::{ShmError, ShmResult};
use common::consts::FORMAT_VERSION;
use static_assertions::const_assert_eq;
use std::ptr::NonNull;

/// Fixed-size metadata record preceding the payload.
///
/// Written exactly once by the creating process, before any payload byte is
/// exposed. Readers treat `payload_size` as authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SegmentHeader {
    /// User-requested payload length in bytes, excluding the header
    pub payload_size: u64,
    /// Header layout version
    pub format_version: i32,
    /// Always zero; keeps the payload 8-byte aligned
    reserved: u32,
}

/// Size of [`SegmentHeader`] in bytes; the payload starts at this offset.
pub const HEADER_SIZE: usize = std::mem::size_of::<SegmentHeader>();

const_assert_eq!(HEADER_SIZE, 16);
const_assert_eq!(std::mem::align_of::<SegmentHeader>(), 8);

impl SegmentHeader {
    /// Header for a freshly created segment with the current format version.
    pub const fn new(payload_size: u64) -> Self {
        Self {
            payload_size,
            format_version: FORMAT_VERSION,
            reserved: 0,
        }
    }

    /// Total object size needed for `payload_size` bytes of payload.
    pub fn total_size(payload_size: usize) -> ShmResult<usize> {
        HEADER_SIZE.checked_add(payload_size).ok_or_else(|| {
            ShmError::invalid_argument(format!("payload size {payload_size} overflows"))
        })
    }

    /// Write this header at `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`HEADER_SIZE`] writable bytes aligned
    /// to 8, as every mapping base is.
    pub unsafe fn write_to(&self, base: NonNull<u8>) {
        unsafe { base.cast::<SegmentHeader>().as_ptr().write_volatile(*self) }
    }

    /// Read a header from `base`.
    ///
    /// # Safety
    ///
    /// `base` must point to at least [`HEADER_SIZE`] readable bytes aligned to 8.
    pub unsafe fn read_from(base: NonNull<u8>) -> Self {
        unsafe { base.cast::<SegmentHeader>().as_ptr().read_volatile() }
    }

    /// Check the header against the length actually mapped.
    pub fn validate(&self, key: &str, mapped_len: usize) -> ShmResult<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(ShmError::InvalidHeader {
                key: key.to_string(),
                reason: format!(
                    "format version {} (expected {FORMAT_VERSION})",
                    self.format_version
                ),
            });
        }

        let payload = usize::try_from(self.payload_size).map_err(|_| ShmError::InvalidHeader {
            key: key.to_string(),
            reason: format!("payload size {} does not fit in memory", self.payload_size),
        })?;

        match HEADER_SIZE.checked_add(payload) {
            Some(total) if total <= mapped_len => Ok(()),
            _ => Err(ShmError::InvalidHeader {
                key: key.to_string(),
                reason: format!(
                    "payload size {payload} exceeds mapped length {mapped_len}"
                ),
            }),
        }
    }

    /// Payload length as a native size. Only meaningful after [`validate`](Self::validate).
    pub fn payload_len(&self) -> usize {
        self.payload_size as usize
    }
}
