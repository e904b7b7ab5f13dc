//! Windows shared memory implementation using page-file-backed file mappings.
//!
//! The memory object is `shmseg.<key>` created with `CreateFileMappingW`
//! over `INVALID_HANDLE_VALUE`; the structural mutex is the named Win32 mutex
//! `shmseg.<key>.lock`.
//!
//! Win32 specifics:
//! - A mapping object lives until its last handle closes, so
//!   [`Backend::remove_named_object`] can only report whether the name is
//!   currently bound. It cannot unbind it while other handles are open.
//! - The mapped size on open comes from `VirtualQuery` and is rounded up to
//!   the page size; the header carries the exact payload length.

use crate::error::{ShmError, ShmResult};
use crate::platform::{Backend, Mapping, last_os_error};
use common::naming::ObjectNames;
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::time::Duration;
use tracing::trace;
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_ALREADY_EXISTS, ERROR_FILE_NOT_FOUND, GetLastError, HANDLE,
    INVALID_HANDLE_VALUE, WAIT_ABANDONED, WAIT_OBJECT_0, WAIT_TIMEOUT,
};
use windows_sys::Win32::System::Memory::{
    CreateFileMappingW, FILE_MAP_ALL_ACCESS, MEMORY_BASIC_INFORMATION,
    MEMORY_MAPPED_VIEW_ADDRESS, MapViewOfFile, OpenFileMappingW, PAGE_READWRITE,
    UnmapViewOfFile, VirtualQuery,
};
use windows_sys::Win32::System::Threading::{
    CreateMutexW, MUTEX_ALL_ACCESS, OpenMutexW, ReleaseMutex, WaitForSingleObject,
};

/// Windows backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowsBackend;

impl WindowsBackend {
    /// Create a backend. Waiting is done by the kernel, so no polling interval applies.
    pub fn new(_lock_retry: Duration) -> Self {
        Self
    }
}

/// Raw file mapping handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MappingHandle(HANDLE);

// SAFETY: kernel handles are process-wide values usable from any thread.
unsafe impl Send for MappingHandle {}
unsafe impl Sync for MappingHandle {}

/// An acquired named mutex. The handle is closed on drop.
#[derive(Debug)]
pub struct WindowsMutex {
    handle: HANDLE,
    name: String,
}

// SAFETY: see MappingHandle. Ownership of a Win32 mutex is per-thread, so
// the manager releases it on the thread that acquired it.
unsafe impl Send for WindowsMutex {}

impl Drop for WindowsMutex {
    fn drop(&mut self) {
        unsafe {
            CloseHandle(self.handle);
        }
    }
}

fn wide(name: &str) -> Vec<u16> {
    name.encode_utf16().chain(std::iter::once(0)).collect()
}

fn is_null_handle(handle: HANDLE) -> bool {
    handle == 0 as HANDLE
}

fn map_view(name: &str, handle: HANDLE, len: usize) -> ShmResult<NonNull<u8>> {
    let view = unsafe { MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, len) };
    NonNull::new(view.Value.cast::<u8>()).ok_or_else(|| ShmError::MappingFailed {
        name: name.to_string(),
        source: last_os_error(),
    })
}

fn region_size(name: &str, address: NonNull<u8>) -> ShmResult<usize> {
    let mut info = std::mem::MaybeUninit::<MEMORY_BASIC_INFORMATION>::zeroed();
    let written = unsafe {
        VirtualQuery(
            address.as_ptr().cast::<c_void>().cast_const(),
            info.as_mut_ptr(),
            std::mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        )
    };
    if written == 0 {
        return Err(ShmError::MappingFailed {
            name: name.to_string(),
            source: last_os_error(),
        });
    }
    Ok(unsafe { info.assume_init() }.RegionSize)
}

impl Backend for WindowsBackend {
    type Handle = MappingHandle;
    type Mutex = WindowsMutex;

    fn create_or_open(
        &self,
        key: &str,
        create: bool,
        total_size: usize,
    ) -> ShmResult<Mapping<MappingHandle>> {
        let name = ObjectNames::windows(key).memory;
        let wname = wide(&name);

        if create {
            let size = total_size as u64;
            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    ptr::null(),
                    PAGE_READWRITE,
                    (size >> 32) as u32,
                    size as u32,
                    wname.as_ptr(),
                )
            };
            if is_null_handle(handle) {
                return Err(ShmError::ResourceCreationFailed {
                    name,
                    source: last_os_error(),
                });
            }
            if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
                unsafe { CloseHandle(handle) };
                return Err(ShmError::ResourceCreationFailed {
                    name,
                    source: std::io::Error::from_raw_os_error(ERROR_ALREADY_EXISTS as i32),
                });
            }

            let address = match map_view(&name, handle, total_size) {
                Ok(address) => address,
                Err(e) => {
                    // Closing the only handle destroys the object.
                    unsafe { CloseHandle(handle) };
                    return Err(e);
                }
            };
            trace!(name, total_size, "created and mapped file mapping");
            Ok(Mapping {
                handle: MappingHandle(handle),
                address,
                len: total_size,
            })
        } else {
            let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wname.as_ptr()) };
            if is_null_handle(handle) {
                let err = last_os_error();
                if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) {
                    return Err(ShmError::SegmentNotFound {
                        key: key.to_string(),
                    });
                }
                return Err(ShmError::ResourceCreationFailed { name, source: err });
            }

            let mapped = map_view(&name, handle, 0)
                .and_then(|address| region_size(&name, address).map(|len| (address, len)));
            match mapped {
                Ok((address, len)) => {
                    trace!(name, len, "opened and mapped file mapping");
                    Ok(Mapping {
                        handle: MappingHandle(handle),
                        address,
                        len,
                    })
                }
                Err(e) => {
                    unsafe { CloseHandle(handle) };
                    Err(e)
                }
            }
        }
    }

    fn unmap(&self, address: NonNull<u8>, _len: usize) -> ShmResult<()> {
        let view = MEMORY_MAPPED_VIEW_ADDRESS {
            Value: address.as_ptr().cast::<c_void>(),
        };
        if unsafe { UnmapViewOfFile(view) } == 0 {
            return Err(ShmError::Io {
                source: last_os_error(),
            });
        }
        Ok(())
    }

    fn close_handle(&self, handle: MappingHandle) -> ShmResult<()> {
        if unsafe { CloseHandle(handle.0) } == 0 {
            return Err(ShmError::Io {
                source: last_os_error(),
            });
        }
        Ok(())
    }

    fn remove_named_object(&self, key: &str) -> ShmResult<bool> {
        let wname = wide(&ObjectNames::windows(key).memory);
        let handle = unsafe { OpenFileMappingW(FILE_MAP_ALL_ACCESS, 0, wname.as_ptr()) };
        if is_null_handle(handle) {
            let err = last_os_error();
            if err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) {
                return Ok(false);
            }
            return Err(ShmError::Io { source: err });
        }
        unsafe { CloseHandle(handle) };
        Ok(true)
    }

    fn acquire_named_mutex(
        &self,
        key: &str,
        create: bool,
        timeout: Duration,
    ) -> ShmResult<WindowsMutex> {
        let name = ObjectNames::windows(key).mutex;
        let wname = wide(&name);

        let handle = unsafe {
            if create {
                CreateMutexW(ptr::null(), 0, wname.as_ptr())
            } else {
                OpenMutexW(MUTEX_ALL_ACCESS, 0, wname.as_ptr())
            }
        };
        if is_null_handle(handle) {
            let err = last_os_error();
            if !create && err.raw_os_error() == Some(ERROR_FILE_NOT_FOUND as i32) {
                return Err(ShmError::SegmentNotFound {
                    key: key.to_string(),
                });
            }
            return Err(ShmError::SynchronizationFailed {
                name,
                reason: format!("open mutex: {err}"),
            });
        }

        let mutex = WindowsMutex { handle, name };
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX - 1);
        match unsafe { WaitForSingleObject(mutex.handle, millis) } {
            WAIT_OBJECT_0 | WAIT_ABANDONED => Ok(mutex),
            WAIT_TIMEOUT => Err(ShmError::SynchronizationFailed {
                name: mutex.name.clone(),
                reason: format!("timed out after {timeout:?}"),
            }),
            _ => Err(ShmError::SynchronizationFailed {
                name: mutex.name.clone(),
                reason: format!("wait: {}", last_os_error()),
            }),
        }
    }

    fn release_named_mutex(&self, mutex: WindowsMutex) -> ShmResult<()> {
        if unsafe { ReleaseMutex(mutex.handle) } == 0 {
            return Err(ShmError::SynchronizationFailed {
                name: mutex.name.clone(),
                reason: format!("release: {}", last_os_error()),
            });
        }
        Ok(())
    }

    fn mutex_created(&self, _mutex: &WindowsMutex) -> bool {
        // A Win32 mutex disappears with its last handle.
        false
    }

    fn remove_named_mutex(&self, key: &str) -> ShmResult<bool> {
        let wname = wide(&ObjectNames::windows(key).mutex);
        let handle = unsafe { OpenMutexW(MUTEX_ALL_ACCESS, 0, wname.as_ptr()) };
        if is_null_handle(handle) {
            return Ok(false);
        }
        unsafe { CloseHandle(handle) };
        Ok(true)
    }
}
