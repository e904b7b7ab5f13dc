//! POSIX shared memory implementation using `shm_open` and named semaphores.
//!
//! The memory object is `/shmseg.<key>`, sized with `ftruncate` and mapped
//! `MAP_SHARED`. The structural mutex is the named semaphore
//! `/shmseg.<key>.lock` with an initial count of one. Acquisition polls
//! `sem_trywait` until a deadline, since `sem_timedwait` is not available on
//! every Unix.

use crate::error::{ShmError, ShmResult};
use crate::platform::{Backend, Mapping, last_os_error};
use common::naming::ObjectNames;
use common::prelude::DEFAULT_LOCK_RETRY;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap, shm_open, shm_unlink};
use nix::sys::stat::Mode;
use std::ffi::{CStr, CString};
use std::fs::File;
use std::num::NonZeroUsize;
use std::os::fd::{IntoRawFd, RawFd};
use std::ptr::NonNull;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Owner read/write only.
const OBJECT_MODE: u32 = 0o600;

/// Floor for the `sem_trywait` polling interval.
const MIN_LOCK_RETRY: Duration = Duration::from_millis(1);

/// POSIX backend.
#[derive(Debug, Clone, Copy)]
pub struct PosixBackend {
    /// Sleep between `sem_trywait` attempts
    lock_retry: Duration,
}

impl PosixBackend {
    /// Backend polling the structural semaphore every `lock_retry`.
    ///
    /// Intervals below one millisecond are raised to one millisecond.
    pub fn new(lock_retry: Duration) -> Self {
        Self {
            lock_retry: lock_retry.max(MIN_LOCK_RETRY),
        }
    }

    fn create_object(&self, name: &str, total_size: usize) -> ShmResult<Mapping<RawFd>> {
        let fd = shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::from_bits_truncate(OBJECT_MODE as _),
        )
        .map_err(|e| ShmError::ResourceCreationFailed {
            name: name.to_string(),
            source: e.into(),
        })?;
        let file = File::from(fd);

        // From here on the object exists; any failure unlinks it again.
        let mapped = file
            .set_len(total_size as u64)
            .map_err(|source| ShmError::ResourceCreationFailed {
                name: name.to_string(),
                source,
            })
            .and_then(|()| map_shared(name, &file, total_size));

        match mapped {
            Ok(address) => {
                trace!(name, total_size, "created and mapped shm object");
                Ok(Mapping {
                    handle: file.into_raw_fd(),
                    address,
                    len: total_size,
                })
            }
            Err(e) => {
                drop(file);
                if let Err(unlink_err) = shm_unlink(name) {
                    debug!(name, error = %unlink_err, "unlink after failed create");
                }
                Err(e)
            }
        }
    }

    fn open_object(&self, key: &str, name: &str) -> ShmResult<Mapping<RawFd>> {
        let fd = match shm_open(name, OFlag::O_RDWR, Mode::empty()) {
            Ok(fd) => fd,
            Err(Errno::ENOENT) => {
                return Err(ShmError::SegmentNotFound {
                    key: key.to_string(),
                });
            }
            Err(e) => {
                return Err(ShmError::ResourceCreationFailed {
                    name: name.to_string(),
                    source: e.into(),
                });
            }
        };
        let file = File::from(fd);

        let len = file
            .metadata()
            .map_err(|source| ShmError::MappingFailed {
                name: name.to_string(),
                source,
            })?
            .len();
        let len = usize::try_from(len).map_err(|_| ShmError::MappingFailed {
            name: name.to_string(),
            source: std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("object length {len} does not fit in memory"),
            ),
        })?;

        let address = map_shared(name, &file, len)?;
        trace!(name, len, "opened and mapped shm object");
        Ok(Mapping {
            handle: file.into_raw_fd(),
            address,
            len,
        })
    }
}

impl Default for PosixBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_RETRY)
    }
}

fn map_shared(name: &str, file: &File, len: usize) -> ShmResult<NonNull<u8>> {
    let length = NonZeroUsize::new(len).ok_or_else(|| ShmError::MappingFailed {
        name: name.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "object has zero length"),
    })?;

    let address = unsafe {
        mmap(
            None,
            length,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            file,
            0,
        )
    }
    .map_err(|e| ShmError::MappingFailed {
        name: name.to_string(),
        source: e.into(),
    })?;

    Ok(address.cast::<u8>())
}

impl Backend for PosixBackend {
    type Handle = RawFd;
    type Mutex = PosixMutex;

    fn create_or_open(
        &self,
        key: &str,
        create: bool,
        total_size: usize,
    ) -> ShmResult<Mapping<RawFd>> {
        let names = ObjectNames::posix(key);
        if create {
            self.create_object(&names.memory, total_size)
        } else {
            self.open_object(key, &names.memory)
        }
    }

    fn unmap(&self, address: NonNull<u8>, len: usize) -> ShmResult<()> {
        unsafe { munmap(address.cast(), len) }.map_err(|e| ShmError::Io { source: e.into() })
    }

    fn close_handle(&self, handle: RawFd) -> ShmResult<()> {
        if unsafe { libc::close(handle) } == -1 {
            return Err(ShmError::Io {
                source: last_os_error(),
            });
        }
        Ok(())
    }

    fn remove_named_object(&self, key: &str) -> ShmResult<bool> {
        let names = ObjectNames::posix(key);
        match shm_unlink(names.memory.as_str()) {
            Ok(()) => Ok(true),
            Err(Errno::ENOENT) => Ok(false),
            Err(e) => Err(ShmError::Io { source: e.into() }),
        }
    }

    fn acquire_named_mutex(
        &self,
        key: &str,
        create: bool,
        timeout: Duration,
    ) -> ShmResult<PosixMutex> {
        let name = ObjectNames::posix(key).mutex;
        let c_name = CString::new(name.clone())
            .map_err(|e| ShmError::invalid_argument(format!("invalid mutex name: {e}")))?;

        let mutex = open_semaphore(key, &name, &c_name, create)?;
        let err = match mutex.wait(timeout, self.lock_retry) {
            Ok(()) => return Ok(mutex),
            Err(e) if !create || mutex.created => return Err(e),
            Err(e) => e,
        };

        // A holder that died never posts, so the count stays at zero. Create
        // replaces such a semaphore once instead of failing forever.
        warn!(name = %name, error = %err, "replacing stale structural semaphore");
        drop(mutex);
        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == -1 {
            let unlink_err = last_os_error();
            if unlink_err.raw_os_error() != Some(libc::ENOENT) {
                return Err(ShmError::SynchronizationFailed {
                    name,
                    reason: format!("sem_unlink: {unlink_err}"),
                });
            }
        }

        let fresh = open_semaphore(key, &name, &c_name, true)?;
        fresh.wait(timeout, self.lock_retry)?;
        Ok(fresh)
    }

    fn release_named_mutex(&self, mutex: PosixMutex) -> ShmResult<()> {
        if unsafe { libc::sem_post(mutex.sem.as_ptr()) } == -1 {
            return Err(ShmError::SynchronizationFailed {
                name: mutex.name.clone(),
                reason: format!("sem_post: {}", last_os_error()),
            });
        }
        Ok(())
    }

    fn mutex_created(&self, mutex: &PosixMutex) -> bool {
        mutex.created
    }

    fn remove_named_mutex(&self, key: &str) -> ShmResult<bool> {
        let name = ObjectNames::posix(key).mutex;
        let c_name = CString::new(name.clone())
            .map_err(|e| ShmError::invalid_argument(format!("invalid mutex name: {e}")))?;

        if unsafe { libc::sem_unlink(c_name.as_ptr()) } == 0 {
            return Ok(true);
        }
        let err = last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(false)
        } else {
            Err(ShmError::SynchronizationFailed {
                name,
                reason: format!("sem_unlink: {err}"),
            })
        }
    }
}

/// Open the semaphore `name`, creating it with a count of one when `create`.
fn open_semaphore(key: &str, name: &str, c_name: &CStr, create: bool) -> ShmResult<PosixMutex> {
    let mode = OBJECT_MODE as libc::c_uint;
    let (sem, created) = unsafe {
        if create {
            let sem = libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                mode,
                1 as libc::c_uint,
            );
            if sem == libc::SEM_FAILED && last_os_error().raw_os_error() == Some(libc::EEXIST) {
                let sem = libc::sem_open(c_name.as_ptr(), libc::O_CREAT, mode, 1 as libc::c_uint);
                (sem, false)
            } else {
                (sem, true)
            }
        } else {
            (libc::sem_open(c_name.as_ptr(), 0), false)
        }
    };

    if sem == libc::SEM_FAILED {
        let err = last_os_error();
        if !create && err.raw_os_error() == Some(libc::ENOENT) {
            return Err(ShmError::SegmentNotFound {
                key: key.to_string(),
            });
        }
        return Err(ShmError::SynchronizationFailed {
            name: name.to_string(),
            reason: format!("sem_open: {err}"),
        });
    }

    let Some(sem) = NonNull::new(sem) else {
        return Err(ShmError::SynchronizationFailed {
            name: name.to_string(),
            reason: "sem_open returned null".to_string(),
        });
    };
    if created {
        trace!(name, "semaphore created");
    }
    Ok(PosixMutex {
        sem,
        name: name.to_string(),
        created,
    })
}

/// An open named semaphore. Closed on drop.
#[derive(Debug)]
pub struct PosixMutex {
    sem: NonNull<libc::sem_t>,
    name: String,
    /// This open created the semaphore
    created: bool,
}

impl PosixMutex {
    fn wait(&self, timeout: Duration, retry: Duration) -> ShmResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if unsafe { libc::sem_trywait(self.sem.as_ptr()) } == 0 {
                return Ok(());
            }

            let err = last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => {}
                _ => {
                    return Err(ShmError::SynchronizationFailed {
                        name: self.name.clone(),
                        reason: format!("sem_trywait: {err}"),
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ShmError::SynchronizationFailed {
                    name: self.name.clone(),
                    reason: format!("timed out after {timeout:?}"),
                });
            }
            thread::sleep(retry.min(deadline - now));
        }
    }
}

impl Drop for PosixMutex {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem.as_ptr());
        }
    }
}

// SAFETY: a sem_t opened with sem_open is a process-shared kernel-backed
// object; any thread may post, wait on or close it.
unsafe impl Send for PosixMutex {}
