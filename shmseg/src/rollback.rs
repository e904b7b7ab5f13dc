//! Undo stack for the segment initialisation transition

use crate::platform::Backend;
use std::ptr::NonNull;
use tracing::{debug, warn};

/// One completed sub-step that must be reversed if a later step fails.
#[derive(Debug)]
pub enum Undo<B: Backend> {
    /// Unlink the structural mutex created for this key
    RemoveMutex(String),
    /// Unlink the kernel object created for this key
    RemoveObject(String),
    /// Close an open object handle
    CloseHandle(B::Handle),
    /// Unmap a mapped view
    Unmap {
        /// View base
        address: NonNull<u8>,
        /// View length
        len: usize,
    },
}

/// Stack of [`Undo`] steps, unwound in reverse push order.
///
/// Callers push a step right after the sub-step it reverses succeeds, then
/// either [`commit`](Self::commit) once the whole transition is done or
/// [`unwind`](Self::unwind) on failure. Dropping an uncommitted stack unwinds
/// it as well, so an early return or a panic never leaks a half-built
/// segment. Undo failures are logged and do not stop the remaining steps.
pub struct Rollback<'a, B: Backend> {
    backend: &'a B,
    key: &'a str,
    steps: Vec<Undo<B>>,
}

impl<'a, B: Backend> Rollback<'a, B> {
    pub fn new(backend: &'a B, key: &'a str) -> Self {
        Self {
            backend,
            key,
            steps: Vec::with_capacity(4),
        }
    }

    pub fn push(&mut self, step: Undo<B>) {
        self.steps.push(step);
    }

    /// Keep everything that was done.
    pub fn commit(mut self) {
        self.steps.clear();
    }

    /// Reverse every pending step, newest first.
    pub fn unwind(&mut self) {
        if !self.steps.is_empty() {
            debug!(key = self.key, steps = self.steps.len(), "rolling back");
        }
        while let Some(step) = self.steps.pop() {
            let result = match &step {
                Undo::RemoveMutex(key) => self.backend.remove_named_mutex(key).map(drop),
                Undo::RemoveObject(key) => self.backend.remove_named_object(key).map(drop),
                Undo::CloseHandle(handle) => self.backend.close_handle(*handle),
                Undo::Unmap { address, len } => self.backend.unmap(*address, *len),
            };
            if let Err(e) = result {
                warn!(key = self.key, ?step, error = %e, "rollback step failed");
            }
        }
    }
}

impl<B: Backend> Drop for Rollback<'_, B> {
    fn drop(&mut self) {
        self.unwind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::NativeBackend;
    use crate::test_support::unique_key;
    use std::time::Duration;

    #[test]
    fn test_unwind_releases_created_object() {
        let backend = NativeBackend::default();
        let key = unique_key("rollback_unwind");

        let mapping = backend.create_or_open(&key, true, 128).unwrap();
        let mut rollback = Rollback::new(&backend, &key);
        rollback.push(Undo::RemoveObject(key.clone()));
        rollback.push(Undo::CloseHandle(mapping.handle));
        rollback.push(Undo::Unmap {
            address: mapping.address,
            len: mapping.len,
        });
        assert_eq!(rollback.steps.len(), 3);

        rollback.unwind();
        assert!(rollback.steps.is_empty());
        assert!(!backend.remove_named_object(&key).unwrap());
    }

    #[test]
    fn test_drop_without_commit_unwinds() {
        let backend = NativeBackend::default();
        let key = unique_key("rollback_drop");

        let mapping = backend.create_or_open(&key, true, 64).unwrap();
        {
            let mut rollback = Rollback::new(&backend, &key);
            rollback.push(Undo::RemoveObject(key.clone()));
            rollback.push(Undo::CloseHandle(mapping.handle));
            rollback.push(Undo::Unmap {
                address: mapping.address,
                len: mapping.len,
            });
        }
        assert!(!backend.remove_named_object(&key).unwrap());
    }

    #[test]
    fn test_unwind_removes_created_mutex() {
        let backend = NativeBackend::default();
        let key = unique_key("rollback_mutex");

        let mutex = backend
            .acquire_named_mutex(&key, true, Duration::from_millis(50))
            .unwrap();
        let mut rollback = Rollback::new(&backend, &key);
        rollback.push(Undo::RemoveMutex(key.clone()));
        rollback.unwind();
        backend.release_named_mutex(mutex).unwrap();

        assert!(!backend.remove_named_mutex(&key).unwrap());
    }

    #[test]
    fn test_commit_keeps_resources() {
        let backend = NativeBackend::default();
        let key = unique_key("rollback_commit");

        let mapping = backend.create_or_open(&key, true, 64).unwrap();
        let mut rollback = Rollback::new(&backend, &key);
        rollback.push(Undo::RemoveObject(key.clone()));
        rollback.commit();

        assert!(backend.remove_named_object(&key).unwrap());
        backend.unmap(mapping.address, mapping.len).unwrap();
        backend.close_handle(mapping.handle).unwrap();
    }
}
