//! Process-local map from segment key to live payload addresses

use parking_lot::Mutex;
use std::collections::HashMap;
use std::ptr::NonNull;

/// Lookup service for payload addresses of segments mapped in this process.
///
/// A key can be mapped more than once (an `open` next to a `create`, or a
/// re-create while an older view is still alive), so each key holds a stack
/// of addresses. [`resolve`](Self::resolve) returns the most recent one and
/// [`unregister`](Self::unregister) removes exactly the address it is given,
/// which keeps an older manager's teardown from evicting a newer entry.
#[derive(Debug, Default)]
pub struct AddressRegistry {
    entries: Mutex<HashMap<String, Vec<usize>>>,
}

impl AddressRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `payload` as the current address for `key`.
    pub fn register(&self, key: &str, payload: NonNull<u8>) {
        self.entries
            .lock()
            .entry(key.to_string())
            .or_default()
            .push(payload.as_ptr() as usize);
    }

    /// Remove `payload` from the entries of `key`.
    ///
    /// Returns false when that address was not registered for `key`.
    pub fn unregister(&self, key: &str, payload: NonNull<u8>) -> bool {
        let addr = payload.as_ptr() as usize;
        let mut entries = self.entries.lock();
        let Some(stack) = entries.get_mut(key) else {
            return false;
        };
        let Some(pos) = stack.iter().rposition(|&a| a == addr) else {
            return false;
        };
        stack.remove(pos);
        if stack.is_empty() {
            entries.remove(key);
        }
        true
    }

    /// Most recently registered payload address for `key`.
    pub fn resolve(&self, key: &str) -> Option<NonNull<u8>> {
        self.entries
            .lock()
            .get(key)
            .and_then(|stack| stack.last().copied())
            .and_then(|addr| NonNull::new(addr as *mut u8))
    }

    /// Whether `key` has at least one live mapping.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Number of keys with at least one live mapping.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Keys with at least one live mapping, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
