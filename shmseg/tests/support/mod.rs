//! Helpers shared by the integration tests

#![allow(dead_code)]

use shmseg::{SharedMemory, ShmConfig};
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Key unique to this test process and call.
pub fn unique_key(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("it_{tag}_{}_{n}", std::process::id())
}

/// Service with a short lock timeout so a stuck mutex fails fast.
pub fn service() -> SharedMemory {
    let mut config = ShmConfig::default();
    config.segments.lock_timeout_ms = 1_000;
    SharedMemory::new(&config)
}

/// Removes the segment when dropped, so failing tests do not leak objects.
pub struct Cleanup<'a> {
    pub shm: &'a SharedMemory,
    pub key: String,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        let _ = self.shm.remove(&self.key);
    }
}
