//! Helpers shared by unit tests

use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Key unique to this process and call, so parallel tests never collide.
pub fn unique_key(tag: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{tag}_{}_{n}", std::process::id())
}
