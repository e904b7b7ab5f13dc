//! Segment constants.
//!
//! These constants define the fundamental parameters of the shmseg segment
//! format and its lifecycle locking. They are the single source of truth;
//! all other crates import from here.

/// Current segment header layout version.
///
/// Written once into every header at creation time. Readers refuse to expose
/// a segment whose header carries a different value.
pub const FORMAT_VERSION: i32 = 1;

/// Maximum length of a segment key in bytes.
///
/// POSIX limits object names to `NAME_MAX` (255) including the leading slash
/// and the semaphore `sem.` prefix; 200 leaves room for the shmseg prefix and
/// the lock suffix.
pub const MAX_KEY_LEN: usize = 200;

/// Prefix applied to every kernel object name derived from a key.
pub const OBJECT_PREFIX: &str = "shmseg.";

/// Suffix distinguishing the named mutex from the memory object.
pub const MUTEX_SUFFIX: &str = ".lock";

/// Default bounded wait for the structural mutex, in milliseconds.
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Default polling interval while waiting for the structural mutex, in milliseconds.
pub const DEFAULT_LOCK_RETRY_MS: u64 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_version_is_positive() {
        assert!(FORMAT_VERSION > 0);
    }

    #[test]
    fn test_key_limit_leaves_room_for_names() {
        let longest = 1 + OBJECT_PREFIX.len() + MAX_KEY_LEN + MUTEX_SUFFIX.len();
        assert!(longest + "sem.".len() <= 255);
    }

    #[test]
    fn test_lock_defaults() {
        assert!(DEFAULT_LOCK_RETRY_MS > 0);
        assert!(DEFAULT_LOCK_RETRY_MS < DEFAULT_LOCK_TIMEOUT_MS);
    }
}
