//! Segment key validation and kernel object naming.
//!
//! A segment key names one memory object and one named mutex. Both names are
//! derived here so every process that agrees on the key agrees on the names.

use crate::consts::{MAX_KEY_LEN, MUTEX_SUFFIX, OBJECT_PREFIX};
use thiserror::Error;

/// Reasons a segment key is rejected before any OS interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// The key is the empty string.
    #[error("segment key must not be empty")]
    Empty,

    /// The key exceeds [`MAX_KEY_LEN`] bytes.
    #[error("segment key is {len} bytes long (maximum {MAX_KEY_LEN})")]
    TooLong {
        /// Length of the rejected key in bytes.
        len: usize,
    },

    /// The key contains a character that is not valid in an object name.
    #[error("segment key contains invalid character {ch:?}")]
    InvalidChar {
        /// The offending character.
        ch: char,
    },
}

/// Validate a caller-supplied segment key.
///
/// # Errors
///
/// Returns [`KeyError`] if the key is empty, longer than [`MAX_KEY_LEN`]
/// bytes, or contains `/`, `\` or NUL.
pub fn validate_key(key: &str) -> Result<(), KeyError> {
    if key.is_empty() {
        return Err(KeyError::Empty);
    }
    if key.len() > MAX_KEY_LEN {
        return Err(KeyError::TooLong { len: key.len() });
    }
    if let Some(ch) = key.chars().find(|c| matches!(c, '/' | '\\' | '\0')) {
        return Err(KeyError::InvalidChar { ch });
    }
    Ok(())
}

/// Kernel object names derived from one segment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectNames {
    /// Name of the memory object.
    pub memory: String,
    /// Name of the structural mutex.
    pub mutex: String,
}

impl ObjectNames {
    /// POSIX names: `/shmseg.<key>` and `/shmseg.<key>.lock`.
    pub fn posix(key: &str) -> Self {
        let base = format!("/{OBJECT_PREFIX}{key}");
        Self {
            mutex: format!("{base}{MUTEX_SUFFIX}"),
            memory: base,
        }
    }

    /// Windows names in the session namespace: `shmseg.<key>` and `shmseg.<key>.lock`.
    pub fn windows(key: &str) -> Self {
        let base = format!("{OBJECT_PREFIX}{key}");
        Self {
            mutex: format!("{base}{MUTEX_SUFFIX}"),
            memory: base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_keys() {
        assert!(validate_key("buf-a").is_ok());
        assert!(validate_key("skyline_16_1743670121111").is_ok());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN)).is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert_eq!(validate_key(""), Err(KeyError::Empty));
    }

    #[test]
    fn test_long_key_rejected() {
        let key = "k".repeat(MAX_KEY_LEN + 1);
        assert_eq!(
            validate_key(&key),
            Err(KeyError::TooLong {
                len: MAX_KEY_LEN + 1
            })
        );
    }

    #[test]
    fn test_separator_characters_rejected() {
        assert_eq!(validate_key("a/b"), Err(KeyError::InvalidChar { ch: '/' }));
        assert_eq!(validate_key("a\\b"), Err(KeyError::InvalidChar { ch: '\\' }));
        assert_eq!(validate_key("a\0b"), Err(KeyError::InvalidChar { ch: '\0' }));
    }

    #[test]
    fn test_posix_names() {
        let names = ObjectNames::posix("buf-a");
        assert_eq!(names.memory, "/shmseg.buf-a");
        assert_eq!(names.mutex, "/shmseg.buf-a.lock");
    }

    #[test]
    fn test_windows_names() {
        let names = ObjectNames::windows("buf-a");
        assert_eq!(names.memory, "shmseg.buf-a");
        assert_eq!(names.mutex, "shmseg.buf-a.lock");
        assert_ne!(names.memory, names.mutex);
    }
}
