//! Error types for shared memory segment operations

use common::naming::KeyError;
use thiserror::Error;

/// Errors that can occur during shared memory segment operations
#[derive(Error, Debug)]
pub enum ShmError {
    /// Bad call shape; no OS interaction was attempted
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// What was wrong with the arguments
        reason: String,
    },

    /// The named memory object could not be created or opened
    #[error("Failed to create shared memory object {name}: {source}")]
    ResourceCreationFailed {
        /// Kernel object name
        name: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The object exists but could not be mapped into this process
    #[error("Failed to map shared memory object {name}: {source}")]
    MappingFailed {
        /// Kernel object name
        name: String,
        /// Underlying OS error
        source: std::io::Error,
    },

    /// The structural mutex could not be created, opened or acquired in time
    #[error("Synchronization failed on {name}: {reason}")]
    SynchronizationFailed {
        /// Mutex name
        name: String,
        /// What went wrong
        reason: String,
    },

    /// Open was requested on a key that has no segment
    #[error("Shared memory segment '{key}' does not exist; create it first")]
    SegmentNotFound {
        /// Segment key
        key: String,
    },

    /// The object exists but carries no usable header
    #[error("Segment '{key}' has an invalid header: {reason}")]
    InvalidHeader {
        /// Segment key
        key: String,
        /// Why the header was rejected
        reason: String,
    },

    /// Wrapping category for failures of the create operation
    #[error("Failed to create shared memory '{key}': {source}")]
    SegmentCreation {
        /// Segment key
        key: String,
        /// Underlying failure
        source: Box<ShmError>,
    },

    /// Wrapping category for failures of the open operation
    #[error("Failed to open shared memory '{key}': {source}")]
    SegmentOpen {
        /// Segment key
        key: String,
        /// Underlying failure
        source: Box<ShmError>,
    },

    /// Wrapping category for failures of the remove operation
    #[error("Failed to remove shared memory '{key}': {source}")]
    SegmentRemoval {
        /// Segment key
        key: String,
        /// Underlying failure
        source: Box<ShmError>,
    },

    /// Uncategorized native failure caught at the operation boundary
    #[error("{operation} failed: {message}")]
    Operation {
        /// Operation name
        operation: &'static str,
        /// Original failure message
        message: String,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },
}

impl ShmError {
    /// Build an `InvalidArgument` error.
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// True when the error (or the failure it wraps) means the segment does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::SegmentNotFound { .. } => true,
            Self::SegmentCreation { source, .. }
            | Self::SegmentOpen { source, .. }
            | Self::SegmentRemoval { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for call-shape errors that never reached the OS.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument { .. })
    }
}

impl From<KeyError> for ShmError {
    fn from(err: KeyError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

/// Result type for shared memory operations
pub type ShmResult<T> = Result<T, ShmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_asks_to_create() {
        let err = ShmError::SegmentNotFound {
            key: "buf-a".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("buf-a"));
        assert!(text.contains("create it first"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_wrapped_not_found_is_detected() {
        let err = ShmError::SegmentOpen {
            key: "k".to_string(),
            source: Box::new(ShmError::SegmentNotFound {
                key: "k".to_string(),
            }),
        };
        assert!(err.is_not_found());
        assert!(!err.is_invalid_argument());
    }

    #[test]
    fn test_key_error_maps_to_invalid_argument() {
        let err: ShmError = KeyError::Empty.into();
        assert!(err.is_invalid_argument());
        assert!(err.to_string().contains("must not be empty"));
    }
}
