//! Store error types

use std::path::PathBuf;
use thiserror::Error;

/// Result type for disk store operations
pub type DiskResult<T> = Result<T, DiskCacheError>;

/// Disk store errors
#[derive(Error, Debug)]
pub enum DiskCacheError {
    /// Cache directory could not be created
    #[error("Directory creation failed for {path}: {source}")]
    DirectoryCreationFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Journal or data file read/write failed
    #[error("IO error on {path} ({operation}): {source}")]
    Io {
        path: PathBuf,
        operation: IoOperation,
        source: std::io::Error,
    },

    /// Journal could not be replayed
    #[error("Corrupt journal at {path}: {message}")]
    CorruptJournal { path: PathBuf, message: String },

    /// Store was closed
    #[error("Disk cache is closed")]
    Closed,

    /// Value slot index out of range
    #[error("Value index {index} out of range (value count {value_count})")]
    InvalidIndex { index: usize, value_count: usize },

    /// A first-time entry was committed without writing every slot
    #[error("Newly created entry {key} did not write value for index {index}")]
    MissingValue { key: String, index: usize },

    /// Editor no longer owns the entry it was created for
    #[error("Editor for {key} is no longer current")]
    StaleEditor { key: String },

    /// Invalid argument passed at open
    #[error("Invalid argument {field}: {message}")]
    InvalidArgument { field: String, message: String },
}

/// IO operation type for error context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOperation {
    Read,
    Write,
    Delete,
    Move,
    Sync,
}

impl std::fmt::Display for IoOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IoOperation::Read => write!(f, "read"),
            IoOperation::Write => write!(f, "write"),
            IoOperation::Delete => write!(f, "delete"),
            IoOperation::Move => write!(f, "move"),
            IoOperation::Sync => write!(f, "sync"),
        }
    }
}

impl DiskCacheError {
    /// Create a directory creation failed error
    pub fn directory_creation_failed(path: PathBuf, source: std::io::Error) -> Self {
        DiskCacheError::DirectoryCreationFailed { path, source }
    }

    /// Create an IO error
    pub fn io_error(path: PathBuf, operation: IoOperation, source: std::io::Error) -> Self {
        DiskCacheError::Io {
            path,
            operation,
            source,
        }
    }

    /// Create a corrupt journal error
    pub fn corrupt_journal(path: PathBuf, message: impl Into<String>) -> Self {
        DiskCacheError::CorruptJournal {
            path,
            message: message.into(),
        }
    }

    /// Create an invalid argument error
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        DiskCacheError::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Whether this error came from the journal failing to replay
    pub fn is_corrupt_journal(&self) -> bool {
        matches!(self, DiskCacheError::CorruptJournal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_operation() {
        let err = DiskCacheError::io_error(
            PathBuf::from("/tmp/journal"),
            IoOperation::Write,
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        let message = err.to_string();
        assert!(message.contains("/tmp/journal"));
        assert!(message.contains("(write)"));
        assert!(message.contains("disk full"));
    }

    #[test]
    fn test_corrupt_journal_predicate() {
        let err = DiskCacheError::corrupt_journal(PathBuf::from("journal"), "bad header");
        assert!(err.is_corrupt_journal());
        assert!(!DiskCacheError::Closed.is_corrupt_journal());
    }
}
