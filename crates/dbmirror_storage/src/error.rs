//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A path is not a valid relative mirror path.
    #[error("invalid path {path:?}: {message}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// Why it was rejected.
        message: String,
    },

    /// Another process holds the mirror directory lock.
    #[error("mirror directory is locked by another process")]
    Locked,
}

impl StorageError {
    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }
}
