//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while synchronizing or reverting.
///
/// A rejected revert is not an error; see
/// [`RevertStatus`](crate::RevertStatus).
#[derive(Error, Debug)]
pub enum SyncError {
    /// Schema, identifier, storage-layer or database error.
    #[error("core error: {0}")]
    Core(#[from] dbmirror_core::CoreError),

    /// Mirror backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dbmirror_storage::StorageError),

    /// Snapshot codec error.
    #[error("codec error: {0}")]
    Codec(#[from] dbmirror_codec::CodecError),

    /// The history log is in an unusable state.
    #[error("history error: {message}")]
    History {
        /// Description of the problem.
        message: String,
    },

    /// A revision id is not in the history.
    #[error("unknown revision: {0}")]
    UnknownRevision(String),

    /// The synchronization queue did not reach a fixed point.
    #[error("synchronization did not converge after {passes} passes")]
    DidNotConverge {
        /// Tasks executed before giving up.
        passes: usize,
    },

    /// Another revert is running.
    #[error("a revert is already in progress")]
    RevertInProgress,
}

impl SyncError {
    /// Creates a history error.
    pub fn history(message: impl Into<String>) -> Self {
        Self::History {
            message: message.into(),
        }
    }
}
