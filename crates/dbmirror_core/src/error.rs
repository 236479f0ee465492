//! Error types for DbMirror core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in DbMirror core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] dbmirror_storage::StorageError),

    /// Snapshot codec error.
    #[error("codec error: {0}")]
    Codec(#[from] dbmirror_codec::CodecError),

    /// JSON (schema or config) could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The entity schema is inconsistent.
    #[error("invalid schema: {message}")]
    InvalidSchema {
        /// Description of the problem.
        message: String,
    },

    /// An entity type name is not part of the schema.
    #[error("unknown entity type: {name}")]
    UnknownEntity {
        /// The requested name.
        name: String,
    },

    /// A snapshot file or field map is not usable.
    #[error("invalid snapshot {location}: {message}")]
    InvalidSnapshot {
        /// Path or entity the snapshot belongs to.
        location: String,
        /// Description of the problem.
        message: String,
    },

    /// A string is not a valid stable identifier.
    #[error("invalid stable id: {0:?}")]
    InvalidStableId(String),

    /// The backing database rejected an operation.
    #[error("database error: {message}")]
    Database {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Create an invalid schema error.
    pub fn invalid_schema(message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            message: message.into(),
        }
    }

    /// Create an unknown entity error.
    pub fn unknown_entity(name: impl Into<String>) -> Self {
        Self::UnknownEntity { name: name.into() }
    }

    /// Create an invalid snapshot error.
    pub fn invalid_snapshot(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }
}
