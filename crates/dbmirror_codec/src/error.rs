//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The top-level value is not a map of sections.
    #[error("INI serializer only supports sectioned data")]
    NotSectioned,

    /// A section has no fields.
    #[error("empty sections are not supported: [{section}]")]
    EmptySection {
        /// Name of the empty section.
        section: String,
    },

    /// A key or section name cannot be represented.
    #[error("invalid key {key:?}: {message}")]
    InvalidKey {
        /// The offending key.
        key: String,
        /// Why it was rejected.
        message: String,
    },

    /// A value cannot be represented (nested lists or maps).
    #[error("unsupported value for key {key:?}: {message}")]
    UnsupportedValue {
        /// The key holding the value.
        key: String,
        /// Why it was rejected.
        message: String,
    },

    /// A line could not be parsed.
    #[error("malformed line {line}: {message}")]
    MalformedLine {
        /// One-based line number.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// A key-value pair appeared before any section header.
    #[error("line {line}: value outside of any section")]
    ValueOutsideSection {
        /// One-based line number.
        line: usize,
    },

    /// A quoted string is missing its closing quote.
    #[error("line {line}: unterminated string")]
    UnterminatedString {
        /// One-based line number.
        line: usize,
    },

    /// The same key appears twice in one section.
    #[error("duplicate key {key:?} in section [{section}]")]
    DuplicateKey {
        /// Section containing the duplicate.
        section: String,
        /// The duplicated key.
        key: String,
    },

    /// The same section header appears twice.
    #[error("duplicate section [{section}]")]
    DuplicateSection {
        /// The duplicated section name.
        section: String,
    },
}

impl CodecError {
    /// Create an empty section error.
    pub fn empty_section(section: impl Into<String>) -> Self {
        Self::EmptySection {
            section: section.into(),
        }
    }

    /// Create an invalid key error.
    pub fn invalid_key(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported value error.
    pub fn unsupported_value(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UnsupportedValue {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a malformed line error.
    pub fn malformed_line(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedLine {
            line,
            message: message.into(),
        }
    }
}
