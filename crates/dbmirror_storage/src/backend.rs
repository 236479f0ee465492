//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// A file-tree storage backend for the mirror.
///
/// Backends are **opaque file stores**. Paths are relative, `/`-separated
/// and never contain `.` or `..` segments. The backend does not interpret
/// file contents.
///
/// # Invariants
///
/// - `read` returns exactly the bytes last written at that path
/// - `write` replaces the whole file and creates missing directories
/// - `list` returns paths in lexicographic order
/// - Backends must be `Send + Sync` for concurrent access
///
/// # Implementors
///
/// - [`super::InMemoryBackend`] - For testing
/// - [`super::FileBackend`] - For a mirror directory on disk
pub trait StorageBackend: Send + Sync {
    /// Reads the file at `path`, or `None` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Writes `data` to `path`, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()>;

    /// Removes the file at `path`.
    ///
    /// Returns `true` if a file was removed. Directories left empty are
    /// pruned.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn remove(&self, path: &str) -> StorageResult<bool>;

    /// Lists every file below the directory `prefix`, recursively.
    ///
    /// An empty prefix lists the whole tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is invalid or an I/O error occurs.
    fn list(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Returns whether a file exists at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is invalid or an I/O error occurs.
    fn exists(&self, path: &str) -> StorageResult<bool> {
        Ok(self.read(path)?.is_some())
    }
}

/// Checks that `path` is a clean relative file path.
///
/// # Errors
///
/// Returns [`StorageError::InvalidPath`] for empty, absolute, or
/// non-normalized paths.
pub fn validate_path(path: &str) -> StorageResult<()> {
    if path.is_empty() {
        return Err(StorageError::invalid_path(path, "path is empty"));
    }
    if path.starts_with('/') || path.contains('\\') {
        return Err(StorageError::invalid_path(path, "path must be relative and use '/'"));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(StorageError::invalid_path(path, "path is not normalized"));
        }
    }
    Ok(())
}

/// Returns whether `path` lies below the directory `prefix`.
pub(crate) fn under_prefix(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    prefix.is_empty()
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_paths() {
        assert!(validate_path("posts/abc.ini").is_ok());
        assert!(validate_path("a").is_ok());
    }

    #[test]
    fn invalid_paths() {
        for path in ["", "/abs", "a//b", "a/./b", "../up", "a/", "a\\b"] {
            assert!(
                matches!(validate_path(path), Err(StorageError::InvalidPath { .. })),
                "{path:?} accepted"
            );
        }
    }

    #[test]
    fn prefix_matching() {
        assert!(under_prefix("posts/a.ini", "posts"));
        assert!(under_prefix("posts/a.ini", "posts/"));
        assert!(under_prefix("posts/a.ini", ""));
        assert!(!under_prefix("postmeta/a.ini", "post"));
        assert!(!under_prefix("posts", "posts"));
    }
}
