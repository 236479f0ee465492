//! In-memory storage backend for testing.

use crate::backend::{under_prefix, validate_path, StorageBackend};
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// An in-memory file tree.
///
/// This backend keeps every file in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Mirrors that don't need persistence
///
/// # Thread Safety
///
/// This backend is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use dbmirror_storage::{StorageBackend, InMemoryBackend};
///
/// let backend = InMemoryBackend::new();
/// backend.write("posts/a.ini", b"[a]").unwrap();
/// assert_eq!(backend.read("posts/a.ini").unwrap().unwrap(), b"[a]");
/// assert_eq!(backend.list("posts").unwrap(), vec!["posts/a.ini"]);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates a new empty in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every file in the backend.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, Vec<u8>> {
        self.files.read().clone()
    }

    /// Returns the number of files stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    /// Returns true if no files are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }

    /// Removes every file.
    pub fn clear(&self) {
        self.files.write().clear();
    }
}

impl StorageBackend for InMemoryBackend {
    fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        Ok(self.files.read().get(path).cloned())
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        self.files.write().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<bool> {
        validate_path(path)?;
        Ok(self.files.write().remove(path).is_some())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty() {
            validate_path(trimmed)?;
        }
        Ok(self
            .files
            .read()
            .keys()
            .filter(|path| under_prefix(path, trimmed))
            .cloned()
            .collect())
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        validate_path(path)?;
        Ok(self.files.read().contains_key(path))
    }
}
