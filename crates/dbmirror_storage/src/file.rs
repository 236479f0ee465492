//! File-based storage backend for a mirror directory on disk.

use crate::backend::{under_prefix, validate_path, StorageBackend};
use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Name of the advisory lock file at the mirror root.
const LOCK_FILE: &str = ".lock";

/// A file-based storage backend rooted at a mirror directory.
///
/// Data survives process restarts.
///
/// # Durability
///
/// - `write()` goes to a temporary file, is synced, then renamed into place
/// - `remove()` prunes directories left empty
///
/// # Thread Safety
///
/// Writers in this process are serialized by an internal lock. Other
/// processes are kept out by an exclusive lock on `.lock` held for the
/// lifetime of the backend. Entries starting with `.` are never listed.
///
/// # Example
///
/// ```no_run
/// use dbmirror_storage::{StorageBackend, FileBackend};
/// use std::path::Path;
///
/// let backend = FileBackend::open(Path::new("mirror")).unwrap();
/// backend.write("posts/abc.ini", b"[abc]\n").unwrap();
/// ```
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    write_lock: Mutex<()>,
    _lock_file: File,
}

impl FileBackend {
    /// Opens or creates a mirror directory at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - `root` exists but is not a directory
    /// - Another process holds the lock (returns `Locked`)
    pub fn open(root: &Path) -> StorageResult<Self> {
        if !root.exists() {
            fs::create_dir_all(root)?;
        }
        if !root.is_dir() {
            return Err(StorageError::invalid_path(
                root.display().to_string(),
                "mirror root is not a directory",
            ));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked);
        }

        Ok(Self {
            root: root.to_path_buf(),
            write_lock: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the mirror root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn full_path(&self, path: &str) -> PathBuf {
        path.split('/').fold(self.root.clone(), |acc, seg| acc.join(seg))
    }

    fn collect(&self, dir: &Path, rel: &str, out: &mut Vec<String>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let child = if rel.is_empty() {
                name
            } else {
                format!("{rel}/{name}")
            };
            if entry.file_type()?.is_dir() {
                self.collect(&entry.path(), &child, out)?;
            } else {
                out.push(child);
            }
        }
        Ok(())
    }

    fn prune_empty_dirs(&self, mut dir: Option<&Path>) {
        while let Some(current) = dir {
            if current == self.root {
                break;
            }
            // Fails for non-empty directories, which ends the walk.
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}

impl StorageBackend for FileBackend {
    fn read(&self, path: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_path(path)?;
        match fs::read(self.full_path(path)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_path(path)?;
        let _guard = self.write_lock.lock();

        let target = self.full_path(path);
        let parent = target.parent().unwrap_or(&self.root);
        fs::create_dir_all(parent)?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = parent.join(format!(".{file_name}.tmp"));

        let mut file = File::create(&temp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn remove(&self, path: &str) -> StorageResult<bool> {
        validate_path(path)?;
        let _guard = self.write_lock.lock();

        let target = self.full_path(path);
        match fs::remove_file(&target) {
            Ok(()) => {
                self.prune_empty_dirs(target.parent());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let trimmed = prefix.trim_end_matches('/');
        if !trimmed.is_empty() {
            validate_path(trimmed)?;
        }

        let start = if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.full_path(trimmed)
        };
        if !start.is_dir() {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        self.collect(&start, trimmed, &mut out)?;
        out.retain(|path| under_prefix(path, trimmed));
        out.sort();
        Ok(out)
    }

    fn exists(&self, path: &str) -> StorageResult<bool> {
        validate_path(path)?;
        Ok(self.full_path(path).is_file())
    }
}
