//! # DbMirror Storage
//!
//! File-tree storage backends for the DbMirror flat-file mirror.
//!
//! Backends are **opaque file stores** addressed by relative `/` paths.
//! They know nothing about snapshots, entity types, or the INI format.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For testing and ephemeral mirrors
//! - [`FileBackend`] - For a mirror directory on disk
//!
//! ## Example
//!
//! ```rust
//! use dbmirror_storage::{StorageBackend, InMemoryBackend};
//!
//! let backend = InMemoryBackend::new();
//! backend.write("options/blogname.ini", b"[blogname]\n").unwrap();
//! assert!(backend.exists("options/blogname.ini").unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::{validate_path, StorageBackend};
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    proptest! {
        #[test]
        fn memory_and_file_backends_agree(
            ops in prop::collection::vec(
                ("[ab]{1}(/[ab]{1}){0,2}\\.ini", prop::option::of("[a-z]{0,8}")),
                1..20,
            )
        ) {
            let dir = tempfile::tempdir().unwrap();
            let file = FileBackend::open(dir.path()).unwrap();
            let memory = InMemoryBackend::new();
            let mut model: BTreeMap<String, String> = BTreeMap::new();

            for (path, data) in ops {
                match data {
                    Some(data) => {
                        file.write(&path, data.as_bytes()).unwrap();
                        memory.write(&path, data.as_bytes()).unwrap();
                        model.insert(path, data);
                    }
                    None => {
                        let expected = model.remove(&path).is_some();
                        prop_assert_eq!(file.remove(&path).unwrap(), expected);
                        prop_assert_eq!(memory.remove(&path).unwrap(), expected);
                    }
                }
            }

            let listed: Vec<String> = model.keys().cloned().collect();
            prop_assert_eq!(file.list("").unwrap(), listed.clone());
            prop_assert_eq!(memory.list("").unwrap(), listed);
        }
    }
}
