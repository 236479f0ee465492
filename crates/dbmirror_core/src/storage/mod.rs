//! Entity storages.
//!
//! One storage per entity type persists snapshots as INI files in the
//! mirror. Layout:
//!
//! ```text
//! <dir>/<id>.ini                              top-level entities
//! <parent dir>/<parent id>/<dir>/<id>.ini     child entities
//! ```
//!
//! [`DirectoryStorage`] does the file work; the variants only decide
//! which rows are persisted and how a change is described.

mod comment;
mod directory;
mod meta;
mod option;
mod post;

pub use comment::CommentStorage;
pub use directory::{decode_snapshot, encode_snapshot, escape_file_name, DirectoryStorage};
pub use meta::MetaStorage;
pub use option::OptionStorage;
pub use post::PostStorage;

use crate::change::{Action, ChangeDescriptor};
use crate::error::CoreResult;
use crate::schema::{DbSchema, EntityType};
use dbmirror_codec::Fields;

/// Persistence of one entity type's snapshots.
///
/// Implementors provide the underlying [`DirectoryStorage`] and may
/// override the persistence predicate and the change description.
pub trait EntityStorage: Send + Sync {
    /// The file-level storage.
    fn directory(&self) -> &DirectoryStorage;

    /// Entity type name.
    fn entity_name(&self) -> &str {
        &self.directory().entity_type().name
    }

    /// Returns false for transient rows that are never mirrored.
    fn should_persist(&self, fields: &Fields) -> bool {
        !self.directory().entity_type().is_ignored(fields)
    }

    /// Describes the change from `old` to `new`; `action` is the generic
    /// create/edit/delete classification.
    fn describe_change(&self, old: Option<&Fields>, new: &Fields, action: Action) -> ChangeDescriptor {
        self.directory().default_description(old, new, action)
    }

    /// Merges `fields` over the stored snapshot and writes it.
    ///
    /// Returns `None` when nothing changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read, encoded, or written.
    fn save(&self, fields: &Fields) -> CoreResult<Option<ChangeDescriptor>> {
        self.directory()
            .save_with(fields, |old, new, action| self.describe_change(old, new, action))
    }

    /// Removes the snapshot identified by `fields`.
    ///
    /// Returns `None` when there was no snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be read or removed.
    fn delete(&self, fields: &Fields) -> CoreResult<Option<ChangeDescriptor>> {
        self.directory()
            .delete_with(fields, |old, new, action| self.describe_change(old, new, action))
    }

    /// Loads the snapshot with the given stable id or natural key.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be decoded.
    fn load(&self, id: &str) -> CoreResult<Option<Fields>> {
        let directory = self.directory();
        match directory.locate(id)? {
            Some(path) => directory.read_snapshot(&path),
            None => Ok(None),
        }
    }

    /// Loads every snapshot of this type, in path order.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be decoded.
    fn load_all(&self) -> CoreResult<Vec<Fields>> {
        let directory = self.directory();
        let mut out = Vec::new();
        for path in directory.list_paths()? {
            if let Some(snapshot) = directory.read_snapshot(&path)? {
                out.push(snapshot);
            }
        }
        Ok(out)
    }

    /// Returns true if a snapshot with this id exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be listed.
    fn exists(&self, id: &str) -> CoreResult<bool> {
        Ok(self.directory().locate(id)?.is_some())
    }
}

/// Returns the entity type whose snapshots live at `path`.
#[must_use]
pub fn entity_for_path<'s>(schema: &'s DbSchema, path: &str) -> Option<&'s EntityType> {
    if !path.ends_with(".ini") {
        return None;
    }
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        [dir, _] => schema
            .entities()
            .find(|e| !e.is_child() && e.directory == *dir),
        [parent_dir, _, dir, _] => schema.entities().find(|e| {
            e.directory == *dir
                && e
                    .parent_entity()
                    .and_then(|p| schema.entity(p))
                    .is_some_and(|p| p.directory == *parent_dir)
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_map_to_entities() {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let name = |p: &str| entity_for_path(&schema, p).map(|e| e.name.clone());
        assert_eq!(name("posts/ab.ini").as_deref(), Some("post"));
        assert_eq!(name("posts/ab/postmeta/cd.ini").as_deref(), Some("postmeta"));
        assert_eq!(name("comments/ab/commentmeta/cd.ini").as_deref(), Some("commentmeta"));
        assert_eq!(name("options/blogname.ini").as_deref(), Some("option"));
        assert_eq!(name("posts/ab/comments/cd.ini"), None);
        assert_eq!(name("posts/ab.txt"), None);
        assert_eq!(name("postmeta/cd.ini"), None);
    }
}
