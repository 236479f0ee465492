//! Metadata of posts, comments, users and terms.

use super::{DirectoryStorage, EntityStorage};
use crate::change::{Action, ChangeDescriptor};
use crate::error::CoreResult;
use crate::schema::DbSchema;
use dbmirror_codec::{Fields, LineEnding};
use dbmirror_storage::StorageBackend;
use std::sync::Arc;

/// Storage of a child metadata entity (`postmeta`, `usermeta`, ...).
pub struct MetaStorage {
    directory: DirectoryStorage,
}

impl MetaStorage {
    /// Creates the storage of the metadata entity `entity`.
    ///
    /// # Errors
    ///
    /// Returns an error if `entity` or its parent is not in the schema.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        schema: &DbSchema,
        entity: &str,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        Ok(Self {
            directory: DirectoryStorage::new(backend, schema, entity, line_ending)?,
        })
    }
}

impl EntityStorage for MetaStorage {
    fn directory(&self) -> &DirectoryStorage {
        &self.directory
    }

    fn describe_change(&self, old: Option<&Fields>, new: &Fields, action: Action) -> ChangeDescriptor {
        let key = new
            .get("meta_key")
            .map(ToString::to_string)
            .unwrap_or_default();
        let parent = self.directory.parent_id_of(new).unwrap_or_default();

        let mut change = self.directory.default_description(old, new, action);
        change.summary = format!("{} {} \"{key}\"", action.verb(), self.entity_name());
        change
            .with_tag("VP-Meta-Key", key)
            .with_tag("VP-Meta-Parent", parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangedFile;
    use crate::database::row;
    use crate::schema::VP_ID;
    use dbmirror_storage::InMemoryBackend;

    const P1: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const M1: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn describes_meta_key_and_parent() {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let meta = MetaStorage::new(Arc::new(InMemoryBackend::new()), &schema, "postmeta", LineEnding::Lf)
            .unwrap();
        let change = meta
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap()
            .unwrap();
        assert_eq!(change.summary, "Created postmeta \"color\"");
        assert_eq!(change.tags["VP-Meta-Key"], "color");
        assert_eq!(change.tags["VP-Meta-Parent"], P1);
        assert_eq!(
            change.changed_files,
            vec![ChangedFile::StorageFile {
                entity: "postmeta".into(),
                id: M1.into(),
                parent_id: Some(P1.into()),
            }]
        );
    }

    #[test]
    fn internal_keys_are_transient() {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let meta = MetaStorage::new(Arc::new(InMemoryBackend::new()), &schema, "postmeta", LineEnding::Lf)
            .unwrap();
        assert!(!meta.should_persist(&row([("meta_key", "_edit_lock")])));
        assert!(meta.should_persist(&row([("meta_key", "_thumbnail_id")])));
    }
}
