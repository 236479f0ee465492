//! Routing of snapshot writes to entity storages.

use crate::change::ChangeDescriptor;
use crate::error::{CoreError, CoreResult};
use crate::schema::DbSchema;
use crate::storage::{
    CommentStorage, DirectoryStorage, EntityStorage, MetaStorage, OptionStorage, PostStorage,
};
use dbmirror_codec::{Fields, LineEnding};
use dbmirror_storage::StorageBackend;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registry of one [`EntityStorage`] per entity type.
///
/// The mirror carries no entity-specific logic; it only dispatches.
#[derive(Default)]
pub struct Mirror {
    storages: BTreeMap<String, Arc<dyn EntityStorage>>,
}

impl Mirror {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `storage` for its entity type, replacing any previous one.
    pub fn register(&mut self, storage: Arc<dyn EntityStorage>) {
        self.storages
            .insert(storage.entity_name().to_string(), storage);
    }

    /// Wires the storage variant of every entity in `schema`: posts,
    /// comments and options get their specialized storages, child types
    /// with a `meta_key` are metadata, everything else is a plain
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage cannot be created for the schema.
    pub fn wordpress(
        schema: &DbSchema,
        backend: Arc<dyn StorageBackend>,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        let mut mirror = Self::new();
        for entity in schema.entities() {
            let storage: Arc<dyn EntityStorage> = match entity.name.as_str() {
                "post" => Arc::new(PostStorage::new(backend.clone(), schema, line_ending)?),
                "comment" => Arc::new(CommentStorage::new(backend.clone(), schema, line_ending)?),
                "option" => Arc::new(OptionStorage::new(backend.clone(), schema, line_ending)?),
                name if entity.is_child() => {
                    Arc::new(MetaStorage::new(backend.clone(), schema, name, line_ending)?)
                }
                name => Arc::new(DirectoryStorage::new(backend.clone(), schema, name, line_ending)?),
            };
            mirror.register(storage);
        }
        Ok(mirror)
    }

    /// The storage registered for `entity`.
    #[must_use]
    pub fn storage(&self, entity: &str) -> Option<&Arc<dyn EntityStorage>> {
        self.storages.get(entity)
    }

    /// Every registered storage, by entity name.
    pub fn storages(&self) -> impl Iterator<Item = &Arc<dyn EntityStorage>> {
        self.storages.values()
    }

    fn require(&self, entity: &str) -> CoreResult<&Arc<dyn EntityStorage>> {
        self.storage(entity)
            .ok_or_else(|| CoreError::unknown_entity(entity))
    }

    /// Returns true if the storage of `entity` persists these fields.
    /// Unregistered types are never saved.
    #[must_use]
    pub fn should_be_saved(&self, entity: &str, fields: &Fields) -> bool {
        self.storage(entity)
            .is_some_and(|storage| storage.should_persist(fields))
    }

    /// Saves a snapshot through the storage of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] for unregistered types, or the
    /// storage's error.
    pub fn save(&self, entity: &str, fields: &Fields) -> CoreResult<Option<ChangeDescriptor>> {
        self.require(entity)?.save(fields)
    }

    /// Deletes a snapshot through the storage of `entity`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`] for unregistered types, or the
    /// storage's error.
    pub fn delete(&self, entity: &str, fields: &Fields) -> CoreResult<Option<ChangeDescriptor>> {
        self.require(entity)?.delete(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::Action;
    use crate::database::row;
    use crate::schema::VP_ID;
    use dbmirror_storage::InMemoryBackend;

    fn mirror() -> Mirror {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        Mirror::wordpress(&schema, Arc::new(InMemoryBackend::new()), LineEnding::Lf).unwrap()
    }

    #[test]
    fn registers_every_entity() {
        let mirror = mirror();
        let names: Vec<&str> = mirror.storages().map(|s| s.entity_name()).collect();
        assert_eq!(
            names,
            vec![
                "comment", "commentmeta", "option", "post", "postmeta", "term", "term_taxonomy",
                "termmeta", "user", "usermeta"
            ]
        );
    }

    #[test]
    fn dispatches_to_variant() {
        let mirror = mirror();
        let change = mirror
            .save(
                "post",
                &row([(VP_ID, "0123456789abcdef0123456789abcdef"), ("post_title", "Hi")]),
            )
            .unwrap()
            .unwrap();
        assert_eq!(change.action, Action::Create);
        assert!(change.tags.contains_key("VP-Post-Title"));
    }

    #[test]
    fn unknown_entities() {
        let mirror = mirror();
        assert!(!mirror.should_be_saved("link", &Fields::new()));
        assert!(matches!(
            mirror.save("link", &Fields::new()),
            Err(CoreError::UnknownEntity { .. })
        ));
        assert!(!mirror.should_be_saved("option", &row([("option_name", "cron")])));
    }
}
