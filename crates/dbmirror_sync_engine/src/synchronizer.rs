//! Snapshot → row synchronizers.

use crate::error::SyncResult;
use dbmirror_codec::{Fields, Value};
use dbmirror_core::{
    row, CoreError, Database, DbSchema, EntityStorage, EntityType, IdentifierRepository, Row,
    StableId, VP_ID,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, trace};

/// Which snapshots a synchronizer applies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncScope {
    /// Every snapshot of the type; rows whose snapshot is gone are deleted.
    Everything,
    /// Only these stable ids (hex) or natural keys. A child snapshot is
    /// included when its parent's id is listed.
    Only(BTreeSet<String>),
}

impl SyncScope {
    /// Scope over the given ids.
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SyncScope::Only(ids.into_iter().map(Into::into).collect())
    }
}

/// Result of one synchronizer run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Rows created from snapshots.
    pub inserted: usize,
    /// Rows overwritten from snapshots.
    pub updated: usize,
    /// Rows removed because their snapshot is gone.
    pub deleted: usize,
    /// Entity types that must be synchronized again.
    pub follow_ups: Vec<String>,
}

/// Replays one entity type's snapshots into the backing store.
pub trait Synchronizer: Send + Sync {
    /// Entity type handled.
    fn entity_name(&self) -> &str;

    /// Applies the snapshots selected by `scope`.
    ///
    /// # Errors
    ///
    /// Returns an error if a snapshot cannot be read or the store fails.
    fn synchronize(&self, scope: &SyncScope) -> SyncResult<SyncOutcome>;
}

/// Synchronizer driven by an [`EntityStorage`] and the schema.
///
/// Writes go straight to `db`, which must not be mirrored.
pub struct EntitySynchronizer {
    db: Arc<dyn Database>,
    schema: Arc<DbSchema>,
    storage: Arc<dyn EntityStorage>,
    ids: Arc<IdentifierRepository>,
    entity: EntityType,
    table: String,
}

struct Selected {
    snapshots: Vec<Fields>,
    present: BTreeSet<String>,
}

impl EntitySynchronizer {
    /// Creates the synchronizer of the storage's entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is not in the schema.
    pub fn new(
        db: Arc<dyn Database>,
        schema: Arc<DbSchema>,
        storage: Arc<dyn EntityStorage>,
        ids: Arc<IdentifierRepository>,
    ) -> SyncResult<Self> {
        let entity = schema.require(storage.entity_name())?.clone();
        let table = schema.prefixed_table(&entity.name);
        Ok(Self {
            db,
            schema,
            storage,
            ids,
            entity,
            table,
        })
    }

    fn select(&self, scope: &SyncScope) -> SyncResult<Selected> {
        let directory = self.storage.directory();
        let mut snapshots = Vec::new();
        let mut present = BTreeSet::new();
        for snapshot in self.storage.load_all()? {
            let Some(id) = directory.id_of(&snapshot) else {
                return Err(
                    CoreError::invalid_snapshot(&self.entity.name, "snapshot has no identifier").into(),
                );
            };
            let wanted = match scope {
                SyncScope::Everything => true,
                SyncScope::Only(ids) => {
                    ids.contains(&id)
                        || directory
                            .parent_id_of(&snapshot)
                            .is_some_and(|parent| ids.contains(&parent))
                }
            };
            if wanted {
                present.insert(id);
                snapshots.push(snapshot);
            }
        }
        Ok(Selected { snapshots, present })
    }

    fn key_filter(&self, key: impl Into<Value>) -> Row {
        row([(self.entity.id_column.as_str(), key.into())])
    }

    fn row_exists(&self, filter: &Row) -> SyncResult<bool> {
        Ok(!self.db.select(&self.table, filter)?.is_empty())
    }

    /// Writes one snapshot of a type with generated ids. Returns true if
    /// some reference is still unresolved.
    fn apply_generated(&self, snapshot: &Fields, outcome: &mut SyncOutcome) -> SyncResult<bool> {
        let id = stable_id_of(&self.entity, snapshot)?;
        let restored = self.ids.restore_references(&self.entity.name, snapshot)?;
        let mut fields = restored.fields;

        match self.ids.lookup_key(&self.entity.name, &id)? {
            Some(key) if self.row_exists(&self.key_filter(key))? => {
                self.db.update(&self.table, &fields, &self.key_filter(key))?;
                outcome.updated += 1;
                trace!(entity = %self.entity.name, vpid = %id, key, "row updated");
            }
            Some(key) => {
                fields.insert(self.entity.id_column.clone(), Value::Integer(key));
                self.db.insert(&self.table, &fields)?;
                outcome.inserted += 1;
                trace!(entity = %self.entity.name, vpid = %id, key, "row restored");
            }
            None => {
                let key = self.db.insert(&self.table, &fields)?;
                self.ids.insert_mapping(&self.entity.name, key, &id)?;
                outcome.inserted += 1;
                trace!(entity = %self.entity.name, vpid = %id, key, "row inserted");
            }
        }
        Ok(!restored.unresolved.is_empty())
    }

    fn apply_natural(&self, snapshot: &Fields, outcome: &mut SyncOutcome) -> SyncResult<()> {
        let restored = self.ids.restore_references(&self.entity.name, snapshot)?;
        let Some(key) = restored.fields.get(&self.entity.id_column).cloned() else {
            return Err(
                CoreError::invalid_snapshot(&self.entity.name, "snapshot has no natural key").into(),
            );
        };
        let filter = self.key_filter(key);
        if self.row_exists(&filter)? {
            self.db.update(&self.table, &restored.fields, &filter)?;
            outcome.updated += 1;
        } else {
            self.db.insert(&self.table, &restored.fields)?;
            outcome.inserted += 1;
        }
        Ok(())
    }

    fn is_reference_column(&self, column: &str) -> bool {
        self.entity.references.contains_key(column)
            || self.entity.value_references.iter().any(|r| r.field == column)
    }

    /// Second pass over snapshots whose references pointed at rows that
    /// did not exist yet.
    fn resolve_pending(&self, pending: &[&Fields]) -> SyncResult<()> {
        for snapshot in pending {
            let id = stable_id_of(&self.entity, snapshot)?;
            let Some(key) = self.ids.lookup_key(&self.entity.name, &id)? else {
                continue;
            };
            let restored = self.ids.restore_references(&self.entity.name, snapshot)?;
            if !restored.unresolved.is_empty() {
                debug!(entity = %self.entity.name, vpid = %id, unresolved = ?restored.unresolved, "references left unresolved");
            }
            let fields: Row = restored
                .fields
                .into_iter()
                .filter(|(column, _)| self.is_reference_column(column))
                .collect();
            if !fields.is_empty() {
                self.db.update(&self.table, &fields, &self.key_filter(key))?;
            }
        }
        Ok(())
    }

    fn delete_missing_generated(
        &self,
        scope: &SyncScope,
        present: &BTreeSet<String>,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        let doomed: Vec<(i64, StableId)> = match scope {
            SyncScope::Everything => self
                .ids
                .mapped(&self.entity.name)?
                .into_iter()
                .filter(|(_, id)| !present.contains(&id.to_hex()))
                .collect(),
            SyncScope::Only(ids) => {
                let mut doomed = Vec::new();
                for id in ids.iter().filter(|id| !present.contains(*id)) {
                    let Ok(id) = id.parse::<StableId>() else {
                        continue;
                    };
                    if let Some(key) = self.ids.lookup_key(&self.entity.name, &id)? {
                        doomed.push((key, id));
                    }
                }
                doomed
            }
        };

        for (key, id) in doomed {
            outcome.deleted += self.db.delete(&self.table, &self.key_filter(key))?;
            self.ids.release(&self.entity.name, key)?;
            trace!(entity = %self.entity.name, vpid = %id, key, "row deleted");
        }
        Ok(())
    }

    fn delete_missing_natural(
        &self,
        scope: &SyncScope,
        present: &BTreeSet<String>,
        outcome: &mut SyncOutcome,
    ) -> SyncResult<()> {
        let candidates: Vec<Row> = match scope {
            SyncScope::Everything => self.db.select(&self.table, &Row::new())?,
            SyncScope::Only(ids) => {
                let mut rows = Vec::new();
                for id in ids.iter().filter(|id| !present.contains(*id)) {
                    rows.extend(self.db.select(&self.table, &self.key_filter(id.as_str()))?);
                }
                rows
            }
        };

        for candidate in candidates {
            let Some(key) = candidate.get(&self.entity.id_column) else {
                continue;
            };
            if present.contains(&key.to_string()) || !self.storage.should_persist(&candidate) {
                continue;
            }
            outcome.deleted += self.db.delete(&self.table, &self.key_filter(key.clone()))?;
            trace!(entity = %self.entity.name, key = %key, "row deleted");
        }
        Ok(())
    }
}

fn stable_id_of(entity: &EntityType, snapshot: &Fields) -> SyncResult<StableId> {
    match snapshot.get(VP_ID) {
        Some(Value::Text(hex)) => Ok(hex.parse()?),
        _ => Err(CoreError::invalid_snapshot(&entity.name, "snapshot has no vp_id").into()),
    }
}

impl Synchronizer for EntitySynchronizer {
    fn entity_name(&self) -> &str {
        &self.entity.name
    }

    fn synchronize(&self, scope: &SyncScope) -> SyncResult<SyncOutcome> {
        let selected = self.select(scope)?;
        let mut outcome = SyncOutcome::default();

        if self.entity.generated_ids {
            let mut pending = Vec::new();
            for snapshot in &selected.snapshots {
                if self.apply_generated(snapshot, &mut outcome)? {
                    pending.push(snapshot);
                }
            }
            self.resolve_pending(&pending)?;
            self.delete_missing_generated(scope, &selected.present, &mut outcome)?;
        } else {
            for snapshot in &selected.snapshots {
                self.apply_natural(snapshot, &mut outcome)?;
            }
            self.delete_missing_natural(scope, &selected.present, &mut outcome)?;
        }

        if outcome.inserted > 0 {
            outcome.follow_ups = self
                .schema
                .referencing(&self.entity.name)
                .into_iter()
                .map(|e| e.name.clone())
                .collect();
        }

        debug!(
            entity = %self.entity.name,
            inserted = outcome.inserted,
            updated = outcome.updated,
            deleted = outcome.deleted,
            "synchronized"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmirror_codec::LineEnding;
    use dbmirror_core::{InMemoryDatabase, Mirror};
    use dbmirror_storage::{InMemoryBackend, StorageBackend};

    const PARENT: &str = "ffffffffffffffffffffffffffffffff";
    const CHILD: &str = "00000000000000000000000000000000";
    const META: &str = "88888888888888888888888888888888";

    struct Fixture {
        db: Arc<InMemoryDatabase>,
        backend: Arc<InMemoryBackend>,
        mirror: Mirror,
        ids: Arc<IdentifierRepository>,
        schema: Arc<DbSchema>,
    }

    impl Fixture {
        fn new() -> Self {
            let db = Arc::new(InMemoryDatabase::new());
            db.create_table("wp_posts", Some("ID"));
            db.create_table("wp_postmeta", Some("meta_id"));
            db.create_table("wp_options", Some("option_id"));
            let schema = Arc::new(DbSchema::wordpress("wp_", 38590).unwrap());
            let backend = Arc::new(InMemoryBackend::new());
            let mirror = Mirror::wordpress(&schema, backend.clone(), LineEnding::Lf).unwrap();
            let ids = Arc::new(IdentifierRepository::new(db.clone(), schema.clone()));
            Self {
                db,
                backend,
                mirror,
                ids,
                schema,
            }
        }

        fn synchronizer(&self, entity: &str) -> EntitySynchronizer {
            EntitySynchronizer::new(
                self.db.clone(),
                self.schema.clone(),
                self.mirror.storage(entity).unwrap().clone(),
                self.ids.clone(),
            )
            .unwrap()
        }

        fn key(&self, entity: &str, hex: &str) -> Option<i64> {
            self.ids.lookup_key(entity, &hex.parse().unwrap()).unwrap()
        }
    }

    #[test]
    fn inserts_then_updates() {
        let site = Fixture::new();
        site.mirror
            .save("post", &row([(VP_ID, PARENT), ("post_title", "Hello")]))
            .unwrap();
        let posts = site.synchronizer("post");

        let first = posts.synchronize(&SyncScope::Everything).unwrap();
        assert_eq!((first.inserted, first.updated, first.deleted), (1, 0, 0));
        assert_eq!(first.follow_ups, vec!["postmeta".to_string(), "comment".to_string()]);
        let key = site.key("post", PARENT).unwrap();
        assert_eq!(site.db.rows("wp_posts")[0]["ID"], Value::Integer(key));

        let second = posts.synchronize(&SyncScope::Everything).unwrap();
        assert_eq!((second.inserted, second.updated), (0, 1));
        assert!(second.follow_ups.is_empty());
        assert_eq!(site.db.count("wp_posts"), 1);
    }

    #[test]
    fn rows_without_snapshot_are_deleted() {
        let site = Fixture::new();
        site.mirror.save("post", &row([(VP_ID, PARENT)])).unwrap();
        let posts = site.synchronizer("post");
        posts.synchronize(&SyncScope::Everything).unwrap();
        let key = site.key("post", PARENT).unwrap();

        site.backend.remove(&format!("posts/{PARENT}.ini")).unwrap();
        let outcome = posts.synchronize(&SyncScope::only([PARENT])).unwrap();
        assert_eq!(outcome.deleted, 1);
        assert_eq!(site.db.count("wp_posts"), 0);
        assert_eq!(site.ids.lookup_id("post", key).unwrap(), None);
    }

    #[test]
    fn forward_references_resolve_in_second_pass() {
        let site = Fixture::new();
        // The child sorts before its parent.
        site.mirror
            .save("post", &row([(VP_ID, CHILD), ("vp_post_parent", PARENT)]))
            .unwrap();
        site.mirror.save("post", &row([(VP_ID, PARENT)])).unwrap();

        site.synchronizer("post")
            .synchronize(&SyncScope::Everything)
            .unwrap();
        let parent = site.key("post", PARENT).unwrap();
        let child = site.key("post", CHILD).unwrap();
        let rows = site.db.select("wp_posts", &row([("ID", child)])).unwrap();
        assert_eq!(rows[0]["post_parent"], Value::Integer(parent));
    }

    #[test]
    fn parent_scope_includes_children() {
        let site = Fixture::new();
        site.mirror.save("post", &row([(VP_ID, PARENT)])).unwrap();
        site.mirror
            .save(
                "postmeta",
                &row([(VP_ID, META), ("vp_post_id", PARENT), ("meta_key", "color")]),
            )
            .unwrap();

        let scope = SyncScope::only([PARENT]);
        site.synchronizer("post").synchronize(&scope).unwrap();
        let outcome = site.synchronizer("postmeta").synchronize(&scope).unwrap();
        assert_eq!(outcome.inserted, 1);

        let meta = &site.db.rows("wp_postmeta")[0];
        let parent = site.key("post", PARENT).unwrap();
        assert_eq!(meta["post_id"], Value::Integer(parent));
    }

    #[test]
    fn natural_keys_keep_transient_rows() {
        let site = Fixture::new();
        site.db
            .insert("wp_options", &row([("option_name", "cron"), ("option_value", "x")]))
            .unwrap();
        site.db
            .insert("wp_options", &row([("option_name", "stale"), ("option_value", "x")]))
            .unwrap();
        site.mirror
            .save("option", &row([("option_name", "blogname"), ("option_value", "Site")]))
            .unwrap();

        let outcome = site
            .synchronizer("option")
            .synchronize(&SyncScope::Everything)
            .unwrap();
        assert_eq!((outcome.inserted, outcome.deleted), (1, 1));
        let names: Vec<String> = site
            .db
            .rows("wp_options")
            .iter()
            .map(|r| r["option_name"].to_string())
            .collect();
        assert_eq!(names, vec!["cron".to_string(), "blogname".to_string()]);
    }
}
