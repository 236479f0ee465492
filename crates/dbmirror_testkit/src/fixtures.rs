//! Test sites: a backing store, a mirror and every engine component wired
//! together.

use dbmirror_codec::Value;
use dbmirror_core::{
    row, Database, DbSchema, IdentifierRepository, InMemoryDatabase, Mirror, MirrorConfig,
    MirroredDatabase, Row, StableId, WriteBridge, VP_ID_TABLE,
};
use dbmirror_storage::{FileBackend, InMemoryBackend, StorageBackend};
use dbmirror_sync_engine::{
    HistoryLog, InMemoryHistory, Reverter, RevisionId, SynchronizationProcess,
};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// A fully wired site with automatic cleanup.
pub struct TestSite {
    /// Configuration the site was built with.
    pub config: MirrorConfig,
    /// Entity schema.
    pub schema: Arc<DbSchema>,
    /// The unmirrored backing store.
    pub inner: Arc<InMemoryDatabase>,
    /// The mirrored store the "application" writes through.
    pub db: Arc<MirroredDatabase>,
    /// The mirror's file tree.
    pub backend: Arc<dyn StorageBackend>,
    /// Storage registry.
    pub mirror: Arc<Mirror>,
    /// Identifier repository.
    pub ids: Arc<IdentifierRepository>,
    /// Write bridge.
    pub bridge: Arc<WriteBridge>,
    /// History of the mirror.
    pub history: Arc<InMemoryHistory>,
    /// Synchronization process over every entity type.
    pub process: Arc<SynchronizationProcess>,
    /// Reverter.
    pub reverter: Reverter,
    _temp_dir: Option<TempDir>,
}

impl TestSite {
    /// Creates a site whose mirror lives in memory.
    pub fn memory() -> Self {
        Self::with_backend(MirrorConfig::default(), Arc::new(InMemoryBackend::new()), None)
    }

    /// Creates a site whose mirror is a temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = MirrorConfig::default().mirror_dir(temp_dir.path().join("db"));
        let backend = FileBackend::open(&config.mirror_dir).expect("Failed to open mirror directory");
        Self::with_backend(config, Arc::new(backend), Some(temp_dir))
    }

    /// Creates an in-memory site with a custom configuration.
    pub fn with_config(config: MirrorConfig) -> Self {
        Self::with_backend(config, Arc::new(InMemoryBackend::new()), None)
    }

    fn with_backend(
        config: MirrorConfig,
        backend: Arc<dyn StorageBackend>,
        temp_dir: Option<TempDir>,
    ) -> Self {
        let schema = Arc::new(
            DbSchema::wordpress(&config.table_prefix, config.db_version)
                .expect("Bundled schema must load"),
        );
        let inner = Arc::new(InMemoryDatabase::new());
        create_tables(&inner, &schema);

        let mirror = Arc::new(
            Mirror::wordpress(&schema, backend.clone(), config.line_ending())
                .expect("Failed to wire storages"),
        );
        let ids = Arc::new(IdentifierRepository::new(inner.clone(), schema.clone()));
        let bridge = Arc::new(
            WriteBridge::new(inner.clone(), schema.clone(), mirror.clone(), ids.clone())
                .with_first_save_hook("post", "postmeta"),
        );
        let db = Arc::new(MirroredDatabase::new(inner.clone(), bridge.clone()));
        let history = Arc::new(InMemoryHistory::new(backend.clone()));
        let process = Arc::new(
            SynchronizationProcess::for_mirror(
                inner.clone(),
                schema.clone(),
                &mirror,
                ids.clone(),
                config.max_sync_passes,
            )
            .expect("Failed to wire synchronizers"),
        );
        let reverter = Reverter::new(
            history.clone(),
            backend.clone(),
            schema.clone(),
            bridge.clone(),
            process.clone(),
            config.line_ending(),
        );

        Self {
            config,
            schema,
            inner,
            db,
            backend,
            mirror,
            ids,
            bridge,
            history,
            process,
            reverter,
            _temp_dir: temp_dir,
        }
    }

    /// Root of the mirror directory, for file-based sites.
    pub fn mirror_path(&self) -> Option<&Path> {
        self._temp_dir.as_ref().map(|_| self.config.mirror_dir.as_path())
    }

    /// Physical name of an entity's table.
    pub fn table(&self, entity: &str) -> String {
        self.schema.prefixed_table(entity)
    }

    /// Inserts a row through the mirrored store.
    pub fn insert(&self, entity: &str, data: Row) -> i64 {
        self.db
            .insert(&self.table(entity), &data)
            .expect("Failed to insert row")
    }

    /// Updates rows through the mirrored store.
    pub fn update(&self, entity: &str, data: Row, filter: Row) -> usize {
        self.db
            .update(&self.table(entity), &data, &filter)
            .expect("Failed to update rows")
    }

    /// Deletes rows through the mirrored store.
    pub fn delete(&self, entity: &str, filter: Row) -> usize {
        self.db
            .delete(&self.table(entity), &filter)
            .expect("Failed to delete rows")
    }

    /// Inserts a post and returns its key.
    pub fn insert_post(&self, title: &str, status: &str) -> i64 {
        self.insert(
            "post",
            row([
                ("post_title", title),
                ("post_status", status),
                ("post_type", "post"),
            ]),
        )
    }

    /// Commits the mirror with every change recorded since the last commit.
    pub fn commit(&self, message: &str) -> RevisionId {
        let changes = self.bridge.take_changes();
        self.history
            .commit(message, changes)
            .expect("Failed to commit")
    }

    /// Stable id of a row.
    pub fn stable_id(&self, entity: &str, key: i64) -> Option<StableId> {
        self.ids.lookup_id(entity, key).expect("Failed to read mapping")
    }

    /// Mirror path of a top-level entity's snapshot.
    pub fn snapshot_path(&self, entity: &str, key: i64) -> Option<String> {
        let entity_type = self.schema.entity(entity)?;
        let id = self.stable_id(entity, key)?;
        Some(format!("{}/{id}.ini", entity_type.directory))
    }

    /// Rows of an entity's table matching `filter`.
    pub fn rows(&self, entity: &str, filter: Row) -> Vec<Row> {
        self.inner
            .select(&self.table(entity), &filter)
            .expect("Failed to select rows")
    }

    /// A single column of the row with the given key.
    pub fn column(&self, entity: &str, key: i64, column: &str) -> Option<Value> {
        let entity_type = self.schema.entity(entity)?;
        self.rows(entity, row([(entity_type.id_column.as_str(), key)]))
            .into_iter()
            .next()
            .and_then(|mut r| r.remove(column))
    }
}

/// Creates the table of every entity type, with its auto-increment column,
/// and the identifier mapping table.
pub fn create_tables(db: &InMemoryDatabase, schema: &DbSchema) {
    for entity in schema.entities() {
        let auto_increment = if entity.generated_ids {
            Some(entity.id_column.as_str())
        } else if entity.name == "option" {
            Some("option_id")
        } else {
            None
        };
        db.create_table(&schema.prefixed_table(&entity.name), auto_increment);
    }
    db.create_table(&schema.prefixed_table(VP_ID_TABLE), None);
}

/// Runs a test with an in-memory site.
pub fn with_site<F, R>(f: F) -> R
where
    F: FnOnce(&TestSite) -> R,
{
    f(&TestSite::memory())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_site_mirrors_posts() {
        with_site(|site| {
            let key = site.insert_post("Hello", "draft");
            let path = site.snapshot_path("post", key).unwrap();
            assert!(site.backend.exists(&path).unwrap());
            assert!(site.mirror_path().is_none());
        });
    }

    #[test]
    fn file_site_writes_to_disk() {
        let site = TestSite::file();
        let key = site.insert_post("Hello", "draft");
        let path = site.snapshot_path("post", key).unwrap();
        assert!(site.mirror_path().unwrap().join(path).exists());
    }

    #[test]
    fn vp_id_table_is_created() {
        let site = TestSite::memory();
        site.insert_post("Hello", "draft");
        assert_eq!(site.inner.count("wp_vp_id"), 1);
    }
}
