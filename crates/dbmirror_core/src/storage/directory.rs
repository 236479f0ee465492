//! Default storage: one INI file per entity.

use super::EntityStorage;
use crate::change::{Action, ChangeDescriptor, ChangedFile};
use crate::error::{CoreError, CoreResult};
use crate::schema::{DbSchema, EntityType, VP_ID};
use dbmirror_codec::{from_ini, to_ini_with, Fields, LineEnding, Value};
use dbmirror_storage::StorageBackend;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

const EXTENSION: &str = ".ini";

/// Escapes an arbitrary natural key into a file name.
///
/// ASCII letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`.
#[must_use]
pub fn escape_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(char::from(byte));
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// File-level storage of one entity type.
pub struct DirectoryStorage {
    backend: Arc<dyn StorageBackend>,
    entity: EntityType,
    parent_directory: Option<String>,
    line_ending: LineEnding,
}

impl DirectoryStorage {
    /// Creates the storage for `entity`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity (or its parent) is not in the schema.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        schema: &DbSchema,
        entity: &str,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        let entity = schema.require(entity)?.clone();
        let parent_directory = match entity.parent_entity() {
            Some(parent) => Some(schema.require(parent)?.directory.clone()),
            None => None,
        };
        Ok(Self {
            backend,
            entity,
            parent_directory,
            line_ending,
        })
    }

    /// The entity type stored.
    #[must_use]
    pub fn entity_type(&self) -> &EntityType {
        &self.entity
    }

    /// The mirror backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Stable id (hex) or natural key of a snapshot.
    #[must_use]
    pub fn id_of(&self, fields: &Fields) -> Option<String> {
        let field = if self.entity.generated_ids {
            VP_ID
        } else {
            self.entity.id_column.as_str()
        };
        match fields.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value.to_string()).filter(|id| !id.is_empty()),
        }
    }

    /// Parent stable id of a child snapshot.
    #[must_use]
    pub fn parent_id_of(&self, fields: &Fields) -> Option<String> {
        let field = self.entity.parent_field()?;
        match fields.get(&field) {
            Some(Value::Text(id)) if !id.is_empty() && id != "0" => Some(id.clone()),
            _ => None,
        }
    }

    fn file_name(&self, id: &str) -> String {
        if self.entity.generated_ids {
            format!("{id}{EXTENSION}")
        } else {
            format!("{}{EXTENSION}", escape_file_name(id))
        }
    }

    /// Path of a snapshot; child entities need their parent's id.
    #[must_use]
    pub fn path_for(&self, id: &str, parent_id: Option<&str>) -> Option<String> {
        let file = self.file_name(id);
        match (&self.parent_directory, parent_id) {
            (None, _) => Some(format!("{}/{file}", self.entity.directory)),
            (Some(parent_dir), Some(parent_id)) => Some(format!(
                "{parent_dir}/{parent_id}/{}/{file}",
                self.entity.directory
            )),
            (Some(_), None) => None,
        }
    }

    /// Every snapshot path of this type, in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be listed.
    pub fn list_paths(&self) -> CoreResult<Vec<String>> {
        let paths = match &self.parent_directory {
            None => self
                .backend
                .list(&self.entity.directory)?
                .into_iter()
                .filter(|p| p.split('/').count() == 2 && p.ends_with(EXTENSION))
                .collect(),
            Some(parent_dir) => self
                .backend
                .list(parent_dir)?
                .into_iter()
                .filter(|p| {
                    let segments: Vec<&str> = p.split('/').collect();
                    segments.len() == 4
                        && segments[2] == self.entity.directory
                        && p.ends_with(EXTENSION)
                })
                .collect(),
        };
        Ok(paths)
    }

    /// Finds the snapshot path of `id`, searching all parents for child
    /// entities.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be read.
    pub fn locate(&self, id: &str) -> CoreResult<Option<String>> {
        if self.parent_directory.is_none() {
            let Some(path) = self.path_for(id, None) else {
                return Ok(None);
            };
            return Ok(self.backend.exists(&path)?.then_some(path));
        }
        let suffix = format!("/{}", self.file_name(id));
        Ok(self
            .list_paths()?
            .into_iter()
            .find(|p| p.ends_with(&suffix)))
    }

    /// Finds the snapshot path of `id`, trying the file under `parent_id`
    /// before searching all parents.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror cannot be read.
    pub fn find(&self, id: &str, parent_id: Option<&str>) -> CoreResult<Option<String>> {
        if let Some(path) = self.path_for(id, parent_id) {
            if self.backend.exists(&path)? {
                return Ok(Some(path));
            }
            if self.parent_directory.is_none() {
                return Ok(None);
            }
        }
        self.locate(id)
    }

    /// Reads and decodes the snapshot at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is not a single-section snapshot.
    pub fn read_snapshot(&self, path: &str) -> CoreResult<Option<Fields>> {
        let Some(bytes) = self.backend.read(path)? else {
            return Ok(None);
        };
        decode_snapshot(path, &bytes).map(Some)
    }

    fn write_snapshot(&self, path: &str, id: &str, fields: &Fields) -> CoreResult<()> {
        let text = encode_snapshot(id, fields, self.line_ending)?;
        self.backend.write(path, text.as_bytes())?;
        Ok(())
    }

    /// Changed-file declaration for one snapshot.
    #[must_use]
    pub fn storage_file(&self, id: &str, parent_id: Option<String>) -> ChangedFile {
        ChangedFile::StorageFile {
            entity: self.entity.name.clone(),
            id: id.to_string(),
            parent_id,
        }
    }

    /// Generic description: `"<Verb> <entity> <id>"`.
    #[must_use]
    pub fn default_description(
        &self,
        old: Option<&Fields>,
        new: &Fields,
        action: Action,
    ) -> ChangeDescriptor {
        let id = self
            .id_of(new)
            .or_else(|| old.and_then(|o| self.id_of(o)))
            .unwrap_or_default();
        let summary = format!("{} {} {id}", action.verb(), self.entity.name);
        ChangeDescriptor::new(&self.entity.name, action, &id, summary)
            .with_file(self.storage_file(&id, self.parent_id_of(new)))
    }

    /// Saves `fields` merged over the stored snapshot.
    ///
    /// `describe` turns (old, new, create/edit) into the descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot has no id or file I/O fails.
    pub fn save_with(
        &self,
        fields: &Fields,
        describe: impl Fn(Option<&Fields>, &Fields, Action) -> ChangeDescriptor,
    ) -> CoreResult<Option<ChangeDescriptor>> {
        let id = self.id_of(fields).ok_or_else(|| {
            CoreError::invalid_snapshot(&self.entity.name, "snapshot has no identifier")
        })?;

        let old_path = self.find(&id, self.parent_id_of(fields).as_deref())?;
        let old = match &old_path {
            Some(path) => self.read_snapshot(path)?,
            None => None,
        };

        let mut new = old.clone().unwrap_or_default();
        new.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.entity.generated_ids {
            new.remove(&self.entity.id_column);
        }
        for column in &self.entity.ignored_columns {
            new.remove(column);
        }

        let parent_id = self.parent_id_of(&new);
        let Some(path) = self.path_for(&id, parent_id.as_deref()) else {
            debug!(entity = %self.entity.name, vpid = %id, "no parent reference, snapshot not saved");
            return Ok(None);
        };

        if old.as_ref() == Some(&new) && old_path.as_deref() == Some(path.as_str()) {
            trace!(entity = %self.entity.name, vpid = %id, "snapshot unchanged");
            return Ok(None);
        }

        self.write_snapshot(&path, &id, &new)?;
        if let Some(old_path) = old_path.filter(|p| *p != path) {
            self.backend.remove(&old_path)?;
        }

        let action = if old.is_some() {
            Action::Edit
        } else {
            Action::Create
        };
        debug!(entity = %self.entity.name, vpid = %id, %action, "snapshot saved");
        Ok(Some(describe(old.as_ref(), &new, action)))
    }

    /// Deletes the snapshot identified by `fields`.
    ///
    /// # Errors
    ///
    /// Returns an error if file I/O fails.
    pub fn delete_with(
        &self,
        fields: &Fields,
        describe: impl Fn(Option<&Fields>, &Fields, Action) -> ChangeDescriptor,
    ) -> CoreResult<Option<ChangeDescriptor>> {
        let Some(id) = self.id_of(fields) else {
            trace!(entity = %self.entity.name, "delete without identifier ignored");
            return Ok(None);
        };

        let Some(path) = self.find(&id, self.parent_id_of(fields).as_deref())? else {
            debug!(entity = %self.entity.name, vpid = %id, "no snapshot to delete");
            return Ok(None);
        };

        let old = self.read_snapshot(&path)?;
        self.backend.remove(&path)?;
        debug!(entity = %self.entity.name, vpid = %id, "snapshot deleted");

        let last = old.clone().unwrap_or_else(|| fields.clone());
        Ok(Some(describe(old.as_ref(), &last, Action::Delete)))
    }
}

impl EntityStorage for DirectoryStorage {
    fn directory(&self) -> &DirectoryStorage {
        self
    }
}

/// Encodes a snapshot as a single INI section named `id`.
///
/// # Errors
///
/// Returns an error if a value cannot be encoded.
pub fn encode_snapshot(id: &str, fields: &Fields, line_ending: LineEnding) -> CoreResult<String> {
    let mut document = BTreeMap::new();
    document.insert(id.to_string(), Value::Map(fields.clone()));
    Ok(to_ini_with(&Value::Map(document), line_ending)?)
}

/// Decodes a single-section snapshot file.
///
/// # Errors
///
/// Returns an error if the text is not valid UTF-8 INI with one section.
pub fn decode_snapshot(path: &str, bytes: &[u8]) -> CoreResult<Fields> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| CoreError::invalid_snapshot(path, format!("not UTF-8: {e}")))?;
    let sections = from_ini(text)?
        .into_map()
        .ok_or_else(|| CoreError::invalid_snapshot(path, "not sectioned"))?;
    let mut sections = sections.into_values();
    match (sections.next(), sections.next()) {
        (Some(Value::Map(fields)), None) => Ok(fields),
        _ => Err(CoreError::invalid_snapshot(path, "expected exactly one section")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::row;
    use dbmirror_storage::InMemoryBackend;

    fn setup(entity: &str) -> (Arc<InMemoryBackend>, DirectoryStorage) {
        let backend = Arc::new(InMemoryBackend::new());
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let storage = DirectoryStorage::new(backend.clone(), &schema, entity, LineEnding::Lf).unwrap();
        (backend, storage)
    }

    const P1: &str = "0123456789abcdef0123456789abcdef";
    const M1: &str = "fedcba9876543210fedcba9876543210";

    #[test]
    fn escape_file_names() {
        assert_eq!(escape_file_name("blog_name-1"), "blog_name-1");
        assert_eq!(escape_file_name("a/b.c"), "a%2Fb%2Ec");
        assert_eq!(escape_file_name("é"), "%C3%A9");
    }

    #[test]
    fn save_creates_then_edits() {
        let (backend, storage) = setup("post");
        let created = storage
            .save(&row([(VP_ID, P1), ("post_title", "Hello")]))
            .unwrap()
            .unwrap();
        assert_eq!(created.action, Action::Create);
        assert_eq!(created.entity_id, P1);

        let path = format!("posts/{P1}.ini");
        assert!(backend.exists(&path).unwrap());

        let edited = storage
            .save(&row([(VP_ID, P1), ("post_status", "publish")]))
            .unwrap()
            .unwrap();
        assert_eq!(edited.action, Action::Edit);

        let merged = storage.load(P1).unwrap().unwrap();
        assert_eq!(merged["post_title"], Value::text("Hello"));
        assert_eq!(merged["post_status"], Value::text("publish"));
    }

    #[test]
    fn identical_save_is_silent() {
        let (backend, storage) = setup("post");
        let fields = row([(VP_ID, P1), ("post_title", "Hello")]);
        assert!(storage.save(&fields).unwrap().is_some());
        let before = backend.snapshot();
        assert!(storage.save(&fields).unwrap().is_none());
        assert_eq!(backend.snapshot(), before);
    }

    #[test]
    fn save_without_id_fails() {
        let (_, storage) = setup("post");
        assert!(storage.save(&row([("post_title", "x")])).is_err());
    }

    #[test]
    fn child_snapshots_nest_under_parent() {
        let (backend, storage) = setup("postmeta");
        storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap()
            .unwrap();
        let path = format!("posts/{P1}/postmeta/{M1}.ini");
        assert!(backend.exists(&path).unwrap());
        assert!(storage.exists(M1).unwrap());
        assert_eq!(storage.list_paths().unwrap(), vec![path]);
    }

    #[test]
    fn child_without_parent_is_skipped() {
        let (backend, storage) = setup("postmeta");
        let result = storage
            .save(&row([(VP_ID, Value::text(M1)), ("vp_post_id", Value::Null)]))
            .unwrap();
        assert!(result.is_none());
        assert!(backend.is_empty());
    }

    #[test]
    fn child_moves_with_new_parent() {
        let (backend, storage) = setup("postmeta");
        let other = "11111111111111111111111111111111";
        storage.save(&row([(VP_ID, M1), ("vp_post_id", P1)])).unwrap();
        storage.save(&row([(VP_ID, M1), ("vp_post_id", other)])).unwrap();
        assert_eq!(
            backend.list("").unwrap(),
            vec![format!("posts/{other}/postmeta/{M1}.ini")]
        );
    }

    /// Counts directory listings of the wrapped backend.
    struct CountingBackend {
        inner: InMemoryBackend,
        lists: std::sync::atomic::AtomicUsize,
    }

    impl CountingBackend {
        fn lists(&self) -> usize {
            self.lists.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl StorageBackend for CountingBackend {
        fn read(&self, path: &str) -> dbmirror_storage::StorageResult<Option<Vec<u8>>> {
            self.inner.read(path)
        }

        fn write(&self, path: &str, data: &[u8]) -> dbmirror_storage::StorageResult<()> {
            self.inner.write(path, data)
        }

        fn remove(&self, path: &str) -> dbmirror_storage::StorageResult<bool> {
            self.inner.remove(path)
        }

        fn list(&self, prefix: &str) -> dbmirror_storage::StorageResult<Vec<String>> {
            self.lists.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.list(prefix)
        }
    }

    #[test]
    fn child_with_known_parent_is_saved_without_searching() {
        let backend = Arc::new(CountingBackend {
            inner: InMemoryBackend::new(),
            lists: std::sync::atomic::AtomicUsize::new(0),
        });
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let storage =
            DirectoryStorage::new(backend.clone(), &schema, "postmeta", LineEnding::Lf).unwrap();
        storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap()
            .unwrap();
        let after_create = backend.lists();

        let edited = storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_value", "red")]))
            .unwrap()
            .unwrap();
        assert_eq!(edited.action, Action::Edit);
        storage.delete(&row([(VP_ID, M1), ("vp_post_id", P1)])).unwrap().unwrap();
        assert_eq!(backend.lists(), after_create);

        // Without the parent the snapshot is searched for.
        storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap();
        storage.delete(&row([(VP_ID, M1)])).unwrap().unwrap();
        assert!(backend.lists() > after_create);
    }

    #[test]
    fn delete_removes_file() {
        let (backend, storage) = setup("postmeta");
        storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap();

        // Parent unknown to the caller: found by search.
        let deleted = storage.delete(&row([(VP_ID, M1)])).unwrap().unwrap();
        assert_eq!(deleted.action, Action::Delete);
        assert!(backend.is_empty());
        assert!(storage.delete(&row([(VP_ID, M1)])).unwrap().is_none());
    }

    #[test]
    fn posts_listing_excludes_children() {
        let (backend, posts) = setup("post");
        backend.write(&format!("posts/{P1}.ini"), format!("[{P1}]\nvp_id = \"{P1}\"\n").as_bytes()).unwrap();
        backend.write(&format!("posts/{P1}/postmeta/{M1}.ini"), b"[x]\na = 1\n").unwrap();
        assert_eq!(posts.load_all().unwrap().len(), 1);
    }

    #[test]
    fn corrupt_snapshot_is_an_error() {
        let (backend, storage) = setup("post");
        backend.write(&format!("posts/{P1}.ini"), b"[a]\nx = 1\n[b]\ny = 2\n").unwrap();
        assert!(matches!(
            storage.load(P1),
            Err(CoreError::InvalidSnapshot { .. })
        ));
    }

    #[test]
    fn crlf_files() {
        let backend = Arc::new(InMemoryBackend::new());
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let storage = DirectoryStorage::new(backend.clone(), &schema, "post", LineEnding::CrLf).unwrap();
        storage.save(&row([(VP_ID, P1)])).unwrap();
        let bytes = backend.read(&format!("posts/{P1}.ini")).unwrap().unwrap();
        assert!(String::from_utf8(bytes).unwrap().contains("\r\n"));
        assert!(storage.load(P1).unwrap().is_some());
    }

    #[test]
    fn snapshots_on_disk() {
        let temp_dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(dbmirror_storage::FileBackend::open(temp_dir.path()).unwrap());
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let storage = DirectoryStorage::new(backend, &schema, "postmeta", LineEnding::Lf).unwrap();

        storage
            .save(&row([(VP_ID, M1), ("vp_post_id", P1), ("meta_key", "color")]))
            .unwrap();
        let file = temp_dir
            .path()
            .join(format!("posts/{P1}/postmeta/{M1}.ini"));
        assert!(file.is_file());

        storage.delete(&row([(VP_ID, M1)])).unwrap();
        assert!(!file.exists());
        assert!(!temp_dir.path().join("posts").exists());
    }

    proptest::proptest! {
        #[test]
        fn escaped_names_are_distinct_and_safe(a in "\\PC{1,16}", b in "\\PC{1,16}") {
            let (ea, eb) = (escape_file_name(&a), escape_file_name(&b));
            let safe = |c: u8| c.is_ascii_alphanumeric() || b"-_%".contains(&c);
            proptest::prop_assert!(ea.bytes().all(safe));
            proptest::prop_assert_eq!(a == b, ea == eb);
        }
    }
}
