//! Write bridge: raw row writes to entity snapshots.
//!
//! The bridge is notified of every insert, update and delete on the
//! backing store, keyed by physical table name. Rows of tracked tables are
//! identified, their references rewritten to stable ids, and the result is
//! handed to the [`Mirror`]. Every emitted [`ChangeDescriptor`] is kept
//! until drained with [`WriteBridge::take_changes`].

use crate::change::ChangeDescriptor;
use crate::database::{row, Database, Row};
use crate::error::CoreResult;
use crate::identifier::IdentifierRepository;
use crate::mirror::Mirror;
use crate::schema::{reference_field, DbSchema, EntityType, VP_ID};
use dbmirror_codec::{Fields, Value};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Turns row-level writes into mirrored snapshots.
pub struct WriteBridge {
    db: Arc<dyn Database>,
    schema: Arc<DbSchema>,
    mirror: Arc<Mirror>,
    ids: Arc<IdentifierRepository>,
    enabled: AtomicBool,
    changes: Mutex<Vec<ChangeDescriptor>>,
    first_save_hooks: BTreeMap<String, Vec<String>>,
}

/// Restores the bridge's previous enabled state when dropped.
///
/// Returned by [`WriteBridge::suspend`].
#[must_use = "the bridge is re-enabled as soon as the guard is dropped"]
pub struct SuspendGuard<'a> {
    bridge: &'a WriteBridge,
    was_enabled: bool,
}

impl Drop for SuspendGuard<'_> {
    fn drop(&mut self) {
        self.bridge.enabled.store(self.was_enabled, Ordering::SeqCst);
    }
}

impl WriteBridge {
    /// Creates an enabled bridge.
    ///
    /// `db` must be the unmirrored store: the bridge reads rows back from
    /// it to enumerate the rows a filter affects.
    pub fn new(
        db: Arc<dyn Database>,
        schema: Arc<DbSchema>,
        mirror: Arc<Mirror>,
        ids: Arc<IdentifierRepository>,
    ) -> Self {
        Self {
            db,
            schema,
            mirror,
            ids,
            enabled: AtomicBool::new(true),
            changes: Mutex::new(Vec::new()),
            first_save_hooks: BTreeMap::new(),
        }
    }

    /// Re-snapshots every `child` row of a `parent` row the first time the
    /// parent is saved by an update.
    ///
    /// Children reference their parent by stable id; a parent that was
    /// never mirrored before had none, so its children's snapshots hold
    /// a null reference until they are written again.
    #[must_use]
    pub fn with_first_save_hook(mut self, parent: &str, child: &str) -> Self {
        self.first_save_hooks
            .entry(parent.to_string())
            .or_default()
            .push(child.to_string());
        self
    }

    /// The mirror written to.
    #[must_use]
    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// The identifier repository.
    #[must_use]
    pub fn identifiers(&self) -> &Arc<IdentifierRepository> {
        &self.ids
    }

    /// Stops mirroring until [`enable`](Self::enable).
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        debug!("write bridge disabled");
    }

    /// Resumes mirroring.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        debug!("write bridge enabled");
    }

    /// Returns true while writes are mirrored.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disables mirroring for the lifetime of the returned guard.
    pub fn suspend(&self) -> SuspendGuard<'_> {
        let was_enabled = self.enabled.swap(false, Ordering::SeqCst);
        SuspendGuard {
            bridge: self,
            was_enabled,
        }
    }

    /// Drains the change descriptors emitted so far.
    pub fn take_changes(&self) -> Vec<ChangeDescriptor> {
        std::mem::take(&mut *self.changes.lock())
    }

    fn tracked(&self, table: &str) -> Option<&EntityType> {
        if !self.is_enabled() {
            return None;
        }
        let entity = self.schema.entity_by_prefixed_table(table);
        if entity.is_none() {
            trace!(table, "untracked table");
        }
        entity
    }

    fn record(&self, change: Option<ChangeDescriptor>) {
        if let Some(change) = change {
            debug!(entity = %change.entity, action = %change.action, vpid = %change.entity_id, "change recorded");
            self.changes.lock().push(change);
        }
    }

    /// Mirrors an inserted row. `key` is the auto-increment key the store
    /// returned (0 if none).
    ///
    /// # Errors
    ///
    /// Returns an error if identifiers or the mirror cannot be written.
    pub fn insert(&self, table: &str, data: &Row, key: i64) -> CoreResult<()> {
        let Some(entity) = self.tracked(table) else {
            return Ok(());
        };

        let rewritten = self.ids.rewrite_references(&entity.name, data)?;
        if !self.mirror.should_be_saved(&entity.name, &rewritten) {
            trace!(entity = %entity.name, "transient row not mirrored");
            return Ok(());
        }

        let fields = if entity.generated_ids {
            let key = if key > 0 {
                Some(key)
            } else {
                data.get(&entity.id_column).and_then(Value::as_integer)
            };
            let Some(key) = key else {
                debug!(entity = %entity.name, "inserted row has no key");
                return Ok(());
            };
            self.ids.identify(&entity.name, &rewritten, key)?
        } else {
            rewritten
        };

        self.record(self.mirror.save(&entity.name, &fields)?);
        Ok(())
    }

    /// Mirrors an update of the rows matching `filter`.
    ///
    /// Called after the store applied the update.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, identifiers or the mirror fail.
    pub fn update(&self, table: &str, data: &Row, filter: &Row) -> CoreResult<()> {
        let Some(entity) = self.tracked(table) else {
            return Ok(());
        };

        // Filter columns that were updated now hold the new values.
        let mut lookup = filter.clone();
        for (column, value) in data {
            if lookup.contains_key(column) {
                lookup.insert(column.clone(), value.clone());
            }
        }

        if entity.generated_ids {
            for key in self.affected_keys(entity, table, &lookup)? {
                self.update_entity(entity, table, key, data)?;
            }
        } else {
            for key in self.affected_natural_keys(entity, table, data, &lookup)? {
                self.update_natural(entity, table, &key, data)?;
            }
        }
        Ok(())
    }

    /// Mirrors the deletion of the rows matching `filter`.
    ///
    /// Called before the store deletes them, so affected rows can still be
    /// enumerated.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, identifiers or the mirror fail.
    pub fn delete(&self, table: &str, filter: &Row) -> CoreResult<()> {
        let Some(entity) = self.tracked(table) else {
            return Ok(());
        };

        if !entity.generated_ids {
            for key in self.affected_natural_keys(entity, table, &Row::new(), filter)? {
                let fields = row([(entity.id_column.as_str(), key)]);
                self.record(self.mirror.delete(&entity.name, &fields)?);
            }
            return Ok(());
        }

        for key in self.affected_keys(entity, table, filter)? {
            let Some(id) = self.ids.lookup_id(&entity.name, key)? else {
                trace!(entity = %entity.name, key, "untracked row deleted");
                continue;
            };
            let mut fields = row([(VP_ID, id.to_hex())]);
            if let Some(current) = self.load_row(entity, table, key)? {
                self.fill_parent_id(entity, &current, &mut fields)?;
            }
            self.ids.release(&entity.name, key)?;
            self.record(self.mirror.delete(&entity.name, &fields)?);
        }
        Ok(())
    }

    /// Storage keys of the rows matched by `filter`.
    ///
    /// A filter pinning the id column names the only affected key;
    /// otherwise the store is queried.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn affected_keys(&self, entity: &EntityType, table: &str, filter: &Row) -> CoreResult<Vec<i64>> {
        if let Some(key) = filter.get(&entity.id_column).and_then(Value::as_integer) {
            return Ok(vec![key]);
        }
        Ok(self
            .db
            .select(table, filter)?
            .iter()
            .filter_map(|r| r.get(&entity.id_column).and_then(Value::as_integer))
            .collect())
    }

    fn affected_natural_keys(
        &self,
        entity: &EntityType,
        table: &str,
        data: &Row,
        filter: &Row,
    ) -> CoreResult<Vec<Value>> {
        if let Some(key) = data.get(&entity.id_column).or_else(|| filter.get(&entity.id_column)) {
            return Ok(vec![key.clone()]);
        }
        Ok(self
            .db
            .select(table, filter)?
            .into_iter()
            .filter_map(|mut r| r.remove(&entity.id_column))
            .collect())
    }

    fn load_row(&self, entity: &EntityType, table: &str, key: i64) -> CoreResult<Option<Row>> {
        let filter = row([(entity.id_column.as_str(), key)]);
        Ok(self.db.select(table, &filter)?.into_iter().next())
    }

    /// Re-snapshots one row of a type with generated ids after an update.
    ///
    /// The live row is read back so the snapshot always carries the full
    /// field set, including the parent reference of child types.
    ///
    /// # Errors
    ///
    /// Returns an error if the store, identifiers or the mirror fail.
    pub fn update_entity(&self, entity: &EntityType, table: &str, key: i64, data: &Row) -> CoreResult<()> {
        let mut fields = self.load_row(entity, table, key)?.unwrap_or_default();
        fields.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));

        let rewritten = self.ids.rewrite_references(&entity.name, &fields)?;
        if !self.mirror.should_be_saved(&entity.name, &rewritten) {
            trace!(entity = %entity.name, key, "transient row not mirrored");
            return Ok(());
        }

        let first_save = self.ids.lookup_id(&entity.name, key)?.is_none();
        let identified = self.ids.identify(&entity.name, &rewritten, key)?;
        self.record(self.mirror.save(&entity.name, &identified)?);

        if first_save {
            self.run_first_save_hooks(entity, key)?;
        }
        Ok(())
    }

    fn run_first_save_hooks(&self, parent: &EntityType, key: i64) -> CoreResult<()> {
        let Some(children) = self.first_save_hooks.get(&parent.name) else {
            return Ok(());
        };
        for child_name in children {
            let child = self.schema.require(child_name)?;
            let Some(parent_column) = child.parent_reference.as_deref() else {
                continue;
            };
            let child_table = self.schema.prefixed_table(&child.name);
            let filter = row([(parent_column, key)]);
            let child_keys = self.affected_keys(child, &child_table, &filter)?;
            debug!(entity = %parent.name, key, child = %child.name, count = child_keys.len(), "re-snapshotting children");
            for child_key in child_keys {
                self.update_entity(child, &child_table, child_key, &Row::new())?;
            }
        }
        Ok(())
    }

    fn update_natural(&self, entity: &EntityType, table: &str, key: &Value, data: &Row) -> CoreResult<()> {
        let filter = row([(entity.id_column.as_str(), key.clone())]);
        let mut fields = self
            .db
            .select(table, &filter)?
            .into_iter()
            .next()
            .unwrap_or_default();
        fields.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
        fields.insert(entity.id_column.clone(), key.clone());

        let rewritten = self.ids.rewrite_references(&entity.name, &fields)?;
        if !self.mirror.should_be_saved(&entity.name, &rewritten) {
            trace!(entity = %entity.name, key = %key, "transient row not mirrored");
            return Ok(());
        }
        self.record(self.mirror.save(&entity.name, &rewritten)?);
        Ok(())
    }

    /// Adds the parent's stable id to `fields` when the caller did not
    /// supply it, following the live foreign key in `current`.
    ///
    /// # Errors
    ///
    /// Returns an error if the mapping table cannot be read.
    pub fn fill_parent_id(&self, entity: &EntityType, current: &Fields, fields: &mut Fields) -> CoreResult<()> {
        let (Some(column), Some(parent)) = (entity.parent_reference.as_deref(), entity.parent_entity()) else {
            return Ok(());
        };
        let field = reference_field(column);
        if fields.get(&field).is_some_and(|v| !v.is_null()) {
            return Ok(());
        }
        let Some(parent_key) = current.get(column).and_then(Value::as_integer) else {
            return Ok(());
        };
        if let Some(parent_id) = self.ids.lookup_id(parent, parent_key)? {
            fields.insert(field, Value::text(parent_id.to_hex()));
        }
        Ok(())
    }
}
