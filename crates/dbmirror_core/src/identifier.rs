//! Identifier repository.
//!
//! Maps a row's transient storage key to its [`StableId`] and back. The
//! mapping lives in the backing store itself, in the `vp_id` table with
//! the columns `table` (unprefixed table name), `id` (storage key) and
//! `vp_id` (hex stable id). It is the only shared mutable state of the
//! write and read paths; every mutation goes through one lock.

use crate::database::{row, Database, Row};
use crate::error::{CoreError, CoreResult};
use crate::schema::{reference_field, DbSchema, EntityType, VP_ID, VP_ID_TABLE};
use crate::stable_id::StableId;
use dbmirror_codec::{Fields, Value};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace};

/// A snapshot turned back into column values.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredRow {
    /// Column values with references replaced by storage keys.
    pub fields: Fields,
    /// Reference columns whose stable id has no mapping yet.
    pub unresolved: Vec<String>,
}

/// Owner of the storage key ↔ stable id mapping.
pub struct IdentifierRepository {
    db: Arc<dyn Database>,
    schema: Arc<DbSchema>,
    table: String,
    lock: Mutex<()>,
}

impl IdentifierRepository {
    /// Creates a repository over the mapping table in `db`.
    pub fn new(db: Arc<dyn Database>, schema: Arc<DbSchema>) -> Self {
        let table = schema.prefixed_table(VP_ID_TABLE);
        Self {
            db,
            schema,
            table,
            lock: Mutex::new(()),
        }
    }

    /// Physical name of the mapping table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    fn mapping_filter(entity: &EntityType, key: i64) -> Row {
        row([
            ("table", Value::text(entity.table.as_str())),
            ("id", Value::Integer(key)),
        ])
    }

    fn parse_id(value: Option<&Value>) -> CoreResult<Option<StableId>> {
        match value {
            Some(Value::Text(hex)) => hex.parse().map(Some),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Err(CoreError::InvalidStableId(other.to_string())),
        }
    }

    /// Returns the stable id mapped to `key`, without assigning one.
    ///
    /// A key that was never observed is `None`, which callers treat as
    /// "nothing to persist yet".
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn lookup_id(&self, entity: &str, key: i64) -> CoreResult<Option<StableId>> {
        let entity = self.schema.require(entity)?;
        let rows = self.db.select(&self.table, &Self::mapping_filter(entity, key))?;
        Self::parse_id(rows.first().and_then(|r| r.get(VP_ID)))
    }

    /// Returns the stable id for `key`, assigning and persisting a new one
    /// if the row has never been observed.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn resolve(&self, entity: &str, key: i64) -> CoreResult<StableId> {
        let _guard = self.lock.lock();
        if let Some(id) = self.lookup_id(entity, key)? {
            return Ok(id);
        }

        let entity_type = self.schema.require(entity)?;
        let id = StableId::new();
        self.db.insert(&self.table, &Self::mapping_row(entity_type, key, &id))?;
        debug!(entity, key, vpid = %id, "assigned stable id");
        Ok(id)
    }

    fn mapping_row(entity: &EntityType, key: i64, id: &StableId) -> Row {
        row([
            ("table", Value::text(entity.table.as_str())),
            ("id", Value::Integer(key)),
            (VP_ID, Value::text(id.to_hex())),
        ])
    }

    /// Returns the storage key mapped to `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn lookup_key(&self, entity: &str, id: &StableId) -> CoreResult<Option<i64>> {
        let entity = self.schema.require(entity)?;
        let filter = row([
            ("table", Value::text(entity.table.as_str())),
            (VP_ID, Value::text(id.to_hex())),
        ]);
        let rows = self.db.select(&self.table, &filter)?;
        Ok(rows
            .first()
            .and_then(|r| r.get("id"))
            .and_then(Value::as_integer))
    }

    /// Records `key` ↔ `id`, replacing any previous mapping of either.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn insert_mapping(&self, entity: &str, key: i64, id: &StableId) -> CoreResult<()> {
        let entity_type = self.schema.require(entity)?;
        let _guard = self.lock.lock();

        self.db.delete(&self.table, &Self::mapping_filter(entity_type, key))?;
        let by_id = row([
            ("table", Value::text(entity_type.table.as_str())),
            (VP_ID, Value::text(id.to_hex())),
        ]);
        self.db.delete(&self.table, &by_id)?;
        self.db.insert(&self.table, &Self::mapping_row(entity_type, key, id))?;
        trace!(entity, key, vpid = %id, "mapping recorded");
        Ok(())
    }

    /// Drops the mapping of a deleted row.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn release(&self, entity: &str, key: i64) -> CoreResult<()> {
        let entity_type = self.schema.require(entity)?;
        let _guard = self.lock.lock();
        let removed = self
            .db
            .delete(&self.table, &Self::mapping_filter(entity_type, key))?;
        trace!(entity, key, removed, "mapping released");
        Ok(())
    }

    /// Every mapping of an entity type.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown, the store fails, or a
    /// stored id is malformed.
    pub fn mapped(&self, entity: &str) -> CoreResult<Vec<(i64, StableId)>> {
        let entity = self.schema.require(entity)?;
        let filter = row([("table", entity.table.as_str())]);
        let mut out = Vec::new();
        for mapping in self.db.select(&self.table, &filter)? {
            let key = mapping.get("id").and_then(Value::as_integer);
            if let (Some(key), Some(id)) = (key, Self::parse_id(mapping.get(VP_ID))?) {
                out.push((key, id));
            }
        }
        Ok(out)
    }

    /// Replaces every foreign-key field with the referenced stable id.
    ///
    /// `column` becomes `vp_<column>`; conditional value references keep
    /// their field name. `0` stays `0` (no reference). A referenced row
    /// that has no mapping yet leaves a null reference. Ignored columns
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn rewrite_references(&self, entity: &str, fields: &Fields) -> CoreResult<Fields> {
        let entity_type = self.schema.require(entity)?;
        let mut out = fields.clone();

        for (column, target) in &entity_type.references {
            if let Some(value) = out.remove(column) {
                let reference = self.reference_to(target, &value)?;
                out.insert(reference_field(column), reference);
            }
        }

        for rule in &entity_type.value_references {
            if !rule.applies_to(&out) {
                continue;
            }
            if let Some(value) = out.get(&rule.field).cloned() {
                let reference = self.reference_to(&rule.target, &value)?;
                out.insert(rule.field.clone(), reference);
            }
        }

        for column in &entity_type.ignored_columns {
            out.remove(column);
        }

        Ok(out)
    }

    fn reference_to(&self, target: &str, value: &Value) -> CoreResult<Value> {
        match value.as_integer() {
            Some(0) => Ok(Value::Integer(0)),
            Some(key) => match self.lookup_id(target, key)? {
                Some(id) => Ok(Value::text(id.to_hex())),
                None => {
                    trace!(entity = target, key, "reference to untracked row");
                    Ok(Value::Null)
                }
            },
            None => Ok(Value::Null),
        }
    }

    /// Inverse of [`rewrite_references`](Self::rewrite_references).
    ///
    /// Drops `vp_id` and turns every `vp_<column>` back into `column`
    /// holding the live storage key. References without a mapping become
    /// `0` and are listed in [`RestoredRow::unresolved`].
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown, the store fails, or a
    /// reference is not a valid stable id.
    pub fn restore_references(&self, entity: &str, snapshot: &Fields) -> CoreResult<RestoredRow> {
        let entity_type = self.schema.require(entity)?;
        let mut fields = snapshot.clone();
        let mut unresolved = Vec::new();
        fields.remove(VP_ID);

        for (column, target) in &entity_type.references {
            let Some(value) = fields.remove(&reference_field(column)) else {
                continue;
            };
            let key = match Self::referenced_id(&value)? {
                None => 0,
                Some(id) => match self.lookup_key(target, &id)? {
                    Some(key) => key,
                    None => {
                        unresolved.push(column.clone());
                        0
                    }
                },
            };
            fields.insert(column.clone(), Value::Integer(key));
        }

        for rule in &entity_type.value_references {
            if !rule.applies_to(&fields) {
                continue;
            }
            let id = match fields.get(&rule.field) {
                Some(Value::Text(text)) => text.parse::<StableId>().ok(),
                _ => None,
            };
            if let Some(id) = id {
                let key = match self.lookup_key(&rule.target, &id)? {
                    Some(key) => key,
                    None => {
                        unresolved.push(rule.field.clone());
                        0
                    }
                };
                fields.insert(rule.field.clone(), Value::text(key.to_string()));
            }
        }

        Ok(RestoredRow { fields, unresolved })
    }

    fn referenced_id(value: &Value) -> CoreResult<Option<StableId>> {
        match value {
            Value::Null => Ok(None),
            Value::Integer(0) => Ok(None),
            Value::Text(text) if text.is_empty() || text == "0" => Ok(None),
            Value::Text(text) => text.parse().map(Some),
            other => Err(CoreError::InvalidStableId(other.to_string())),
        }
    }

    /// Attaches the row's stable id under `vp_id`, assigning one if needed,
    /// and drops the transient id column.
    ///
    /// Types with natural keys are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the entity is unknown or the store fails.
    pub fn identify(&self, entity: &str, fields: &Fields, key: i64) -> CoreResult<Fields> {
        let entity_type = self.schema.require(entity)?;
        let mut out = fields.clone();
        if !entity_type.generated_ids {
            return Ok(out);
        }
        let id = self.resolve(entity, key)?;
        out.remove(&entity_type.id_column);
        out.insert(VP_ID.to_string(), Value::text(id.to_hex()));
        Ok(out)
    }
}
