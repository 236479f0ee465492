//! Entity type descriptors.

use dbmirror_codec::{Fields, Value};
use glob::Pattern;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Reserved snapshot field holding an entity's own stable id.
pub const VP_ID: &str = "vp_id";

/// Returns the snapshot field that stores the stable id referenced by
/// the foreign-key column `field`.
#[must_use]
pub fn reference_field(field: &str) -> String {
    format!("vp_{field}")
}

/// A field whose value is a foreign key only when a sibling field has a
/// given value (e.g. `meta_value` when `meta_key = _thumbnail_id`).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValueReference {
    /// The sibling field that selects the rule.
    pub when_field: String,
    /// The value the sibling field must have.
    pub equals: String,
    /// The field holding the foreign key.
    pub field: String,
    /// Entity type referenced.
    pub target: String,
}

impl ValueReference {
    /// Returns true if the rule applies to `fields`.
    #[must_use]
    pub fn applies_to(&self, fields: &Fields) -> bool {
        fields
            .get(&self.when_field)
            .is_some_and(|v| v.to_string() == self.equals)
    }
}

/// A rule marking rows as transient: `field` matches the glob `pattern`.
#[derive(Debug, Clone, PartialEq)]
pub struct IgnoreRule {
    /// Field inspected.
    pub field: String,
    /// Compiled glob pattern.
    pub pattern: Pattern,
}

impl IgnoreRule {
    /// Returns true if `fields` matches the rule.
    #[must_use]
    pub fn matches(&self, fields: &Fields) -> bool {
        match fields.get(&self.field) {
            Some(Value::Null) | None => false,
            Some(value) => self.pattern.matches(&value.to_string()),
        }
    }
}

/// Static descriptor of one entity type.
///
/// Immutable after the schema is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityType {
    /// Entity name (`post`).
    pub name: String,
    /// Unprefixed backing table (`posts`).
    pub table: String,
    /// Id column; the natural key for types without generated ids.
    pub id_column: String,
    /// Top-level mirror directory of this type's snapshots.
    pub directory: String,
    /// Foreign-key column → referenced entity name.
    pub references: BTreeMap<String, String>,
    /// Foreign-key column pointing at the owning parent, for child types.
    pub parent_reference: Option<String>,
    /// Conditional foreign keys.
    pub value_references: Vec<ValueReference>,
    /// Whether stable ids are minted by the engine (false for natural keys).
    pub generated_ids: bool,
    /// Minimum database version that has this type.
    pub since: Option<u64>,
    /// Columns never written to snapshots.
    pub ignored_columns: Vec<String>,
    /// Rules marking rows that are never mirrored.
    pub ignored: Vec<IgnoreRule>,
}

impl EntityType {
    /// Returns true if this is a child entity scoped under a parent.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.parent_reference.is_some()
    }

    /// Name of the parent entity type, for child types.
    #[must_use]
    pub fn parent_entity(&self) -> Option<&str> {
        self.parent_reference
            .as_ref()
            .and_then(|field| self.references.get(field))
            .map(String::as_str)
    }

    /// Snapshot field holding the parent's stable id, for child types.
    #[must_use]
    pub fn parent_field(&self) -> Option<String> {
        self.parent_reference.as_deref().map(reference_field)
    }

    /// Returns true if a row with these fields is transient.
    #[must_use]
    pub fn is_ignored(&self, fields: &Fields) -> bool {
        self.ignored.iter().any(|rule| rule.matches(fields))
    }

    /// Entity types this type depends on, excluding itself.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> + '_ {
        self.references
            .values()
            .chain(self.value_references.iter().map(|r| &r.target))
            .map(String::as_str)
            .filter(move |target| *target != self.name)
    }

    /// Returns true if this type holds references to `entity`.
    #[must_use]
    pub fn references_entity(&self, entity: &str) -> bool {
        self.references.values().any(|t| t == entity)
            || self.value_references.iter().any(|r| r.target == entity)
    }
}

/// Serialized form of an entity type.
#[derive(Debug, Deserialize)]
pub(crate) struct EntityDef {
    pub name: String,
    pub table: String,
    pub id: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub references: BTreeMap<String, String>,
    #[serde(default)]
    pub parent_reference: Option<String>,
    #[serde(default)]
    pub value_references: Vec<ValueReference>,
    #[serde(default = "default_generated_ids")]
    pub generated_ids: bool,
    #[serde(default)]
    pub since: Option<u64>,
    #[serde(default)]
    pub ignored_columns: Vec<String>,
    #[serde(default)]
    pub ignored: Vec<IgnoreDef>,
}

const fn default_generated_ids() -> bool {
    true
}

/// Serialized form of an ignore rule.
#[derive(Debug, Deserialize)]
pub(crate) struct IgnoreDef {
    pub field: String,
    pub pattern: String,
}

impl EntityDef {
    pub(crate) fn compile(self) -> Result<EntityType, String> {
        let ignored = self
            .ignored
            .into_iter()
            .map(|rule| {
                Pattern::new(&rule.pattern)
                    .map(|pattern| IgnoreRule {
                        field: rule.field,
                        pattern,
                    })
                    .map_err(|e| format!("entity {}: bad pattern {:?}: {e}", self.name, rule.pattern))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(parent) = &self.parent_reference {
            if !self.references.contains_key(parent) {
                return Err(format!(
                    "entity {}: parent reference {parent:?} is not a reference",
                    self.name
                ));
            }
        }

        Ok(EntityType {
            directory: self.directory.unwrap_or_else(|| self.table.clone()),
            name: self.name,
            table: self.table,
            id_column: self.id,
            references: self.references,
            parent_reference: self.parent_reference,
            value_references: self.value_references,
            generated_ids: self.generated_ids,
            since: self.since,
            ignored_columns: self.ignored_columns,
            ignored,
        })
    }
}
