//! Entity schema.
//!
//! The schema is data: a JSON document listing entity types in
//! declaration order. Types whose `since` is newer than the configured
//! database version are dropped at load.

mod entity;

pub use entity::{reference_field, EntityType, IgnoreRule, ValueReference, VP_ID};

use crate::error::{CoreError, CoreResult};
use entity::EntityDef;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// The bundled WordPress schema.
const WORDPRESS_SCHEMA: &str = include_str!("wordpress.json");

/// Unprefixed name of the identifier mapping table.
pub const VP_ID_TABLE: &str = "vp_id";

#[derive(Debug, Deserialize)]
struct SchemaDef {
    entities: Vec<EntityDef>,
}

/// Versioned description of every tracked entity type.
#[derive(Debug, Clone)]
pub struct DbSchema {
    entities: Vec<EntityType>,
    by_name: BTreeMap<String, usize>,
    prefix: String,
    sequence: Vec<String>,
}

impl DbSchema {
    /// Loads a schema from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, names are duplicated, a
    /// reference targets an unknown type, or references form a cycle.
    pub fn from_json(json: &str, prefix: &str, db_version: u64) -> CoreResult<Self> {
        let def: SchemaDef = serde_json::from_str(json)?;

        let mut entities = Vec::with_capacity(def.entities.len());
        for entity in def.entities {
            let entity = entity.compile().map_err(CoreError::invalid_schema)?;
            if entity.since.is_some_and(|since| since > db_version) {
                continue;
            }
            entities.push(entity);
        }

        let mut by_name = BTreeMap::new();
        for (index, entity) in entities.iter().enumerate() {
            if by_name.insert(entity.name.clone(), index).is_some() {
                return Err(CoreError::invalid_schema(format!(
                    "duplicate entity {}",
                    entity.name
                )));
            }
        }

        for entity in &entities {
            let targets = entity
                .references
                .values()
                .chain(entity.value_references.iter().map(|r| &r.target));
            for target in targets {
                if !by_name.contains_key(target) {
                    return Err(CoreError::invalid_schema(format!(
                        "entity {} references unknown entity {target}",
                        entity.name
                    )));
                }
            }
        }

        let sequence = topological_order(&entities)?;

        Ok(Self {
            entities,
            by_name,
            prefix: prefix.to_string(),
            sequence,
        })
    }

    /// Loads the bundled WordPress schema.
    ///
    /// # Errors
    ///
    /// Returns an error only if the bundled document is invalid.
    pub fn wordpress(prefix: &str, db_version: u64) -> CoreResult<Self> {
        Self::from_json(WORDPRESS_SCHEMA, prefix, db_version)
    }

    /// Table name prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// All entity types in declaration order.
    pub fn entities(&self) -> impl Iterator<Item = &EntityType> {
        self.entities.iter()
    }

    /// Looks up an entity type by name.
    #[must_use]
    pub fn entity(&self, name: &str) -> Option<&EntityType> {
        self.by_name.get(name).map(|&i| &self.entities[i])
    }

    /// Looks up an entity type by name, failing if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnknownEntity`].
    pub fn require(&self, name: &str) -> CoreResult<&EntityType> {
        self.entity(name).ok_or_else(|| CoreError::unknown_entity(name))
    }

    /// Looks up an entity type by unprefixed table name.
    #[must_use]
    pub fn entity_by_table(&self, table: &str) -> Option<&EntityType> {
        self.entities.iter().find(|e| e.table == table)
    }

    /// Looks up an entity type by physical (prefixed) table name.
    #[must_use]
    pub fn entity_by_prefixed_table(&self, table: &str) -> Option<&EntityType> {
        table
            .strip_prefix(&self.prefix)
            .and_then(|t| self.entity_by_table(t))
    }

    /// Physical table name of an entity type, or of a plain table name.
    #[must_use]
    pub fn prefixed_table(&self, entity_or_table: &str) -> String {
        let table = self
            .entity(entity_or_table)
            .map_or(entity_or_table, |e| e.table.as_str());
        format!("{}{table}", self.prefix)
    }

    /// Returns true if the named type is a child entity.
    #[must_use]
    pub fn is_child_entity(&self, name: &str) -> bool {
        self.entity(name).is_some_and(EntityType::is_child)
    }

    /// Entity names with parents before children; declaration order
    /// breaks ties.
    #[must_use]
    pub fn synchronization_sequence(&self) -> &[String] {
        &self.sequence
    }

    /// Other entity types that hold references to `name`.
    #[must_use]
    pub fn referencing(&self, name: &str) -> Vec<&EntityType> {
        self.entities
            .iter()
            .filter(|e| e.name != name && e.references_entity(name))
            .collect()
    }
}

fn topological_order(entities: &[EntityType]) -> CoreResult<Vec<String>> {
    let mut placed: BTreeSet<&str> = BTreeSet::new();
    let mut order = Vec::with_capacity(entities.len());

    while order.len() < entities.len() {
        let next = entities.iter().find(|e| {
            !placed.contains(e.name.as_str()) && e.dependencies().all(|d| placed.contains(d))
        });
        match next {
            Some(entity) => {
                placed.insert(entity.name.as_str());
                order.push(entity.name.clone());
            }
            None => {
                let stuck: Vec<&str> = entities
                    .iter()
                    .map(|e| e.name.as_str())
                    .filter(|n| !placed.contains(n))
                    .collect();
                return Err(CoreError::invalid_schema(format!(
                    "reference cycle between {}",
                    stuck.join(", ")
                )));
            }
        }
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wordpress() -> DbSchema {
        DbSchema::wordpress("wp_", 38590).unwrap()
    }

    #[test]
    fn bundled_schema_loads() {
        let schema = wordpress();
        assert!(schema.entity("post").is_some());
        assert!(schema.entity("option").is_some_and(|o| !o.generated_ids));
        assert!(schema.is_child_entity("postmeta"));
        assert!(!schema.is_child_entity("post"));
    }

    #[test]
    fn since_gate_drops_newer_types() {
        let old = DbSchema::wordpress("wp_", 30000).unwrap();
        assert!(old.entity("termmeta").is_none());
        assert!(wordpress().entity("termmeta").is_some());
    }

    #[test]
    fn table_lookups() {
        let schema = wordpress();
        assert_eq!(schema.entity_by_table("posts").unwrap().name, "post");
        assert_eq!(schema.entity_by_prefixed_table("wp_posts").unwrap().name, "post");
        assert!(schema.entity_by_prefixed_table("posts").is_none());
        assert!(schema.entity_by_prefixed_table("wp_links").is_none());
        assert_eq!(schema.prefixed_table("post"), "wp_posts");
        assert_eq!(schema.prefixed_table(VP_ID_TABLE), "wp_vp_id");
    }

    #[test]
    fn sequence_puts_parents_first() {
        let schema = wordpress();
        let seq = schema.synchronization_sequence();
        let pos = |name: &str| seq.iter().position(|n| n == name).unwrap();
        assert!(pos("term") < pos("term_taxonomy"));
        assert!(pos("term_taxonomy") < pos("post"));
        assert!(pos("user") < pos("post"));
        assert!(pos("post") < pos("postmeta"));
        assert!(pos("post") < pos("comment"));
        assert!(pos("comment") < pos("commentmeta"));
        assert_eq!(seq.len(), schema.entities().count());
    }

    #[test]
    fn sequence_ignores_declaration_order() {
        let json = r#"{"entities": [
            {"name": "meta", "table": "meta", "id": "id",
             "parent_reference": "owner", "references": {"owner": "thing"}},
            {"name": "thing", "table": "things", "id": "id"}
        ]}"#;
        let schema = DbSchema::from_json(json, "", 1).unwrap();
        assert_eq!(schema.synchronization_sequence(), ["thing", "meta"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let json = r#"{"entities": [
            {"name": "a", "table": "a", "id": "id", "references": {"b_id": "b"}},
            {"name": "b", "table": "b", "id": "id", "references": {"a_id": "a"}}
        ]}"#;
        assert!(matches!(
            DbSchema::from_json(json, "", 1),
            Err(CoreError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn unknown_reference_target_is_rejected() {
        let json = r#"{"entities": [
            {"name": "a", "table": "a", "id": "id", "references": {"x": "missing"}}
        ]}"#;
        assert!(DbSchema::from_json(json, "", 1).is_err());
    }

    #[test]
    fn referencing_types() {
        let schema = wordpress();
        let names: Vec<&str> = schema
            .referencing("post")
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(names, vec!["postmeta", "comment"]);
    }
}
