//! In-memory relational store for testing.

use super::{matches_filter, Database, Row};
use crate::error::{CoreError, CoreResult};
use dbmirror_codec::Value;
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
struct Table {
    auto_increment: Option<String>,
    next_id: i64,
    rows: Vec<Row>,
}

impl Table {
    fn new(auto_increment: Option<String>) -> Self {
        Self {
            auto_increment,
            next_id: 1,
            rows: Vec::new(),
        }
    }
}

/// An in-memory relational store.
///
/// Tables are created on first insert, or up front with
/// [`InMemoryDatabase::create_table`] to declare an auto-increment column.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across threads.
///
/// # Example
///
/// ```rust
/// use dbmirror_core::{row, Database, InMemoryDatabase};
///
/// let db = InMemoryDatabase::new();
/// db.create_table("wp_posts", Some("ID"));
/// let id = db.insert("wp_posts", &row([("post_title", "Hello")])).unwrap();
/// assert_eq!(id, 1);
/// assert_eq!(db.select("wp_posts", &row([("ID", 1)])).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryDatabase {
    tables: RwLock<BTreeMap<String, Table>>,
}

impl InMemoryDatabase {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (or resets) a table with an optional auto-increment column.
    pub fn create_table(&self, table: &str, auto_increment: Option<&str>) {
        self.tables
            .write()
            .insert(table.to_string(), Table::new(auto_increment.map(str::to_string)));
    }

    /// Returns a copy of every row in `table`.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Returns the number of rows in `table`.
    #[must_use]
    pub fn count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }
}

impl Database for InMemoryDatabase {
    fn insert(&self, table: &str, row: &Row) -> CoreResult<i64> {
        let mut tables = self.tables.write();
        let table_data = tables
            .entry(table.to_string())
            .or_insert_with(|| Table::new(None));

        let mut row = row.clone();
        let Some(column) = table_data.auto_increment.clone() else {
            table_data.rows.push(row);
            return Ok(0);
        };

        let id = match row.get(&column).and_then(Value::as_integer) {
            Some(id) if id > 0 => {
                let taken = table_data
                    .rows
                    .iter()
                    .any(|r| r.get(&column).and_then(Value::as_integer) == Some(id));
                if taken {
                    return Err(CoreError::database(format!(
                        "duplicate key {id} for {table}.{column}"
                    )));
                }
                id
            }
            _ => table_data.next_id,
        };

        table_data.next_id = table_data.next_id.max(id + 1);
        row.insert(column, Value::Integer(id));
        table_data.rows.push(row);
        Ok(id)
    }

    fn update(&self, table: &str, data: &Row, filter: &Row) -> CoreResult<usize> {
        let mut tables = self.tables.write();
        let Some(table_data) = tables.get_mut(table) else {
            return Ok(0);
        };

        let mut count = 0;
        for row in table_data.rows.iter_mut().filter(|r| matches_filter(r, filter)) {
            for (column, value) in data {
                row.insert(column.clone(), value.clone());
            }
            count += 1;
        }
        Ok(count)
    }

    fn delete(&self, table: &str, filter: &Row) -> CoreResult<usize> {
        let mut tables = self.tables.write();
        let Some(table_data) = tables.get_mut(table) else {
            return Ok(0);
        };

        let before = table_data.rows.len();
        table_data.rows.retain(|r| !matches_filter(r, filter));
        Ok(before - table_data.rows.len())
    }

    fn select(&self, table: &str, filter: &Row) -> CoreResult<Vec<Row>> {
        Ok(self
            .tables
            .read()
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|r| matches_filter(r, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::row;

    fn posts() -> InMemoryDatabase {
        let db = InMemoryDatabase::new();
        db.create_table("wp_posts", Some("ID"));
        db
    }

    #[test]
    fn insert_assigns_increasing_keys() {
        let db = posts();
        assert_eq!(db.insert("wp_posts", &row([("post_title", "a")])).unwrap(), 1);
        assert_eq!(db.insert("wp_posts", &row([("post_title", "b")])).unwrap(), 2);
        assert_eq!(db.count("wp_posts"), 2);
    }

    #[test]
    fn insert_honors_explicit_key() {
        let db = posts();
        assert_eq!(db.insert("wp_posts", &row([("ID", 10)])).unwrap(), 10);
        assert_eq!(db.insert("wp_posts", &row([("post_title", "next")])).unwrap(), 11);
        assert!(db.insert("wp_posts", &row([("ID", 10)])).is_err());
    }

    #[test]
    fn tables_without_auto_increment() {
        let db = InMemoryDatabase::new();
        assert_eq!(db.insert("wp_vp_id", &row([("id", 1)])).unwrap(), 0);
        assert_eq!(db.count("wp_vp_id"), 1);
    }

    #[test]
    fn update_delete_select_with_loose_filters() {
        let db = posts();
        db.insert("wp_posts", &row([("post_status", "draft")])).unwrap();
        db.insert("wp_posts", &row([("post_status", "draft")])).unwrap();
        db.insert("wp_posts", &row([("post_status", "publish")])).unwrap();

        let updated = db
            .update("wp_posts", &row([("post_status", "trash")]), &row([("post_status", "draft")]))
            .unwrap();
        assert_eq!(updated, 2);

        let by_text_key = db.select("wp_posts", &row([("ID", "3")])).unwrap();
        assert_eq!(by_text_key[0]["post_status"], Value::text("publish"));

        assert_eq!(db.delete("wp_posts", &row([("post_status", "trash")])).unwrap(), 2);
        assert_eq!(db.count("wp_posts"), 1);
    }

    #[test]
    fn unknown_table_is_empty() {
        let db = InMemoryDatabase::new();
        assert!(db.select("nope", &Row::new()).unwrap().is_empty());
        assert_eq!(db.update("nope", &Row::new(), &Row::new()).unwrap(), 0);
        assert_eq!(db.delete("nope", &Row::new()).unwrap(), 0);
    }
}
