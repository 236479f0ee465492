//! Backing relational store.
//!
//! The engine talks to the host database through the [`Database`] trait:
//! row-level writes keyed by physical table name, with equality filters
//! standing in for `WHERE` clauses.

mod memory;
mod mirrored;

pub use memory::InMemoryDatabase;
pub use mirrored::MirroredDatabase;

use crate::error::CoreResult;
use dbmirror_codec::{Fields, Value};

/// A database row, or a set of column values.
pub type Row = Fields;

/// Row-level access to the backing relational store.
///
/// Filters are conjunctions of column equalities. Values compare the way
/// a relational store compares a column with a bound parameter, so
/// `5` matches `"5"`.
pub trait Database: Send + Sync {
    /// Inserts a row and returns its auto-increment key (0 if the table has
    /// none).
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the row.
    fn insert(&self, table: &str, row: &Row) -> CoreResult<i64>;

    /// Sets `data` on every row matching `filter`; returns the match count.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the update.
    fn update(&self, table: &str, data: &Row, filter: &Row) -> CoreResult<usize>;

    /// Deletes every row matching `filter`; returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the delete.
    fn delete(&self, table: &str, filter: &Row) -> CoreResult<usize>;

    /// Returns every row matching `filter`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn select(&self, table: &str, filter: &Row) -> CoreResult<Vec<Row>>;
}

/// Builds a row from `(column, value)` pairs.
pub fn row<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Row
where
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Returns true if `row` matches every column of `filter`.
pub(crate) fn matches_filter(row: &Row, filter: &Row) -> bool {
    filter.iter().all(|(column, expected)| {
        row.get(column)
            .unwrap_or(&Value::Null)
            .loosely_eq(expected)
    })
}
