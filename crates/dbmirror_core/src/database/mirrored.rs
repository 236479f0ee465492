//! A database whose writes are mirrored.

use super::{Database, Row};
use crate::bridge::WriteBridge;
use crate::error::CoreResult;
use std::sync::Arc;

/// Wraps a [`Database`] and reports every write to a [`WriteBridge`].
///
/// Inserts and updates are mirrored after the store accepted them;
/// deletes are mirrored first, while the doomed rows can still be read.
/// Reads pass straight through.
pub struct MirroredDatabase {
    inner: Arc<dyn Database>,
    bridge: Arc<WriteBridge>,
}

impl MirroredDatabase {
    /// Wraps `inner`. The bridge must read from `inner`, not from the
    /// wrapper.
    pub fn new(inner: Arc<dyn Database>, bridge: Arc<WriteBridge>) -> Self {
        Self { inner, bridge }
    }

    /// The unmirrored store.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Database> {
        &self.inner
    }

    /// The bridge writes are reported to.
    #[must_use]
    pub fn bridge(&self) -> &Arc<WriteBridge> {
        &self.bridge
    }
}

impl Database for MirroredDatabase {
    fn insert(&self, table: &str, row: &Row) -> CoreResult<i64> {
        let key = self.inner.insert(table, row)?;
        self.bridge.insert(table, row, key)?;
        Ok(key)
    }

    fn update(&self, table: &str, data: &Row, filter: &Row) -> CoreResult<usize> {
        let count = self.inner.update(table, data, filter)?;
        self.bridge.update(table, data, filter)?;
        Ok(count)
    }

    fn delete(&self, table: &str, filter: &Row) -> CoreResult<usize> {
        self.bridge.delete(table, filter)?;
        self.inner.delete(table, filter)
    }

    fn select(&self, table: &str, filter: &Row) -> CoreResult<Vec<Row>> {
        self.inner.select(table, filter)
    }
}
