//! Undo and rollback of mirror revisions.
//!
//! A revert computes the tree the mirror should have, checks that the
//! history rewrite is safe, writes the tree, commits it and replays it into
//! the database. Rejections are reported as a [`RevertStatus`], and leave
//! both the mirror and the database untouched.

use crate::error::{SyncError, SyncResult};
use crate::history::{diff_trees, FileChange, HistoryLog, RevisionId, Tree};
use crate::process::SynchronizationProcess;
use dbmirror_codec::{from_ini, Fields, LineEnding, Value};
use dbmirror_core::{
    decode_snapshot, encode_snapshot, entity_for_path, reference_field, Action,
    ChangeDescriptor, ChangedFile, DbSchema, EntityType, StableId, WriteBridge,
};
use dbmirror_storage::StorageBackend;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Terminal outcome of one revert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertStatus {
    /// The revert was applied.
    Ok,
    /// Later changes touched what the revert would change.
    MergeConflict,
    /// The mirror already is in the requested state.
    NothingToCommit,
    /// The result would reference entities that do not exist.
    ViolatedReferentialIntegrity,
    /// Merge revisions cannot be undone.
    RevertingMergeCommit,
}

impl RevertStatus {
    /// Human-readable message.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            RevertStatus::Ok => "OK",
            RevertStatus::MergeConflict => "Error: Overwritten changes can not be reverted.",
            RevertStatus::NothingToCommit => {
                "There was nothing to commit. Current state is the same as the one you want rollback to."
            }
            RevertStatus::ViolatedReferentialIntegrity => {
                "Error: Objects with missing references cannot be restored. For example we cannot restore comment where the related post was deleted."
            }
            RevertStatus::RevertingMergeCommit => "Error: It is not possible to undo merge commit.",
        }
    }

    /// Returns true for [`RevertStatus::Ok`].
    #[must_use]
    pub const fn is_ok(self) -> bool {
        matches!(self, RevertStatus::Ok)
    }
}

impl fmt::Display for RevertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Phase of the reverter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevertState {
    /// No revert running.
    #[default]
    Idle,
    /// Checking whether the revert is safe.
    Reverting,
    /// Writing, committing and synchronizing.
    Applying,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Undo,
    Rollback,
}

/// Returns the reverter to idle when a revert ends, however it ends.
struct StateGuard<'a> {
    state: &'a RwLock<RevertState>,
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        *self.state.write() = RevertState::Idle;
    }
}

fn enter(state: &RwLock<RevertState>) -> SyncResult<StateGuard<'_>> {
    let mut current = state.write();
    if *current != RevertState::Idle {
        return Err(SyncError::RevertInProgress);
    }
    *current = RevertState::Reverting;
    Ok(StateGuard { state })
}

/// Moves the mirror, and then the database, to an earlier state.
pub struct Reverter {
    history: Arc<dyn HistoryLog>,
    backend: Arc<dyn StorageBackend>,
    schema: Arc<DbSchema>,
    bridge: Arc<WriteBridge>,
    process: Arc<SynchronizationProcess>,
    line_ending: LineEnding,
    state: RwLock<RevertState>,
}

impl Reverter {
    /// Creates an idle reverter.
    pub fn new(
        history: Arc<dyn HistoryLog>,
        backend: Arc<dyn StorageBackend>,
        schema: Arc<DbSchema>,
        bridge: Arc<WriteBridge>,
        process: Arc<SynchronizationProcess>,
        line_ending: LineEnding,
    ) -> Self {
        Self {
            history,
            backend,
            schema,
            bridge,
            process,
            line_ending,
            state: RwLock::new(RevertState::Idle),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> RevertState {
        *self.state.read()
    }

    /// Returns true if the mirror has no uncommitted changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the working tree cannot be read.
    pub fn can_revert(&self) -> SyncResult<bool> {
        self.history.is_clean()
    }

    /// Reverts the changes of one revision, keeping everything after it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::RevertInProgress`] if another revert runs, or
    /// an error if the history, mirror or database fail.
    pub fn undo(&self, target: &RevisionId) -> SyncResult<RevertStatus> {
        self.revert(target, Mode::Undo)
    }

    /// Restores the mirror to the tree of `target`.
    ///
    /// # Errors
    ///
    /// See [`undo`](Self::undo).
    pub fn rollback(&self, target: &RevisionId) -> SyncResult<RevertStatus> {
        self.revert(target, Mode::Rollback)
    }

    fn revert(&self, target: &RevisionId, mode: Mode) -> SyncResult<RevertStatus> {
        let _guard = enter(&self.state)?;
        let revision = self.history.revision(target)?;

        if mode == Mode::Undo && revision.is_merge() {
            return Ok(self.reject(target, RevertStatus::RevertingMergeCommit));
        }

        let head = self
            .history
            .head()
            .ok_or_else(|| SyncError::history("history has no head revision"))?;
        let ours = self.history.tree_at(&head)?;

        let (result, conflicts) = match mode {
            Mode::Undo => {
                let base = self.history.tree_at(target)?;
                let theirs = match revision.parents.first() {
                    Some(parent) => self.history.tree_at(parent)?,
                    None => Tree::new(),
                };
                three_way_merge(&base, &ours, &theirs, self.line_ending)
            }
            Mode::Rollback => (self.history.tree_at(target)?, Vec::new()),
        };

        let changes = diff_trees(&ours, &result);
        if changes.is_empty() && conflicts.is_empty() {
            return Ok(self.reject(target, RevertStatus::NothingToCommit));
        }
        if !conflicts.is_empty() {
            debug!(?conflicts, "conflicting paths");
            return Ok(self.reject(target, RevertStatus::MergeConflict));
        }
        if mode == Mode::Undo && !references_intact(&self.schema, &result, &changes)? {
            return Ok(self.reject(target, RevertStatus::ViolatedReferentialIntegrity));
        }

        self.apply(target, mode, &ours, &result, &changes)?;
        Ok(RevertStatus::Ok)
    }

    fn reject(&self, target: &RevisionId, status: RevertStatus) -> RevertStatus {
        info!(revision = %target.short(), ?status, "revert rejected");
        status
    }

    fn apply(
        &self,
        target: &RevisionId,
        mode: Mode,
        ours: &Tree,
        result: &Tree,
        changes: &[FileChange],
    ) -> SyncResult<()> {
        *self.state.write() = RevertState::Applying;
        let _suspended = self.bridge.suspend();

        let mut touched: Vec<&str> = Vec::with_capacity(changes.len());
        for change in changes {
            let written = match change {
                FileChange::Deleted(path) => self.backend.remove(path).map(|_| ()),
                FileChange::Added(path) | FileChange::Modified(path) => match result.get(path) {
                    Some(content) => self.backend.write(path, content),
                    None => Ok(()),
                },
            };
            touched.push(change.path());
            if let Err(e) = written {
                warn!(path = change.path(), error = %e, "revert write failed, restoring mirror");
                self.restore(ours, &touched);
                return Err(e.into());
            }
        }

        let action = match mode {
            Mode::Undo => Action::Undo,
            Mode::Rollback => Action::Rollback,
        };
        let message = format!("{} revision {}", action.verb(), target.short());
        let mut descriptor = ChangeDescriptor::new("revision", action, target.as_str(), &message);
        for path in &touched {
            descriptor = descriptor.with_file(ChangedFile::Path {
                path: (*path).to_string(),
            });
        }
        if mode == Mode::Rollback {
            let entities: BTreeSet<&str> = touched
                .iter()
                .filter_map(|path| entity_for_path(&self.schema, path))
                .map(|entity| entity.name.as_str())
                .collect();
            for entity in entities {
                descriptor = descriptor.with_file(ChangedFile::AllStorageFiles {
                    entity: entity.to_string(),
                });
            }
        }
        let revision = match self.history.commit(&message, vec![descriptor]) {
            Ok(revision) => revision,
            Err(e) => {
                warn!(error = %e, "revert commit failed, restoring mirror");
                self.restore(ours, &touched);
                return Err(e);
            }
        };

        let report = self.process.synchronize_all()?;
        info!(
            revision = %revision.short(),
            target = %target.short(),
            files = touched.len(),
            rows = report.inserted() + report.updated() + report.deleted(),
            "revert applied"
        );
        Ok(())
    }

    fn restore(&self, ours: &Tree, touched: &[&str]) {
        for path in touched {
            let restored = match ours.get(*path) {
                Some(content) => self.backend.write(path, content),
                None => self.backend.remove(path).map(|_| ()),
            };
            if let Err(e) = restored {
                warn!(path, error = %e, "cannot restore mirror file");
            }
        }
    }
}

/// Applies the inverse of the change `theirs` → `base` onto `ours`.
///
/// `base` is the reverted revision, `theirs` its parent and `ours` the
/// current head. Per path: unchanged by the reverted revision keeps ours,
/// unchanged since keeps theirs; when both sides changed a snapshot the
/// fields are merged the same way. Returns the merged tree and the
/// conflicting paths, which keep ours.
#[must_use]
pub fn three_way_merge(
    base: &Tree,
    ours: &Tree,
    theirs: &Tree,
    line_ending: LineEnding,
) -> (Tree, Vec<String>) {
    let paths: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Tree::new();
    let mut conflicts = Vec::new();

    for path in paths {
        let (b, o, t) = (base.get(path), ours.get(path), theirs.get(path));
        let content = if b == t || o == t {
            o.cloned()
        } else if o == b {
            t.cloned()
        } else {
            match (b, o, t) {
                (Some(b), Some(o), Some(t)) => match merge_snapshots(b, o, t, line_ending) {
                    Some(content) => Some(content),
                    None => {
                        conflicts.push(path.clone());
                        Some(o.clone())
                    }
                },
                _ => {
                    conflicts.push(path.clone());
                    o.cloned()
                }
            }
        };
        if let Some(content) = content {
            merged.insert(path.clone(), content);
        }
    }
    (merged, conflicts)
}

fn decode_section(content: &[u8]) -> Option<(String, Fields)> {
    let text = std::str::from_utf8(content).ok()?;
    let mut sections = from_ini(text).ok()?.into_map()?.into_iter();
    match (sections.next(), sections.next()) {
        (Some((name, Value::Map(fields))), None) => Some((name, fields)),
        _ => None,
    }
}

fn merge_snapshots(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    line_ending: LineEnding,
) -> Option<Vec<u8>> {
    let (_, base) = decode_section(base)?;
    let (name, ours) = decode_section(ours)?;
    let (_, theirs) = decode_section(theirs)?;

    let keys: BTreeSet<&String> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
    let mut merged = Fields::new();
    for key in keys {
        let (b, o, t) = (base.get(key), ours.get(key), theirs.get(key));
        let value = if b == t || o == t {
            o
        } else if o == b {
            t
        } else {
            return None;
        };
        if let Some(value) = value {
            merged.insert(key.clone(), value.clone());
        }
    }
    encode_snapshot(&name, &merged, line_ending)
        .ok()
        .map(String::into_bytes)
}

/// Entity and id identified by a snapshot path.
fn entity_key(schema: &DbSchema, path: &str) -> Option<(String, String)> {
    let entity = entity_for_path(schema, path)?;
    let file = path.rsplit('/').next()?;
    let id = file.strip_suffix(".ini")?;
    Some((entity.name.clone(), id.to_string()))
}

/// Stable ids referenced by a snapshot, with their entity types.
fn references_of(entity: &EntityType, fields: &Fields) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for (column, target) in &entity.references {
        if let Some(Value::Text(id)) = fields.get(&reference_field(column)) {
            if !id.is_empty() && id != "0" {
                out.push((target.clone(), id.clone()));
            }
        }
    }
    for rule in entity.value_references.iter().filter(|r| r.applies_to(fields)) {
        if let Some(Value::Text(id)) = fields.get(&rule.field) {
            if id.parse::<StableId>().is_ok() {
                out.push((rule.target.clone(), id.clone()));
            }
        }
    }
    out
}

/// Checks that snapshots written by `changes` only reference entities in
/// `result`, and that no snapshot left in `result` references an entity
/// `changes` deletes.
fn references_intact(schema: &DbSchema, result: &Tree, changes: &[FileChange]) -> SyncResult<bool> {
    let present: HashSet<(String, String)> =
        result.keys().filter_map(|p| entity_key(schema, p)).collect();
    let deleted: HashSet<(String, String)> = changes
        .iter()
        .filter_map(|c| match c {
            FileChange::Deleted(path) => entity_key(schema, path),
            _ => None,
        })
        .collect();
    let written: HashSet<&str> = changes
        .iter()
        .filter(|c| !matches!(c, FileChange::Deleted(_)))
        .map(FileChange::path)
        .collect();

    for (path, content) in result {
        let is_written = written.contains(path.as_str());
        if !is_written && deleted.is_empty() {
            continue;
        }
        let Some(entity) = entity_for_path(schema, path) else {
            continue;
        };
        let fields = decode_snapshot(path, content)?;
        for reference in references_of(entity, &fields) {
            if is_written && !present.contains(&reference) {
                debug!(path = %path, entity = %reference.0, vpid = %reference.1, "reference to missing entity");
                return Ok(false);
            }
            if deleted.contains(&reference) {
                debug!(path = %path, entity = %reference.0, vpid = %reference.1, "reference to deleted entity");
                return Ok(false);
            }
        }
    }
    Ok(true)
}
