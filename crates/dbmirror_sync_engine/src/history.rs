//! History-log provider.
//!
//! The engine only assumes that revisions are full snapshots of the
//! mirror tree and that diffs are computable between any two of them.

use crate::error::{SyncError, SyncResult};
use dbmirror_core::ChangeDescriptor;
use dbmirror_storage::StorageBackend;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// A full mirror tree: relative path → file content.
pub type Tree = BTreeMap<String, Vec<u8>>;

/// Identifier of a revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RevisionId(String);

impl RevisionId {
    /// Wraps a revision id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for messages.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One recorded revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    /// Revision id.
    pub id: RevisionId,
    /// Parent revisions; two for a merge, none for the root.
    pub parents: Vec<RevisionId>,
    /// Commit message.
    pub message: String,
    /// Changes the revision was committed with.
    pub changes: Vec<ChangeDescriptor>,
}

impl Revision {
    /// Returns true for a merge of two histories.
    #[must_use]
    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}

/// A path that differs between two trees.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileChange {
    /// Present only in the newer tree.
    Added(String),
    /// Present in both with different content.
    Modified(String),
    /// Present only in the older tree.
    Deleted(String),
}

impl FileChange {
    /// The affected path.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            FileChange::Added(p) | FileChange::Modified(p) | FileChange::Deleted(p) => p,
        }
    }
}

/// Paths that differ from `from` to `to`, in path order.
#[must_use]
pub fn diff_trees(from: &Tree, to: &Tree) -> Vec<FileChange> {
    let mut changes = Vec::new();
    for (path, content) in to {
        match from.get(path) {
            None => changes.push(FileChange::Added(path.clone())),
            Some(old) if old != content => changes.push(FileChange::Modified(path.clone())),
            Some(_) => {}
        }
    }
    for path in from.keys().filter(|p| !to.contains_key(*p)) {
        changes.push(FileChange::Deleted(path.clone()));
    }
    changes.sort();
    changes
}

/// Append-only revision history over the mirror's working tree.
pub trait HistoryLog: Send + Sync {
    /// The current revision, `None` before the first commit.
    fn head(&self) -> Option<RevisionId>;

    /// Looks up a revision.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRevision`] if `id` is not recorded.
    fn revision(&self, id: &RevisionId) -> SyncResult<Revision>;

    /// Records the working tree as a new revision on top of head.
    ///
    /// # Errors
    ///
    /// Returns an error if the working tree cannot be read.
    fn commit(&self, message: &str, changes: Vec<ChangeDescriptor>) -> SyncResult<RevisionId>;

    /// The tree of a revision.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRevision`] if `id` is not recorded.
    fn tree_at(&self, id: &RevisionId) -> SyncResult<Tree>;

    /// The current working tree.
    ///
    /// # Errors
    ///
    /// Returns an error if the working tree cannot be read.
    fn working_tree(&self) -> SyncResult<Tree>;

    /// Paths changed from `from` (the empty tree if `None`) to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRevision`] for unknown ids.
    fn diff(&self, from: Option<&RevisionId>, to: &RevisionId) -> SyncResult<Vec<FileChange>> {
        let old = match from {
            Some(id) => self.tree_at(id)?,
            None => Tree::new(),
        };
        Ok(diff_trees(&old, &self.tree_at(to)?))
    }

    /// Replaces the working tree with the tree of `id`. Head does not move.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or if the working tree cannot be
    /// written.
    fn checkout(&self, id: &RevisionId) -> SyncResult<()>;

    /// Returns true if `ancestor` is reachable from `descendant`
    /// (a revision is its own ancestor).
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownRevision`] for unknown ids.
    fn is_ancestor(&self, ancestor: &RevisionId, descendant: &RevisionId) -> SyncResult<bool>;

    /// Revisions from head back to the root along first parents.
    fn log(&self) -> Vec<Revision>;

    /// Returns true if the working tree matches head.
    ///
    /// # Errors
    ///
    /// Returns an error if the working tree cannot be read.
    fn is_clean(&self) -> SyncResult<bool> {
        let head = match self.head() {
            Some(id) => self.tree_at(&id)?,
            None => Tree::new(),
        };
        Ok(self.working_tree()? == head)
    }
}

struct Stored {
    revision: Revision,
    tree: Arc<Tree>,
}

#[derive(Default)]
struct HistoryState {
    revisions: HashMap<RevisionId, Stored>,
    head: Option<RevisionId>,
}

/// History kept in memory over a mirror backend.
///
/// Every commit stores a full copy of the tree.
pub struct InMemoryHistory {
    backend: Arc<dyn StorageBackend>,
    state: RwLock<HistoryState>,
}

impl InMemoryHistory {
    /// Creates an empty history over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            state: RwLock::new(HistoryState::default()),
        }
    }

    /// Records the working tree as a merge of head and `other`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no head, `other` is unknown, or the
    /// working tree cannot be read.
    pub fn commit_merge(&self, message: &str, other: &RevisionId) -> SyncResult<RevisionId> {
        let head = self
            .head()
            .ok_or_else(|| SyncError::history("cannot merge without a head revision"))?;
        self.revision(other)?;
        self.record(message, vec![head, other.clone()], Vec::new())
    }

    fn record(
        &self,
        message: &str,
        parents: Vec<RevisionId>,
        changes: Vec<ChangeDescriptor>,
    ) -> SyncResult<RevisionId> {
        let tree = self.working_tree()?;
        let mut state = self.state.write();

        let mut hasher = Sha256::new();
        hasher.update(state.revisions.len().to_le_bytes());
        for parent in &parents {
            hasher.update(parent.as_str().as_bytes());
            hasher.update([0u8]);
        }
        for (path, content) in &tree {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(content);
        }
        hasher.update(message.as_bytes());
        let id = RevisionId(
            hasher
                .finalize()
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect(),
        );

        debug!(revision = %id.short(), files = tree.len(), message, "revision recorded");
        let revision = Revision {
            id: id.clone(),
            parents,
            message: message.to_string(),
            changes,
        };
        state.revisions.insert(
            id.clone(),
            Stored {
                revision,
                tree: Arc::new(tree),
            },
        );
        state.head = Some(id.clone());
        Ok(id)
    }

    fn stored_tree(&self, id: &RevisionId) -> SyncResult<Arc<Tree>> {
        self.state
            .read()
            .revisions
            .get(id)
            .map(|s| s.tree.clone())
            .ok_or_else(|| SyncError::UnknownRevision(id.to_string()))
    }
}

impl HistoryLog for InMemoryHistory {
    fn head(&self) -> Option<RevisionId> {
        self.state.read().head.clone()
    }

    fn revision(&self, id: &RevisionId) -> SyncResult<Revision> {
        self.state
            .read()
            .revisions
            .get(id)
            .map(|s| s.revision.clone())
            .ok_or_else(|| SyncError::UnknownRevision(id.to_string()))
    }

    fn commit(&self, message: &str, changes: Vec<ChangeDescriptor>) -> SyncResult<RevisionId> {
        let parents = self.head().into_iter().collect();
        self.record(message, parents, changes)
    }

    fn tree_at(&self, id: &RevisionId) -> SyncResult<Tree> {
        Ok(self.stored_tree(id)?.as_ref().clone())
    }

    fn working_tree(&self) -> SyncResult<Tree> {
        let mut tree = Tree::new();
        for path in self.backend.list("")? {
            if let Some(content) = self.backend.read(&path)? {
                tree.insert(path, content);
            }
        }
        Ok(tree)
    }

    fn checkout(&self, id: &RevisionId) -> SyncResult<()> {
        let target = self.stored_tree(id)?;
        let current = self.working_tree()?;
        for change in diff_trees(&current, &target) {
            match change {
                FileChange::Deleted(path) => {
                    self.backend.remove(&path)?;
                }
                FileChange::Added(path) | FileChange::Modified(path) => {
                    if let Some(content) = target.get(&path) {
                        self.backend.write(&path, content)?;
                    }
                }
            }
        }
        debug!(revision = %id.short(), "checked out");
        Ok(())
    }

    fn is_ancestor(&self, ancestor: &RevisionId, descendant: &RevisionId) -> SyncResult<bool> {
        let state = self.state.read();
        for id in [ancestor, descendant] {
            if !state.revisions.contains_key(id) {
                return Err(SyncError::UnknownRevision(id.to_string()));
            }
        }
        let mut seen = HashSet::new();
        let mut stack = vec![descendant.clone()];
        while let Some(id) = stack.pop() {
            if &id == ancestor {
                return Ok(true);
            }
            if !seen.insert(id.clone()) {
                continue;
            }
            if let Some(stored) = state.revisions.get(&id) {
                stack.extend(stored.revision.parents.iter().cloned());
            }
        }
        Ok(false)
    }

    fn log(&self) -> Vec<Revision> {
        let state = self.state.read();
        let mut out = Vec::new();
        let mut next = state.head.clone();
        while let Some(id) = next {
            let Some(stored) = state.revisions.get(&id) else {
                break;
            };
            next = stored.revision.parents.first().cloned();
            out.push(stored.revision.clone());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbmirror_storage::InMemoryBackend;

    fn history() -> (Arc<InMemoryBackend>, InMemoryHistory) {
        let backend = Arc::new(InMemoryBackend::new());
        let history = InMemoryHistory::new(backend.clone());
        (backend, history)
    }

    #[test]
    fn commits_chain_and_diff() {
        let (backend, history) = history();
        assert_eq!(history.head(), None);
        assert!(history.is_clean().unwrap());

        backend.write("posts/a.ini", b"1").unwrap();
        let first = history.commit("first", Vec::new()).unwrap();
        backend.write("posts/a.ini", b"2").unwrap();
        backend.write("posts/b.ini", b"1").unwrap();
        assert!(!history.is_clean().unwrap());
        let second = history.commit("second", Vec::new()).unwrap();
        assert!(history.is_clean().unwrap());

        assert_ne!(first, second);
        assert_eq!(history.revision(&second).unwrap().parents, vec![first.clone()]);
        assert_eq!(
            history.diff(Some(&first), &second).unwrap(),
            vec![
                FileChange::Added("posts/b.ini".into()),
                FileChange::Modified("posts/a.ini".into()),
            ]
        );
        assert_eq!(
            history.diff(None, &first).unwrap(),
            vec![FileChange::Added("posts/a.ini".into())]
        );

        let log: Vec<String> = history.log().into_iter().map(|r| r.message).collect();
        assert_eq!(log, vec!["second", "first"]);
        assert!(history.is_ancestor(&first, &second).unwrap());
        assert!(!history.is_ancestor(&second, &first).unwrap());
    }

    #[test]
    fn checkout_rewrites_working_tree() {
        let (backend, history) = history();
        backend.write("a.ini", b"1").unwrap();
        let first = history.commit("first", Vec::new()).unwrap();
        backend.write("a.ini", b"2").unwrap();
        backend.write("b.ini", b"2").unwrap();
        history.commit("second", Vec::new()).unwrap();

        history.checkout(&first).unwrap();
        assert_eq!(backend.list("").unwrap(), vec!["a.ini"]);
        assert_eq!(backend.read("a.ini").unwrap().unwrap(), b"1");
    }

    #[test]
    fn merges_have_two_parents() {
        let (backend, history) = history();
        backend.write("a.ini", b"1").unwrap();
        let root = history.commit("root", Vec::new()).unwrap();
        backend.write("a.ini", b"2").unwrap();
        let side = history.commit("side", Vec::new()).unwrap();
        let merge = history.commit_merge("merge", &root).unwrap();

        let revision = history.revision(&merge).unwrap();
        assert!(revision.is_merge());
        assert_eq!(revision.parents, vec![side, root]);
    }

    #[test]
    fn unknown_revisions() {
        let (_, history) = history();
        let bogus = RevisionId::new("deadbeef");
        assert!(matches!(
            history.tree_at(&bogus),
            Err(SyncError::UnknownRevision(_))
        ));
        assert!(history.commit_merge("m", &bogus).is_err());
        assert_eq!(bogus.short(), "deadbee");
    }
}
