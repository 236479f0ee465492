//! Structured change descriptions.
//!
//! Every mirrored write produces zero or more [`ChangeDescriptor`]s. They
//! are the input of commit-message formatting, which lives outside this
//! crate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// What happened to an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// Entity created.
    Create,
    /// Comment created awaiting moderation.
    CreatePending,
    /// Entity changed.
    Edit,
    /// Entity removed.
    Delete,
    /// Moved to trash.
    Trash,
    /// Restored from trash.
    Untrash,
    /// Comment marked as spam.
    Spam,
    /// Comment unmarked as spam.
    Unspam,
    /// Comment approved.
    Approve,
    /// Comment unapproved.
    Unapprove,
    /// A revision was undone.
    Undo,
    /// The site was rolled back to a revision.
    Rollback,
}

impl Action {
    /// The kebab-case tag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::CreatePending => "create-pending",
            Action::Edit => "edit",
            Action::Delete => "delete",
            Action::Trash => "trash",
            Action::Untrash => "untrash",
            Action::Spam => "spam",
            Action::Unspam => "unspam",
            Action::Approve => "approve",
            Action::Unapprove => "unapprove",
            Action::Undo => "undo",
            Action::Rollback => "rollback",
        }
    }

    /// Past-tense verb for summaries.
    #[must_use]
    pub const fn verb(self) -> &'static str {
        match self {
            Action::Create => "Created",
            Action::CreatePending => "Created pending",
            Action::Edit => "Edited",
            Action::Delete => "Deleted",
            Action::Trash => "Trashed",
            Action::Untrash => "Untrashed",
            Action::Spam => "Marked as spam",
            Action::Unspam => "Unmarked as spam",
            Action::Approve => "Approved",
            Action::Unapprove => "Unapproved",
            Action::Undo => "Reverted",
            Action::Rollback => "Rolled back to",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file touched by a change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangedFile {
    /// The snapshot file of one entity.
    StorageFile {
        /// Entity type name.
        entity: String,
        /// Stable id or natural key.
        id: String,
        /// Parent stable id, for child entities.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
    },
    /// Every snapshot file of an entity type.
    AllStorageFiles {
        /// Entity type name.
        entity: String,
    },
    /// A mirror path.
    Path {
        /// Relative path.
        path: String,
    },
}

/// Structured description of one entity-level change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeDescriptor {
    /// Entity type name.
    pub entity: String,
    /// What happened.
    pub action: Action,
    /// Stable id (hex) or natural key of the entity.
    pub entity_id: String,
    /// Human-readable summary.
    pub summary: String,
    /// Custom tags for the commit formatter.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Files affected.
    #[serde(default)]
    pub changed_files: Vec<ChangedFile>,
}

impl ChangeDescriptor {
    /// Creates a descriptor with an empty tag map and file list.
    pub fn new(
        entity: impl Into<String>,
        action: Action,
        entity_id: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            action,
            entity_id: entity_id.into(),
            summary: summary.into(),
            tags: BTreeMap::new(),
            changed_files: Vec::new(),
        }
    }

    /// Adds a custom tag.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds a changed-file declaration.
    #[must_use]
    pub fn with_file(mut self, file: ChangedFile) -> Self {
        self.changed_files.push(file);
        self
    }
}
