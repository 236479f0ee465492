//! Posts.

use super::{DirectoryStorage, EntityStorage};
use crate::change::{Action, ChangeDescriptor};
use crate::error::CoreResult;
use crate::schema::DbSchema;
use dbmirror_codec::{Fields, LineEnding, Value};
use dbmirror_storage::StorageBackend;
use std::sync::Arc;

const TRASH: &str = "trash";

/// Storage of `post` snapshots.
///
/// Moving a post into or out of the trash is reported as
/// [`Action::Trash`] / [`Action::Untrash`]; other changes stay generic.
pub struct PostStorage {
    directory: DirectoryStorage,
}

impl PostStorage {
    /// Creates the post storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema has no `post` entity.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        schema: &DbSchema,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        Ok(Self {
            directory: DirectoryStorage::new(backend, schema, "post", line_ending)?,
        })
    }
}

fn text<'f>(fields: &'f Fields, key: &str) -> Option<&'f str> {
    fields.get(key).and_then(Value::as_text)
}

fn status_action(old: Option<&Fields>, new: &Fields, action: Action) -> Action {
    if action != Action::Edit {
        return action;
    }
    let was_trashed = old.and_then(|o| text(o, "post_status")) == Some(TRASH);
    let is_trashed = text(new, "post_status") == Some(TRASH);
    match (was_trashed, is_trashed) {
        (false, true) => Action::Trash,
        (true, false) => Action::Untrash,
        _ => Action::Edit,
    }
}

impl EntityStorage for PostStorage {
    fn directory(&self) -> &DirectoryStorage {
        &self.directory
    }

    fn describe_change(&self, old: Option<&Fields>, new: &Fields, action: Action) -> ChangeDescriptor {
        let action = status_action(old, new, action);
        let post_type = text(new, "post_type").unwrap_or("post");
        let title = text(new, "post_title").unwrap_or_default();

        let mut change = self.directory.default_description(old, new, action);
        change.summary = format!("{} {post_type} \"{title}\"", action.verb());
        change
            .with_tag("VP-Post-Type", post_type)
            .with_tag("VP-Post-Title", title)
    }
}
