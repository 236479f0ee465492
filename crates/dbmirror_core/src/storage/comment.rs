//! Comments.

use super::{DirectoryStorage, EntityStorage};
use crate::change::{Action, ChangeDescriptor};
use crate::error::CoreResult;
use crate::schema::{reference_field, DbSchema};
use dbmirror_codec::{Fields, LineEnding, Value};
use dbmirror_storage::StorageBackend;
use std::sync::Arc;
use tracing::warn;

const APPROVED: &str = "comment_approved";

/// Storage of `comment` snapshots.
///
/// Moderation transitions of `comment_approved` are classified by the
/// first matching rule:
///
/// 1. between `trash` and `post-trashed`: edit
/// 2. into `trash`: trash
/// 3. out of `trash`: untrash
/// 4. into `spam`: spam
/// 5. out of `spam`: unspam
/// 6. `0` → `1`: approve
/// 7. `1` → `0`: unapprove
///
/// A comment created unapproved is `create-pending`.
pub struct CommentStorage {
    directory: DirectoryStorage,
    posts: DirectoryStorage,
}

impl CommentStorage {
    /// Creates the comment storage; post snapshots are read for titles.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema lacks `comment` or `post`.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        schema: &DbSchema,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        Ok(Self {
            directory: DirectoryStorage::new(backend.clone(), schema, "comment", line_ending)?,
            posts: DirectoryStorage::new(backend, schema, "post", line_ending)?,
        })
    }

    fn post_title(&self, comment: &Fields) -> String {
        let Some(Value::Text(post_id)) = comment.get(&reference_field("comment_post_ID")) else {
            return String::new();
        };
        let lookup = self
            .posts
            .locate(post_id)
            .and_then(|path| match path {
                Some(path) => self.posts.read_snapshot(&path),
                None => Ok(None),
            });
        match lookup {
            Ok(post) => post
                .and_then(|p| p.get("post_title").map(ToString::to_string))
                .unwrap_or_default(),
            Err(e) => {
                warn!(vpid = %post_id, error = %e, "cannot read commented post");
                String::new()
            }
        }
    }
}

fn approval(fields: Option<&Fields>) -> Option<String> {
    fields
        .and_then(|f| f.get(APPROVED))
        .filter(|v| !v.is_null())
        .map(ToString::to_string)
}

fn moderation_action(old: Option<&Fields>, new: &Fields, action: Action) -> Action {
    let before = approval(old);
    let after = approval(Some(new));
    match action {
        Action::Create if after.as_deref() == Some("0") => Action::CreatePending,
        Action::Edit if before != after => {
            let (b, a) = (before.as_deref(), after.as_deref());
            if matches!((b, a), (Some("trash"), Some("post-trashed")) | (Some("post-trashed"), Some("trash"))) {
                Action::Edit
            } else if a == Some("trash") {
                Action::Trash
            } else if b == Some("trash") {
                Action::Untrash
            } else if a == Some("spam") {
                Action::Spam
            } else if b == Some("spam") {
                Action::Unspam
            } else if b == Some("0") && a == Some("1") {
                Action::Approve
            } else if b == Some("1") && a == Some("0") {
                Action::Unapprove
            } else {
                Action::Edit
            }
        }
        other => other,
    }
}

impl EntityStorage for CommentStorage {
    fn directory(&self) -> &DirectoryStorage {
        &self.directory
    }

    fn describe_change(&self, old: Option<&Fields>, new: &Fields, action: Action) -> ChangeDescriptor {
        let action = moderation_action(old, new, action);
        let author = new
            .get("comment_author")
            .map(ToString::to_string)
            .unwrap_or_default();
        let title = self.post_title(new);

        let mut change = self.directory.default_description(old, new, action);
        change.summary = format!("{} comment by {author} on \"{title}\"", action.verb());
        change
            .with_tag("VP-Comment-Author", author)
            .with_tag("VP-Comment-PostTitle", title)
    }
}
