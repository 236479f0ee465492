//! Site options.

use super::{DirectoryStorage, EntityStorage};
use crate::change::{Action, ChangeDescriptor};
use crate::error::CoreResult;
use crate::schema::DbSchema;
use dbmirror_codec::{Fields, LineEnding};
use dbmirror_storage::StorageBackend;
use std::sync::Arc;

/// Storage of `option` snapshots, keyed by `option_name`.
///
/// File names are the escaped option names
/// (see [`escape_file_name`](super::escape_file_name)).
pub struct OptionStorage {
    directory: DirectoryStorage,
}

impl OptionStorage {
    /// Creates the option storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema has no `option` entity.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        schema: &DbSchema,
        line_ending: LineEnding,
    ) -> CoreResult<Self> {
        Ok(Self {
            directory: DirectoryStorage::new(backend, schema, "option", line_ending)?,
        })
    }
}

impl EntityStorage for OptionStorage {
    fn directory(&self) -> &DirectoryStorage {
        &self.directory
    }

    fn describe_change(&self, old: Option<&Fields>, new: &Fields, action: Action) -> ChangeDescriptor {
        let mut change = self.directory.default_description(old, new, action);
        change.summary = format!("{} option \"{}\"", action.verb(), change.entity_id);
        let name = change.entity_id.clone();
        change.with_tag("VP-Option-Name", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::row;
    use dbmirror_storage::InMemoryBackend;

    #[test]
    fn options_use_escaped_natural_keys() {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let backend = Arc::new(InMemoryBackend::new());
        let options = OptionStorage::new(backend.clone(), &schema, LineEnding::Lf).unwrap();

        let change = options
            .save(&row([
                ("option_id", dbmirror_codec::Value::Integer(9)),
                ("option_name", dbmirror_codec::Value::text("widget.text")),
                ("option_value", dbmirror_codec::Value::text("a:0:{}")),
            ]))
            .unwrap()
            .unwrap();
        assert_eq!(change.action, Action::Create);
        assert_eq!(change.summary, "Created option \"widget.text\"");
        assert_eq!(change.tags["VP-Option-Name"], "widget.text");

        assert_eq!(backend.list("").unwrap(), vec!["options/widget%2Etext.ini"]);
        let stored = options.load("widget.text").unwrap().unwrap();
        assert!(!stored.contains_key("option_id"));
        assert_eq!(stored["option_value"], dbmirror_codec::Value::text("a:0:{}"));
    }

    #[test]
    fn transient_options_are_skipped() {
        let schema = DbSchema::wordpress("wp_", 38590).unwrap();
        let options =
            OptionStorage::new(Arc::new(InMemoryBackend::new()), &schema, LineEnding::Lf).unwrap();
        assert!(!options.should_persist(&row([("option_name", "_transient_feed")])));
        assert!(!options.should_persist(&row([("option_name", "cron")])));
        assert!(options.should_persist(&row([("option_name", "blogname")])));
    }
}
