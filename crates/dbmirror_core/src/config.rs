//! Mirror configuration.

use crate::error::CoreResult;
use dbmirror_codec::LineEnding;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for a mirrored site.
///
/// Loadable from JSON; keys that are absent keep their default value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Root directory of the flat-file mirror.
    pub mirror_dir: PathBuf,

    /// Prefix of every physical table name (`wp_`).
    pub table_prefix: String,

    /// Database schema version; entity types newer than this are skipped.
    pub db_version: u64,

    /// Upper bound on synchronization tasks before giving up.
    pub max_sync_passes: usize,

    /// Write snapshot files with `\r\n` instead of `\n`.
    pub crlf_line_endings: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            mirror_dir: PathBuf::from("db"),
            table_prefix: "wp_".to_string(),
            db_version: 38590,
            max_sync_passes: 100,
            crlf_line_endings: false,
        }
    }
}

impl MirrorConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document, merging it over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON or has values
    /// of the wrong type.
    pub fn from_json(json: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the mirror root directory.
    #[must_use]
    pub fn mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = dir.into();
        self
    }

    /// Sets the table prefix.
    #[must_use]
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.table_prefix = prefix.into();
        self
    }

    /// Sets the database schema version.
    #[must_use]
    pub const fn db_version(mut self, version: u64) -> Self {
        self.db_version = version;
        self
    }

    /// Sets the synchronization pass limit.
    #[must_use]
    pub const fn max_sync_passes(mut self, passes: usize) -> Self {
        self.max_sync_passes = passes;
        self
    }

    /// Sets whether snapshot files use `\r\n`.
    #[must_use]
    pub const fn crlf_line_endings(mut self, value: bool) -> Self {
        self.crlf_line_endings = value;
        self
    }

    /// Line ending for snapshot files.
    #[must_use]
    pub const fn line_ending(&self) -> LineEnding {
        if self.crlf_line_endings {
            LineEnding::CrLf
        } else {
            LineEnding::Lf
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = MirrorConfig::default();
        assert_eq!(config.table_prefix, "wp_");
        assert_eq!(config.line_ending(), LineEnding::Lf);
        assert!(config.max_sync_passes > 0);
    }

    #[test]
    fn builder_pattern() {
        let config = MirrorConfig::new()
            .table_prefix("site2_")
            .db_version(30000)
            .crlf_line_endings(true);

        assert_eq!(config.table_prefix, "site2_");
        assert_eq!(config.db_version, 30000);
        assert_eq!(config.line_ending(), LineEnding::CrLf);
    }

    #[test]
    fn json_merges_over_defaults() {
        let config = MirrorConfig::from_json(r#"{"table_prefix": "blog_"}"#).unwrap();
        assert_eq!(config.table_prefix, "blog_");
        assert_eq!(config.db_version, MirrorConfig::default().db_version);
        assert_eq!(config.mirror_dir, PathBuf::from("db"));
    }

    #[test]
    fn json_rejects_wrong_types() {
        assert!(MirrorConfig::from_json(r#"{"db_version": "new"}"#).is_err());
    }
}
