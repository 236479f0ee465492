//! # DbMirror Core
//!
//! Write path of the DbMirror synchronization engine.
//!
//! This crate provides:
//! - [`StableId`] and the [`IdentifierRepository`] mapping storage keys to
//!   location-independent identifiers
//! - The entity schema ([`DbSchema`]) with references, child types and
//!   ignore rules
//! - Entity storages writing one INI snapshot per entity, and the
//!   [`Mirror`] routing to them
//! - The [`WriteBridge`] turning row-level writes into snapshots, and
//!   [`MirroredDatabase`] wiring it in front of a [`Database`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use dbmirror_codec::LineEnding;
//! use dbmirror_core::{
//!     row, Database, DbSchema, IdentifierRepository, InMemoryDatabase, Mirror,
//!     MirroredDatabase, WriteBridge,
//! };
//! use dbmirror_storage::{InMemoryBackend, StorageBackend};
//!
//! let inner = Arc::new(InMemoryDatabase::new());
//! inner.create_table("wp_posts", Some("ID"));
//! let schema = Arc::new(DbSchema::wordpress("wp_", 38590).unwrap());
//! let backend = Arc::new(InMemoryBackend::new());
//! let mirror = Arc::new(Mirror::wordpress(&schema, backend.clone(), LineEnding::Lf).unwrap());
//! let ids = Arc::new(IdentifierRepository::new(inner.clone(), schema.clone()));
//! let bridge = Arc::new(WriteBridge::new(inner.clone(), schema, mirror, ids));
//! let db = MirroredDatabase::new(inner, bridge.clone());
//!
//! db.insert("wp_posts", &row([("post_title", "Hello")])).unwrap();
//! assert_eq!(backend.list("posts").unwrap().len(), 1);
//! assert_eq!(bridge.take_changes().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bridge;
mod change;
mod config;
mod database;
mod error;
mod identifier;
mod mirror;
mod schema;
mod stable_id;
mod storage;

pub use bridge::{SuspendGuard, WriteBridge};
pub use change::{Action, ChangeDescriptor, ChangedFile};
pub use config::MirrorConfig;
pub use database::{row, Database, InMemoryDatabase, MirroredDatabase, Row};
pub use error::{CoreError, CoreResult};
pub use identifier::{IdentifierRepository, RestoredRow};
pub use mirror::Mirror;
pub use schema::{
    reference_field, DbSchema, EntityType, IgnoreRule, ValueReference, VP_ID, VP_ID_TABLE,
};
pub use stable_id::StableId;
pub use storage::{
    decode_snapshot, encode_snapshot, entity_for_path, escape_file_name, CommentStorage,
    DirectoryStorage, EntityStorage, MetaStorage, OptionStorage, PostStorage,
};
