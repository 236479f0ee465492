//! # DbMirror Sync Engine
//!
//! Read path and history rewriting for DbMirror.
//!
//! This crate provides:
//! - Synchronizers replaying snapshot files into database rows
//! - The synchronization process (worklist run to a fixed point)
//! - The history-log provider trait and an in-memory provider
//! - The reverter state machine (idle → reverting → applying → idle)
//!
//! ## Key Invariants
//!
//! - Parents are synchronized before children; types whose references
//!   may have changed are queued again
//! - The synchronization queue is bounded; a queue that does not drain
//!   is an error
//! - A rejected revert touches neither the mirror nor the database
//! - The write bridge is suspended while a revert applies

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod history;
mod process;
mod revert;
mod synchronizer;

pub use error::{SyncError, SyncResult};
pub use history::{diff_trees, FileChange, HistoryLog, InMemoryHistory, Revision, RevisionId, Tree};
pub use process::{EntityCounts, SyncReport, SynchronizationProcess};
pub use revert::{three_way_merge, RevertState, RevertStatus, Reverter};
pub use synchronizer::{EntitySynchronizer, SyncOutcome, SyncScope, Synchronizer};
