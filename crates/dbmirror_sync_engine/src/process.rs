//! Fixed-point synchronization of every entity type.

use crate::error::{SyncError, SyncResult};
use crate::synchronizer::{EntitySynchronizer, SyncOutcome, SyncScope, Synchronizer};
use dbmirror_core::{Database, DbSchema, IdentifierRepository, Mirror};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Row counts of one entity type across a synchronization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntityCounts {
    /// Rows inserted.
    pub inserted: usize,
    /// Rows updated.
    pub updated: usize,
    /// Rows deleted.
    pub deleted: usize,
}

/// Summary of a synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Synchronizer tasks executed, follow-ups included.
    pub tasks: usize,
    /// Counts per entity type.
    pub entities: BTreeMap<String, EntityCounts>,
}

impl SyncReport {
    fn record(&mut self, entity: &str, outcome: &SyncOutcome) {
        self.tasks += 1;
        let counts = self.entities.entry(entity.to_string()).or_default();
        counts.inserted += outcome.inserted;
        counts.updated += outcome.updated;
        counts.deleted += outcome.deleted;
    }

    /// Total rows inserted.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.entities.values().map(|c| c.inserted).sum()
    }

    /// Total rows updated.
    #[must_use]
    pub fn updated(&self) -> usize {
        self.entities.values().map(|c| c.updated).sum()
    }

    /// Total rows deleted.
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.entities.values().map(|c| c.deleted).sum()
    }
}

/// Runs synchronizers in dependency order until no follow-up is left.
///
/// The queue is seeded with one task per entity type, parents first.
/// Follow-ups reported by a task are appended with the same scope.
pub struct SynchronizationProcess {
    synchronizers: BTreeMap<String, Arc<dyn Synchronizer>>,
    sequence: Vec<String>,
    max_passes: usize,
}

impl SynchronizationProcess {
    /// Creates a process over `sequence` with no synchronizers.
    pub fn new(sequence: Vec<String>, max_passes: usize) -> Self {
        Self {
            synchronizers: BTreeMap::new(),
            sequence,
            max_passes,
        }
    }

    /// Registers a synchronizer for its entity type.
    pub fn register(&mut self, synchronizer: Arc<dyn Synchronizer>) {
        self.synchronizers
            .insert(synchronizer.entity_name().to_string(), synchronizer);
    }

    /// Creates one [`EntitySynchronizer`] per storage of `mirror`, in the
    /// schema's synchronization sequence.
    ///
    /// `db` must be the unmirrored store.
    ///
    /// # Errors
    ///
    /// Returns an error if a storage's entity is not in the schema.
    pub fn for_mirror(
        db: Arc<dyn Database>,
        schema: Arc<DbSchema>,
        mirror: &Mirror,
        ids: Arc<IdentifierRepository>,
        max_passes: usize,
    ) -> SyncResult<Self> {
        let mut process = Self::new(schema.synchronization_sequence().to_vec(), max_passes);
        for storage in mirror.storages() {
            let synchronizer =
                EntitySynchronizer::new(db.clone(), schema.clone(), storage.clone(), ids.clone())?;
            process.register(Arc::new(synchronizer));
        }
        Ok(process)
    }

    /// Synchronizes the selected snapshots of every entity type.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DidNotConverge`] when more than the configured
    /// number of tasks run, or the first synchronizer error.
    pub fn synchronize(&self, scope: &SyncScope) -> SyncResult<SyncReport> {
        let mut queue: VecDeque<&str> = self
            .sequence
            .iter()
            .map(String::as_str)
            .filter(|name| self.synchronizers.contains_key(*name))
            .collect();
        let mut report = SyncReport::default();

        while let Some(entity) = queue.pop_front() {
            if report.tasks >= self.max_passes {
                warn!(passes = report.tasks, "synchronization queue did not drain");
                return Err(SyncError::DidNotConverge {
                    passes: report.tasks,
                });
            }
            let Some(synchronizer) = self.synchronizers.get(entity) else {
                continue;
            };
            let outcome = synchronizer.synchronize(scope)?;
            report.record(entity, &outcome);
            for follow_up in &outcome.follow_ups {
                if let Some((name, _)) = self.synchronizers.get_key_value(follow_up.as_str()) {
                    debug!(entity, follow_up = %name, "follow-up queued");
                    queue.push_back(name.as_str());
                }
            }
        }

        info!(
            tasks = report.tasks,
            inserted = report.inserted(),
            updated = report.updated(),
            deleted = report.deleted(),
            "synchronization finished"
        );
        Ok(report)
    }

    /// Synchronizes every snapshot of every entity type.
    ///
    /// # Errors
    ///
    /// See [`synchronize`](Self::synchronize).
    pub fn synchronize_all(&self) -> SyncResult<SyncReport> {
        self.synchronize(&SyncScope::Everything)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Reports `follow_ups` every time it runs.
    struct Scripted {
        name: String,
        follow_ups: Vec<String>,
        runs: Arc<Mutex<Vec<String>>>,
        inserts_left: Mutex<usize>,
    }

    impl Synchronizer for Scripted {
        fn entity_name(&self) -> &str {
            &self.name
        }

        fn synchronize(&self, _scope: &SyncScope) -> SyncResult<SyncOutcome> {
            self.runs.lock().push(self.name.clone());
            let mut left = self.inserts_left.lock();
            if *left == 0 {
                return Ok(SyncOutcome::default());
            }
            *left -= 1;
            Ok(SyncOutcome {
                inserted: 1,
                follow_ups: self.follow_ups.clone(),
                ..SyncOutcome::default()
            })
        }
    }

    fn scripted(
        runs: &Arc<Mutex<Vec<String>>>,
        name: &str,
        follow_ups: &[&str],
        inserts: usize,
    ) -> Arc<dyn Synchronizer> {
        Arc::new(Scripted {
            name: name.to_string(),
            follow_ups: follow_ups.iter().map(|s| s.to_string()).collect(),
            runs: runs.clone(),
            inserts_left: Mutex::new(inserts),
        })
    }

    #[test]
    fn follow_ups_run_after_the_seed_queue() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut process = SynchronizationProcess::new(vec!["post".into(), "postmeta".into()], 10);
        process.register(scripted(&runs, "post", &["postmeta"], 1));
        process.register(scripted(&runs, "postmeta", &[], 0));

        let report = process.synchronize_all().unwrap();
        assert_eq!(*runs.lock(), vec!["post", "postmeta", "postmeta"]);
        assert_eq!(report.tasks, 3);
        assert_eq!(report.inserted(), 1);
        assert_eq!(report.entities["post"].inserted, 1);
    }

    #[test]
    fn unknown_follow_ups_are_dropped() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut process = SynchronizationProcess::new(vec!["post".into(), "link".into()], 10);
        process.register(scripted(&runs, "post", &["link"], 1));
        process.synchronize_all().unwrap();
        assert_eq!(*runs.lock(), vec!["post"]);
    }

    #[test]
    fn cyclic_follow_ups_fail_loudly() {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let mut process = SynchronizationProcess::new(vec!["a".into(), "b".into()], 8);
        process.register(scripted(&runs, "a", &["b"], usize::MAX));
        process.register(scripted(&runs, "b", &["a"], usize::MAX));
        assert!(matches!(
            process.synchronize_all(),
            Err(SyncError::DidNotConverge { passes: 8 })
        ));
        assert_eq!(runs.lock().len(), 8);
    }
}
