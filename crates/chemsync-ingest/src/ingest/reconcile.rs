//! Removal of records that a full reload no longer contains
//!
//! Two strategies give the same result: a record untouched by every source
//! of the run is deleted, a record seen anywhere survives.
//!
//! - [`ReconcileStrategy::Stamped`] writes the run generation into every
//!   upserted row and sweeps rows with an older stamp afterwards.
//! - [`ReconcileStrategy::SetDifference`] snapshots all stored ids, crosses
//!   off every id loaded and deletes the rest. The snapshot is held in memory,
//!   so it is meant for stores without a version column.
//!
//! Incremental passes (deltas) open the reconciler without sweeping: rows are
//! still stamped but nothing is removed at the end.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, info};

use super::storage::CompoundTransaction;
use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileStrategy {
    #[default]
    Stamped,
    SetDifference,
}

impl ReconcileStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileStrategy::Stamped => "stamped",
            ReconcileStrategy::SetDifference => "set_difference",
        }
    }
}

impl std::str::FromStr for ReconcileStrategy {
    type Err = IngestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "stamped" => Ok(ReconcileStrategy::Stamped),
            "set_difference" => Ok(ReconcileStrategy::SetDifference),
            other => Err(IngestError::Config(format!(
                "unknown reconcile strategy: {}",
                other
            ))),
        }
    }
}

/// Whether the pass covers the whole corpus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassKind {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconcileOutcome {
    pub generation: i64,
    pub deleted: u64,
}

/// Run-scoped reconciliation state
#[derive(Debug)]
pub struct VersionReconciler {
    strategy: ReconcileStrategy,
    pass: PassKind,
    generation: i64,
    pending_removal: HashSet<i32>,
    delete_batch_size: usize,
}

impl VersionReconciler {
    /// Open reconciliation inside `tx`
    ///
    /// The run generation is one above both the highest stored stamp and the
    /// last committed generation, so it strictly increases across runs.
    pub async fn begin<T: CompoundTransaction>(
        tx: &mut T,
        strategy: ReconcileStrategy,
        pass: PassKind,
        committed_generation: i64,
        delete_batch_size: usize,
    ) -> Result<Self> {
        let generation = tx.max_version().await?.max(committed_generation) + 1;

        let pending_removal = match (strategy, pass) {
            (ReconcileStrategy::SetDifference, PassKind::Full) => {
                tx.all_ids().await?.into_iter().collect()
            },
            _ => HashSet::new(),
        };

        debug!(
            strategy = strategy.as_str(),
            generation,
            snapshot = pending_removal.len(),
            "Reconciliation started"
        );

        Ok(Self {
            strategy,
            pass,
            generation,
            pending_removal,
            delete_batch_size: delete_batch_size.max(1),
        })
    }

    pub fn strategy(&self) -> ReconcileStrategy {
        self.strategy
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    /// Version written with every upsert of the run
    pub fn stamp(&self) -> Option<i64> {
        match self.strategy {
            ReconcileStrategy::Stamped => Some(self.generation),
            ReconcileStrategy::SetDifference => None,
        }
    }

    /// Record ids that were just flushed
    pub fn observe(&mut self, ids: impl IntoIterator<Item = i32>) {
        if self.pending_removal.is_empty() {
            return;
        }
        for id in ids {
            self.pending_removal.remove(&id);
        }
    }

    pub fn pending_removals(&self) -> usize {
        self.pending_removal.len()
    }

    /// Delete everything the run did not refresh
    pub async fn finish<T: CompoundTransaction>(self, tx: &mut T) -> Result<ReconcileOutcome> {
        let deleted = match (self.strategy, self.pass) {
            (_, PassKind::Incremental) => 0,
            (ReconcileStrategy::Stamped, PassKind::Full) => {
                tx.delete_older_than(self.generation).await?
            },
            (ReconcileStrategy::SetDifference, PassKind::Full) => {
                let mut stale: Vec<i32> = self.pending_removal.into_iter().collect();
                stale.sort_unstable();
                let mut deleted = 0;
                for chunk in stale.chunks(self.delete_batch_size) {
                    deleted += tx.delete_ids(chunk).await?;
                }
                deleted
            },
        };

        info!(
            strategy = self.strategy.as_str(),
            generation = self.generation,
            deleted,
            "Reconciliation finished"
        );

        Ok(ReconcileOutcome {
            generation: self.generation,
            deleted,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ingest::sdf::CompoundRecord;
    use crate::ingest::storage::memory::MemoryStore;
    use crate::ingest::storage::CompoundStore;

    fn records(ids: &[i32], tag: &str) -> Vec<CompoundRecord> {
        ids.iter()
            .map(|id| CompoundRecord::new(*id, format!("{}-{}", tag, id)))
            .collect()
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "set-difference".parse::<ReconcileStrategy>().unwrap(),
            ReconcileStrategy::SetDifference
        );
        assert_eq!("STAMPED".parse::<ReconcileStrategy>().unwrap(), ReconcileStrategy::Stamped);
        assert!("mark_sweep".parse::<ReconcileStrategy>().is_err());
    }

    #[tokio::test]
    async fn test_stamped_full_pass_sweeps_unrefreshed_rows() {
        let store = MemoryStore::with_compounds(&[(1, "old-1", 3), (2, "old-2", 3), (3, "old-3", 2)]);
        let mut tx = store.begin().await.unwrap();

        let reconciler =
            VersionReconciler::begin(&mut tx, ReconcileStrategy::Stamped, PassKind::Full, 0, 10)
                .await
                .unwrap();
        assert_eq!(reconciler.generation(), 4);
        assert_eq!(reconciler.stamp(), Some(4));

        tx.upsert_batch(&records(&[2, 4], "new"), reconciler.stamp())
            .await
            .unwrap();
        let outcome = reconciler.finish(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome { generation: 4, deleted: 2 });
        let state = store.snapshot();
        assert_eq!(store.ids(), vec![2, 4]);
        assert!(state.compounds.values().all(|(_, version)| *version == 4));
        assert_eq!(store.molfile(2).unwrap(), "new-2");
    }

    #[tokio::test]
    async fn test_generation_exceeds_committed_marker() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();

        let reconciler =
            VersionReconciler::begin(&mut tx, ReconcileStrategy::Stamped, PassKind::Full, 9, 10)
                .await
                .unwrap();
        assert_eq!(reconciler.generation(), 10);
    }

    #[tokio::test]
    async fn test_set_difference_deletes_unseen_ids_in_batches() {
        let store = MemoryStore::with_compounds(&[(1, "a", 0), (2, "b", 0), (3, "c", 0), (4, "d", 0)]);
        let mut tx = store.begin().await.unwrap();

        let mut reconciler = VersionReconciler::begin(
            &mut tx,
            ReconcileStrategy::SetDifference,
            PassKind::Full,
            0,
            1,
        )
        .await
        .unwrap();
        assert_eq!(reconciler.stamp(), None);
        assert_eq!(reconciler.pending_removals(), 4);

        let batch = records(&[3, 5], "new");
        tx.upsert_batch(&batch, reconciler.stamp()).await.unwrap();
        reconciler.observe(batch.iter().map(|r| r.id));

        let outcome = reconciler.finish(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome.deleted, 3);
        assert_eq!(store.ids(), vec![3, 5]);
    }

    #[tokio::test]
    async fn test_incremental_pass_never_sweeps() {
        let store = MemoryStore::with_compounds(&[(1, "a", 1), (2, "b", 1)]);
        let mut tx = store.begin().await.unwrap();

        let reconciler = VersionReconciler::begin(
            &mut tx,
            ReconcileStrategy::Stamped,
            PassKind::Incremental,
            1,
            10,
        )
        .await
        .unwrap();
        tx.upsert_batch(&records(&[2], "new"), reconciler.stamp())
            .await
            .unwrap();
        let outcome = reconciler.finish(&mut tx).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(outcome, ReconcileOutcome { generation: 2, deleted: 0 });
        assert_eq!(store.ids(), vec![1, 2]);
    }
}
