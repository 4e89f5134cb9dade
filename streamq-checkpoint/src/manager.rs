//! Checkpoint manager: tracks each partition's safe point and commits it on
//! a cadence.
//!
//! The safe point comes from the cache (newest token every cursor has
//! acknowledged) as a versioned [`SafePoint`] report. A report older than
//! the last one applied is dropped, so reports computed before a cursor
//! change cannot overwrite the view taken after it. Commits are monotonic per partition: a commit at or below
//! the last committed offset is a no-op. A failed write leaves the in-memory
//! safe point in place and is retried at the next cadence.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use streamq_core::{Offset, PartitionKey, SafePoint};
use tracing::{debug, info, warn};

use crate::error::CheckpointResult;
use crate::store::SharedCheckpointStore;
use crate::types::{Checkpoint, CheckpointConfig};

// -----------------------------------------------------------------------------
// Per-partition state
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Progress {
    /// Newest token all cursors acknowledged, as last reported.
    safe_point: Option<Offset>,
    /// Version of the newest report applied.
    safe_point_version: u64,
    /// Last offset durably written.
    committed: Option<Offset>,
    /// Acknowledgements since the last successful commit.
    pending_acks: u64,
    last_commit_us: u64,
}

impl Progress {
    /// Applies a cache report unless it is older than the last one applied.
    /// A report taken with no cursor left keeps the previous safe point, so
    /// the last reader leaving does not undo its acknowledgements.
    fn apply(&mut self, report: SafePoint) -> bool {
        if report.version < self.safe_point_version {
            return false;
        }
        self.safe_point_version = report.version;
        if report.cursors > 0 {
            self.safe_point = report.offset();
        }
        true
    }

    /// Offset a commit would write now, if it would move the checkpoint.
    fn commit_target(&self) -> Option<Offset> {
        let target = self.safe_point?;
        match self.committed {
            Some(committed) if target <= committed => None,
            _ => Some(target),
        }
    }
}

#[derive(Debug, Default)]
struct PartitionCheckpoint {
    progress: Mutex<Progress>,
    /// Serializes store writes so they land in offset order.
    write: tokio::sync::Mutex<()>,
}

/// Outcome of a commit pass over all partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommitReport {
    /// Partitions whose checkpoint advanced.
    pub committed: usize,
    /// Partitions whose write failed (retried next pass).
    pub failed: usize,
}

/// Counters since the manager was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointStats {
    /// Successful writes.
    pub commits: u64,
    /// Failed writes.
    pub write_failures: u64,
}

// -----------------------------------------------------------------------------
// Checkpoint Manager
// -----------------------------------------------------------------------------

/// Tracks and commits the safe point of every owned partition.
///
/// `Send + Sync`; shared between readers (acknowledgements), the commit
/// cadence task and revocation.
pub struct CheckpointManager {
    store: SharedCheckpointStore,
    config: CheckpointConfig,
    partitions: Mutex<HashMap<PartitionKey, Arc<PartitionCheckpoint>>>,
    commits: AtomicU64,
    write_failures: AtomicU64,
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("config", &self.config)
            .field("commits", &self.commits)
            .field("write_failures", &self.write_failures)
            .finish_non_exhaustive()
    }
}

impl CheckpointManager {
    /// Creates a manager writing to `store`.
    #[must_use]
    pub fn new(store: SharedCheckpointStore, config: CheckpointConfig) -> Self {
        Self {
            store,
            config,
            partitions: Mutex::new(HashMap::new()),
            commits: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    fn entry(&self, partition: &PartitionKey) -> Arc<PartitionCheckpoint> {
        let mut partitions = self.partitions.lock().expect("checkpoint lock poisoned");
        Arc::clone(partitions.entry(partition.clone()).or_default())
    }

    fn existing(&self, partition: &PartitionKey) -> Option<Arc<PartitionCheckpoint>> {
        let partitions = self.partitions.lock().expect("checkpoint lock poisoned");
        partitions.get(partition).cloned()
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Reads the partition's last committed offset from the store and starts
    /// tracking it, so later commits never go below it.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn load_last(&self, partition: &PartitionKey) -> CheckpointResult<Option<Offset>> {
        let loaded = self.store.load(partition).await?.map(|c| c.offset);
        let state = self.entry(partition);
        let mut progress = state.progress.lock().expect("progress lock poisoned");
        progress.committed = progress.committed.max(loaded);
        debug!(
            partition = %partition,
            offset = ?loaded.map(Offset::get),
            "Loaded checkpoint"
        );
        Ok(loaded)
    }

    // -------------------------------------------------------------------------
    // Acknowledgements
    // -------------------------------------------------------------------------

    /// Records the partition's safe point after an acknowledgement and
    /// commits once `every_acks` acknowledgements are pending. A failed
    /// write is logged and retried later.
    ///
    /// Returns the checkpoint written, if any.
    pub async fn on_acknowledge(
        &self,
        partition: &PartitionKey,
        safe_point: SafePoint,
        now_us: u64,
    ) -> Option<Checkpoint> {
        let state = self.entry(partition);
        let due = {
            let mut progress = state.progress.lock().expect("progress lock poisoned");
            if !progress.apply(safe_point) {
                debug!(
                    partition = %partition,
                    version = safe_point.version,
                    current = progress.safe_point_version,
                    "Dropped stale safe point"
                );
            }
            progress.pending_acks += 1;
            progress.pending_acks >= self.config.every_acks && progress.commit_target().is_some()
        };
        if !due {
            return None;
        }
        self.commit_state(partition, &state, now_us).await.ok().flatten()
    }

    /// Records a new safe point without counting an acknowledgement. Used
    /// when the set of cursors changes.
    ///
    /// Returns false if the report was older than one already applied.
    pub fn update_safe_point(&self, partition: &PartitionKey, safe_point: SafePoint) -> bool {
        let state = self.entry(partition);
        let mut progress = state.progress.lock().expect("progress lock poisoned");
        progress.apply(safe_point)
    }

    // -------------------------------------------------------------------------
    // Commits
    // -------------------------------------------------------------------------

    /// Commits every partition whose safe point moved past its checkpoint and
    /// whose interval elapsed.
    pub async fn commit(&self, now_us: u64) -> CommitReport {
        let due: Vec<(PartitionKey, Arc<PartitionCheckpoint>)> = {
            let partitions = self.partitions.lock().expect("checkpoint lock poisoned");
            partitions
                .iter()
                .filter(|(_, state)| {
                    let progress = state.progress.lock().expect("progress lock poisoned");
                    progress.commit_target().is_some()
                        && now_us.saturating_sub(progress.last_commit_us) >= self.config.interval_us
                })
                .map(|(key, state)| (key.clone(), Arc::clone(state)))
                .collect()
        };

        let mut report = CommitReport::default();
        for (partition, state) in due {
            match self.commit_state(&partition, &state, now_us).await {
                Ok(Some(_)) => report.committed += 1,
                Ok(None) => {}
                Err(_) => report.failed += 1,
            }
        }
        report
    }

    /// Commits one partition's safe point now, regardless of cadence.
    ///
    /// Returns the checkpoint written, or `None` if nothing moved.
    ///
    /// # Errors
    ///
    /// Returns the store's error; the safe point stays pending.
    pub async fn commit_partition(
        &self,
        partition: &PartitionKey,
        now_us: u64,
    ) -> CheckpointResult<Option<Checkpoint>> {
        match self.existing(partition) {
            Some(state) => self.commit_state(partition, &state, now_us).await,
            None => Ok(None),
        }
    }

    /// Final commit before a partition is released.
    ///
    /// # Errors
    ///
    /// Returns the store's error.
    pub async fn flush(
        &self,
        partition: &PartitionKey,
        now_us: u64,
    ) -> CheckpointResult<Option<Checkpoint>> {
        let result = self.commit_partition(partition, now_us).await;
        if let Ok(Some(checkpoint)) = &result {
            info!(
                partition = %partition,
                offset = checkpoint.offset.get(),
                "Flushed checkpoint"
            );
        }
        result
    }

    async fn commit_state(
        &self,
        partition: &PartitionKey,
        state: &PartitionCheckpoint,
        now_us: u64,
    ) -> CheckpointResult<Option<Checkpoint>> {
        let _write = state.write.lock().await;

        // Re-read under the write lock: a concurrent commit may have moved it.
        let target = {
            let progress = state.progress.lock().expect("progress lock poisoned");
            progress.commit_target()
        };
        let Some(offset) = target else {
            return Ok(None);
        };

        let checkpoint = Checkpoint::new(partition.clone(), offset, now_us);
        if let Err(err) = self.store.save(&checkpoint).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                partition = %partition,
                offset = offset.get(),
                error = %err,
                "Checkpoint write failed, retrying at next cadence"
            );
            return Err(err);
        }

        let mut progress = state.progress.lock().expect("progress lock poisoned");
        debug_assert!(progress.committed.map_or(true, |c| c < offset));
        progress.committed = Some(offset);
        progress.pending_acks = 0;
        progress.last_commit_us = now_us;
        self.commits.fetch_add(1, Ordering::Relaxed);
        debug!(partition = %partition, offset = offset.get(), "Committed checkpoint");
        Ok(Some(checkpoint))
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Last offset durably committed for the partition.
    #[must_use]
    pub fn committed(&self, partition: &PartitionKey) -> Option<Offset> {
        let state = self.existing(partition)?;
        let progress = state.progress.lock().expect("progress lock poisoned");
        progress.committed
    }

    /// Last reported safe point of the partition.
    #[must_use]
    pub fn safe_point(&self, partition: &PartitionKey) -> Option<Offset> {
        let state = self.existing(partition)?;
        let progress = state.progress.lock().expect("progress lock poisoned");
        progress.safe_point
    }

    /// Stops tracking a partition.
    pub fn release(&self, partition: &PartitionKey) {
        self.partitions
            .lock()
            .expect("checkpoint lock poisoned")
            .remove(partition);
    }

    /// Partitions being tracked, sorted.
    #[must_use]
    pub fn tracked(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .partitions
            .lock()
            .expect("checkpoint lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Returns write counters.
    #[must_use]
    pub fn stats(&self) -> CheckpointStats {
        CheckpointStats {
            commits: self.commits.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
        }
    }
}
