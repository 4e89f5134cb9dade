//! Commit and eviction cadence.

use std::sync::Arc;
use std::time::Duration;

use streamq_cache::{CacheRegistry, EvictionOutcome};
use streamq_checkpoint::{CheckpointManager, CommitReport};
use streamq_core::Clock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Checkpoint commits.
    pub commits: CommitReport,
    /// Cache evictions.
    pub evicted: EvictionOutcome,
}

/// Commits due checkpoints, then evicts released or expired cache entries.
pub async fn maintenance_pass<T>(
    cache: &CacheRegistry<T>,
    checkpoints: &CheckpointManager,
    now_us: u64,
) -> MaintenanceReport {
    let commits = checkpoints.commit(now_us).await;
    let evicted = cache.evict(now_us);
    if commits.committed > 0 || evicted.total() > 0 {
        debug!(
            committed = commits.committed,
            commit_failures = commits.failed,
            evicted = evicted.evicted,
            forced = evicted.forced,
            "Maintenance pass"
        );
    }
    MaintenanceReport { commits, evicted }
}

/// The background cadence task.
#[derive(Debug)]
pub(crate) struct MaintenanceHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    pub(crate) fn spawn<T: Send + Sync + 'static>(
        cache: Arc<CacheRegistry<T>>,
        checkpoints: Arc<CheckpointManager>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        maintenance_pass(&cache, &checkpoints, clock.now_us()).await;
                    }
                }
            }
        });
        Self { shutdown_tx, task }
    }

    pub(crate) async fn stop(mut self, grace: Duration) {
        let _ = self.shutdown_tx.try_send(());
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            warn!("Maintenance task exceeded grace period, aborting");
            self.task.abort();
        }
    }
}
