//! Checkpoint storage abstraction.
//!
//! Provides the `CheckpointStore` trait for persisting one committed offset
//! per partition, and `SimulatedCheckpointStore` for deterministic testing.

#![allow(clippy::significant_drop_tightening)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use streamq_core::PartitionKey;

use crate::error::{CheckpointError, CheckpointResult};
use crate::types::Checkpoint;

// -----------------------------------------------------------------------------
// Checkpoint Store Trait
// -----------------------------------------------------------------------------

/// Durable store of committed checkpoints, keyed by partition.
///
/// A save replaces the partition's value atomically. The store does not
/// order writes; [`crate::CheckpointManager`] keeps them monotonic.
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    /// Reads the last saved checkpoint, `None` if the partition has none.
    async fn load(&self, partition: &PartitionKey) -> CheckpointResult<Option<Checkpoint>>;

    /// Writes a checkpoint.
    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()>;
}

/// Shared handle to a checkpoint store.
pub type SharedCheckpointStore = Arc<dyn CheckpointStore>;

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated checkpoint store.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStoreFaultConfig {
    /// Probability of a load failing (0.0 - 1.0).
    pub load_fail_rate: f64,
    /// Probability of a save failing (0.0 - 1.0).
    pub save_fail_rate: f64,
    /// Force next load to fail (one-shot).
    pub force_load_fail: bool,
    /// Force next save to fail (one-shot).
    pub force_save_fail: bool,
}

impl CheckpointStoreFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            load_fail_rate: 0.0,
            save_fail_rate: 0.0,
            force_load_fail: false,
            force_save_fail: false,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub const fn flaky() -> Self {
        Self {
            load_fail_rate: 0.05,
            save_fail_rate: 0.2,
            force_load_fail: false,
            force_save_fail: false,
        }
    }

    /// Builder: set save fail rate.
    #[must_use]
    pub const fn with_save_fail_rate(mut self, rate: f64) -> Self {
        self.save_fail_rate = rate;
        self
    }

    /// Builder: set load fail rate.
    #[must_use]
    pub const fn with_load_fail_rate(mut self, rate: f64) -> Self {
        self.load_fail_rate = rate;
        self
    }
}

// -----------------------------------------------------------------------------
// Simulated Checkpoint Store
// -----------------------------------------------------------------------------

/// In-memory checkpoint store with deterministic fault injection.
///
/// Clones share state via `Arc`, so a test can keep a handle to inspect
/// what a manager wrote, or hand the same store to a restarted adapter.
#[derive(Debug, Clone)]
pub struct SimulatedCheckpointStore {
    checkpoints: Arc<Mutex<HashMap<PartitionKey, Checkpoint>>>,
    /// Every successful save in order, for monotonicity checks.
    history: Arc<Mutex<Vec<Checkpoint>>>,
    fault_config: Arc<Mutex<CheckpointStoreFaultConfig>>,
    seed: u64,
    counter: Arc<AtomicU64>,
}

impl SimulatedCheckpointStore {
    /// Creates a new simulated store with no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, CheckpointStoreFaultConfig::none())
    }

    /// Creates a simulated store with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: CheckpointStoreFaultConfig) -> Self {
        Self {
            checkpoints: Arc::new(Mutex::new(HashMap::new())),
            history: Arc::new(Mutex::new(Vec::new())),
            fault_config: Arc::new(Mutex::new(config)),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, CheckpointStoreFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Deterministic RNG: `(seed + counter) * M` for reproducible faults.
    fn should_inject_fault(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        let hash = self
            .seed
            .wrapping_add(counter)
            .wrapping_mul(0x9e37_79b9_7f4a_7c15);
        #[allow(clippy::cast_precision_loss)]
        let normalized = (hash as f64) / (u64::MAX as f64);
        normalized < rate
    }

    /// Returns the stored checkpoint (bypasses faults).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn checkpoint(&self, partition: &PartitionKey) -> Option<Checkpoint> {
        let checkpoints = self.checkpoints.lock().expect("checkpoints lock poisoned");
        checkpoints.get(partition).cloned()
    }

    /// Stores a checkpoint directly (bypasses faults), for seeding restarts.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn seed_checkpoint(&self, checkpoint: Checkpoint) {
        let mut checkpoints = self.checkpoints.lock().expect("checkpoints lock poisoned");
        checkpoints.insert(checkpoint.partition.clone(), checkpoint);
    }

    /// Every successful save, oldest first.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn history(&self) -> Vec<Checkpoint> {
        self.history.lock().expect("history lock poisoned").clone()
    }

    /// Number of successful saves.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.history.lock().expect("history lock poisoned").len()
    }
}

#[async_trait]
impl CheckpointStore for SimulatedCheckpointStore {
    async fn load(&self, partition: &PartitionKey) -> CheckpointResult<Option<Checkpoint>> {
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_load_fail {
                config.force_load_fail = false;
                return Err(CheckpointError::Io {
                    operation: "load",
                    message: "simulated failure (forced)".into(),
                });
            }
        }

        let load_fail_rate = self.fault_config().load_fail_rate;
        if self.should_inject_fault(load_fail_rate) {
            return Err(CheckpointError::Io {
                operation: "load",
                message: "simulated failure (random)".into(),
            });
        }

        Ok(self.checkpoint(partition))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        {
            let mut config = self.fault_config.lock().expect("lock poisoned");
            if config.force_save_fail {
                config.force_save_fail = false;
                return Err(CheckpointError::Io {
                    operation: "save",
                    message: "simulated failure (forced)".into(),
                });
            }
        }

        let save_fail_rate = self.fault_config().save_fail_rate;
        if self.should_inject_fault(save_fail_rate) {
            return Err(CheckpointError::Io {
                operation: "save",
                message: "simulated failure (random)".into(),
            });
        }

        let mut checkpoints = self.checkpoints.lock().expect("checkpoints lock poisoned");
        checkpoints.insert(checkpoint.partition.clone(), checkpoint.clone());
        self.history
            .lock()
            .expect("history lock poisoned")
            .push(checkpoint.clone());
        Ok(())
    }
}
