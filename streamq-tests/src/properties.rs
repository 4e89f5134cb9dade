//! Property definitions and checkers for streamq simulation tests.
//!
//! Properties are invariants of the delivery contract. A test feeds the
//! checker what it produced, what each reader was handed and acknowledged,
//! and the checkpoints written, then asks for violations.
//!
//! Readers are identified by a caller-chosen `u64`, so ids stay unique
//! across adapter restarts.

use std::collections::{BTreeMap, BTreeSet};

use streamq_checkpoint::Checkpoint;
use streamq_core::{Offset, PartitionKey};

// ============================================================================
// Property Violation Types
// ============================================================================

/// A violation of a delivery property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyViolation {
    /// A reader was handed an offset at or below one it already saw.
    OutOfOrder {
        /// Reader id.
        reader: u64,
        /// Partition read.
        partition: PartitionKey,
        /// Offset delivered before.
        previous: u64,
        /// Offset delivered now.
        offset: u64,
    },
    /// A reader skipped a produced offset without a reset.
    Gap {
        /// Reader id.
        reader: u64,
        /// Partition read.
        partition: PartitionKey,
        /// First produced offset skipped.
        missing: u64,
        /// Offset delivered instead.
        offset: u64,
    },
    /// A checkpoint moved backwards.
    CheckpointRegression {
        /// Partition.
        partition: PartitionKey,
        /// Earlier checkpoint.
        previous: u64,
        /// Later, lower checkpoint.
        offset: u64,
    },
    /// A checkpoint covers an offset no reader acknowledged.
    CheckpointAhead {
        /// Partition.
        partition: PartitionKey,
        /// Checkpointed offset.
        checkpoint: u64,
        /// Highest acknowledged offset, if any.
        acknowledged: Option<u64>,
    },
    /// A reader lost entries although nothing was force-evicted, so an
    /// unacknowledged entry was released.
    UnsafeEviction {
        /// Reader id.
        reader: u64,
        /// Partition read.
        partition: PartitionKey,
    },
    /// A produced record was never delivered to any reader.
    Undelivered {
        /// Partition.
        partition: PartitionKey,
        /// Lowest undelivered offset.
        offset: u64,
        /// How many offsets were never delivered.
        count: usize,
    },
}

impl std::fmt::Display for PropertyViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OutOfOrder {
                reader,
                partition,
                previous,
                offset,
            } => write!(
                f,
                "reader {reader} on {partition}: offset {offset} delivered after {previous}"
            ),
            Self::Gap {
                reader,
                partition,
                missing,
                offset,
            } => write!(
                f,
                "reader {reader} on {partition}: skipped {missing}, delivered {offset}"
            ),
            Self::CheckpointRegression {
                partition,
                previous,
                offset,
            } => write!(
                f,
                "checkpoint on {partition} moved back from {previous} to {offset}"
            ),
            Self::CheckpointAhead {
                partition,
                checkpoint,
                acknowledged,
            } => write!(
                f,
                "checkpoint {checkpoint} on {partition} is ahead of acknowledged {acknowledged:?}"
            ),
            Self::UnsafeEviction { reader, partition } => write!(
                f,
                "reader {reader} on {partition} missed entries with no forced eviction"
            ),
            Self::Undelivered {
                partition,
                offset,
                count,
            } => write!(
                f,
                "{count} records on {partition} never delivered, first at {offset}"
            ),
        }
    }
}

// ============================================================================
// Property Checker
// ============================================================================

#[derive(Debug, Default)]
struct ReaderState {
    /// Last offset handed out since the reader started or reset.
    last: Option<u64>,
}

/// Tracks delivery across a simulation for property verification.
#[derive(Debug, Default)]
pub struct DeliveryChecker {
    produced: BTreeMap<PartitionKey, BTreeSet<u64>>,
    delivered: BTreeMap<PartitionKey, BTreeSet<u64>>,
    readers: BTreeMap<(PartitionKey, u64), ReaderState>,
    /// Highest acknowledged offset per partition, per reader.
    acknowledged: BTreeMap<PartitionKey, BTreeMap<u64, u64>>,
    checkpoints: BTreeMap<PartitionKey, u64>,
    violations: Vec<PropertyViolation>,
}

impl DeliveryChecker {
    /// Creates an empty checker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a record written to the log.
    pub fn record_produced(&mut self, partition: &PartitionKey, offset: Offset) {
        self.produced
            .entry(partition.clone())
            .or_default()
            .insert(offset.get());
    }

    /// Records an entry handed to `reader`. Checks order and contiguity
    /// against what that reader saw since its last start or reset.
    pub fn record_delivered(&mut self, reader: u64, partition: &PartitionKey, offset: Offset) {
        let offset = offset.get();
        self.delivered
            .entry(partition.clone())
            .or_default()
            .insert(offset);

        let state = self
            .readers
            .entry((partition.clone(), reader))
            .or_default();
        if let Some(previous) = state.last {
            if offset <= previous {
                self.violations.push(PropertyViolation::OutOfOrder {
                    reader,
                    partition: partition.clone(),
                    previous,
                    offset,
                });
            } else if let Some(&missing) = self
                .produced
                .get(partition)
                .and_then(|p| p.range(previous + 1..offset).next())
            {
                self.violations.push(PropertyViolation::Gap {
                    reader,
                    partition: partition.clone(),
                    missing,
                    offset,
                });
            }
        }
        state.last = Some(offset);
    }

    /// Forgets `reader`'s position: it was reset or restarted and may
    /// legitimately jump.
    pub fn record_reset(&mut self, reader: u64, partition: &PartitionKey) {
        self.readers.remove(&(partition.clone(), reader));
    }

    /// Records an acknowledgement by `reader`.
    pub fn record_acknowledged(&mut self, reader: u64, partition: &PartitionKey, offset: Offset) {
        let highest = self
            .acknowledged
            .entry(partition.clone())
            .or_default()
            .entry(reader)
            .or_insert(offset.get());
        *highest = (*highest).max(offset.get());
    }

    /// Records a cache miss seen by `reader`, with the partition's forced
    /// eviction count at that moment.
    pub fn record_cache_miss(&mut self, reader: u64, partition: &PartitionKey, forced_evictions: u64) {
        if forced_evictions == 0 {
            self.violations.push(PropertyViolation::UnsafeEviction {
                reader,
                partition: partition.clone(),
            });
        }
    }

    /// Records a written checkpoint. Checkpoints must not move backwards
    /// and must not pass the highest acknowledgement of any reader that
    /// acknowledged on the partition.
    pub fn record_checkpoint(&mut self, checkpoint: &Checkpoint) {
        let partition = &checkpoint.partition;
        let offset = checkpoint.offset.get();

        if let Some(&previous) = self.checkpoints.get(partition) {
            if offset < previous {
                self.violations.push(PropertyViolation::CheckpointRegression {
                    partition: partition.clone(),
                    previous,
                    offset,
                });
            }
        }
        self.checkpoints.insert(partition.clone(), offset);

        let acknowledged = self
            .acknowledged
            .get(partition)
            .and_then(|readers| readers.values().copied().max());
        if acknowledged.map_or(true, |acked| offset > acked) {
            self.violations.push(PropertyViolation::CheckpointAhead {
                partition: partition.clone(),
                checkpoint: offset,
                acknowledged,
            });
        }
    }

    /// Checks that every produced record reached some reader.
    pub fn verify_all_delivered(&mut self) {
        for (partition, produced) in &self.produced {
            let delivered = self.delivered.get(partition);
            let missing: Vec<u64> = produced
                .iter()
                .copied()
                .filter(|offset| delivered.map_or(true, |d| !d.contains(offset)))
                .collect();
            if let Some(&offset) = missing.first() {
                self.violations.push(PropertyViolation::Undelivered {
                    partition: partition.clone(),
                    offset,
                    count: missing.len(),
                });
            }
        }
    }

    /// Offsets delivered on `partition`, any reader.
    #[must_use]
    pub fn delivered(&self, partition: &PartitionKey) -> usize {
        self.delivered.get(partition).map_or(0, BTreeSet::len)
    }

    /// Violations found so far.
    #[must_use]
    pub fn violations(&self) -> &[PropertyViolation] {
        &self.violations
    }

    /// Panics listing every violation, prefixed with `context`.
    ///
    /// # Panics
    ///
    /// Panics if any violation was recorded.
    pub fn assert_ok(&self, context: &str) {
        if self.violations.is_empty() {
            return;
        }
        let lines: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        panic!(
            "{context}: {} property violations\n  {}",
            lines.len(),
            lines.join("\n  ")
        );
    }
}
