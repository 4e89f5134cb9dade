//! Checkpoint record and commit cadence.

use streamq_config::StreamOptions;
use streamq_core::{Offset, PartitionKey};

/// Durable resume point of a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Partition.
    pub partition: PartitionKey,
    /// Newest offset every reader acknowledged.
    pub offset: Offset,
    /// When the checkpoint was written (us, local clock).
    pub committed_at_us: u64,
}

impl Checkpoint {
    /// Creates a checkpoint.
    #[must_use]
    pub const fn new(partition: PartitionKey, offset: Offset, committed_at_us: u64) -> Self {
        Self {
            partition,
            offset,
            committed_at_us,
        }
    }

    /// Offset a restarted poller resumes at.
    #[must_use]
    pub const fn resume_offset(&self) -> Offset {
        self.offset.next()
    }
}

/// When pending acknowledgements are committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointConfig {
    /// Commit at least this often while a partition has pending progress (us).
    pub interval_us: u64,
    /// Commit after this many acknowledgements on a partition.
    pub every_acks: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            interval_us: 1_000_000,
            every_acks: 100,
        }
    }
}

impl CheckpointConfig {
    /// Derives the cadence from adapter options.
    #[must_use]
    pub fn from_options(options: &StreamOptions) -> Self {
        Self {
            interval_us: options.checkpoint_interval_ms.saturating_mul(1_000),
            every_acks: options.checkpoint_every_acks,
        }
    }

    /// Commits on every acknowledgement.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            interval_us: 1_000,
            every_acks: 1,
        }
    }
}
