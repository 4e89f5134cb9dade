//! Poller error types.

use streamq_cache::CacheError;
use streamq_checkpoint::CheckpointError;
use streamq_core::PartitionKey;
use streamq_transport::TransportError;
use thiserror::Error;

/// Result type for poller operations.
pub type PollerResult<T> = Result<T, PollerError>;

/// Errors that can occur while polling a partition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollerError {
    /// Transport request failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Cache rejected the fetched entries.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Checkpoint could not be loaded.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// `poll` called before `start` or after `stop`.
    #[error("poller for {partition} not started")]
    NotStarted {
        /// Partition.
        partition: PartitionKey,
    },

    /// Shutdown in progress.
    #[error("poller is shutdown")]
    Shutdown,
}

impl PollerError {
    /// Returns true if polling may continue after a backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_transient(),
            Self::Checkpoint(CheckpointError::Transport(err)) => err.is_transient(),
            Self::Checkpoint(CheckpointError::Io { .. }) => true,
            _ => false,
        }
    }
}
