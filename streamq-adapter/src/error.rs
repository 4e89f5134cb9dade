//! Adapter error types.

use streamq_cache::CacheError;
use streamq_checkpoint::CheckpointError;
use streamq_config::ConfigError;
use streamq_core::PartitionKey;
use streamq_dispatch::DispatchError;
use streamq_poller::PollerError;
use thiserror::Error;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Errors surfaced to the host.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Options failed validation; nothing was started.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The partition's topic is not configured.
    #[error("topic of {partition} is not configured")]
    UnknownTopic {
        /// The partition.
        partition: PartitionKey,
    },

    /// The partition is already owned by this adapter.
    #[error("partition {partition} is already assigned")]
    AlreadyAssigned {
        /// The partition.
        partition: PartitionKey,
    },

    /// The partition is not owned by this adapter.
    #[error("partition {partition} is not assigned")]
    NotAssigned {
        /// The partition.
        partition: PartitionKey,
    },

    /// A receiver was used before `initialize`.
    #[error("receiver for {partition} is not initialized")]
    NotInitialized {
        /// The partition.
        partition: PartitionKey,
    },

    /// Poller error while assigning a partition.
    #[error("poller error: {0}")]
    Poller(#[from] PollerError),

    /// Cache error; [`is_cache_miss`](Self::is_cache_miss) tells the caller
    /// to reset the receiver.
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    /// Checkpoint store error.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// A send failed.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// The adapter is shut down.
    #[error("adapter is shutdown")]
    Shutdown,
}

impl AdapterError {
    /// Returns true if a pull fell behind the cache window.
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(self, Self::Cache(err) if err.is_cache_miss())
    }
}
