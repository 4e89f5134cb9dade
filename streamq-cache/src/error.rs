//! Cache error types.

use streamq_core::{Offset, PartitionKey, SequenceToken, SubscriptionId};
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors returned by the cache and cursor registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cursor's read position fell below the window's low-water mark.
    ///
    /// Not an internal fault: the reader must resume from a recoverable
    /// position (checkpoint or stream start).
    #[error("cache miss on {partition} for {subscription}: requested {requested}, oldest retained {low_water}")]
    CacheMiss {
        /// Partition.
        partition: PartitionKey,
        /// Reader that missed.
        subscription: SubscriptionId,
        /// Offset the reader asked for.
        requested: Offset,
        /// Oldest position the window can still serve.
        low_water: Offset,
    },

    /// Partition is not assigned to this process.
    #[error("partition {partition} not assigned")]
    PartitionNotAssigned {
        /// Partition.
        partition: PartitionKey,
    },

    /// No cursor for this subscription on the partition.
    #[error("no cursor for {subscription} on {partition}")]
    CursorNotFound {
        /// Partition.
        partition: PartitionKey,
        /// Subscription.
        subscription: SubscriptionId,
    },

    /// A cursor for this subscription already exists on the partition.
    #[error("cursor for {subscription} already registered on {partition}")]
    CursorExists {
        /// Partition.
        partition: PartitionKey,
        /// Subscription.
        subscription: SubscriptionId,
    },

    /// Acknowledged a token the cursor has not been handed yet.
    #[error("{subscription} acknowledged {token} on {partition} but was only delivered up to {read_position}")]
    AckBeyondDelivered {
        /// Partition.
        partition: PartitionKey,
        /// Subscription.
        subscription: SubscriptionId,
        /// Token acknowledged.
        token: SequenceToken,
        /// Next offset the cursor has not been delivered.
        read_position: Offset,
    },

    /// Appended an entry at or below an offset already in the window.
    #[error("non-monotonic append to {partition}: offset {offset}, expected at least {expected}")]
    NonMonotonicAppend {
        /// Partition.
        partition: PartitionKey,
        /// Offending offset.
        offset: Offset,
        /// Lowest acceptable offset.
        expected: Offset,
    },
}

impl CacheError {
    /// Returns true for the cache-miss signal.
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss { .. })
    }
}
