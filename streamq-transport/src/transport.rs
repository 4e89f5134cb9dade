//! Transport client abstraction.
//!
//! The transport is the partitioned, offset-addressed log streamq sits on.
//! Pollers fetch from it, the checkpoint store commits to it and the
//! dispatcher produces to it. Production deployments plug in a real client;
//! tests use [`SimulatedTransport`](crate::SimulatedTransport).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use streamq_core::{
    Offset, OutboundRecord, PartitionId, PartitionKey, RawRecord, TopicName, Watermarks,
};

use crate::error::TransportResult;

/// Shared handle to a transport, used by every component of one adapter.
pub type SharedTransport = Arc<dyn Transport>;

/// Operations streamq needs from the underlying log transport.
///
/// # Implementation Notes
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// poller, the checkpoint store and the dispatcher. Failures must be
/// classified through [`TransportError`](crate::TransportError) so callers can
/// tell retryable conditions from fatal ones.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Fetches records of `partition` starting at `from`.
    ///
    /// Waits up to `timeout` for at least one record. Returns at most
    /// `max_records` records in increasing offset order, or an empty batch
    /// when the timeout elapses. Offsets may skip positions (compaction) but
    /// never go backwards.
    ///
    /// # Errors
    ///
    /// Transient errors when the broker is unreachable; fatal errors on
    /// authorization or protocol failure.
    async fn fetch(
        &self,
        partition: &PartitionKey,
        from: Offset,
        max_records: usize,
        timeout: Duration,
    ) -> TransportResult<Vec<RawRecord>>;

    /// Returns the low and high watermarks of a partition.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch`](Self::fetch).
    async fn watermarks(&self, partition: &PartitionKey) -> TransportResult<Watermarks>;

    /// Commits `next_offset`, the next offset the group should consume.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch`](Self::fetch).
    async fn commit_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
        next_offset: Offset,
    ) -> TransportResult<()>;

    /// Returns the last committed next offset for `group`, if any.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch`](Self::fetch).
    async fn committed_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
    ) -> TransportResult<Option<Offset>>;

    /// Appends a record to a partition and returns its offset.
    ///
    /// # Errors
    ///
    /// Same classification as [`fetch`](Self::fetch).
    async fn produce(
        &self,
        topic: &TopicName,
        partition: PartitionId,
        record: OutboundRecord,
    ) -> TransportResult<Offset>;

    /// Returns the number of partitions of a topic.
    ///
    /// # Errors
    ///
    /// Returns `UnknownTopic` when the topic does not exist.
    async fn partition_count(&self, topic: &TopicName) -> TransportResult<u32>;
}
