//! Checkpoint store backed by the transport's consumer-group offsets.

use async_trait::async_trait;
use streamq_core::PartitionKey;
use streamq_flow::{RequestClass, RequestPool};
use streamq_transport::SharedTransport;

use crate::error::{CheckpointError, CheckpointResult};
use crate::store::CheckpointStore;
use crate::types::Checkpoint;

/// Stores checkpoints as the consumer group's committed offsets.
///
/// The transport records the next offset to read, so a checkpoint at offset
/// `n` is committed as `n + 1`. Commit time is not stored; loaded
/// checkpoints report zero.
pub struct TransportCheckpointStore {
    transport: SharedTransport,
    group: String,
    pool: RequestPool,
}

impl TransportCheckpointStore {
    /// Creates a store committing for `group`. Requests draw from `pool`.
    #[must_use]
    pub fn new(transport: SharedTransport, group: impl Into<String>, pool: RequestPool) -> Self {
        Self {
            transport,
            group: group.into(),
            pool,
        }
    }

    /// Consumer group offsets are committed for.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }
}

impl std::fmt::Debug for TransportCheckpointStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportCheckpointStore")
            .field("group", &self.group)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CheckpointStore for TransportCheckpointStore {
    async fn load(&self, partition: &PartitionKey) -> CheckpointResult<Option<Checkpoint>> {
        let _permit = self
            .pool
            .acquire(RequestClass::Commit)
            .await
            .map_err(|_| CheckpointError::Shutdown)?;
        let next = self.transport.committed_offset(&self.group, partition).await?;
        Ok(next
            .and_then(streamq_core::Offset::prev)
            .map(|offset| Checkpoint::new(partition.clone(), offset, 0)))
    }

    async fn save(&self, checkpoint: &Checkpoint) -> CheckpointResult<()> {
        let _permit = self
            .pool
            .acquire(RequestClass::Commit)
            .await
            .map_err(|_| CheckpointError::Shutdown)?;
        self.transport
            .commit_offset(&self.group, &checkpoint.partition, checkpoint.resume_offset())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use streamq_core::{Offset, PartitionId};
    use streamq_transport::{SimulatedTransport, TransportError};

    fn key() -> PartitionKey {
        PartitionKey::new("orders", PartitionId::new(0))
    }

    fn setup() -> (SimulatedTransport, TransportCheckpointStore) {
        let transport = SimulatedTransport::new(42);
        transport.create_topic("orders", 1);
        let store = TransportCheckpointStore::new(Arc::new(transport.clone()), "g1", RequestPool::new(4));
        (transport, store)
    }

    #[tokio::test]
    async fn test_commits_next_offset() {
        let (transport, store) = setup();
        assert_eq!(store.load(&key()).await.unwrap(), None);

        store
            .save(&Checkpoint::new(key(), Offset::new(49), 10))
            .await
            .unwrap();
        assert_eq!(transport.committed("g1", &key()), Some(Offset::new(50)));

        let loaded = store.load(&key()).await.unwrap().unwrap();
        assert_eq!(loaded.offset, Offset::new(49));
        assert_eq!(loaded.resume_offset(), Offset::new(50));
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces() {
        let (transport, store) = setup();
        transport.fault_config().force_commit_fail = true;

        let err = store
            .save(&Checkpoint::new(key(), Offset::new(1), 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::Transport(TransportError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_closed_pool_is_shutdown() {
        let (_transport, store) = setup();
        store.pool.close();
        assert_eq!(
            store.load(&key()).await.unwrap_err(),
            CheckpointError::Shutdown
        );
    }
}
