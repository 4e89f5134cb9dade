//! Simulated cluster and adapter construction for tests.
//!
//! A [`SimCluster`] owns the shared simulated state (log, checkpoint store,
//! trace sink). Adapters started from it come and go; the state survives
//! them, which is what restart and rebalance tests need.

use std::sync::Arc;
use std::time::Duration;

use streamq_adapter::{AdapterDeps, AdapterResult, QueueAdapter, QueueReceiver};
use streamq_checkpoint::{CheckpointStoreFaultConfig, SimulatedCheckpointStore};
use streamq_config::StreamOptions;
use streamq_core::{LogEntry, Offset, OutboundRecord, PartitionId, PartitionKey, TopicName};
use streamq_transport::{
    MemoryTraceSink, SimulatedTransport, TransportFaultConfig, TransportResult, Utf8Codec,
};

/// Adapter type every test uses.
pub type TestAdapter = QueueAdapter<Utf8Codec>;

/// Receiver type every test uses.
pub type TestReceiver = QueueReceiver<Utf8Codec>;

/// Shared simulated state for one test.
#[derive(Debug, Clone)]
pub struct SimCluster {
    /// Topic created on the transport.
    pub topic: TopicName,
    /// Partition count of `topic`.
    pub partitions: u32,
    /// Simulated log.
    pub transport: SimulatedTransport,
    /// Simulated checkpoint store.
    pub store: SimulatedCheckpointStore,
    /// Collected trace events.
    pub sink: MemoryTraceSink,
}

impl SimCluster {
    /// Creates a fault-free cluster with one topic.
    #[must_use]
    pub fn new(seed: u64, topic: &str, partitions: u32) -> Self {
        Self::with_faults(
            seed,
            topic,
            partitions,
            TransportFaultConfig::none(),
            CheckpointStoreFaultConfig::none(),
        )
    }

    /// Creates a cluster with fault injection on the transport and store.
    #[must_use]
    pub fn with_faults(
        seed: u64,
        topic: &str,
        partitions: u32,
        transport_faults: TransportFaultConfig,
        store_faults: CheckpointStoreFaultConfig,
    ) -> Self {
        let topic = TopicName::new(topic);
        let transport = SimulatedTransport::with_faults(seed, transport_faults);
        transport.create_topic(topic.clone(), partitions);
        Self {
            topic,
            partitions,
            transport,
            store: SimulatedCheckpointStore::with_faults(seed, store_faults),
            sink: MemoryTraceSink::new(),
        }
    }

    /// Key of partition `id` of the cluster topic.
    #[must_use]
    pub fn partition(&self, id: u64) -> PartitionKey {
        PartitionKey::new(self.topic.clone(), PartitionId::new(id))
    }

    /// Every partition of the cluster topic.
    #[must_use]
    pub fn all_partitions(&self) -> Vec<PartitionKey> {
        (0..u64::from(self.partitions))
            .map(|id| self.partition(id))
            .collect()
    }

    /// Starts an adapter over the shared state.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `options` do not validate.
    pub fn start_adapter(&self, options: StreamOptions) -> AdapterResult<TestAdapter> {
        let deps = AdapterDeps::new(Arc::new(self.transport.clone()), Utf8Codec)
            .with_checkpoint_store(Arc::new(self.store.clone()))
            .with_trace_sink(Arc::new(self.sink.clone()));
        QueueAdapter::start(options, deps)
    }

    /// Appends `count` records straight to the log, bypassing the send path.
    /// Returns the offsets written.
    ///
    /// # Errors
    ///
    /// Returns an error if the partition does not exist.
    pub fn produce(&self, partition: &PartitionKey, count: usize) -> TransportResult<Vec<Offset>> {
        (0..count)
            .map(|i| {
                self.transport
                    .append(partition, OutboundRecord::new(format!("{partition}#{i}")))
            })
            .collect()
    }
}

/// Assigns `partition` and returns an initialized receiver on it.
///
/// # Errors
///
/// Returns assignment or initialization errors.
pub async fn attach(adapter: &TestAdapter, partition: &PartitionKey) -> AdapterResult<TestReceiver> {
    adapter.assign(partition.clone()).await?;
    let mut receiver = adapter.create_receiver(partition.clone())?;
    receiver.initialize()?;
    Ok(receiver)
}

/// Pulls until `count` entries arrived or `max_polls` polls found nothing
/// more, sleeping briefly between empty polls.
///
/// # Errors
///
/// Returns the first pull error, including cache misses.
pub async fn pull_until(
    receiver: &mut TestReceiver,
    count: usize,
    max_polls: usize,
) -> AdapterResult<Vec<Arc<LogEntry<String>>>> {
    let mut out = Vec::with_capacity(count);
    let mut polls = 0;
    while out.len() < count && polls < max_polls {
        let batch = receiver.pull_messages(count - out.len())?;
        if batch.is_empty() {
            polls += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        out.extend(batch);
    }
    Ok(out)
}

/// Offsets of `entries`, as plain integers.
#[must_use]
pub fn offsets(entries: &[Arc<LogEntry<String>>]) -> Vec<u64> {
    entries.iter().map(|e| e.offset.get()).collect()
}
