//! In-memory simulated transport for deterministic testing.
//!
//! Holds partition logs, committed offsets and a fault configuration in
//! shared state; clones see the same logs. Fetches block on a `Notify` until
//! records arrive or the timeout elapses, so tests under paused tokio time
//! exercise the real waiting paths.

#![allow(clippy::significant_drop_tightening)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use streamq_core::{
    Offset, OutboundRecord, PartitionId, PartitionKey, RawRecord, TopicName, Watermarks,
};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;

// -----------------------------------------------------------------------------
// Fault Configuration
// -----------------------------------------------------------------------------

/// Fault configuration for the simulated transport.
#[derive(Debug, Clone, Default)]
pub struct TransportFaultConfig {
    /// Probability of a fetch failing transiently (0.0 - 1.0).
    pub fetch_fail_rate: f64,
    /// Probability of a produce failing transiently (0.0 - 1.0).
    pub produce_fail_rate: f64,
    /// Probability of an offset commit failing transiently (0.0 - 1.0).
    pub commit_fail_rate: f64,
    /// Force next fetch to fail (one-shot).
    pub force_fetch_fail: bool,
    /// Force next produce to fail (one-shot).
    pub force_produce_fail: bool,
    /// Force next commit to fail (one-shot).
    pub force_commit_fail: bool,
    /// Every request fails as unavailable while set.
    pub unreachable: bool,
    /// Every request fails with this error while set.
    pub fatal_error: Option<TransportError>,
    /// Delay added to every request.
    pub request_latency: Duration,
}

impl TransportFaultConfig {
    /// No faults (all operations succeed).
    #[must_use]
    pub const fn none() -> Self {
        Self {
            fetch_fail_rate: 0.0,
            produce_fail_rate: 0.0,
            commit_fail_rate: 0.0,
            force_fetch_fail: false,
            force_produce_fail: false,
            force_commit_fail: false,
            unreachable: false,
            fatal_error: None,
            request_latency: Duration::ZERO,
        }
    }

    /// Flaky configuration for stress testing.
    #[must_use]
    pub fn flaky() -> Self {
        Self::none()
            .with_fetch_fail_rate(0.1)
            .with_produce_fail_rate(0.1)
            .with_commit_fail_rate(0.1)
    }

    /// Builder: set fetch fail rate.
    #[must_use]
    pub fn with_fetch_fail_rate(mut self, rate: f64) -> Self {
        self.fetch_fail_rate = rate;
        self
    }

    /// Builder: set produce fail rate.
    #[must_use]
    pub fn with_produce_fail_rate(mut self, rate: f64) -> Self {
        self.produce_fail_rate = rate;
        self
    }

    /// Builder: set commit fail rate.
    #[must_use]
    pub fn with_commit_fail_rate(mut self, rate: f64) -> Self {
        self.commit_fail_rate = rate;
        self
    }

    /// Builder: set per-request latency.
    #[must_use]
    pub fn with_request_latency(mut self, latency: Duration) -> Self {
        self.request_latency = latency;
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Fetch,
    Produce,
    Commit,
    Metadata,
}

impl Operation {
    const fn name(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Produce => "produce",
            Self::Commit => "commit",
            Self::Metadata => "metadata",
        }
    }
}

// -----------------------------------------------------------------------------
// Log State
// -----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct PartitionLog {
    /// Oldest retained offset.
    low: Offset,
    /// Offset the next record gets.
    next: Offset,
    /// Retained records, offsets increasing within `[low, next)`.
    records: VecDeque<RawRecord>,
}

impl PartitionLog {
    fn append(&mut self, record: OutboundRecord) -> Offset {
        let offset = self.next;
        self.records.push_back(RawRecord {
            offset,
            timestamp: record.timestamp,
            key: record.key,
            payload: record.payload,
            headers: record.headers,
        });
        self.next = offset.next();
        offset
    }

    fn read(&self, from: Offset, max_records: usize) -> Vec<RawRecord> {
        let start = self.records.partition_point(|r| r.offset < from);
        self.records
            .iter()
            .skip(start)
            .take(max_records)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Default)]
struct LogState {
    topics: HashMap<TopicName, Vec<PartitionLog>>,
    commits: HashMap<(String, PartitionKey), Offset>,
}

impl LogState {
    fn partition(&self, key: &PartitionKey) -> TransportResult<&PartitionLog> {
        let index = usize::try_from(key.partition.get()).unwrap_or(usize::MAX);
        self.topics
            .get(&key.topic)
            .and_then(|logs| logs.get(index))
            .ok_or_else(|| TransportError::UnknownPartition {
                partition: key.clone(),
            })
    }

    fn partition_mut(&mut self, key: &PartitionKey) -> TransportResult<&mut PartitionLog> {
        let index = usize::try_from(key.partition.get()).unwrap_or(usize::MAX);
        self.topics
            .get_mut(&key.topic)
            .and_then(|logs| logs.get_mut(index))
            .ok_or_else(|| TransportError::UnknownPartition {
                partition: key.clone(),
            })
    }
}

/// Request counters, for assertions in tests.
#[derive(Debug, Default)]
struct RequestCounters {
    fetches: AtomicU64,
    produces: AtomicU64,
    commits: AtomicU64,
}

// -----------------------------------------------------------------------------
// Simulated Transport
// -----------------------------------------------------------------------------

/// In-memory transport with deterministic fault injection.
///
/// Clones share state via `Arc`.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
    fault_config: Arc<Mutex<TransportFaultConfig>>,
    counters: Arc<RequestCounters>,
    /// RNG seed for deterministic faults.
    seed: u64,
    /// Operation counter for deterministic RNG.
    counter: Arc<AtomicU64>,
}

impl SimulatedTransport {
    /// Creates a transport with no topics and no faults.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, TransportFaultConfig::none())
    }

    /// Creates a transport with fault injection.
    #[must_use]
    pub fn with_faults(seed: u64, config: TransportFaultConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState::default())),
            appended: Arc::new(Notify::new()),
            fault_config: Arc::new(Mutex::new(config)),
            counters: Arc::new(RequestCounters::default()),
            seed,
            counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a topic with `partitions` empty partitions. Existing topics are
    /// left untouched.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn create_topic(&self, topic: impl Into<TopicName>, partitions: u32) {
        let mut state = self.lock_state();
        state.topics.entry(topic.into()).or_insert_with(|| {
            (0..partitions).map(|_| PartitionLog::default()).collect()
        });
    }

    /// Appends a record directly, bypassing faults.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPartition` if the partition does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn append(&self, partition: &PartitionKey, record: OutboundRecord) -> TransportResult<Offset> {
        let offset = self.lock_state().partition_mut(partition)?.append(record);
        self.appended.notify_waiters();
        Ok(offset)
    }

    /// Advances a partition's next offset by `count` without records, as
    /// compaction would leave it.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPartition` if the partition does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn skip_offsets(&self, partition: &PartitionKey, count: u64) -> TransportResult<()> {
        let mut state = self.lock_state();
        let log = state.partition_mut(partition)?;
        log.next = log.next.advance(count);
        Ok(())
    }

    /// Drops every record below `offset`, as retention would.
    ///
    /// # Errors
    ///
    /// Returns `UnknownPartition` if the partition does not exist.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn truncate_before(&self, partition: &PartitionKey, offset: Offset) -> TransportResult<()> {
        let mut state = self.lock_state();
        let log = state.partition_mut(partition)?;
        let new_low = offset.min(log.next);
        while log.records.front().is_some_and(|r| r.offset < new_low) {
            log.records.pop_front();
        }
        log.low = log.low.max(new_low);
        Ok(())
    }

    /// Returns every retained record of a partition (bypasses faults).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn records(&self, partition: &PartitionKey) -> Vec<RawRecord> {
        self.lock_state()
            .partition(partition)
            .map(|log| log.records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the committed next offset (bypasses faults).
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn committed(&self, group: &str, partition: &PartitionKey) -> Option<Offset> {
        self.lock_state()
            .commits
            .get(&(group.to_string(), partition.clone()))
            .copied()
    }

    /// Returns fault config for modification.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    pub fn fault_config(&self) -> MutexGuard<'_, TransportFaultConfig> {
        self.fault_config.lock().expect("fault config lock poisoned")
    }

    /// Number of fetch requests received.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.counters.fetches.load(Ordering::Relaxed)
    }

    /// Number of produce requests received.
    #[must_use]
    pub fn produce_count(&self) -> u64 {
        self.counters.produces.load(Ordering::Relaxed)
    }

    /// Number of commit requests received.
    #[must_use]
    pub fn commit_count(&self) -> u64 {
        self.counters.commits.load(Ordering::Relaxed)
    }

    fn lock_state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().expect("log state lock poisoned")
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

    async fn check_faults(&self, operation: Operation) -> TransportResult<()> {
        let latency = self.fault_config().request_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (forced, rate) = {
            let mut config = self.fault_config();
            if let Some(err) = &config.fatal_error {
                return Err(err.clone());
            }
            if config.unreachable {
                return Err(TransportError::Unavailable {
                    message: format!("{}: broker unreachable (simulated)", operation.name()),
                });
            }
            match operation {
                Operation::Fetch => (
                    std::mem::take(&mut config.force_fetch_fail),
                    config.fetch_fail_rate,
                ),
                Operation::Produce => (
                    std::mem::take(&mut config.force_produce_fail),
                    config.produce_fail_rate,
                ),
                Operation::Commit => (
                    std::mem::take(&mut config.force_commit_fail),
                    config.commit_fail_rate,
                ),
                Operation::Metadata => (false, 0.0),
            }
        };

        if forced {
            return Err(TransportError::Unavailable {
                message: format!("{}: simulated failure (forced)", operation.name()),
            });
        }
        if self.should_inject_fault(rate) {
            return Err(TransportError::Unavailable {
                message: format!("{}: simulated failure (random)", operation.name()),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn fetch(
        &self,
        partition: &PartitionKey,
        from: Offset,
        max_records: usize,
        timeout: Duration,
    ) -> TransportResult<Vec<RawRecord>> {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        self.check_faults(Operation::Fetch).await?;

        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before reading so an append between the read
            // and the wait is not missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.lock_state().partition(partition)?.read(from, max_records);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn watermarks(&self, partition: &PartitionKey) -> TransportResult<Watermarks> {
        self.check_faults(Operation::Metadata).await?;
        let state = self.lock_state();
        let log = state.partition(partition)?;
        Ok(Watermarks::new(log.low, log.next))
    }

    async fn commit_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
        next_offset: Offset,
    ) -> TransportResult<()> {
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        self.check_faults(Operation::Commit).await?;
        let mut state = self.lock_state();
        state.partition(partition)?;
        state
            .commits
            .insert((group.to_string(), partition.clone()), next_offset);
        Ok(())
    }

    async fn committed_offset(
        &self,
        group: &str,
        partition: &PartitionKey,
    ) -> TransportResult<Option<Offset>> {
        self.check_faults(Operation::Metadata).await?;
        Ok(self.committed(group, partition))
    }

    async fn produce(
        &self,
        topic: &TopicName,
        partition: PartitionId,
        record: OutboundRecord,
    ) -> TransportResult<Offset> {
        self.counters.produces.fetch_add(1, Ordering::Relaxed);
        self.check_faults(Operation::Produce).await?;
        if !self.lock_state().topics.contains_key(topic) {
            return Err(TransportError::UnknownTopic {
                topic: topic.clone(),
            });
        }
        self.append(&PartitionKey::new(topic.clone(), partition), record)
    }

    async fn partition_count(&self, topic: &TopicName) -> TransportResult<u32> {
        self.check_faults(Operation::Metadata).await?;
        let state = self.lock_state();
        let logs = state
            .topics
            .get(topic)
            .ok_or_else(|| TransportError::UnknownTopic {
                topic: topic.clone(),
            })?;
        Ok(u32::try_from(logs.len()).unwrap_or(u32::MAX))
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn partition(index: u64) -> PartitionKey {
        PartitionKey::new("orders", PartitionId::new(index))
    }

    fn transport() -> SimulatedTransport {
        let transport = SimulatedTransport::new(42);
        transport.create_topic("orders", 2);
        transport
    }

    #[tokio::test]
    async fn test_produce_then_fetch() {
        let transport = transport();
        let topic = TopicName::new("orders");
        for i in 0..5u8 {
            let offset = transport
                .produce(&topic, PartitionId::new(1), OutboundRecord::new(vec![i]))
                .await
                .unwrap();
            assert_eq!(offset, Offset::new(u64::from(i)));
        }

        let batch = transport
            .fetch(&partition(1), Offset::new(2), 10, Duration::ZERO)
            .await
            .unwrap();
        let offsets: Vec<u64> = batch.iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![2, 3, 4]);

        let limited = transport
            .fetch(&partition(1), Offset::new(0), 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
        assert!(transport.records(&partition(0)).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_times_out_empty() {
        let transport = transport();
        let started = Instant::now();
        let batch = transport
            .fetch(&partition(0), Offset::new(0), 10, Duration::from_millis(100))
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_wakes_on_append() {
        let transport = transport();
        let producer = transport.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer
                .append(&partition(0), OutboundRecord::new("late"))
                .unwrap();
        });

        let started = Instant::now();
        let batch = transport
            .fetch(&partition(0), Offset::new(0), 10, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_unknown_partition_and_topic() {
        let transport = transport();
        let err = transport
            .fetch(&partition(7), Offset::new(0), 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownPartition { .. }));
        assert!(err.is_fatal());

        let err = transport
            .produce(&TopicName::new("missing"), PartitionId::new(0), OutboundRecord::new("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::UnknownTopic { .. }));
    }

    #[tokio::test]
    async fn test_forced_fault_is_one_shot() {
        let transport = transport();
        transport.fault_config().force_fetch_fail = true;

        let err = transport
            .fetch(&partition(0), Offset::new(0), 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_transient());

        assert!(transport
            .fetch(&partition(0), Offset::new(0), 10, Duration::ZERO)
            .await
            .is_ok());
        assert_eq!(transport.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_and_fatal() {
        let transport = transport();
        let topic = TopicName::new("orders");

        transport.fault_config().unreachable = true;
        let err = transport
            .produce(&topic, PartitionId::new(0), OutboundRecord::new("x"))
            .await
            .unwrap_err();
        assert!(err.is_transient());

        transport.fault_config().unreachable = false;
        transport.fault_config().fatal_error = Some(TransportError::Authorization {
            message: "denied".to_string(),
        });
        let err = transport
            .fetch(&partition(0), Offset::new(0), 10, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_retention_and_compaction_watermarks() {
        let transport = transport();
        for _ in 0..10 {
            transport.append(&partition(0), OutboundRecord::new("v")).unwrap();
        }
        transport.skip_offsets(&partition(0), 3).unwrap();
        transport.append(&partition(0), OutboundRecord::new("after-gap")).unwrap();
        transport.truncate_before(&partition(0), Offset::new(4)).unwrap();

        let marks = transport.watermarks(&partition(0)).await.unwrap();
        assert_eq!(marks.low, Offset::new(4));
        assert_eq!(marks.high, Offset::new(14));

        let batch = transport
            .fetch(&partition(0), Offset::new(0), 100, Duration::ZERO)
            .await
            .unwrap();
        let offsets: Vec<u64> = batch.iter().map(|r| r.offset.get()).collect();
        assert_eq!(offsets, vec![4, 5, 6, 7, 8, 9, 13]);
    }

    #[tokio::test]
    async fn test_commit_offsets_per_group() {
        let transport = transport();
        transport
            .commit_offset("group-a", &partition(0), Offset::new(50))
            .await
            .unwrap();

        assert_eq!(
            transport.committed_offset("group-a", &partition(0)).await.unwrap(),
            Some(Offset::new(50))
        );
        assert_eq!(
            transport.committed_offset("group-b", &partition(0)).await.unwrap(),
            None
        );
        assert_eq!(transport.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_is_deterministic() {
        async fn pattern(seed: u64) -> Vec<bool> {
            let transport = SimulatedTransport::with_faults(
                seed,
                TransportFaultConfig::none().with_fetch_fail_rate(0.5),
            );
            transport.create_topic("orders", 1);
            let mut results = Vec::new();
            for _ in 0..32 {
                let result = transport
                    .fetch(&partition(0), Offset::new(0), 1, Duration::ZERO)
                    .await;
                results.push(result.is_ok());
            }
            results
        }

        let a = pattern(7).await;
        let b = pattern(7).await;
        assert_eq!(a, b);
        assert!(a.iter().any(|ok| *ok));
        assert!(a.iter().any(|ok| !*ok));
    }
}
