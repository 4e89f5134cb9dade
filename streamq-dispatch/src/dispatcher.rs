//! Dispatcher: bounded, retrying sends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use streamq_config::StreamOptions;
use streamq_core::{Header, Offset, OutboundRecord, PartitionId, PartitionKey, TopicName};
use streamq_flow::{
    BackoffConfig, ExponentialBackoff, InFlightLimiter, RequestClass, RequestPool,
};
use streamq_transport::{
    Codec, SharedTraceSink, SharedTransport, TraceEvent, TraceStage, TransportError,
    TransportResult,
};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DispatchError, DispatchResult};
use crate::partitioner::Partitioner;

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Budget for one send, including time spent waiting for a slot.
    pub producer_timeout: Duration,
    /// Sends outstanding per destination partition before callers block.
    pub max_in_flight_per_destination: usize,
    /// Delays between transient failures.
    pub backoff: BackoffConfig,
}

impl DispatchConfig {
    /// Derives settings from adapter options.
    #[must_use]
    pub const fn from_options(options: &StreamOptions) -> Self {
        Self {
            producer_timeout: options.producer_timeout(),
            max_in_flight_per_destination: options.max_in_flight_per_destination,
            backoff: BackoffConfig::new(options.backoff_min(), options.backoff_max()),
        }
    }

    /// 200ms budget, one send per destination, no jitter.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            producer_timeout: Duration::from_millis(200),
            max_in_flight_per_destination: 1,
            backoff: BackoffConfig::for_testing(),
        }
    }

    /// Builder: set the producer timeout.
    #[must_use]
    pub const fn with_producer_timeout(mut self, timeout: Duration) -> Self {
        self.producer_timeout = timeout;
        self
    }

    /// Builder: set the per-destination bound.
    #[must_use]
    pub const fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight_per_destination = max;
        self
    }
}

/// A send the transport accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Partition the record landed on.
    pub partition: PartitionKey,
    /// Offset the transport assigned.
    pub offset: Offset,
    /// Attempts it took, at least 1.
    pub attempts: u32,
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Sends the transport accepted.
    pub delivered: u64,
    /// Sends reported as failed.
    pub failed: u64,
    /// Attempts repeated after a transient failure.
    pub retries: u64,
}

#[derive(Debug, Default)]
struct DispatchCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    retries: AtomicU64,
}

/// State of one send, readable after its future is dropped on timeout.
#[derive(Debug, Default)]
struct SendProgress {
    attempts: u32,
    destination: Option<PartitionKey>,
    last_error: Option<TransportError>,
}

/// Outbound send path shared by every producer of one adapter.
///
/// A send picks a partition from the key, waits for a slot on that
/// partition, then for a request pool permit, and produces. Transient
/// failures are retried with backoff until the producer timeout; the
/// timeout covers the slot wait too. Every send returns either a
/// [`Delivery`] or an error; none is dropped.
pub struct Dispatcher {
    transport: SharedTransport,
    pool: RequestPool,
    in_flight: InFlightLimiter,
    partitioner: Partitioner,
    partition_counts: Mutex<HashMap<TopicName, u32>>,
    config: DispatchConfig,
    trace: SharedTraceSink,
    counters: DispatchCounters,
    closed: AtomicBool,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if `max_in_flight_per_destination` is zero.
    #[must_use]
    pub fn new(
        transport: SharedTransport,
        pool: RequestPool,
        config: DispatchConfig,
        trace: SharedTraceSink,
    ) -> Self {
        Self {
            transport,
            pool,
            in_flight: InFlightLimiter::new(config.max_in_flight_per_destination),
            partitioner: Partitioner::new(),
            partition_counts: Mutex::new(HashMap::new()),
            config,
            trace,
            counters: DispatchCounters::default(),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the settings.
    #[must_use]
    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Sends one record.
    ///
    /// Records sharing a key land on the same partition. Blocks while the
    /// destination has `max_in_flight_per_destination` sends outstanding.
    ///
    /// # Errors
    ///
    /// - `TimedOut` when transient failures outlast the producer timeout
    /// - `Fatal` on a fatal transport error, without retrying
    /// - `Shutdown` after [`close`](Self::close)
    pub async fn send(
        &self,
        topic: &TopicName,
        key: Option<Bytes>,
        payload: Bytes,
        headers: Vec<Header>,
    ) -> DispatchResult<Delivery> {
        let mut record = OutboundRecord::new(payload);
        record.key = key;
        record.headers = headers;
        self.send_record(topic, record).await
    }

    /// Encodes `item` and sends it.
    ///
    /// # Errors
    ///
    /// `Encode` if the codec rejects the item, otherwise as [`send`](Self::send).
    pub async fn send_encoded<C: Codec>(
        &self,
        codec: &C,
        topic: &TopicName,
        key: Option<Bytes>,
        item: &C::Item,
        headers: Vec<Header>,
    ) -> DispatchResult<Delivery> {
        let payload = codec.encode(item).map_err(|e| DispatchError::Encode {
            message: e.message,
        })?;
        self.send(topic, key, payload, headers).await
    }

    /// Sends a prepared record.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send).
    pub async fn send_record(
        &self,
        topic: &TopicName,
        record: OutboundRecord,
    ) -> DispatchResult<Delivery> {
        if self.is_closed() {
            return Err(DispatchError::Shutdown);
        }

        let deadline = Instant::now() + self.config.producer_timeout;
        let mut progress = SendProgress::default();
        let outcome = tokio::time::timeout_at(
            deadline,
            self.send_with_retry(topic, &record, &mut progress),
        )
        .await;

        let result = match outcome {
            Ok(result) => result,
            Err(_elapsed) => Err(DispatchError::TimedOut {
                topic: topic.clone(),
                attempts: progress.attempts,
                timeout_ms: u64::try_from(self.config.producer_timeout.as_millis())
                    .unwrap_or(u64::MAX),
                last_error: progress.last_error.take(),
            }),
        };

        match &result {
            Ok(delivery) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                self.trace.record_event(TraceEvent::now(
                    delivery.partition.clone(),
                    Some(delivery.offset),
                    TraceStage::Produced,
                ));
            }
            Err(err) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(topic = %topic, attempts = progress.attempts, error = %err, "send failed");
                let partition = progress
                    .destination
                    .unwrap_or_else(|| PartitionKey::new(topic.clone(), PartitionId::new(0)));
                self.trace
                    .record_event(TraceEvent::now(partition, None, TraceStage::SendFailed));
            }
        }
        result
    }

    async fn send_with_retry(
        &self,
        topic: &TopicName,
        record: &OutboundRecord,
        progress: &mut SendProgress,
    ) -> DispatchResult<Delivery> {
        let mut backoff = ExponentialBackoff::new(self.config.backoff);
        loop {
            if self.is_closed() {
                return Err(DispatchError::Shutdown);
            }
            progress.attempts += 1;
            match self.attempt(topic, record, progress).await {
                Ok(delivery) => return Ok(delivery),
                Err(TransportError::Shutdown) => return Err(DispatchError::Shutdown),
                Err(err) if err.is_transient() => {
                    let delay = backoff.next_delay();
                    debug!(
                        topic = %topic,
                        attempt = progress.attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "transient send failure, retrying"
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    progress.last_error = Some(err);
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(DispatchError::Fatal {
                        topic: topic.clone(),
                        source: err,
                    });
                }
            }
        }
    }

    async fn attempt(
        &self,
        topic: &TopicName,
        record: &OutboundRecord,
        progress: &mut SendProgress,
    ) -> TransportResult<Delivery> {
        let count = self.partition_count(topic).await?;
        let partition = self
            .partitioner
            .partition_for(record.key.as_deref(), count);
        let destination = PartitionKey::new(topic.clone(), partition);
        progress.destination = Some(destination.clone());

        let _slot = self
            .in_flight
            .acquire(&destination)
            .await
            .map_err(|_| TransportError::Shutdown)?;
        let _permit = self
            .pool
            .acquire(RequestClass::Produce)
            .await
            .map_err(|_| TransportError::Shutdown)?;

        let offset = self
            .transport
            .produce(topic, partition, record.clone())
            .await?;
        Ok(Delivery {
            partition: destination,
            offset,
            attempts: progress.attempts,
        })
    }

    /// Partition count of a topic, fetched once and cached.
    async fn partition_count(&self, topic: &TopicName) -> TransportResult<u32> {
        if let Some(count) = self.cached_count(topic) {
            return Ok(count);
        }
        let count = {
            let _permit = self
                .pool
                .acquire(RequestClass::Produce)
                .await
                .map_err(|_| TransportError::Shutdown)?;
            self.transport.partition_count(topic).await?
        };
        if count == 0 {
            return Err(TransportError::UnknownTopic {
                topic: topic.clone(),
            });
        }
        self.partition_counts
            .lock()
            .expect("partition counts lock poisoned")
            .insert(topic.clone(), count);
        Ok(count)
    }

    fn cached_count(&self, topic: &TopicName) -> Option<u32> {
        self.partition_counts
            .lock()
            .expect("partition counts lock poisoned")
            .get(topic)
            .copied()
    }

    /// Sends outstanding to one destination partition.
    #[must_use]
    pub fn in_flight(&self, destination: &PartitionKey) -> usize {
        self.in_flight.in_flight(destination)
    }

    /// Stops accepting sends. Sends waiting for a slot or backing off fail
    /// with `Shutdown`; a produce already on the wire completes.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.in_flight.close();
            debug!("dispatcher closed");
        }
    }

    /// Returns true once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns counters.
    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
        }
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use streamq_transport::{MemoryTraceSink, SimulatedTransport, Utf8Codec};

    fn setup(
        config: DispatchConfig,
    ) -> (SimulatedTransport, MemoryTraceSink, Arc<Dispatcher>) {
        let transport = SimulatedTransport::new(42);
        transport.create_topic("orders", 4);
        let sink = MemoryTraceSink::new();
        let dispatcher = Dispatcher::new(
            Arc::new(transport.clone()),
            RequestPool::new(8),
            config,
            Arc::new(sink.clone()),
        );
        (transport, sink, Arc::new(dispatcher))
    }

    fn orders() -> TopicName {
        TopicName::new("orders")
    }

    #[tokio::test]
    async fn test_send_returns_offset() {
        let (transport, sink, dispatcher) = setup(DispatchConfig::for_testing());

        let delivery = dispatcher
            .send(
                &orders(),
                Some(Bytes::from_static(b"user-1")),
                Bytes::from_static(b"hello"),
                vec![Header::new("h", "1")],
            )
            .await
            .unwrap();

        assert_eq!(delivery.offset, Offset::new(0));
        assert_eq!(delivery.attempts, 1);
        let stored = transport.records(&delivery.partition);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, Bytes::from_static(b"hello"));
        assert_eq!(stored[0].headers, vec![Header::new("h", "1")]);
        assert_eq!(sink.events_for(TraceStage::Produced).len(), 1);
        assert_eq!(dispatcher.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_same_key_keeps_partition_and_order() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());

        let mut partitions = Vec::new();
        for i in 0..5u8 {
            let delivery = dispatcher
                .send(
                    &orders(),
                    Some(Bytes::from_static(b"customer-9")),
                    Bytes::from(vec![i]),
                    Vec::new(),
                )
                .await
                .unwrap();
            partitions.push(delivery.partition);
        }

        assert!(partitions.windows(2).all(|w| w[0] == w[1]));
        let payloads: Vec<u8> = transport
            .records(&partitions[0])
            .iter()
            .map(|r| r.payload[0])
            .collect();
        assert_eq!(payloads, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_keyless_sends_rotate() {
        let (_transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());

        let mut seen = Vec::new();
        for _ in 0..4 {
            let delivery = dispatcher
                .send(&orders(), None, Bytes::from_static(b"x"), Vec::new())
                .await
                .unwrap();
            seen.push(delivery.partition.partition.get());
        }
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());
        transport.fault_config().force_produce_fail = true;

        let delivery = dispatcher
            .send(&orders(), None, Bytes::from_static(b"x"), Vec::new())
            .await
            .unwrap();

        assert_eq!(delivery.attempts, 2);
        assert_eq!(transport.produce_count(), 2);
        assert_eq!(dispatcher.stats().retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_fails_after_timeout() {
        let (transport, sink, dispatcher) = setup(DispatchConfig::for_testing());
        // Metadata is cached first so the failures come from produce.
        dispatcher
            .send(&orders(), None, Bytes::from_static(b"warm"), Vec::new())
            .await
            .unwrap();
        transport.fault_config().unreachable = true;

        let started = Instant::now();
        let err = dispatcher
            .send(&orders(), None, Bytes::from_static(b"x"), Vec::new())
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        match err {
            DispatchError::TimedOut {
                attempts,
                timeout_ms,
                last_error,
                ..
            } => {
                assert!(attempts > 1, "transient failures are retried");
                assert_eq!(timeout_ms, 200);
                assert!(last_error.is_some_and(|e| e.is_transient()));
            }
            other => panic!("expected TimedOut, got {other:?}"),
        }
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
        assert_eq!(sink.events_for(TraceStage::SendFailed).len(), 1);
        assert_eq!(dispatcher.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_not_retried() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());
        transport.fault_config().fatal_error = Some(TransportError::Authorization {
            message: "denied".to_string(),
        });

        let err = dispatcher
            .send(&orders(), None, Bytes::from_static(b"x"), Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Fatal {
                source: TransportError::Authorization { .. },
                ..
            }
        ));
        assert_eq!(transport.produce_count(), 0, "metadata lookup failed first");
    }

    #[tokio::test]
    async fn test_unknown_topic_is_fatal() {
        let (_transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());

        let err = dispatcher
            .send(&TopicName::new("missing"), None, Bytes::from_static(b"x"), Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Fatal {
                source: TransportError::UnknownTopic { .. },
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_bound_blocks_caller() {
        let (transport, _sink, dispatcher) = setup(
            DispatchConfig::for_testing().with_producer_timeout(Duration::from_secs(5)),
        );
        dispatcher
            .send(&orders(), Some(Bytes::from_static(b"k")), Bytes::from_static(b"warm"), Vec::new())
            .await
            .unwrap();
        transport.fault_config().request_latency = Duration::from_millis(50);

        let started = Instant::now();
        let sends: Vec<_> = (0..3)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                tokio::spawn(async move {
                    dispatcher
                        .send(&orders(), Some(Bytes::from_static(b"k")), Bytes::from_static(b"v"), Vec::new())
                        .await
                })
            })
            .collect();
        for send in sends {
            send.await.unwrap().unwrap();
        }

        // One slot per destination: the three produces run one after another.
        assert!(started.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_wait_counts_against_timeout() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());
        dispatcher
            .send(&orders(), Some(Bytes::from_static(b"k")), Bytes::from_static(b"warm"), Vec::new())
            .await
            .unwrap();
        transport.fault_config().request_latency = Duration::from_millis(150);

        let first = {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                dispatcher
                    .send(&orders(), Some(Bytes::from_static(b"k")), Bytes::from_static(b"a"), Vec::new())
                    .await
            })
        };
        tokio::task::yield_now().await;
        let second = dispatcher
            .send(&orders(), Some(Bytes::from_static(b"k")), Bytes::from_static(b"b"), Vec::new())
            .await;

        assert!(first.await.unwrap().is_ok());
        assert!(matches!(second, Err(DispatchError::TimedOut { .. })));
    }

    #[tokio::test]
    async fn test_closed_dispatcher_rejects_sends() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());
        dispatcher.close();

        let err = dispatcher
            .send(&orders(), None, Bytes::from_static(b"x"), Vec::new())
            .await
            .unwrap_err();

        assert_eq!(err, DispatchError::Shutdown);
        assert_eq!(transport.produce_count(), 0);
    }

    #[tokio::test]
    async fn test_send_encoded() {
        let (transport, _sink, dispatcher) = setup(DispatchConfig::for_testing());

        let delivery = dispatcher
            .send_encoded(&Utf8Codec, &orders(), None, &"hi".to_string(), Vec::new())
            .await
            .unwrap();

        let stored = transport.records(&delivery.partition);
        assert_eq!(stored[0].payload, Bytes::from_static(b"hi"));
        assert_eq!(
            delivery.partition,
            PartitionKey::new("orders", PartitionId::new(0))
        );
    }
}
