//! Partition poller: fetches one partition, decodes, feeds the cache.

use std::sync::Arc;
use std::time::Duration;

use streamq_cache::{CacheRegistry, EvictionOutcome};
use streamq_checkpoint::CheckpointManager;
use streamq_config::{ConsumeMode, StreamOptions, TopicConfig};
use streamq_core::{Clock, LogEntry, Offset, PartitionKey};
use streamq_flow::{BackoffConfig, RequestClass, RequestPool};
use streamq_transport::{Codec, SharedTraceSink, SharedTransport, TraceEvent, TraceStage};
use tracing::{debug, info, warn};

use crate::error::{PollerError, PollerResult};
use crate::start::{resolve_start_position, StartPosition};

/// Poller settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Longest a fetch waits for new records.
    pub poll_timeout: Duration,
    /// Largest batch fetched at once.
    pub max_fetch_records: usize,
    /// Retry delays for transient fetch failures.
    pub backoff: BackoffConfig,
    /// Contract name handed to the codec (external topics only).
    pub contract: Option<String>,
}

impl PollerConfig {
    /// Derives the settings for one topic from adapter options.
    #[must_use]
    pub fn from_options(options: &StreamOptions, topic: Option<&TopicConfig>) -> Self {
        Self {
            poll_timeout: options.poll_timeout(),
            max_fetch_records: options.max_fetch_records,
            backoff: BackoffConfig::new(options.backoff_min(), options.backoff_max()),
            contract: topic
                .filter(|t| t.is_external)
                .and_then(|t| t.external_contract.clone()),
        }
    }

    /// Short timeouts, no jitter.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            poll_timeout: Duration::from_millis(20),
            max_fetch_records: 100,
            backoff: BackoffConfig::for_testing(),
            contract: None,
        }
    }
}

/// Entries one poll appended to the cache.
#[derive(Debug)]
pub struct PolledBatch<T> {
    /// Decoded entries, in offset order.
    pub entries: Vec<Arc<LogEntry<T>>>,
    /// Records skipped because they failed to decode.
    pub decode_failures: usize,
    /// Evictions triggered by the appends.
    pub evicted: EvictionOutcome,
    /// Next offset the poller fetches.
    pub next_offset: Offset,
}

impl<T> PolledBatch<T> {
    /// Returns true if nothing was appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of appended entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared collaborators of every poller.
pub struct PollerContext<C: Codec> {
    /// Transport client.
    pub transport: SharedTransport,
    /// Payload codec.
    pub codec: Arc<C>,
    /// Cache fed by the poller.
    pub cache: Arc<CacheRegistry<C::Item>>,
    /// Shared request pool.
    pub pool: RequestPool,
    /// Message tracking.
    pub trace: SharedTraceSink,
    /// Time source for enqueue timestamps.
    pub clock: Arc<dyn Clock>,
}

impl<C: Codec> Clone for PollerContext<C> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            cache: Arc::clone(&self.cache),
            pool: self.pool.clone(),
            trace: Arc::clone(&self.trace),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Owns the transport subscription of one partition.
///
/// `start` positions it and creates the partition's cache, `poll` fetches
/// one batch, `stop` releases the position. Driven by [`crate::run_poller`].
pub struct PartitionPoller<C: Codec> {
    partition: PartitionKey,
    config: PollerConfig,
    ctx: PollerContext<C>,
    /// Next offset to fetch; `None` until started.
    position: Option<Offset>,
}

impl<C: Codec> std::fmt::Debug for PartitionPoller<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionPoller")
            .field("partition", &self.partition)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}

impl<C: Codec> PartitionPoller<C> {
    /// Creates a stopped poller.
    #[must_use]
    pub fn new(partition: PartitionKey, config: PollerConfig, ctx: PollerContext<C>) -> Self {
        Self {
            partition,
            config,
            ctx,
            position: None,
        }
    }

    /// Partition polled.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Settings.
    #[must_use]
    pub const fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Next offset to fetch, `None` while stopped.
    #[must_use]
    pub const fn position(&self) -> Option<Offset> {
        self.position
    }

    /// Resolves the start position from the consume mode, the last committed
    /// checkpoint and the transport's watermarks.
    ///
    /// # Errors
    ///
    /// Returns checkpoint or transport errors.
    pub async fn resolve_start(
        &self,
        mode: ConsumeMode,
        checkpoints: &CheckpointManager,
    ) -> PollerResult<StartPosition> {
        let checkpoint = checkpoints.load_last(&self.partition).await?;
        let watermarks = {
            let _permit = self
                .ctx
                .pool
                .acquire(RequestClass::Fetch)
                .await
                .map_err(|_| PollerError::Shutdown)?;
            self.ctx.transport.watermarks(&self.partition).await?
        };
        Ok(resolve_start_position(
            &self.partition,
            mode,
            checkpoint,
            watermarks,
        ))
    }

    /// Positions the poller at `start` and creates the partition's cache.
    pub fn start(&mut self, start: Offset) {
        self.ctx.cache.assign(self.partition.clone(), start);
        self.position = Some(start);
        info!(partition = %self.partition, start = start.get(), "Poller started");
    }

    /// Fetches one batch (waiting up to the poll timeout), decodes it and
    /// appends it to the cache.
    ///
    /// A record that fails to decode is skipped and tracked; the rest of the
    /// batch still goes through.
    ///
    /// # Errors
    ///
    /// Returns `NotStarted` before `start`, transport errors from the fetch,
    /// and cache errors (the partition was revoked).
    pub async fn poll(&mut self) -> PollerResult<PolledBatch<C::Item>> {
        let from = self.position.ok_or_else(|| PollerError::NotStarted {
            partition: self.partition.clone(),
        })?;

        let records = {
            let _permit = self
                .ctx
                .pool
                .acquire(RequestClass::Fetch)
                .await
                .map_err(|_| PollerError::Shutdown)?;
            self.ctx
                .transport
                .fetch(
                    &self.partition,
                    from,
                    self.config.max_fetch_records,
                    self.config.poll_timeout,
                )
                .await?
        };

        let mut batch = PolledBatch {
            entries: Vec::with_capacity(records.len()),
            decode_failures: 0,
            evicted: EvictionOutcome::default(),
            next_offset: from,
        };
        let contract = self.config.contract.as_deref();

        for raw in records {
            let offset = raw.offset;
            if offset < batch.next_offset {
                continue;
            }
            match self.ctx.codec.decode(&raw.payload, contract) {
                Ok(item) => {
                    let now_us = self.ctx.clock.now_us();
                    let entry = Arc::new(LogEntry::from_raw(
                        self.partition.clone(),
                        raw,
                        item,
                        now_us,
                    ));
                    batch.evicted.merge(self.ctx.cache.append(Arc::clone(&entry))?);
                    self.track(offset, TraceStage::Enqueued);
                    batch.entries.push(entry);
                }
                Err(err) => {
                    warn!(
                        partition = %self.partition,
                        offset = offset.get(),
                        error = %err,
                        "Skipping record that failed to decode"
                    );
                    self.track(offset, TraceStage::DecodeFailed);
                    self.ctx.cache.skip_to(&self.partition, offset.next())?;
                    batch.decode_failures += 1;
                }
            }
            batch.next_offset = offset.next();
            self.position = Some(batch.next_offset);
        }

        if !batch.is_empty() || batch.decode_failures > 0 {
            debug!(
                partition = %self.partition,
                appended = batch.len(),
                decode_failures = batch.decode_failures,
                next_offset = batch.next_offset.get(),
                "Polled batch"
            );
        }
        Ok(batch)
    }

    /// Stops polling. The cache is left for the owner to revoke.
    pub fn stop(&mut self) {
        if let Some(position) = self.position.take() {
            info!(partition = %self.partition, position = position.get(), "Poller stopped");
        }
    }

    fn track(&self, offset: Offset, stage: TraceStage) {
        self.ctx.trace.record_event(TraceEvent::now(
            self.partition.clone(),
            Some(offset),
            stage,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use streamq_cache::CacheConfig;
    use streamq_checkpoint::{Checkpoint, CheckpointConfig, SimulatedCheckpointStore};
    use streamq_core::{ManualClock, OutboundRecord, PartitionId, SubscriptionId};
    use streamq_transport::{MemoryTraceSink, SimulatedTransport, TransportError, Utf8Codec};

    fn key() -> PartitionKey {
        PartitionKey::new("orders", PartitionId::new(0))
    }

    struct Fixture {
        transport: SimulatedTransport,
        trace: MemoryTraceSink,
        cache: Arc<CacheRegistry<String>>,
        poller: PartitionPoller<Utf8Codec>,
    }

    fn fixture() -> Fixture {
        let transport = SimulatedTransport::new(42);
        transport.create_topic("orders", 1);
        let trace = MemoryTraceSink::new();
        let cache = Arc::new(CacheRegistry::new(CacheConfig::for_testing().with_max_entries(100)));
        let ctx = PollerContext {
            transport: Arc::new(transport.clone()),
            codec: Arc::new(Utf8Codec),
            cache: Arc::clone(&cache),
            pool: RequestPool::new(4),
            trace: Arc::new(trace.clone()),
            clock: Arc::new(ManualClock::new(0)),
        };
        let poller = PartitionPoller::new(key(), PollerConfig::for_testing(), ctx);
        Fixture {
            transport,
            trace,
            cache,
            poller,
        }
    }

    fn produce(transport: &SimulatedTransport, payload: &'static [u8]) {
        transport
            .append(&key(), OutboundRecord::new(Bytes::from_static(payload)))
            .unwrap();
    }

    #[tokio::test]
    async fn test_poll_before_start() {
        let mut fx = fixture();
        assert!(matches!(
            fx.poller.poll().await,
            Err(PollerError::NotStarted { .. })
        ));
    }

    #[tokio::test]
    async fn test_poll_feeds_cache() {
        let mut fx = fixture();
        for payload in [b"a", b"b", b"c"] {
            produce(&fx.transport, payload);
        }
        fx.poller.start(Offset::new(0));
        let handle = fx
            .cache
            .register_cursor(SubscriptionId::new(1), &key(), None, 0)
            .unwrap();

        let batch = fx.poller.poll().await.unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.next_offset, Offset::new(3));
        assert_eq!(fx.poller.position(), Some(Offset::new(3)));

        let items: Vec<String> = fx
            .cache
            .pull(&handle, 10)
            .unwrap()
            .iter()
            .map(|e| e.item.clone())
            .collect();
        assert_eq!(items, vec!["a", "b", "c"]);
        assert_eq!(fx.trace.events_for(TraceStage::Enqueued).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_poll_waits_for_timeout() {
        let mut fx = fixture();
        fx.poller.start(Offset::new(0));
        let started = tokio::time::Instant::now();
        let batch = fx.poller.poll().await.unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= PollerConfig::for_testing().poll_timeout);
    }

    #[tokio::test]
    async fn test_decode_failure_isolated() {
        let mut fx = fixture();
        produce(&fx.transport, b"ok-0");
        produce(&fx.transport, b"\xff\xfe");
        produce(&fx.transport, b"ok-2");
        fx.poller.start(Offset::new(0));

        let batch = fx.poller.poll().await.unwrap();
        assert_eq!(batch.decode_failures, 1);
        let offsets: Vec<u64> = batch.entries.iter().map(|e| e.offset.get()).collect();
        assert_eq!(offsets, vec![0, 2]);

        let cache = fx.cache.partition(&key()).unwrap();
        let cache = cache.lock().unwrap();
        assert!(cache.window().is_skipped(Offset::new(1)));
        assert!(cache.window().is_contiguous());
        drop(cache);

        let failed = fx.trace.events_for(TraceStage::DecodeFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].offset, Some(Offset::new(1)));
    }

    #[tokio::test]
    async fn test_transport_errors_surface() {
        let mut fx = fixture();
        fx.poller.start(Offset::new(0));
        fx.transport.fault_config().force_fetch_fail = true;
        let err = fx.poller.poll().await.unwrap_err();
        assert!(err.is_transient());

        fx.transport.fault_config().fatal_error = Some(TransportError::Authorization {
            message: "denied".to_string(),
        });
        let err = fx.poller.poll().await.unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_resolve_start_from_checkpoint() {
        let fx = fixture();
        for _ in 0..60 {
            produce(&fx.transport, b"x");
        }
        let store = SimulatedCheckpointStore::new(1);
        store.seed_checkpoint(Checkpoint::new(key(), Offset::new(49), 0));
        let checkpoints = CheckpointManager::new(Arc::new(store), CheckpointConfig::for_testing());

        let start = fx
            .poller
            .resolve_start(ConsumeMode::LastCommittedMessage, &checkpoints)
            .await
            .unwrap();
        assert_eq!(start.offset, Offset::new(50));

        let start = fx
            .poller
            .resolve_start(ConsumeMode::StreamEnd, &checkpoints)
            .await
            .unwrap();
        assert_eq!(start.offset, Offset::new(60));
    }
}
