//! The queue adapter: partition ownership, receivers, sends and shutdown.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::join_all;
use streamq_cache::{CacheConfig, CacheRegistry, CacheResult};
use streamq_checkpoint::{
    CheckpointConfig, CheckpointManager, SharedCheckpointStore, TransportCheckpointStore,
};
use streamq_config::{ClientConfigs, StreamOptions};
use streamq_core::{
    Clock, Header, Offset, PartitionKey, SequenceToken, SubscriptionId, TopicName,
};
use streamq_dispatch::{DispatchConfig, DispatchError, Delivery, Dispatcher};
use streamq_flow::RequestPool;
use streamq_poller::{
    PartitionPoller, PollerConfig, PollerContext, PollerExit, PollerHandle, StartPosition,
    SupervisorEvent,
};
use streamq_transport::{
    Codec, LoggingTraceSink, NoopTraceSink, SharedTraceSink, SharedTransport, TraceEvent,
    TraceStage,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::deps::AdapterDeps;
use crate::error::{AdapterError, AdapterResult};
use crate::maintenance::{maintenance_pass, MaintenanceHandle, MaintenanceReport};
use crate::receiver::QueueReceiver;

// -----------------------------------------------------------------------------
// Shared state
// -----------------------------------------------------------------------------

/// State shared by the adapter and its receivers.
pub(crate) struct Shared<C: Codec> {
    pub(crate) options: StreamOptions,
    pub(crate) transport: SharedTransport,
    pub(crate) codec: Arc<C>,
    pub(crate) pool: RequestPool,
    pub(crate) cache: Arc<CacheRegistry<C::Item>>,
    pub(crate) checkpoints: Arc<CheckpointManager>,
    pub(crate) trace: SharedTraceSink,
    pub(crate) clock: Arc<dyn Clock>,
    closed: AtomicBool,
}

impl<C: Codec> Shared<C> {
    pub(crate) fn ensure_open(&self) -> AdapterResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(AdapterError::Shutdown)
        } else {
            Ok(())
        }
    }

    /// Token a new or reset cursor continues after: the committed
    /// checkpoint while it is still inside the cache, else `None`.
    pub(crate) fn start_token(&self, partition: &PartitionKey) -> CacheResult<Option<SequenceToken>> {
        let low_water = self.cache.stats(partition)?.low_water;
        Ok(self
            .checkpoints
            .committed(partition)
            .filter(|committed| committed.next() >= low_water)
            .map(SequenceToken::from_offset))
    }

    /// Reports the cache's current safe point to the checkpoint manager. The
    /// report carries the cache's version, so a report that lands after a
    /// newer one is dropped.
    pub(crate) fn sync_safe_point(&self, partition: &PartitionKey) {
        if let Ok(safe_point) = self.cache.safe_point(partition) {
            self.checkpoints.update_safe_point(partition, safe_point);
        }
    }

    pub(crate) fn track(&self, partition: &PartitionKey, offset: Option<Offset>, stage: TraceStage) {
        self.trace
            .record_event(TraceEvent::now(partition.clone(), offset, stage));
    }

    fn poller_context(&self) -> PollerContext<C> {
        PollerContext {
            transport: Arc::clone(&self.transport),
            codec: Arc::clone(&self.codec),
            cache: Arc::clone(&self.cache),
            pool: self.pool.clone(),
            trace: Arc::clone(&self.trace),
            clock: Arc::clone(&self.clock),
        }
    }
}

/// Outcome of [`QueueAdapter::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Pollers that stopped on their own.
    pub stopped: usize,
    /// Pollers aborted after the grace period or already failed.
    pub aborted: usize,
    /// Partitions whose final checkpoint was written.
    pub flushed: usize,
}

// -----------------------------------------------------------------------------
// Queue Adapter
// -----------------------------------------------------------------------------

/// Owns the pollers, caches and checkpoints of the partitions assigned to
/// this process, and the outbound send path.
///
/// The host assigns and revokes partitions as its rebalance protocol
/// decides, reads through [`QueueReceiver`]s and sends through
/// [`send`](Self::send). Fatal poller and dispatch failures are collected
/// as [`SupervisorEvent`]s.
pub struct QueueAdapter<C: Codec> {
    shared: Arc<Shared<C>>,
    client_configs: ClientConfigs,
    dispatcher: Arc<Dispatcher>,
    pollers: Mutex<HashMap<PartitionKey, PollerHandle>>,
    supervisor_tx: mpsc::UnboundedSender<SupervisorEvent>,
    supervisor_rx: Mutex<mpsc::UnboundedReceiver<SupervisorEvent>>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
    next_subscription: AtomicU64,
}

impl<C: Codec> std::fmt::Debug for QueueAdapter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueAdapter")
            .field("group", &self.shared.options.consumer_group_id)
            .field("assigned", &self.assigned())
            .finish_non_exhaustive()
    }
}

impl<C: Codec> QueueAdapter<C> {
    /// Validates `options`, builds every component and starts the commit
    /// and eviction cadence. No partition is assigned yet.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the options are invalid.
    pub fn start(options: StreamOptions, deps: AdapterDeps<C>) -> AdapterResult<Self> {
        options.validate()?;
        let client_configs = ClientConfigs::from_options(&options);

        let trace: SharedTraceSink = if options.message_tracking_enabled {
            deps.trace.unwrap_or_else(|| Arc::new(LoggingTraceSink))
        } else {
            Arc::new(NoopTraceSink)
        };
        let pool = RequestPool::new(options.max_concurrent_requests);
        let store: SharedCheckpointStore = deps.checkpoint_store.unwrap_or_else(|| {
            Arc::new(TransportCheckpointStore::new(
                Arc::clone(&deps.transport),
                options.consumer_group_id.clone(),
                pool.clone(),
            ))
        });
        let cache = Arc::new(CacheRegistry::new(CacheConfig::from_options(&options)));
        let checkpoints = Arc::new(CheckpointManager::new(
            store,
            CheckpointConfig::from_options(&options),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&deps.transport),
            pool.clone(),
            DispatchConfig::from_options(&options),
            Arc::clone(&trace),
        ));

        let period = options
            .checkpoint_interval()
            .min(options.poll_buffer_timeout())
            .max(Duration::from_millis(1));
        let maintenance = MaintenanceHandle::spawn(
            Arc::clone(&cache),
            Arc::clone(&checkpoints),
            Arc::clone(&deps.clock),
            period,
        );
        let (supervisor_tx, supervisor_rx) = mpsc::unbounded_channel();

        info!(
            group = %options.consumer_group_id,
            brokers = %options.broker_list.join(","),
            topics = options.topics.len(),
            consume_mode = ?options.consume_mode,
            tracking = options.message_tracking_enabled,
            "Queue adapter started"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                options,
                transport: deps.transport,
                codec: deps.codec,
                pool,
                cache,
                checkpoints,
                trace,
                clock: deps.clock,
                closed: AtomicBool::new(false),
            }),
            client_configs,
            dispatcher,
            pollers: Mutex::new(HashMap::new()),
            supervisor_tx,
            supervisor_rx: Mutex::new(supervisor_rx),
            maintenance: Mutex::new(Some(maintenance)),
            next_subscription: AtomicU64::new(1),
        })
    }

    /// Validated options.
    #[must_use]
    pub fn options(&self) -> &StreamOptions {
        &self.shared.options
    }

    /// Native client configs translated at startup.
    #[must_use]
    pub const fn client_configs(&self) -> &ClientConfigs {
        &self.client_configs
    }

    /// Cache registry of owned partitions.
    #[must_use]
    pub fn cache(&self) -> &Arc<CacheRegistry<C::Item>> {
        &self.shared.cache
    }

    /// Checkpoint manager.
    #[must_use]
    pub fn checkpoints(&self) -> &Arc<CheckpointManager> {
        &self.shared.checkpoints
    }

    /// Send path.
    #[must_use]
    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Returns true after [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Partition ownership
    // -------------------------------------------------------------------------

    /// Takes ownership of a partition: resolves the start position from the
    /// consume mode and the last checkpoint, creates the partition's cache
    /// and spawns its poller.
    ///
    /// # Errors
    ///
    /// `UnknownTopic`, `AlreadyAssigned`, `Shutdown`, or the poller's error
    /// while resolving the start position.
    pub async fn assign(&self, partition: PartitionKey) -> AdapterResult<StartPosition> {
        self.shared.ensure_open()?;
        let topic = self
            .shared
            .options
            .topic(partition.topic.as_str())
            .ok_or_else(|| AdapterError::UnknownTopic {
                partition: partition.clone(),
            })?;
        if self.is_assigned(&partition) {
            return Err(AdapterError::AlreadyAssigned { partition });
        }

        let config = PollerConfig::from_options(&self.shared.options, Some(topic));
        let mut poller =
            PartitionPoller::new(partition.clone(), config, self.shared.poller_context());
        let position = poller
            .resolve_start(self.shared.options.consume_mode, &self.shared.checkpoints)
            .await?;

        let mut pollers = self.pollers.lock().expect("pollers lock poisoned");
        if pollers.contains_key(&partition) {
            return Err(AdapterError::AlreadyAssigned { partition });
        }
        poller.start(position.offset);
        pollers.insert(
            partition.clone(),
            PollerHandle::spawn(poller, self.supervisor_tx.clone()),
        );
        info!(
            partition = %partition,
            start = position.offset.get(),
            reason = ?position.reason,
            "Partition assigned"
        );
        Ok(position)
    }

    /// Gives up a partition: stops its poller within the shutdown grace
    /// period (the in-flight fetch completes), flushes a final checkpoint
    /// for the safe point, then drops the partition's cache and state.
    ///
    /// # Errors
    ///
    /// `NotAssigned` if the partition is not owned.
    pub async fn revoke(&self, partition: &PartitionKey) -> AdapterResult<PollerExit> {
        let handle = self
            .pollers
            .lock()
            .expect("pollers lock poisoned")
            .remove(partition)
            .ok_or_else(|| AdapterError::NotAssigned {
                partition: partition.clone(),
            })?;

        let exit = handle.stop(self.shared.options.shutdown_grace()).await;
        self.release(partition).await;
        info!(partition = %partition, ?exit, "Partition revoked");
        Ok(exit)
    }

    /// Flushes, then forgets a stopped partition. Returns true if a final
    /// checkpoint was written.
    ///
    /// The flush writes the safe point last reported by the cache. It is not
    /// re-read here: once every reader has left, the cache has no cursor to
    /// derive it from.
    async fn release(&self, partition: &PartitionKey) -> bool {
        let now_us = self.shared.clock.now_us();
        let flushed = match self.shared.checkpoints.flush(partition, now_us).await {
            Ok(Some(checkpoint)) => {
                self.shared
                    .track(partition, Some(checkpoint.offset), TraceStage::Committed);
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(
                    partition = %partition,
                    error = %err,
                    "Final checkpoint failed, uncommitted records will be redelivered"
                );
                false
            }
        };
        self.shared.checkpoints.release(partition);
        self.shared.cache.revoke(partition);
        flushed
    }

    /// Returns true if the partition is owned.
    #[must_use]
    pub fn is_assigned(&self, partition: &PartitionKey) -> bool {
        self.pollers
            .lock()
            .expect("pollers lock poisoned")
            .contains_key(partition)
    }

    /// Owned partitions, sorted.
    #[must_use]
    pub fn assigned(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .pollers
            .lock()
            .expect("pollers lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    // -------------------------------------------------------------------------
    // Host delivery contract
    // -------------------------------------------------------------------------

    /// Creates a receiver for a partition. It reads nothing until
    /// [`QueueReceiver::initialize`].
    ///
    /// # Errors
    ///
    /// `Shutdown` after shutdown.
    pub fn create_receiver(&self, partition: PartitionKey) -> AdapterResult<QueueReceiver<C>> {
        self.shared.ensure_open()?;
        let subscription =
            SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        Ok(QueueReceiver::new(
            partition,
            subscription,
            Arc::clone(&self.shared),
        ))
    }

    /// Sends a record. Fatal transport failures are also reported as a
    /// [`SupervisorEvent::DispatchFailed`].
    ///
    /// # Errors
    ///
    /// The dispatcher's error; see [`Dispatcher::send`].
    pub async fn send(
        &self,
        topic: &TopicName,
        key: Option<Bytes>,
        payload: Bytes,
        headers: Vec<Header>,
    ) -> AdapterResult<Delivery> {
        self.shared.ensure_open()?;
        match self.dispatcher.send(topic, key, payload, headers).await {
            Ok(delivery) => Ok(delivery),
            Err(err) => {
                if let DispatchError::Fatal { topic, source } = &err {
                    let _ = self.supervisor_tx.send(SupervisorEvent::DispatchFailed {
                        topic: topic.clone(),
                        error: source.clone(),
                    });
                }
                Err(err.into())
            }
        }
    }

    /// Encodes `item` with the adapter's codec and sends it.
    ///
    /// # Errors
    ///
    /// As [`send`](Self::send), plus encode failures.
    pub async fn send_item(
        &self,
        topic: &TopicName,
        key: Option<Bytes>,
        item: &C::Item,
        headers: Vec<Header>,
    ) -> AdapterResult<Delivery> {
        let payload = self.shared.codec.encode(item).map_err(|e| {
            AdapterError::Dispatch(DispatchError::Encode { message: e.message })
        })?;
        self.send(topic, key, payload, headers).await
    }

    /// Drains fatal failures reported since the last call.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn take_supervisor_events(&self) -> Vec<SupervisorEvent> {
        let mut rx = self.supervisor_rx.lock().expect("supervisor lock poisoned");
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Runs one commit and eviction pass now, outside the cadence.
    pub async fn maintain(&self) -> MaintenanceReport {
        maintenance_pass(
            &self.shared.cache,
            &self.shared.checkpoints,
            self.shared.clock.now_us(),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Shutdown
    // -------------------------------------------------------------------------

    /// Stops every poller and the dispatcher, flushes final checkpoints and
    /// releases every partition, all within `shutdown_grace_ms`. Pollers
    /// still running at the deadline are aborted; sends in flight fail with
    /// `Shutdown` instead of retrying. Calling it again is a no-op.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return ShutdownReport::default();
        }
        let grace = self.shared.options.shutdown_grace();
        let deadline = tokio::time::Instant::now() + grace;
        info!(grace_ms = self.shared.options.shutdown_grace_ms, "Shutting down queue adapter");

        self.dispatcher.close();
        let maintenance = self.maintenance.lock().expect("maintenance lock poisoned").take();
        if let Some(maintenance) = maintenance {
            maintenance.stop(grace).await;
        }

        let handles: Vec<PollerHandle> = self
            .pollers
            .lock()
            .expect("pollers lock poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        let partitions: Vec<PartitionKey> =
            handles.iter().map(|h| h.partition().clone()).collect();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let exits = join_all(handles.into_iter().map(|h| h.stop(remaining))).await;

        let mut report = ShutdownReport::default();
        for exit in &exits {
            match exit {
                PollerExit::Stopped => report.stopped += 1,
                PollerExit::Failed(_) | PollerExit::Aborted => report.aborted += 1,
            }
        }

        let flushes = join_all(partitions.iter().map(|p| self.release(p)));
        match tokio::time::timeout_at(deadline, flushes).await {
            Ok(flushed) => report.flushed = flushed.into_iter().filter(|f| *f).count(),
            Err(_) => warn!("Final checkpoints did not complete within the grace period"),
        }

        self.shared.pool.close();
        info!(
            stopped = report.stopped,
            aborted = report.aborted,
            flushed = report.flushed,
            "Queue adapter shut down"
        );
        report
    }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
