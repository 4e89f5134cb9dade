//! Host-facing receiver of one partition.

use std::sync::Arc;

use streamq_cache::{CacheError, CursorHandle};
use streamq_checkpoint::Checkpoint;
use streamq_core::{LogEntry, PartitionKey, SequenceToken, SubscriptionId};
use streamq_transport::{Codec, TraceStage};
use tracing::{debug, info, warn};

use crate::adapter::Shared;
use crate::error::{AdapterError, AdapterResult};

/// One reader of one partition.
///
/// Lifecycle: [`initialize`](Self::initialize) registers a cursor after the
/// partition's committed checkpoint, [`pull_messages`](Self::pull_messages)
/// hands out ordered batches, [`acknowledge`](Self::acknowledge) marks them
/// processed, [`shutdown`](Self::shutdown) (or drop) removes the cursor.
pub struct QueueReceiver<C: Codec> {
    partition: PartitionKey,
    subscription: SubscriptionId,
    shared: Arc<Shared<C>>,
    handle: Option<CursorHandle>,
}

impl<C: Codec> std::fmt::Debug for QueueReceiver<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueReceiver")
            .field("partition", &self.partition)
            .field("subscription", &self.subscription)
            .field("initialized", &self.handle.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: Codec> QueueReceiver<C> {
    pub(crate) fn new(
        partition: PartitionKey,
        subscription: SubscriptionId,
        shared: Arc<Shared<C>>,
    ) -> Self {
        Self {
            partition,
            subscription,
            shared,
            handle: None,
        }
    }

    /// Partition read.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Subscription id of this reader.
    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Returns true between `initialize` and `shutdown`.
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.handle.is_some()
    }

    fn handle(&self) -> AdapterResult<&CursorHandle> {
        self.handle.as_ref().ok_or_else(|| AdapterError::NotInitialized {
            partition: self.partition.clone(),
        })
    }

    /// Registers the cursor. It starts just after the committed checkpoint,
    /// or at the oldest cached entry when there is no checkpoint or the
    /// checkpoint is older than the cache. Calling it twice is a no-op.
    ///
    /// # Errors
    ///
    /// `NotAssigned` if this adapter does not own the partition, `Shutdown`
    /// after adapter shutdown.
    pub fn initialize(&mut self) -> AdapterResult<()> {
        if self.handle.is_some() {
            return Ok(());
        }
        self.shared.ensure_open()?;
        if !self.shared.cache.is_assigned(&self.partition) {
            return Err(AdapterError::NotAssigned {
                partition: self.partition.clone(),
            });
        }

        let start = self.shared.start_token(&self.partition)?;
        let handle = self.shared.cache.register_cursor(
            self.subscription,
            &self.partition,
            start,
            self.shared.clock.now_us(),
        )?;
        self.shared.sync_safe_point(&self.partition);
        info!(
            partition = %self.partition,
            subscription = %self.subscription,
            after_checkpoint = ?start.map(|t| t.offset().get()),
            "Receiver initialized"
        );
        self.handle = Some(handle);
        Ok(())
    }

    /// Returns up to `max_count` entries (capped at `max_pull_batch`) in
    /// offset order. Never waits: an empty batch means nothing new yet.
    ///
    /// # Errors
    ///
    /// A cache miss ([`AdapterError::is_cache_miss`]) when this reader fell
    /// behind the cache window; call [`reset`](Self::reset) to continue.
    /// `NotInitialized` before `initialize`.
    pub fn pull_messages(&mut self, max_count: usize) -> AdapterResult<Vec<Arc<LogEntry<C::Item>>>> {
        let handle = self.handle()?;
        let max = max_count.min(self.shared.options.max_pull_batch);
        if max == 0 {
            return Ok(Vec::new());
        }

        match self.shared.cache.pull(handle, max) {
            Ok(entries) => {
                for entry in &entries {
                    self.shared
                        .track(&self.partition, Some(entry.offset), TraceStage::Delivered);
                }
                Ok(entries)
            }
            Err(err) => {
                if err.is_cache_miss() {
                    warn!(
                        partition = %self.partition,
                        subscription = %self.subscription,
                        error = %err,
                        "Receiver fell behind the cache window"
                    );
                }
                Err(err.into())
            }
        }
    }

    /// Acknowledges everything up to and including `token`.
    ///
    /// Returns the checkpoint written if this acknowledgement completed the
    /// commit cadence.
    ///
    /// # Errors
    ///
    /// `AckBeyondDelivered` for a token not pulled yet, `NotInitialized`
    /// before `initialize`.
    pub async fn acknowledge(&self, token: SequenceToken) -> AdapterResult<Option<Checkpoint>> {
        let handle = self.handle()?;
        // Versioned: if a cursor change is reported first, this one is dropped.
        let safe_point = self.shared.cache.acknowledge(handle, token)?;
        self.shared
            .track(&self.partition, Some(token.offset()), TraceStage::Acknowledged);

        let checkpoint = self
            .shared
            .checkpoints
            .on_acknowledge(&self.partition, safe_point, self.shared.clock.now_us())
            .await;
        if let Some(checkpoint) = &checkpoint {
            self.shared
                .track(&self.partition, Some(checkpoint.offset), TraceStage::Committed);
        }
        Ok(checkpoint)
    }

    /// Moves the cursor back to a recoverable position after a cache miss,
    /// chosen as in [`initialize`](Self::initialize). Entries between the
    /// old and new position may be redelivered or skipped.
    ///
    /// # Errors
    ///
    /// `NotInitialized` before `initialize`; cache errors if the partition
    /// was revoked.
    pub fn reset(&mut self) -> AdapterResult<()> {
        let handle = self.handle()?;
        let start = self.shared.start_token(&self.partition)?;
        self.shared.cache.reset_cursor(handle, start)?;
        self.shared.sync_safe_point(&self.partition);
        info!(
            partition = %self.partition,
            subscription = %self.subscription,
            after_checkpoint = ?start.map(|t| t.offset().get()),
            "Receiver reset"
        );
        Ok(())
    }

    /// Removes the cursor. Safe to call more than once, and after the
    /// partition was revoked.
    ///
    /// # Errors
    ///
    /// Cache errors other than a revoked partition.
    pub fn shutdown(&mut self) -> AdapterResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        match self.shared.cache.unregister_cursor(&handle) {
            // A report with no cursor left keeps the last safe point.
            Ok(()) => self.shared.sync_safe_point(&self.partition),
            Err(CacheError::PartitionNotAssigned { .. }) => {}
            Err(err) => return Err(err.into()),
        }
        debug!(
            partition = %self.partition,
            subscription = %self.subscription,
            "Receiver shut down"
        );
        Ok(())
    }
}

impl<C: Codec> Drop for QueueReceiver<C> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(partition = %self.partition, error = %err, "Receiver shutdown on drop failed");
        }
    }
}
