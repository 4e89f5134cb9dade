//! Arena of per-partition caches.
//!
//! The registry map is only locked to look a partition up (or to assign and
//! revoke); every cache operation then runs under that partition's own lock.
//! Partitions never contend with each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use streamq_core::{LogEntry, Offset, PartitionKey, SafePoint, SequenceToken, SubscriptionId};
use tracing::info;

use crate::config::CacheConfig;
use crate::cursor::CursorHandle;
use crate::error::{CacheError, CacheResult};
use crate::partition::{CacheStats, EvictionOutcome, PartitionCache};

/// Shared handle to one partition's cache.
pub type SharedPartitionCache<T> = Arc<Mutex<PartitionCache<T>>>;

/// All partition caches owned by this process.
#[derive(Debug)]
pub struct CacheRegistry<T> {
    config: CacheConfig,
    partitions: RwLock<HashMap<PartitionKey, SharedPartitionCache<T>>>,
}

impl<T> CacheRegistry<T> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Creates the cache for a newly assigned partition, starting at `start`.
    /// Returns the existing cache if the partition is already assigned.
    pub fn assign(&self, partition: PartitionKey, start: Offset) -> SharedPartitionCache<T> {
        let mut partitions = self.partitions.write().expect("cache registry lock poisoned");
        let cache = partitions.entry(partition.clone()).or_insert_with(|| {
            info!(partition = %partition, start = start.get(), "Assigned partition cache");
            Arc::new(Mutex::new(PartitionCache::new(
                partition.clone(),
                start,
                self.config,
            )))
        });
        Arc::clone(cache)
    }

    /// Drops a partition's cache and its cursors. Returns false if the
    /// partition was not assigned.
    pub fn revoke(&self, partition: &PartitionKey) -> bool {
        let removed = self
            .partitions
            .write()
            .expect("cache registry lock poisoned")
            .remove(partition)
            .is_some();
        if removed {
            info!(partition = %partition, "Revoked partition cache");
        }
        removed
    }

    /// Returns true if the partition is assigned.
    #[must_use]
    pub fn is_assigned(&self, partition: &PartitionKey) -> bool {
        self.partitions
            .read()
            .expect("cache registry lock poisoned")
            .contains_key(partition)
    }

    /// Assigned partitions, sorted.
    #[must_use]
    pub fn assigned(&self) -> Vec<PartitionKey> {
        let mut keys: Vec<PartitionKey> = self
            .partitions
            .read()
            .expect("cache registry lock poisoned")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Returns the cache of an assigned partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned` if the partition has no cache.
    pub fn partition(&self, partition: &PartitionKey) -> CacheResult<SharedPartitionCache<T>> {
        self.partitions
            .read()
            .expect("cache registry lock poisoned")
            .get(partition)
            .cloned()
            .ok_or_else(|| CacheError::PartitionNotAssigned {
                partition: partition.clone(),
            })
    }

    fn with_partition<R>(
        &self,
        partition: &PartitionKey,
        f: impl FnOnce(&mut PartitionCache<T>) -> R,
    ) -> CacheResult<R> {
        let cache = self.partition(partition)?;
        let mut guard: MutexGuard<'_, PartitionCache<T>> =
            cache.lock().expect("partition cache lock poisoned");
        Ok(f(&mut guard))
    }

    // -------------------------------------------------------------------------
    // Cursor operations
    // -------------------------------------------------------------------------

    /// Registers a cursor on an assigned partition.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned` or `CursorExists`.
    pub fn register_cursor(
        &self,
        subscription: SubscriptionId,
        partition: &PartitionKey,
        start: Option<SequenceToken>,
        now_us: u64,
    ) -> CacheResult<CursorHandle> {
        self.with_partition(partition, |cache| {
            cache.register_cursor(subscription, start, now_us)
        })?
    }

    /// Removes a cursor.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned` or `CursorNotFound`.
    pub fn unregister_cursor(&self, handle: &CursorHandle) -> CacheResult<()> {
        self.with_partition(&handle.partition, |cache| {
            cache.unregister_cursor(handle.subscription).map(|_| ())
        })?
    }

    /// Pulls up to `max` entries for a cursor. See [`PartitionCache::pull`].
    ///
    /// # Errors
    ///
    /// Returns `CacheMiss`, `PartitionNotAssigned` or `CursorNotFound`.
    pub fn pull(&self, handle: &CursorHandle, max: usize) -> CacheResult<Vec<Arc<LogEntry<T>>>> {
        self.with_partition(&handle.partition, |cache| {
            cache.pull(handle.subscription, max)
        })?
    }

    /// Acknowledges up to `upto` and returns the partition's safe point.
    ///
    /// # Errors
    ///
    /// Returns `AckBeyondDelivered`, `PartitionNotAssigned` or
    /// `CursorNotFound`.
    pub fn acknowledge(
        &self,
        handle: &CursorHandle,
        upto: SequenceToken,
    ) -> CacheResult<SafePoint> {
        self.with_partition(&handle.partition, |cache| {
            cache.acknowledge(handle.subscription, upto)
        })?
    }

    /// Moves a cursor to a recoverable position.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned` or `CursorNotFound`.
    pub fn reset_cursor(
        &self,
        handle: &CursorHandle,
        start: Option<SequenceToken>,
    ) -> CacheResult<()> {
        self.with_partition(&handle.partition, |cache| {
            cache.reset_cursor(handle.subscription, start)
        })?
    }

    /// Newest token every cursor on the partition has acknowledged, with the
    /// partition's cursor change counter.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned`.
    pub fn safe_point(&self, partition: &PartitionKey) -> CacheResult<SafePoint> {
        self.with_partition(partition, |cache| cache.safe_point())
    }

    // -------------------------------------------------------------------------
    // Writer operations
    // -------------------------------------------------------------------------

    /// Appends an entry to its partition's cache.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned` or `NonMonotonicAppend`.
    pub fn append(&self, entry: impl Into<Arc<LogEntry<T>>>) -> CacheResult<EvictionOutcome> {
        let entry = entry.into();
        let partition = entry.partition.clone();
        self.with_partition(&partition, |cache| cache.append(entry))?
    }

    /// Records positions up to `offset` as skipped.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned`.
    pub fn skip_to(&self, partition: &PartitionKey, offset: Offset) -> CacheResult<()> {
        self.with_partition(partition, |cache| cache.skip_to(offset))
    }

    /// Runs an eviction pass on every partition, one lock at a time.
    pub fn evict(&self, now_us: u64) -> EvictionOutcome {
        let caches: Vec<SharedPartitionCache<T>> = self
            .partitions
            .read()
            .expect("cache registry lock poisoned")
            .values()
            .cloned()
            .collect();

        let mut outcome = EvictionOutcome::default();
        for cache in caches {
            outcome.merge(cache.lock().expect("partition cache lock poisoned").evict(now_us));
        }
        outcome
    }

    /// Returns a snapshot of a partition's cache.
    ///
    /// # Errors
    ///
    /// Returns `PartitionNotAssigned`.
    pub fn stats(&self, partition: &PartitionKey) -> CacheResult<CacheStats> {
        self.with_partition(partition, |cache| cache.stats())
    }
}
