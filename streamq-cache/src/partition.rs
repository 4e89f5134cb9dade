//! Cache state for one partition: its window and the cursors reading it.

use std::collections::HashMap;
use std::sync::Arc;

use streamq_config::CacheMissPolicy;
use streamq_core::{LogEntry, Offset, PartitionKey, SafePoint, SequenceToken, SubscriptionId};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::cursor::{Cursor, CursorHandle};
use crate::error::{CacheError, CacheResult};
use crate::window::CacheWindow;

/// Entries removed by one eviction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvictionOutcome {
    /// Released entries removed by the age or size bound.
    pub evicted: usize,
    /// Entries removed while a cursor still needed them (hard size bound).
    pub forced: usize,
}

impl EvictionOutcome {
    /// Adds another pass's counts.
    pub fn merge(&mut self, other: Self) {
        self.evicted += other.evicted;
        self.forced += other.forced;
    }

    /// Total entries removed.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.evicted + self.forced
    }
}

/// Snapshot of one partition's cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Retained entries.
    pub entries: usize,
    /// Oldest servable position.
    pub low_water: Offset,
    /// Newest retained entry.
    pub high_water: Option<Offset>,
    /// One past the newest position seen.
    pub next_offset: Offset,
    /// Registered cursors.
    pub cursors: usize,
    /// Entries appended since assignment.
    pub appended: u64,
    /// Released entries evicted.
    pub evicted: u64,
    /// Entries force-evicted under the hard size bound.
    pub forced_evictions: u64,
    /// Pulls answered with a cache miss.
    pub cache_misses: u64,
}

/// Window plus cursors for one partition.
///
/// Guarded by its own lock in [`crate::CacheRegistry`]; the poller appends,
/// readers pull and acknowledge.
#[derive(Debug)]
pub struct PartitionCache<T> {
    partition: PartitionKey,
    config: CacheConfig,
    window: CacheWindow<T>,
    cursors: HashMap<SubscriptionId, Cursor>,
    /// Bumped whenever a cursor's acknowledged position or the cursor set
    /// changes.
    safe_point_version: u64,
    appended: u64,
    evicted: u64,
    forced_evictions: u64,
    cache_misses: u64,
}

impl<T> PartitionCache<T> {
    /// Creates an empty cache whose first position is `start`.
    #[must_use]
    pub fn new(partition: PartitionKey, start: Offset, config: CacheConfig) -> Self {
        assert!(config.max_entries > 0, "max_entries must be > 0");
        Self {
            window: CacheWindow::new(partition.clone(), start),
            partition,
            config,
            cursors: HashMap::new(),
            safe_point_version: 0,
            appended: 0,
            evicted: 0,
            forced_evictions: 0,
            cache_misses: 0,
        }
    }

    /// Partition this cache holds.
    #[must_use]
    pub const fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// The window.
    #[must_use]
    pub const fn window(&self) -> &CacheWindow<T> {
        &self.window
    }

    /// Cursor of a subscription.
    #[must_use]
    pub fn cursor(&self, subscription: SubscriptionId) -> Option<&Cursor> {
        self.cursors.get(&subscription)
    }

    // -------------------------------------------------------------------------
    // Writer side
    // -------------------------------------------------------------------------

    /// Appends a decoded entry, then evicts as of the entry's enqueue time so
    /// the hard size bound always holds.
    ///
    /// Age eviction here runs on the entry's `enqueued_at_us`, stamped by the
    /// poller's clock, not on the clock that drives [`evict`](Self::evict)
    /// during maintenance. An entry stamped behind the maintenance clock can
    /// therefore outlive `max_age_us` until the next maintenance pass.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicAppend` if the entry is not past every position
    /// already seen.
    pub fn append(&mut self, entry: impl Into<Arc<LogEntry<T>>>) -> CacheResult<EvictionOutcome> {
        let entry = entry.into();
        debug_assert_eq!(entry.partition, self.partition);
        let now_us = entry.enqueued_at_us;
        self.window.append(entry)?;
        self.appended += 1;
        Ok(self.evict(now_us))
    }

    /// Records positions up to `offset` as skipped.
    pub fn skip_to(&mut self, offset: Offset) {
        self.window.skip_to(offset);
    }

    /// Evicts from the front of the window.
    ///
    /// An entry is released once every cursor has acknowledged it (or no
    /// cursor exists). Released entries go when older than `max_age_us` or
    /// while the window is over `max_entries`. Past `max_entries`, entries go
    /// whether released or not; lagging cursors then see a cache miss.
    pub fn evict(&mut self, now_us: u64) -> EvictionOutcome {
        let release_bound = self.release_bound();
        let mut outcome = EvictionOutcome::default();

        while let Some(front) = self.window.front() {
            let over_size = self.window.len() > self.config.max_entries;
            let expired = now_us.saturating_sub(front.enqueued_at_us) >= self.config.max_age_us;
            let released = release_bound.map_or(true, |bound| front.offset < bound);

            if released && (expired || over_size) {
                outcome.evicted += 1;
            } else if over_size {
                outcome.forced += 1;
            } else {
                break;
            }
            self.window.pop_front();
        }

        self.evicted += outcome.evicted as u64;
        self.forced_evictions += outcome.forced as u64;
        if outcome.forced > 0 {
            let low_water = self.window.low_water();
            let lagging = self
                .cursors
                .values()
                .filter(|c| c.read_position() < low_water)
                .count();
            warn!(
                partition = %self.partition,
                forced = outcome.forced,
                low_water = low_water.get(),
                lagging,
                "Cache over size bound, evicted unacknowledged entries"
            );
        }
        outcome
    }

    /// Lowest unacknowledged position over all cursors; `None` when there
    /// is no cursor.
    fn release_bound(&self) -> Option<Offset> {
        self.cursors.values().map(Cursor::ack_position).min()
    }

    // -------------------------------------------------------------------------
    // Reader side
    // -------------------------------------------------------------------------

    /// Registers a cursor. `Some(token)` continues after the token; `None`
    /// starts at the oldest servable position.
    ///
    /// # Errors
    ///
    /// Returns `CursorExists` if the subscription already reads this
    /// partition.
    pub fn register_cursor(
        &mut self,
        subscription: SubscriptionId,
        start: Option<SequenceToken>,
        now_us: u64,
    ) -> CacheResult<CursorHandle> {
        if self.cursors.contains_key(&subscription) {
            return Err(CacheError::CursorExists {
                partition: self.partition.clone(),
                subscription,
            });
        }
        let position = start.map_or(self.window.low_water(), SequenceToken::resume_offset);
        self.cursors
            .insert(subscription, Cursor::new(subscription, position, now_us));
        self.safe_point_version += 1;
        debug!(
            partition = %self.partition,
            subscription = %subscription,
            position = position.get(),
            "Registered cursor"
        );
        Ok(CursorHandle::new(subscription, self.partition.clone()))
    }

    /// Removes a cursor.
    ///
    /// # Errors
    ///
    /// Returns `CursorNotFound` if the subscription has no cursor here.
    pub fn unregister_cursor(&mut self, subscription: SubscriptionId) -> CacheResult<Cursor> {
        let cursor = self
            .cursors
            .remove(&subscription)
            .ok_or_else(|| self.cursor_not_found(subscription))?;
        self.safe_point_version += 1;
        debug!(partition = %self.partition, subscription = %subscription, "Unregistered cursor");
        Ok(cursor)
    }

    /// Returns up to `max` entries after the cursor's read position, in
    /// offset order, and moves the read position past them. Never waits.
    ///
    /// # Errors
    ///
    /// Returns `CacheMiss` if the read position fell below the low-water mark.
    /// Under [`CacheMissPolicy::RewindToOldest`] the cursor is then moved to
    /// the oldest servable position, so the next pull continues from there.
    pub fn pull(
        &mut self,
        subscription: SubscriptionId,
        max: usize,
    ) -> CacheResult<Vec<Arc<LogEntry<T>>>> {
        let low_water = self.window.low_water();
        let policy = self.config.miss_policy;
        let Some(cursor) = self.cursors.get_mut(&subscription) else {
            return Err(self.cursor_not_found(subscription));
        };

        let requested = cursor.read_position();
        if requested < low_water {
            if policy == CacheMissPolicy::RewindToOldest {
                cursor.reposition(low_water);
                self.safe_point_version += 1;
            }
            self.cache_misses += 1;
            debug!(
                partition = %self.partition,
                subscription = %subscription,
                requested = requested.get(),
                low_water = low_water.get(),
                ?policy,
                "Cache miss"
            );
            return Err(CacheError::CacheMiss {
                partition: self.partition.clone(),
                subscription,
                requested,
                low_water,
            });
        }

        let entries = self.window.range_from(requested, max);
        if let Some(last) = entries.last() {
            cursor.delivered_through(last.token());
        }
        Ok(entries)
    }

    /// Acknowledges everything up to and including `upto`. Acknowledging an
    /// older token is a no-op. Returns the partition's safe point afterwards,
    /// read under the same borrow as the acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns `AckBeyondDelivered` if `upto` was not handed out yet.
    pub fn acknowledge(
        &mut self,
        subscription: SubscriptionId,
        upto: SequenceToken,
    ) -> CacheResult<SafePoint> {
        let Some(cursor) = self.cursors.get_mut(&subscription) else {
            return Err(self.cursor_not_found(subscription));
        };
        if upto.offset() >= cursor.read_position() {
            return Err(CacheError::AckBeyondDelivered {
                partition: self.partition.clone(),
                subscription,
                token: upto,
                read_position: cursor.read_position(),
            });
        }
        if cursor.acknowledge(upto) {
            self.safe_point_version += 1;
        }
        Ok(self.safe_point())
    }

    /// Moves a cursor to a recoverable position: after `start`, or the oldest
    /// servable position when `None`. Nothing before the new position is
    /// outstanding afterwards.
    ///
    /// # Errors
    ///
    /// Returns `CursorNotFound` if the subscription has no cursor here.
    pub fn reset_cursor(
        &mut self,
        subscription: SubscriptionId,
        start: Option<SequenceToken>,
    ) -> CacheResult<()> {
        let position = start.map_or(self.window.low_water(), SequenceToken::resume_offset);
        let Some(cursor) = self.cursors.get_mut(&subscription) else {
            return Err(self.cursor_not_found(subscription));
        };
        cursor.reposition(position);
        self.safe_point_version += 1;
        debug!(
            partition = %self.partition,
            subscription = %subscription,
            position = position.get(),
            "Reset cursor"
        );
        Ok(())
    }

    /// Newest token every cursor has acknowledged, tagged with the cursor
    /// change counter. The token is `None` when there is no cursor or some
    /// cursor has acknowledged nothing.
    #[must_use]
    pub fn safe_point(&self) -> SafePoint {
        let token = self
            .release_bound()
            .and_then(Offset::prev)
            .map(SequenceToken::from_offset);
        SafePoint::new(token, self.cursors.len(), self.safe_point_version)
    }

    /// Returns a snapshot of the cache.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.window.len(),
            low_water: self.window.low_water(),
            high_water: self.window.high_water(),
            next_offset: self.window.next_offset(),
            cursors: self.cursors.len(),
            appended: self.appended,
            evicted: self.evicted,
            forced_evictions: self.forced_evictions,
            cache_misses: self.cache_misses,
        }
    }

    fn cursor_not_found(&self, subscription: SubscriptionId) -> CacheError {
        CacheError::CursorNotFound {
            partition: self.partition.clone(),
            subscription,
        }
    }
}
