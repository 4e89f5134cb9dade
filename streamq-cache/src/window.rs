//! Ordered run of cached entries for one partition.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use streamq_core::{LogEntry, Offset, PartitionKey};

use crate::error::{CacheError, CacheResult};

/// Ordered window of decoded entries for one partition.
///
/// Offsets strictly increase. A position between two retained entries is
/// either retained or recorded as skipped (compacted away on the transport,
/// or failed to decode), so the window is contiguous over fetched positions.
///
/// `low_water` is the oldest position the window can still serve; anything
/// below it has been evicted. `next_offset` is one past the newest position
/// seen (retained or skipped). Skipped positions are kept as ranges, so a
/// gap costs the same however many offsets it spans.
#[derive(Debug)]
pub struct CacheWindow<T> {
    partition: PartitionKey,
    entries: VecDeque<Arc<LogEntry<T>>>,
    /// Skipped ranges, start to end (exclusive). Adjacent ranges are merged.
    skipped: BTreeMap<Offset, Offset>,
    low_water: Offset,
    next_offset: Offset,
}

impl<T> CacheWindow<T> {
    /// Creates an empty window whose first position is `start`.
    #[must_use]
    pub fn new(partition: PartitionKey, start: Offset) -> Self {
        Self {
            partition,
            entries: VecDeque::new(),
            skipped: BTreeMap::new(),
            low_water: start,
            next_offset: start,
        }
    }

    /// Appends an entry. Positions between the previous newest position and
    /// the entry are recorded as skipped.
    ///
    /// # Errors
    ///
    /// Returns `NonMonotonicAppend` if the entry is not past every position
    /// already seen.
    pub fn append(&mut self, entry: Arc<LogEntry<T>>) -> CacheResult<()> {
        if entry.offset < self.next_offset {
            return Err(CacheError::NonMonotonicAppend {
                partition: self.partition.clone(),
                offset: entry.offset,
                expected: self.next_offset,
            });
        }
        self.skip_to(entry.offset);
        self.next_offset = entry.offset.next();
        self.entries.push_back(entry);
        Ok(())
    }

    /// Records every position from the newest seen up to (excluding)
    /// `offset` as skipped. No-op if `offset` is not ahead.
    pub fn skip_to(&mut self, offset: Offset) {
        if offset <= self.next_offset {
            return;
        }
        match self.skipped.iter_mut().next_back() {
            Some((_, end)) if *end == self.next_offset => *end = offset,
            _ => {
                self.skipped.insert(self.next_offset, offset);
            }
        }
        self.next_offset = offset;
    }

    /// Removes and returns the oldest entry, raising the low-water mark past it.
    pub fn pop_front(&mut self) -> Option<Arc<LogEntry<T>>> {
        let entry = self.entries.pop_front()?;
        self.low_water = entry.offset.next();
        let mut kept = self.skipped.split_off(&self.low_water);
        if let Some((_, &end)) = self.skipped.iter().next_back() {
            if end > self.low_water {
                kept.insert(self.low_water, end);
            }
        }
        self.skipped = kept;
        Some(entry)
    }

    /// Oldest retained entry.
    #[must_use]
    pub fn front(&self) -> Option<&Arc<LogEntry<T>>> {
        self.entries.front()
    }

    /// Returns up to `max` entries at or after `from`, in offset order.
    #[must_use]
    pub fn range_from(&self, from: Offset, max: usize) -> Vec<Arc<LogEntry<T>>> {
        let start = self.entries.partition_point(|e| e.offset < from);
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    /// Oldest position the window can serve.
    #[must_use]
    pub const fn low_water(&self) -> Offset {
        self.low_water
    }

    /// Offset of the newest retained entry.
    #[must_use]
    pub fn high_water(&self) -> Option<Offset> {
        self.entries.back().map(|e| e.offset)
    }

    /// One past the newest position seen.
    #[must_use]
    pub const fn next_offset(&self) -> Offset {
        self.next_offset
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entry is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of skipped positions still inside the window.
    #[must_use]
    pub fn skipped_count(&self) -> u64 {
        self.skipped
            .iter()
            .map(|(start, end)| end.get() - start.get())
            .sum()
    }

    /// Number of skipped ranges still inside the window.
    #[must_use]
    pub fn skipped_ranges(&self) -> usize {
        self.skipped.len()
    }

    /// Returns true if `offset` was recorded as skipped.
    #[must_use]
    pub fn is_skipped(&self, offset: Offset) -> bool {
        self.skipped
            .range(..=offset)
            .next_back()
            .is_some_and(|(_, &end)| offset < end)
    }

    /// Returns true if every position in `start..end` was recorded as skipped.
    fn skipped_through(&self, start: Offset, end: Offset) -> bool {
        start >= end
            || self
                .skipped
                .range(..=start)
                .next_back()
                .is_some_and(|(_, &skipped_end)| skipped_end >= end)
    }

    /// Checks that every position between `low_water` and `next_offset` is
    /// either retained or skipped, in strictly increasing order.
    #[must_use]
    pub fn is_contiguous(&self) -> bool {
        let mut expected = self.low_water;
        for entry in &self.entries {
            if entry.offset < expected || !self.skipped_through(expected, entry.offset) {
                return false;
            }
            expected = entry.offset.next();
        }
        self.skipped_through(expected, self.next_offset)
    }
}
