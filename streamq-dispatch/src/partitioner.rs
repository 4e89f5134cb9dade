//! Key-based partition selection.

use std::sync::atomic::{AtomicU64, Ordering};

use streamq_core::PartitionId;
use xxhash_rust::xxh3::xxh3_64;

/// Chooses the destination partition of a send.
///
/// Keyed records hash to a fixed partition, so one key stays ordered.
/// Keyless records rotate over all partitions.
#[derive(Debug, Default)]
pub struct Partitioner {
    next: AtomicU64,
}

impl Partitioner {
    /// Creates a partitioner.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Hashes a key.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn hash_key(key: &[u8]) -> u32 {
        // Upper bits of xxh3 are the better distributed half.
        (xxh3_64(key) >> 32) as u32
    }

    /// Picks a partition out of `partition_count`.
    ///
    /// # Panics
    ///
    /// Panics if `partition_count` is zero.
    #[must_use]
    pub fn partition_for(&self, key: Option<&[u8]>, partition_count: u32) -> PartitionId {
        assert!(partition_count > 0, "partition_count must be > 0");
        let count = u64::from(partition_count);
        let slot = match key {
            Some(key) => u64::from(Self::hash_key(key)) % count,
            None => self.next.fetch_add(1, Ordering::Relaxed) % count,
        };
        PartitionId::new(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_key_same_partition() {
        let partitioner = Partitioner::new();
        let first = partitioner.partition_for(Some(b"customer-17"), 8);
        for _ in 0..20 {
            assert_eq!(partitioner.partition_for(Some(b"customer-17"), 8), first);
        }
        assert!(first.get() < 8);
    }

    #[test]
    fn test_keys_spread() {
        let partitioner = Partitioner::new();
        let used: HashSet<u64> = (0..200)
            .map(|i| {
                let key = format!("key-{i}");
                partitioner.partition_for(Some(key.as_bytes()), 4).get()
            })
            .collect();
        assert_eq!(used.len(), 4);
    }

    #[test]
    fn test_keyless_rotates() {
        let partitioner = Partitioner::new();
        let picks: Vec<u64> = (0..6)
            .map(|_| partitioner.partition_for(None, 3).get())
            .collect();
        assert_eq!(picks, vec![0, 1, 2, 0, 1, 2]);
    }
}
