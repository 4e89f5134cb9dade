//! Cache configuration.

use streamq_config::{CacheMissPolicy, StreamOptions};

/// Bounds and miss policy applied to every partition's window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Hard bound on retained entries per partition.
    pub max_entries: usize,
    /// Acknowledged entries older than this are evicted (us).
    pub max_age_us: u64,
    /// What a pull below the low-water mark does.
    pub miss_policy: CacheMissPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 4096,
            max_age_us: 500_000,
            miss_policy: CacheMissPolicy::Signal,
        }
    }
}

impl CacheConfig {
    /// Derives the cache settings from adapter options.
    #[must_use]
    pub fn from_options(options: &StreamOptions) -> Self {
        Self {
            max_entries: options.cache_max_entries,
            max_age_us: options.poll_buffer_timeout_ms.saturating_mul(1_000),
            miss_policy: options.cache_miss_policy,
        }
    }

    /// Small window for tests.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            max_entries: 10,
            max_age_us: 1_000_000,
            miss_policy: CacheMissPolicy::Signal,
        }
    }

    /// Sets the hard entry bound.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Sets the age bound (us).
    #[must_use]
    pub const fn with_max_age_us(mut self, max_age_us: u64) -> Self {
        self.max_age_us = max_age_us;
        self
    }

    /// Sets the miss policy.
    #[must_use]
    pub const fn with_miss_policy(mut self, miss_policy: CacheMissPolicy) -> Self {
        self.miss_policy = miss_policy;
        self
    }
}
