//! Reusable seeds and option presets for streamq tests.

use streamq_config::{ConsumeMode, StreamOptions};

/// Seeds for reproducible testing.
pub mod seeds {
    /// Standard test seeds that have historically found bugs.
    pub const REGRESSION_SEEDS: &[u64] = &[42, 12345, 0xDEAD_BEEF, 999, 7777, 0x1337, 1, 0];

    /// Number of derived seeds the long DST run covers.
    pub const CI_SEED_COUNT: u64 = 20;
}

/// Option presets.
pub mod options {
    use super::{ConsumeMode, StreamOptions};

    /// Broker list used by every preset; the simulated transport ignores it.
    pub const BROKERS: &[&str] = &["sim-1:9092", "sim-2:9092"];

    /// Fast timings: short polls, a checkpoint on every acknowledgement and
    /// a tight backoff window. Tracking is on.
    #[must_use]
    pub fn fast(topic: &str) -> StreamOptions {
        let mut options = StreamOptions::new(BROKERS.iter().copied()).add_topic(topic, None);
        options.poll_timeout_ms = 20;
        options.poll_buffer_timeout_ms = 50;
        options.producer_timeout_ms = 200;
        options.checkpoint_every_acks = 1;
        options.checkpoint_interval_ms = 10;
        options.backoff_min_ms = 5;
        options.backoff_max_ms = 40;
        options.shutdown_grace_ms = 500;
        options.message_tracking_enabled = true;
        options
    }

    /// [`fast`] reading from the oldest retained record.
    #[must_use]
    pub fn from_start(topic: &str) -> StreamOptions {
        fast(topic).with_consume_mode(ConsumeMode::StreamStart)
    }

    /// [`fast`] resuming from the committed checkpoint.
    #[must_use]
    pub fn resuming(topic: &str) -> StreamOptions {
        fast(topic).with_consume_mode(ConsumeMode::LastCommittedMessage)
    }

    /// [`resuming`] with checkpoints batched: every `acks` acknowledgements
    /// or once a minute, whichever first.
    #[must_use]
    pub fn batched_checkpoints(topic: &str, acks: u64) -> StreamOptions {
        let mut options = resuming(topic);
        options.checkpoint_every_acks = acks;
        options.checkpoint_interval_ms = 60_000;
        options
    }
}
