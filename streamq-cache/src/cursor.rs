//! Per-reader read position within a partition.

use streamq_core::{Offset, PartitionKey, SequenceToken, SubscriptionId};

/// Names one cursor: a subscription reading one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CursorHandle {
    /// Reader.
    pub subscription: SubscriptionId,
    /// Partition read.
    pub partition: PartitionKey,
}

impl CursorHandle {
    /// Creates a handle.
    #[must_use]
    pub const fn new(subscription: SubscriptionId, partition: PartitionKey) -> Self {
        Self {
            subscription,
            partition,
        }
    }
}

/// A reader's position in one partition's cache.
///
/// Two positions advance independently: the read position moves on every
/// pull, the acknowledged position only when the reader acknowledges. Only
/// the acknowledged position releases entries for eviction and lets the
/// checkpoint advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    subscription: SubscriptionId,
    /// Next offset to hand to the reader.
    read_position: Offset,
    /// First offset not yet acknowledged.
    ack_position: Offset,
    created_at_us: u64,
}

impl Cursor {
    /// Creates a cursor that reads from `position` with nothing before it
    /// outstanding.
    #[must_use]
    pub const fn new(subscription: SubscriptionId, position: Offset, created_at_us: u64) -> Self {
        Self {
            subscription,
            read_position: position,
            ack_position: position,
            created_at_us,
        }
    }

    /// Subscription owning the cursor.
    #[must_use]
    pub const fn subscription(&self) -> SubscriptionId {
        self.subscription
    }

    /// Next offset the reader will be handed.
    #[must_use]
    pub const fn read_position(&self) -> Offset {
        self.read_position
    }

    /// First offset the reader has not acknowledged.
    #[must_use]
    pub const fn ack_position(&self) -> Offset {
        self.ack_position
    }

    /// When the cursor was registered (us).
    #[must_use]
    pub const fn created_at_us(&self) -> u64 {
        self.created_at_us
    }

    /// Token of the newest entry handed to the reader.
    #[must_use]
    pub fn last_delivered(&self) -> Option<SequenceToken> {
        self.read_position.prev().map(SequenceToken::from_offset)
    }

    /// Token of the newest acknowledged entry.
    #[must_use]
    pub fn acknowledged(&self) -> Option<SequenceToken> {
        self.ack_position.prev().map(SequenceToken::from_offset)
    }

    /// Moves the read position past `token`.
    pub(crate) fn delivered_through(&mut self, token: SequenceToken) {
        debug_assert!(token.resume_offset() > self.read_position);
        self.read_position = token.resume_offset();
    }

    /// Moves the acknowledged position past `token`. Older tokens are
    /// ignored. Returns true if the position moved.
    pub(crate) fn acknowledge(&mut self, token: SequenceToken) -> bool {
        let position = token.resume_offset();
        if position <= self.ack_position {
            return false;
        }
        debug_assert!(position <= self.read_position);
        self.ack_position = position;
        true
    }

    /// Repositions the cursor at `position` with nothing before it
    /// outstanding.
    pub(crate) fn reposition(&mut self, position: Offset) {
        self.read_position = position;
        self.ack_position = position;
    }
}
