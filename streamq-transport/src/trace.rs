//! Message tracking sinks.
//!
//! Tracking is fire-and-forget: [`TraceSink::record_event`] returns nothing
//! and a sink must swallow its own failures, so tracking can never affect
//! delivery.

use std::fmt;
use std::sync::{Arc, Mutex};

use streamq_core::{Offset, PartitionKey, Timestamp};
use tracing::debug;

/// Shared handle to a trace sink.
pub type SharedTraceSink = Arc<dyn TraceSink>;

/// Point in a record's life a tracking event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TraceStage {
    /// Fetched from the transport and decoded into the cache.
    Enqueued,
    /// Fetched but the payload failed to decode; the record was skipped.
    DecodeFailed,
    /// Handed to a reader by a pull.
    Delivered,
    /// Acknowledged by a reader.
    Acknowledged,
    /// Covered by a committed checkpoint.
    Committed,
    /// Accepted by the transport on the dispatch path.
    Produced,
    /// Dispatch gave up on the record.
    SendFailed,
}

impl fmt::Display for TraceStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enqueued => "enqueued",
            Self::DecodeFailed => "decode_failed",
            Self::Delivered => "delivered",
            Self::Acknowledged => "acknowledged",
            Self::Committed => "committed",
            Self::Produced => "produced",
            Self::SendFailed => "send_failed",
        };
        f.write_str(name)
    }
}

/// One tracking event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEvent {
    /// Partition of the record.
    pub partition: PartitionKey,
    /// Offset of the record; `None` when no offset was assigned.
    pub offset: Option<Offset>,
    /// What happened.
    pub stage: TraceStage,
    /// When it happened.
    pub timestamp: Timestamp,
}

impl TraceEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn now(partition: PartitionKey, offset: Option<Offset>, stage: TraceStage) -> Self {
        Self {
            partition,
            offset,
            stage,
            timestamp: Timestamp::now(),
        }
    }
}

/// Receiver of tracking events.
pub trait TraceSink: Send + Sync + 'static {
    /// Records an event. Must not block or panic.
    fn record_event(&self, event: TraceEvent);
}

/// Discards every event. Installed when tracking is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceSink;

impl TraceSink for NoopTraceSink {
    fn record_event(&self, _event: TraceEvent) {}
}

/// Forwards events to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingTraceSink;

impl TraceSink for LoggingTraceSink {
    fn record_event(&self, event: TraceEvent) {
        debug!(
            partition = %event.partition,
            offset = event.offset.map(Offset::get),
            stage = %event.stage,
            timestamp_ms = event.timestamp.as_millis(),
            "message tracked"
        );
    }
}

/// Keeps events in memory for inspection in tests.
///
/// Clones share the same event list.
#[derive(Debug, Clone, Default)]
pub struct MemoryTraceSink {
    events: Arc<Mutex<Vec<TraceEvent>>>,
}

impl MemoryTraceSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every recorded event.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().expect("events lock poisoned").clone()
    }

    /// Returns the recorded events of one stage.
    ///
    /// # Panics
    ///
    /// Panics if the mutex is poisoned.
    #[must_use]
    pub fn events_for(&self, stage: TraceStage) -> Vec<TraceEvent> {
        self.events
            .lock()
            .expect("events lock poisoned")
            .iter()
            .filter(|e| e.stage == stage)
            .cloned()
            .collect()
    }
}

impl TraceSink for MemoryTraceSink {
    fn record_event(&self, event: TraceEvent) {
        // A poisoned list only loses tracking data.
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamq_core::PartitionId;

    fn event(stage: TraceStage, offset: u64) -> TraceEvent {
        TraceEvent::now(
            PartitionKey::new("orders", PartitionId::new(0)),
            Some(Offset::new(offset)),
            stage,
        )
    }

    #[test]
    fn test_memory_sink_shared_between_clones() {
        let sink = MemoryTraceSink::new();
        let shared: SharedTraceSink = Arc::new(sink.clone());

        shared.record_event(event(TraceStage::Enqueued, 0));
        shared.record_event(event(TraceStage::Delivered, 0));
        shared.record_event(event(TraceStage::Enqueued, 1));

        assert_eq!(sink.events().len(), 3);
        let enqueued = sink.events_for(TraceStage::Enqueued);
        assert_eq!(enqueued.len(), 2);
        assert_eq!(enqueued[1].offset, Some(Offset::new(1)));
    }

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoopTraceSink.record_event(event(TraceStage::Committed, 5));
        LoggingTraceSink.record_event(event(TraceStage::DecodeFailed, 6));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(TraceStage::DecodeFailed.to_string(), "decode_failed");
        assert_eq!(TraceStage::SendFailed.to_string(), "send_failed");
    }
}
