//! Collaborators handed to the adapter at construction.

use std::sync::Arc;

use streamq_checkpoint::SharedCheckpointStore;
use streamq_core::{Clock, MonotonicClock};
use streamq_transport::{Codec, SharedTraceSink, SharedTransport};

/// Everything the adapter consumes from its host.
///
/// Only the transport and the codec are required. Without a checkpoint
/// store, checkpoints are the transport's consumer-group offsets. Without a
/// trace sink, tracking (when enabled) goes to the log.
pub struct AdapterDeps<C: Codec> {
    pub(crate) transport: SharedTransport,
    pub(crate) codec: Arc<C>,
    pub(crate) checkpoint_store: Option<SharedCheckpointStore>,
    pub(crate) trace: Option<SharedTraceSink>,
    pub(crate) clock: Arc<dyn Clock>,
}

impl<C: Codec> AdapterDeps<C> {
    /// Creates the dependency set with default store, sink and clock.
    #[must_use]
    pub fn new(transport: SharedTransport, codec: C) -> Self {
        Self {
            transport,
            codec: Arc::new(codec),
            checkpoint_store: None,
            trace: None,
            clock: Arc::new(MonotonicClock::new()),
        }
    }

    /// Builder: write checkpoints to `store`.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: SharedCheckpointStore) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    /// Builder: send tracking events to `sink`.
    #[must_use]
    pub fn with_trace_sink(mut self, sink: SharedTraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Builder: read time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl<C: Codec> std::fmt::Debug for AdapterDeps<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterDeps")
            .field("checkpoint_store", &self.checkpoint_store.is_some())
            .field("trace", &self.trace.is_some())
            .finish_non_exhaustive()
    }
}
