//! Dispatch error types.

use streamq_core::TopicName;
use streamq_transport::TransportError;
use thiserror::Error;

/// Result type for sends.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Why a send failed. Every failed send is reported; none is dropped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Transient failures outlasted the producer timeout.
    #[error("send to {topic} timed out after {timeout_ms}ms ({attempts} attempts)")]
    TimedOut {
        /// Destination topic.
        topic: TopicName,
        /// Attempts made.
        attempts: u32,
        /// Producer timeout.
        timeout_ms: u64,
        /// Last transient error seen, if an attempt completed.
        last_error: Option<TransportError>,
    },

    /// The transport rejected the send with a fatal error.
    #[error("send to {topic} failed: {source}")]
    Fatal {
        /// Destination topic.
        topic: TopicName,
        /// Cause.
        source: TransportError,
    },

    /// The item could not be encoded.
    #[error("encode failed: {message}")]
    Encode {
        /// Codec message.
        message: String,
    },

    /// The dispatcher is shut down.
    #[error("dispatcher is shutdown")]
    Shutdown,
}
