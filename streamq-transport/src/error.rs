//! Transport error types.

use streamq_core::{PartitionKey, TopicName};
use thiserror::Error;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors returned by a [`Transport`](crate::Transport).
///
/// Every retry decision in streamq is driven by [`is_transient`] and
/// [`is_fatal`]; callers never match on individual variants to decide.
///
/// [`is_transient`]: TransportError::is_transient
/// [`is_fatal`]: TransportError::is_fatal
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Broker unreachable or connection lost.
    #[error("broker unavailable: {message}")]
    Unavailable {
        /// Error description.
        message: String,
    },

    /// Request did not complete in time.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// Credentials rejected or operation not permitted.
    #[error("authorization failed: {message}")]
    Authorization {
        /// Error description.
        message: String,
    },

    /// Unrecoverable protocol violation.
    #[error("protocol error: {message}")]
    Protocol {
        /// Error description.
        message: String,
    },

    /// Partition does not exist on the transport.
    #[error("unknown partition {partition}")]
    UnknownPartition {
        /// The partition.
        partition: PartitionKey,
    },

    /// Topic does not exist on the transport.
    #[error("unknown topic {topic}")]
    UnknownTopic {
        /// The topic.
        topic: TopicName,
    },

    /// Transport was shut down.
    #[error("transport is shutdown")]
    Shutdown,
}

impl TransportError {
    /// Returns true if retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Returns true if the caller must stop and escalate.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamq_core::PartitionId;

    #[test]
    fn test_classification() {
        let transient = [
            TransportError::Unavailable {
                message: "connection refused".to_string(),
            },
            TransportError::Timeout {
                operation: "fetch",
                timeout_ms: 100,
            },
        ];
        for err in &transient {
            assert!(err.is_transient(), "{err}");
            assert!(!err.is_fatal(), "{err}");
        }

        let fatal = [
            TransportError::Authorization {
                message: "bad credentials".to_string(),
            },
            TransportError::Protocol {
                message: "corrupt frame".to_string(),
            },
            TransportError::UnknownPartition {
                partition: PartitionKey::new("orders", PartitionId::new(9)),
            },
            TransportError::Shutdown,
        ];
        for err in &fatal {
            assert!(err.is_fatal(), "{err}");
        }
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::UnknownPartition {
            partition: PartitionKey::new("orders", PartitionId::new(9)),
        };
        assert_eq!(err.to_string(), "unknown partition orders/9");
    }
}
