//! Checkpoint error types.

use streamq_transport::TransportError;
use thiserror::Error;

/// Result type for checkpoint operations.
pub type CheckpointResult<T> = Result<T, CheckpointError>;

/// Errors that can occur while loading or writing checkpoints.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// Store I/O failed.
    #[error("I/O error: {operation}: {message}")]
    Io {
        /// The operation that failed.
        operation: &'static str,
        /// Error message.
        message: String,
    },

    /// Transport-backed store failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Shutdown in progress.
    #[error("checkpoint store is shutdown")]
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CheckpointError::Io {
            operation: "save",
            message: "disk full".to_string(),
        };
        assert_eq!(err.to_string(), "I/O error: save: disk full");

        let err: CheckpointError = TransportError::Shutdown.into();
        assert!(err.to_string().contains("shutdown"));
    }
}
