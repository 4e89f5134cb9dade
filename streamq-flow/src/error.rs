//! Flow control error types.

/// Flow control error type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    /// Shutdown in progress; no more permits are granted.
    #[error("shutdown in progress")]
    Shutdown,
}

/// Result type for flow control operations.
pub type FlowResult<T> = Result<T, FlowError>;
