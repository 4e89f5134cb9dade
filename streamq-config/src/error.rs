//! Configuration error types.

use thiserror::Error;

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating options.
///
/// Every variant is fatal at startup: the adapter refuses to assign any
/// partition while its options are invalid.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No broker addresses were configured.
    #[error("broker list is empty")]
    MissingBrokers,

    /// No topics were configured.
    #[error("topic list is empty")]
    MissingTopics,

    /// A topic entry is unusable.
    #[error("invalid topic '{name}': {message}")]
    InvalidTopic {
        /// Topic name as configured.
        name: String,
        /// What is wrong with it.
        message: String,
    },

    /// A numeric or timing field is out of range.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// Option field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Reading the options file failed.
    #[error("failed to read options from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The options file is not valid TOML for `StreamOptions`.
    #[error("failed to parse options: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid_value(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}
