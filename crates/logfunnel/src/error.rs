//! Error types for the aggregation core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur in the aggregation core.
#[derive(Debug, Error)]
pub enum FunnelError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A required record field was not provided.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// The logger configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A format template could not be parsed.
    #[error("invalid format template '{template}': {reason}")]
    InvalidFormat {
        /// The offending template.
        template: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Another handler in this process already holds the file open.
    #[error("log file already held by another handler: {}", .0.display())]
    PathInUse(PathBuf),

    /// A routing key cannot be used as a file name inside the log directory.
    #[error("routing key is not a valid log file name: '{0}'")]
    InvalidKey(String),

    /// The aggregation worker did not signal readiness.
    #[error("aggregation worker failed to start: {0}")]
    StartupFailed(String),

    /// The aggregation worker did not report completion in time.
    #[error("aggregation worker did not shut down cleanly: {0}")]
    ShutdownTimeout(String),

    /// Delivery to a remote logger (pipe or tunnel) failed.
    #[error("remote logger error: {0}")]
    RemoteLogger(String),

    /// A transport channel was closed.
    #[error("channel closed")]
    ChannelClosed,

    /// The operation is not allowed in the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// Result type alias for aggregation operations.
pub type Result<T> = std::result::Result<T, FunnelError>;
