//! Error types for the lumagen-stream crate.

use std::time::Duration;

/// Errors raised by a transport or an established link.
///
/// None of these are fatal to the engine: the supervisor logs them, marks
/// the connection down and schedules a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint actively refused the connection
    #[error("Connection to {endpoint} refused: {source}")]
    Refused {
        /// Endpoint we tried to reach
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The connect attempt did not finish in time
    #[error("Connection to {endpoint} timed out after {timeout:?}")]
    Timeout {
        /// Endpoint we tried to reach
        endpoint: String,
        /// Configured connect timeout
        timeout: Duration,
    },

    /// Read or write failed on an established link
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The serial port could not be opened or configured
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// The peer closed the link
    #[error("Connection closed by peer")]
    Closed,
}

/// Invalid engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A field value is outside its allowed range
    #[error("Invalid configuration for '{field}': {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
