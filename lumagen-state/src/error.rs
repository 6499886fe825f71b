//! Error types for lumagen-state

use thiserror::Error;

/// Errors raised by the state layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Property name did not match any known key
    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    /// The store was dropped while a watcher was waiting
    #[error("State store closed")]
    Closed,
}

/// Result type alias for state operations
pub type Result<T> = std::result::Result<T, StateError>;
