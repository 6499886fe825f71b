use thiserror::Error;

use lumagen_protocol::{CommandKind, ValidationError};
use lumagen_state::StateError;
use lumagen_stream::ConfigError;

#[derive(Error, Debug)]
pub enum SdkError {
    /// The link is down, or the device is in standby and the command needs
    /// it awake
    #[error("Device is not connected")]
    NotConnected,

    #[error("Invalid command: {0}")]
    Validation(#[from] ValidationError),

    #[error("Connection dropped before the device acknowledged {0}")]
    AckAbandoned(CommandKind),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine has been shut down")]
    Shutdown,

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Engine must be started from within a Tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, SdkError>;
