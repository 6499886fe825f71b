//! # lumagen-stream
//!
//! Connection management and event streaming for Lumagen Radiance video
//! processors.
//!
//! The [`ConnectionSupervisor`] owns a [`Transport`] (TCP or serial), keeps it
//! connected with jittered exponential backoff, decodes inbound frames with
//! [`lumagen_protocol::FrameDecoder`] and hands every event to the
//! [`EventDispatcher`]. Outbound frames are queued on the supervisor handle
//! and written by the same task.

pub mod backoff;
pub mod config;
pub mod dispatcher;
mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod mock;
pub mod supervisor;
pub mod transport;

pub use backoff::{delay_for, Backoff};
pub use config::{
    ConnectionDescriptor, EngineConfig, ReconnectConfig, DEFAULT_BAUD_RATE, DEFAULT_TCP_PORT,
};
pub use dispatcher::{EventDispatcher, HandlerError, SubscriptionHandle};
pub use error::*;
pub use supervisor::{
    ConnectionState, ConnectionSupervisor, OutboundFrame, SessionObserver, SupervisorHandle,
    SupervisorStats,
};
pub use transport::{transport_for, Link, SerialTransport, TcpTransport, Transport};

// Re-exported so downstream crates share one cancellation type
pub use tokio_util::sync::CancellationToken;
