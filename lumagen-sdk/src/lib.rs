//! # lumagen-sdk
//!
//! Keeps a live, observable mirror of a Lumagen Radiance Pro video processor
//! over TCP or RS-232.
//!
//! An [`Engine`] owns the connection, reconnects with backoff when the link
//! drops, decodes everything the device reports into a [`StateStore`], and
//! validates and queues commands through its [`CommandGateway`]. Values the
//! device can no longer vouch for (while it is in standby, or unreachable)
//! are kept but flagged stale.
//!
//! ```rust,ignore
//! use lumagen_sdk::{ConnectionDescriptor, Engine, EngineConfig, LogicalInput};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), lumagen_sdk::SdkError> {
//!     lumagen_sdk::logging::init_logging_from_env().ok();
//!
//!     let engine = Engine::start(EngineConfig::new(ConnectionDescriptor::ip("10.0.0.20")))?;
//!     engine.wait_for_connection(std::time::Duration::from_secs(5)).await;
//!
//!     if let Some(input) = engine.get_typed::<LogicalInput>() {
//!         println!("input {}", input.0);
//!     }
//!     engine.select_input_by_label("Apple TV")?;
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

mod engine;
mod error;
mod gateway;

pub use engine::{Engine, EngineStats};
pub use error::{Result, SdkError};
pub use gateway::{AckPending, CommandGateway};

// Re-exports so hosts only need this crate
pub use lumagen_protocol::{
    AspectRatio, Command, CommandKind, DeviceInfo, DynamicRange, Event, MemoryBank,
    OutputResolution as Resolution, PowerState, RemoteKey, StatusUpdate, ValidationError,
};
pub use lumagen_state::{
    logging, Availability, Category, ChangeSubscription, DeviceProperty, DeviceState,
    FreshnessPolicy, InputConfig, InputLabels, InputMemory, LogicalInput, ModelName, ModelNumber,
    OutputCms, OutputResolution, OutputStyle, PhysicalInput, Power, Property, PropertyKey,
    PropertyValue, PropertyWatcher, SerialNumber, SoftwareRevision, SourceAspect,
    SourceDynamicRange, StateChange, StateStore, SyncWatcher,
};
pub use lumagen_stream::{
    CancellationToken, ConfigError, ConnectionDescriptor, ConnectionState, EngineConfig,
    ReconnectConfig, SubscriptionHandle, SupervisorStats, Transport, TransportError,
};
