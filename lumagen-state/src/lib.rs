//! # lumagen-state
//!
//! Cached, observable state for a Lumagen Radiance processor.
//!
//! The [`StateStore`] applies decoded events from the device, tracks which
//! values are fresh and which are frozen (stale) because the device is in
//! standby or unreachable, and notifies subscribers of every visible change
//! in the order it happened.
//!
//! ```rust,ignore
//! let store = StateStore::new();
//! let mut changes = store.subscribe_changes();
//!
//! store.apply(&event);
//! while let Ok(change) = changes.try_recv() {
//!     println!("{change:?}");
//! }
//! ```

pub mod error;
pub mod labels;
pub mod logging;
pub mod property;
pub mod store;
pub mod watcher;

pub use error::{Result, StateError};
pub use labels::InputLabels;
pub use property::{
    Category, DeviceProperty, FreshnessPolicy, InputConfig, InputMemory, LogicalInput, ModelName,
    ModelNumber, OutputCms, OutputResolution, OutputStyle, PhysicalInput, Power, Property,
    PropertyKey, PropertyValue, SerialNumber, SoftwareRevision, SourceAspect, SourceDynamicRange,
};
pub use store::{
    ApplyOutcome, Availability, ChangeSubscription, DeviceState, StateChange, StateStore,
};
pub use watcher::{PropertyWatcher, SyncWatcher};
