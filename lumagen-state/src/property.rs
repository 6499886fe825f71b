//! Property model for the device mirror
//!
//! Every observable piece of device state is a [`DeviceProperty`] identified
//! by a [`PropertyKey`]. Each key has a fixed [`Category`] and
//! [`FreshnessPolicy`]:
//! - Status properties describe what the device is doing right now. They are
//!   only meaningful while connected and powered on, and are frozen (marked
//!   stale) otherwise.
//! - Diagnostic properties describe what the device *is*. Once learned they
//!   are kept for the life of the engine.
//!
//! Typed access goes through the [`Property`] trait, implemented by one
//! newtype per key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lumagen_protocol as proto;
use lumagen_protocol::{AspectRatio, DynamicRange, MemoryBank, PowerState};

use crate::error::StateError;

// ============================================================================
// Keys and metadata
// ============================================================================

/// How a property should be presented by a host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Status,
    Diagnostic,
}

/// How long a cached value stays trustworthy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessPolicy {
    /// Only valid while the device is connected and on
    LiveOnly,
    /// Valid once observed, kept across standby and disconnects
    CachedForever,
}

/// Closed set of property keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyKey {
    Power,
    LogicalInput,
    PhysicalInput,
    InputMemory,
    OutputResolution,
    SourceAspect,
    SourceDynamicRange,
    InputConfig,
    OutputCms,
    OutputStyle,
    ModelName,
    SoftwareRevision,
    ModelNumber,
    SerialNumber,
}

impl PropertyKey {
    pub const ALL: [PropertyKey; 14] = [
        PropertyKey::Power,
        PropertyKey::LogicalInput,
        PropertyKey::PhysicalInput,
        PropertyKey::InputMemory,
        PropertyKey::OutputResolution,
        PropertyKey::SourceAspect,
        PropertyKey::SourceDynamicRange,
        PropertyKey::InputConfig,
        PropertyKey::OutputCms,
        PropertyKey::OutputStyle,
        PropertyKey::ModelName,
        PropertyKey::SoftwareRevision,
        PropertyKey::ModelNumber,
        PropertyKey::SerialNumber,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PropertyKey::Power => "power",
            PropertyKey::LogicalInput => "logical_input",
            PropertyKey::PhysicalInput => "physical_input",
            PropertyKey::InputMemory => "input_memory",
            PropertyKey::OutputResolution => "output_resolution",
            PropertyKey::SourceAspect => "source_aspect",
            PropertyKey::SourceDynamicRange => "source_dynamic_range",
            PropertyKey::InputConfig => "input_config",
            PropertyKey::OutputCms => "output_cms",
            PropertyKey::OutputStyle => "output_style",
            PropertyKey::ModelName => "model_name",
            PropertyKey::SoftwareRevision => "software_revision",
            PropertyKey::ModelNumber => "model_number",
            PropertyKey::SerialNumber => "serial_number",
        }
    }

    pub fn category(self) -> Category {
        match self {
            PropertyKey::ModelName
            | PropertyKey::SoftwareRevision
            | PropertyKey::ModelNumber
            | PropertyKey::SerialNumber => Category::Diagnostic,
            _ => Category::Status,
        }
    }

    pub fn freshness(self) -> FreshnessPolicy {
        match self.category() {
            Category::Status => FreshnessPolicy::LiveOnly,
            Category::Diagnostic => FreshnessPolicy::CachedForever,
        }
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyKey {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| StateError::UnknownProperty(s.to_string()))
    }
}

// ============================================================================
// Values
// ============================================================================

/// Value held by a property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PropertyValue {
    Power(PowerState),
    Number(u8),
    Memory(MemoryBank),
    Resolution(proto::OutputResolution),
    Aspect(AspectRatio),
    DynamicRange(DynamicRange),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Power(p) => write!(f, "{p}"),
            PropertyValue::Number(n) => write!(f, "{n}"),
            PropertyValue::Memory(m) => write!(f, "{m}"),
            PropertyValue::Resolution(r) => write!(f, "{r}"),
            PropertyValue::Aspect(a) => write!(f, "{a}"),
            PropertyValue::DynamicRange(d) => write!(f, "{d}"),
            PropertyValue::Text(t) => f.write_str(t),
        }
    }
}

/// One cached property with its freshness metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperty {
    pub key: PropertyKey,
    pub value: PropertyValue,
    pub last_updated: DateTime<Utc>,
    pub category: Category,
    pub freshness: FreshnessPolicy,
    /// Value is kept but no longer reflects the device
    pub stale: bool,
}

impl DeviceProperty {
    pub(crate) fn new(key: PropertyKey, value: PropertyValue, at: DateTime<Utc>, stale: bool) -> Self {
        Self {
            key,
            value,
            last_updated: at,
            category: key.category(),
            freshness: key.freshness(),
            stale,
        }
    }

    /// Visible state equality, ignoring timestamps
    pub fn same_visible_state(&self, other: &DeviceProperty) -> bool {
        self.value == other.value && self.stale == other.stale
    }
}

// ============================================================================
// Typed properties
// ============================================================================

/// Typed view of one property key
///
/// # Example
///
/// ```rust,ignore
/// if let Some(SourceAspect(aspect)) = store.get_typed::<SourceAspect>() {
///     println!("source is {aspect}");
/// }
/// ```
pub trait Property: Clone + Send + Sync + PartialEq + 'static {
    const KEY: PropertyKey;

    fn from_value(value: &PropertyValue) -> Option<Self>;

    fn into_value(self) -> PropertyValue;
}

macro_rules! define_property {
    ($(#[$meta:meta])* $name:ident($inner:ty) => $key:ident, $variant:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl Property for $name {
            const KEY: PropertyKey = PropertyKey::$key;

            fn from_value(value: &PropertyValue) -> Option<Self> {
                match value {
                    PropertyValue::$variant(v) => Some(Self(v.clone())),
                    _ => None,
                }
            }

            fn into_value(self) -> PropertyValue {
                PropertyValue::$variant(self.0)
            }
        }
    };
}

define_property!(Power(PowerState) => Power, Power);
define_property!(
    /// Logical input currently selected (1-based)
    LogicalInput(u8) => LogicalInput, Number
);
define_property!(
    /// Physical connector feeding the logical input
    PhysicalInput(u8) => PhysicalInput, Number
);
define_property!(InputMemory(MemoryBank) => InputMemory, Memory);
define_property!(OutputResolution(proto::OutputResolution) => OutputResolution, Resolution);
define_property!(SourceAspect(AspectRatio) => SourceAspect, Aspect);
define_property!(SourceDynamicRange(DynamicRange) => SourceDynamicRange, DynamicRange);
define_property!(InputConfig(u8) => InputConfig, Number);
define_property!(OutputCms(u8) => OutputCms, Number);
define_property!(OutputStyle(u8) => OutputStyle, Number);
define_property!(ModelName(String) => ModelName, Text);
define_property!(SoftwareRevision(String) => SoftwareRevision, Text);
define_property!(ModelNumber(String) => ModelNumber, Text);
define_property!(SerialNumber(String) => SerialNumber, Text);
