//! Typed events decoded from inbound frames

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::values::{AspectRatio, DynamicRange, MemoryBank, OutputResolution, PowerState};

/// Identity reported by the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub model_name: String,
    pub software_revision: String,
    pub model_number: String,
    pub serial_number: String,
}

/// A single status field carried by a status frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusUpdate {
    LogicalInput(u8),
    PhysicalInput(u8),
    InputMemory(MemoryBank),
    OutputResolution(OutputResolution),
    SourceAspect(AspectRatio),
    DynamicRange(DynamicRange),
    InputConfig(u8),
    OutputCms(u8),
    OutputStyle(u8),
    InputLabel { slot: u8, label: String },
}

/// Everything the device can tell us, one variant per frame family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    StatusChanged(StatusUpdate),
    PowerChanged(PowerState),
    /// Input labels were edited on the device and must be re-fetched
    LabelsChanged,
    DeviceInfo(DeviceInfo),
    CommandAck { kind: CommandKind, success: bool },
    /// Well-formed line we have no decoder for (includes command echoes)
    Unrecognized(String),
}

impl Event {
    /// Short name for logging and filtering
    pub fn name(&self) -> &'static str {
        match self {
            Event::StatusChanged(_) => "status_changed",
            Event::PowerChanged(_) => "power_changed",
            Event::LabelsChanged => "labels_changed",
            Event::DeviceInfo(_) => "device_info",
            Event::CommandAck { .. } => "command_ack",
            Event::Unrecognized(_) => "unrecognized",
        }
    }
}
