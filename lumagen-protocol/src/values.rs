//! Value domains shared by inbound frames and outbound commands

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{check_range, ValidationError};

/// Highest selectable input number
pub const MAX_INPUT: u8 = 18;

/// Highest input configuration / CMS / style index
pub const MAX_CONFIG: u8 = 7;

/// Number of label slots the device exposes
pub const LABEL_SLOTS: u8 = 10;

// ============================================================================
// Power
// ============================================================================

/// Device power state as last reported (or optimistically assumed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    On,
    Standby,
    #[default]
    Unknown,
}

impl PowerState {
    pub fn is_on(self) -> bool {
        matches!(self, PowerState::On)
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PowerState::On => "on",
            PowerState::Standby => "standby",
            PowerState::Unknown => "unknown",
        })
    }
}

// ============================================================================
// Aspect ratio
// ============================================================================

/// Source content aspect ratio
///
/// The device may report ratios it cannot be told to select; those decode
/// to [`AspectRatio::Other`] and fail validation when used in a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AspectRatio {
    Ratio4x3,
    Ratio16x9,
    Ratio1_85,
    Ratio1_90,
    Ratio2_00,
    Ratio2_20,
    Ratio2_35,
    Ratio2_40,
    Letterbox,
    Nls,
    Other(String),
}

impl AspectRatio {
    /// Every ratio that can be selected with a command, in menu order
    pub fn selectable() -> [AspectRatio; 10] {
        [
            AspectRatio::Ratio4x3,
            AspectRatio::Ratio16x9,
            AspectRatio::Ratio1_85,
            AspectRatio::Ratio1_90,
            AspectRatio::Ratio2_00,
            AspectRatio::Ratio2_20,
            AspectRatio::Ratio2_35,
            AspectRatio::Ratio2_40,
            AspectRatio::Letterbox,
            AspectRatio::Nls,
        ]
    }

    /// Decode the aspect field of a status frame
    pub fn from_wire(code: &str) -> Self {
        match code {
            "133" => AspectRatio::Ratio4x3,
            "178" => AspectRatio::Ratio16x9,
            "185" => AspectRatio::Ratio1_85,
            "190" => AspectRatio::Ratio1_90,
            "200" => AspectRatio::Ratio2_00,
            "220" => AspectRatio::Ratio2_20,
            "235" => AspectRatio::Ratio2_35,
            "240" => AspectRatio::Ratio2_40,
            "LBX" => AspectRatio::Letterbox,
            "NLS" => AspectRatio::Nls,
            other => AspectRatio::Other(other.to_string()),
        }
    }

    /// Human-facing label, matching the select options hosts present
    pub fn label(&self) -> &str {
        match self {
            AspectRatio::Ratio4x3 => "4:3",
            AspectRatio::Ratio16x9 => "16:9",
            AspectRatio::Ratio1_85 => "1.85",
            AspectRatio::Ratio1_90 => "1.90",
            AspectRatio::Ratio2_00 => "2.00",
            AspectRatio::Ratio2_20 => "2.20",
            AspectRatio::Ratio2_35 => "2.35",
            AspectRatio::Ratio2_40 => "2.40",
            AspectRatio::Letterbox => "Letterbox",
            AspectRatio::Nls => "NLS",
            AspectRatio::Other(code) => code,
        }
    }

    /// Reverse of [`AspectRatio::label`] for selectable ratios
    pub fn from_label(label: &str) -> Option<Self> {
        Self::selectable()
            .into_iter()
            .find(|ratio| ratio.label().eq_ignore_ascii_case(label))
    }

    /// Single-character command that selects this ratio
    pub fn command_code(&self) -> Result<char, ValidationError> {
        Ok(match self {
            AspectRatio::Ratio4x3 => 'n',
            AspectRatio::Ratio16x9 => 'w',
            AspectRatio::Ratio1_85 => 'j',
            AspectRatio::Ratio1_90 => 'A',
            AspectRatio::Ratio2_00 => 'C',
            AspectRatio::Ratio2_20 => 'E',
            AspectRatio::Ratio2_35 => 'W',
            AspectRatio::Ratio2_40 => 'K',
            AspectRatio::Letterbox => 'l',
            AspectRatio::Nls => 'N',
            AspectRatio::Other(code) => return Err(ValidationError::ReportOnly(code.clone())),
        })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// Dynamic range
// ============================================================================

/// Source dynamic range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DynamicRange {
    Sdr,
    Hdr10,
    Hlg,
}

impl DynamicRange {
    pub fn from_wire(code: u8) -> Option<Self> {
        match code {
            0 => Some(DynamicRange::Sdr),
            1 => Some(DynamicRange::Hdr10),
            2 => Some(DynamicRange::Hlg),
            _ => None,
        }
    }
}

impl fmt::Display for DynamicRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DynamicRange::Sdr => "SDR",
            DynamicRange::Hdr10 => "HDR10",
            DynamicRange::Hlg => "HLG",
        })
    }
}

// ============================================================================
// Memory bank
// ============================================================================

/// Input memory bank
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryBank {
    A,
    B,
    C,
    D,
}

impl MemoryBank {
    pub const ALL: [MemoryBank; 4] = [MemoryBank::A, MemoryBank::B, MemoryBank::C, MemoryBank::D];

    pub fn command_code(self) -> char {
        match self {
            MemoryBank::A => 'a',
            MemoryBank::B => 'b',
            MemoryBank::C => 'c',
            MemoryBank::D => 'd',
        }
    }
}

impl FromStr for MemoryBank {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(MemoryBank::A),
            "B" => Ok(MemoryBank::B),
            "C" => Ok(MemoryBank::C),
            "D" => Ok(MemoryBank::D),
            _ => Err(ValidationError::InvalidValue {
                parameter: "memory_bank",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            MemoryBank::A => "A",
            MemoryBank::B => "B",
            MemoryBank::C => "C",
            MemoryBank::D => "D",
        };
        f.write_str(letter)
    }
}

// ============================================================================
// Output resolution
// ============================================================================

/// Output raster and vertical refresh rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputResolution {
    pub horizontal: u16,
    pub vertical: u16,
    pub rate: u16,
}

impl fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}@{}Hz", self.horizontal, self.vertical, self.rate)
    }
}

// ============================================================================
// Remote keys
// ============================================================================

/// Front-panel / IR remote keys that can be injected over the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteKey {
    Up,
    Down,
    Left,
    Right,
    Menu,
    Enter,
    Exit,
    Back,
    Home,
    Ok,
    Info,
    Alt,
    Clear,
    Digit(u8),
}

impl RemoteKey {
    pub fn digit(n: u8) -> Result<Self, ValidationError> {
        check_range("digit", n, 0, 9).map(RemoteKey::Digit)
    }

    /// Parse a key by name, case-insensitively. Digits are given as `"0"`..`"9"`.
    pub fn from_name(name: &str) -> Result<Self, ValidationError> {
        let key = match name.trim().to_ascii_lowercase().as_str() {
            "up" => RemoteKey::Up,
            "down" => RemoteKey::Down,
            "left" => RemoteKey::Left,
            "right" => RemoteKey::Right,
            "menu" => RemoteKey::Menu,
            "enter" => RemoteKey::Enter,
            "exit" => RemoteKey::Exit,
            "back" => RemoteKey::Back,
            "home" => RemoteKey::Home,
            "ok" => RemoteKey::Ok,
            "info" => RemoteKey::Info,
            "alt" => RemoteKey::Alt,
            "clear" => RemoteKey::Clear,
            other => match other.as_bytes() {
                [d @ b'0'..=b'9'] => RemoteKey::Digit(d - b'0'),
                _ => return Err(ValidationError::UnknownKey(name.to_string())),
            },
        };
        Ok(key)
    }

    /// Single-character command for this key
    ///
    /// The device has no dedicated home key; it maps to menu.
    pub fn command_code(self) -> Result<char, ValidationError> {
        Ok(match self {
            RemoteKey::Up => '^',
            RemoteKey::Down => 'v',
            RemoteKey::Left => '<',
            RemoteKey::Right => '>',
            RemoteKey::Menu | RemoteKey::Home => 'M',
            RemoteKey::Enter | RemoteKey::Ok => 'k',
            RemoteKey::Exit => 'X',
            RemoteKey::Back => 'P',
            RemoteKey::Info => 'U',
            RemoteKey::Alt => '#',
            RemoteKey::Clear => '!',
            RemoteKey::Digit(n) => char::from(b'0' + check_range("digit", n, 0, 9)?),
        })
    }
}

impl FromStr for RemoteKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RemoteKey::from_name(s)
    }
}
