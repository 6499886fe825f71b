//! Outbound commands and their wire encoding

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{check_range, ParseError, ValidationError};
use crate::values::{AspectRatio, MemoryBank, RemoteKey, LABEL_SLOTS, MAX_CONFIG, MAX_INPUT};

/// Frame terminator appended to every outbound command
pub const COMMAND_TERMINATOR: u8 = b'\r';

/// Queries the engine issues on its own behalf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Query {
    /// Model, firmware, model number and serial
    DeviceInfo,
    Power,
    /// Full input/output status
    FullStatus,
    /// Name of one input label slot (0-based)
    Label { slot: u8 },
}

/// A request to the device
///
/// Commands are stateless values built per call. Parameters are checked by
/// [`Command::validate`] and again by [`Command::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    PowerOn,
    PowerOff,
    /// 1-based input number
    SelectInput(u8),
    SelectAspectRatio(AspectRatio),
    RecallConfig(u8),
    SelectMemory(MemoryBank),
    SendKey(RemoteKey),
    Query(Query),
}

/// Command family, used to correlate acknowledgements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    PowerOn,
    PowerOff,
    SelectInput,
    SelectAspectRatio,
    RecallConfig,
    SelectMemory,
    SendKey,
    Query,
}

impl CommandKind {
    /// Code the device uses for this kind in `!A` acknowledgements
    pub fn code(self) -> &'static str {
        match self {
            CommandKind::PowerOn => "PON",
            CommandKind::PowerOff => "POF",
            CommandKind::SelectInput => "INP",
            CommandKind::SelectAspectRatio => "ASP",
            CommandKind::RecallConfig => "CFG",
            CommandKind::SelectMemory => "MEM",
            CommandKind::SendKey => "KEY",
            CommandKind::Query => "QRY",
        }
    }
}

impl FromStr for CommandKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PON" => CommandKind::PowerOn,
            "POF" => CommandKind::PowerOff,
            "INP" => CommandKind::SelectInput,
            "ASP" => CommandKind::SelectAspectRatio,
            "CFG" => CommandKind::RecallConfig,
            "MEM" => CommandKind::SelectMemory,
            "KEY" => CommandKind::SendKey,
            "QRY" => CommandKind::Query,
            other => return Err(ParseError::UnknownCode(other.to_string())),
        })
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::PowerOn => CommandKind::PowerOn,
            Command::PowerOff => CommandKind::PowerOff,
            Command::SelectInput(_) => CommandKind::SelectInput,
            Command::SelectAspectRatio(_) => CommandKind::SelectAspectRatio,
            Command::RecallConfig(_) => CommandKind::RecallConfig,
            Command::SelectMemory(_) => CommandKind::SelectMemory,
            Command::SendKey(_) => CommandKind::SendKey,
            Command::Query(_) => CommandKind::Query,
        }
    }

    pub fn is_power(&self) -> bool {
        matches!(self, Command::PowerOn | Command::PowerOff)
    }

    /// Check parameter domains without encoding
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.body().map(|_| ())
    }

    /// Encode into a CR-terminated frame, validating first
    pub fn encode(&self) -> Result<Vec<u8>, ValidationError> {
        let mut bytes = self.body()?.into_bytes();
        bytes.push(COMMAND_TERMINATOR);
        Ok(bytes)
    }

    fn body(&self) -> Result<String, ValidationError> {
        Ok(match self {
            Command::PowerOn => "%".to_string(),
            Command::PowerOff => "$".to_string(),
            Command::SelectInput(n) => {
                let n = check_range("input", *n, 1, MAX_INPUT)?;
                if n <= 9 {
                    format!("i{n}")
                } else {
                    format!("i+{}", n - 10)
                }
            }
            Command::SelectAspectRatio(ratio) => ratio.command_code()?.to_string(),
            Command::RecallConfig(i) => format!("ZC{}", check_range("config", *i, 0, MAX_CONFIG)?),
            Command::SelectMemory(bank) => bank.command_code().to_string(),
            Command::SendKey(key) => key.command_code()?.to_string(),
            Command::Query(Query::DeviceInfo) => "ZQS01".to_string(),
            Command::Query(Query::Power) => "ZQS02".to_string(),
            Command::Query(Query::FullStatus) => "ZQI24".to_string(),
            Command::Query(Query::Label { slot }) => {
                format!("ZQS1A{}", check_range("label_slot", *slot, 0, LABEL_SLOTS - 1)?)
            }
        })
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::PowerOn => f.write_str("power on"),
            Command::PowerOff => f.write_str("power off"),
            Command::SelectInput(n) => write!(f, "select input {n}"),
            Command::SelectAspectRatio(ratio) => write!(f, "select aspect {ratio}"),
            Command::RecallConfig(i) => write!(f, "recall config {i}"),
            Command::SelectMemory(bank) => write!(f, "select memory {bank}"),
            Command::SendKey(key) => write!(f, "key {key:?}"),
            Command::Query(query) => write!(f, "query {query:?}"),
        }
    }
}
