//! Error types for frame decoding and command encoding

use thiserror::Error;

/// Errors that can occur while decoding an inbound frame
///
/// All of these are recoverable. The decoder drops the offending frame and
/// continues with the next terminator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Frame ended before a required field
    #[error("Frame {frame:?} is missing field '{field}'")]
    MissingField { frame: String, field: &'static str },

    /// Field is present but its value is outside the expected domain
    #[error("Frame {frame:?} has invalid {field}: {value:?}")]
    InvalidField {
        frame: String,
        field: &'static str,
        value: String,
    },

    /// Acknowledgement referenced a command code we do not send
    #[error("Unknown command code: {0}")]
    UnknownCode(String),

    /// Buffer grew past the frame limit without a terminator
    #[error("Frame exceeded {limit} bytes without a terminator")]
    Oversized { limit: usize },

    /// Frame bytes were not valid UTF-8
    #[error("Frame is not valid UTF-8")]
    NotUtf8,
}

impl ParseError {
    pub(crate) fn missing(frame: &str, field: &'static str) -> Self {
        Self::MissingField {
            frame: frame.to_string(),
            field,
        }
    }

    pub(crate) fn invalid(frame: &str, field: &'static str, value: &str) -> Self {
        Self::InvalidField {
            frame: frame.to_string(),
            field,
            value: value.to_string(),
        }
    }
}

/// Result type alias for decoding operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Errors raised when a command parameter is outside its domain
///
/// Encoding checks these before producing any bytes, so an invalid command
/// never reaches the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Parameter '{parameter}' value '{value}' is out of range ({min}..={max})")]
    OutOfRange {
        parameter: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Aspect ratio '{0}' is reported by the device but cannot be selected")]
    ReportOnly(String),

    #[error("Unknown remote key: {0}")]
    UnknownKey(String),

    #[error("Parameter '{parameter}' has invalid value '{value}'")]
    InvalidValue { parameter: &'static str, value: String },
}

impl ValidationError {
    pub fn out_of_range(parameter: &'static str, value: impl Into<i64>, min: i64, max: i64) -> Self {
        Self::OutOfRange {
            parameter,
            value: value.into(),
            min,
            max,
        }
    }
}

/// Ensure `value` lies in `min..=max`
pub(crate) fn check_range(
    parameter: &'static str,
    value: u8,
    min: u8,
    max: u8,
) -> Result<u8, ValidationError> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ValidationError::out_of_range(
            parameter,
            value,
            min.into(),
            max.into(),
        ))
    }
}
