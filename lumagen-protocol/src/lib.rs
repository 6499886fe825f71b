//! Line protocol for Lumagen Radiance video processors
//!
//! This crate turns the raw byte stream coming off a TCP or serial link into
//! typed [`Event`]s, and turns [`Command`]s into validated wire frames. It
//! has no I/O of its own.
//!
//! ```rust
//! use lumagen_protocol::{Command, Event, FrameDecoder, PowerState};
//!
//! let mut decoder = FrameDecoder::new();
//! let events = decoder.decode(b"!S02,1\r\n");
//! assert_eq!(events, vec![Ok(Event::PowerChanged(PowerState::On))]);
//!
//! assert_eq!(Command::SelectInput(12).encode().unwrap(), b"i+2\r".to_vec());
//! ```

pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod values;

pub use command::{Command, CommandKind, Query};
pub use error::{ParseError, ParseResult, ValidationError};
pub use event::{DeviceInfo, Event, StatusUpdate};
pub use frame::{parse_frame, FrameDecoder, DEFAULT_MAX_FRAME_LEN};
pub use values::{
    AspectRatio, DynamicRange, MemoryBank, OutputResolution, PowerState, RemoteKey, LABEL_SLOTS,
    MAX_CONFIG, MAX_INPUT,
};
