//! Streaming frame decoder
//!
//! The device speaks an ASCII line protocol. Frames are terminated by CR or
//! LF (the device sends CR LF). Status frames begin with `!`; anything else
//! on the line is an echo of something we sent, or noise.
//!
//! The decoder is fed arbitrary byte chunks as they arrive off the link and
//! only yields events for complete frames. Malformed frames produce a
//! recoverable [`ParseError`] and decoding continues with the next line.

use bytes::{Buf, BytesMut};
use tracing::trace;

use crate::command::CommandKind;
use crate::error::{ParseError, ParseResult};
use crate::event::{DeviceInfo, Event, StatusUpdate};
use crate::values::{
    AspectRatio, DynamicRange, MemoryBank, OutputResolution, PowerState, LABEL_SLOTS, MAX_CONFIG,
};

/// Longest frame accepted before the buffer is discarded
pub const DEFAULT_MAX_FRAME_LEN: usize = 512;

/// Incremental decoder holding any partial frame between reads
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_len: usize,
    /// Set after an overflow until the next terminator is seen
    discarding: bool,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
    }

    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_frame_len.min(4096)),
            max_frame_len,
            discarding: false,
        }
    }

    /// Bytes of an incomplete frame currently held
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial frame, e.g. after the link was re-established
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarding = false;
    }

    /// Feed bytes and collect the results for every frame they complete
    ///
    /// A frame split across calls yields nothing until its terminator arrives.
    pub fn decode(&mut self, bytes: &[u8]) -> Vec<ParseResult<Event>> {
        self.buffer.extend_from_slice(bytes);
        let mut results = Vec::new();

        loop {
            let Some(pos) = self.buffer.iter().position(|b| is_terminator(*b)) else {
                if self.buffer.len() > self.max_frame_len {
                    self.buffer.clear();
                    if !self.discarding {
                        trace!(limit = self.max_frame_len, "frame overflow, discarding until next terminator");
                        self.discarding = true;
                        results.push(Err(ParseError::Oversized {
                            limit: self.max_frame_len,
                        }));
                    }
                }
                break;
            };

            let line = self.buffer.split_to(pos);
            self.buffer.advance(1);

            if self.discarding {
                // tail of an oversized frame
                self.discarding = false;
                continue;
            }
            if line.is_empty() {
                continue;
            }
            if line.len() > self.max_frame_len {
                results.push(Err(ParseError::Oversized {
                    limit: self.max_frame_len,
                }));
                continue;
            }

            match parse_frame(&line) {
                Ok(events) => results.extend(events.into_iter().map(Ok)),
                Err(e) => results.push(Err(e)),
            }
        }

        results
    }
}

fn is_terminator(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

/// Decode one complete frame (terminator already stripped)
///
/// Returns every event the frame carries. Full status frames carry several;
/// a frame that fails to parse yields none of them.
pub fn parse_frame(line: &[u8]) -> ParseResult<Vec<Event>> {
    let text = std::str::from_utf8(line).map_err(|_| ParseError::NotUtf8)?;
    let frame = text.trim();

    if !frame.starts_with('!') {
        return Ok(vec![Event::Unrecognized(frame.to_string())]);
    }

    let (header, rest) = match frame.split_once(',') {
        Some((header, rest)) => (header, Some(rest)),
        None => (frame, None),
    };

    let event = match header {
        "!S01" => parse_device_info(frame, rest)?,
        "!S02" => {
            let value = rest.ok_or_else(|| ParseError::missing(frame, "power"))?.trim();
            match value {
                "0" => Event::PowerChanged(PowerState::Standby),
                "1" => Event::PowerChanged(PowerState::On),
                other => return Err(ParseError::invalid(frame, "power", other)),
            }
        }
        "!S03" => Event::LabelsChanged,
        "!I24" => return parse_full_status(frame, rest),
        "!A" => parse_ack(frame, rest)?,
        h if h.starts_with("!S1A") => parse_label(frame, &h[4..], rest)?,
        _ => Event::Unrecognized(frame.to_string()),
    };

    Ok(vec![event])
}

// ============================================================================
// Frame families
// ============================================================================

fn parse_device_info(frame: &str, rest: Option<&str>) -> ParseResult<Event> {
    let mut fields = Fields::new(frame, rest);
    Ok(Event::DeviceInfo(DeviceInfo {
        model_name: fields.text("model_name")?,
        software_revision: fields.text("software_revision")?,
        model_number: fields.text("model_number")?,
        serial_number: fields.text("serial_number")?,
    }))
}

fn parse_label(frame: &str, slot: &str, rest: Option<&str>) -> ParseResult<Event> {
    let slot: u8 = slot
        .parse()
        .ok()
        .filter(|s| *s < LABEL_SLOTS)
        .ok_or_else(|| ParseError::invalid(frame, "label_slot", slot))?;
    let label = rest.ok_or_else(|| ParseError::missing(frame, "label"))?;
    Ok(Event::StatusChanged(StatusUpdate::InputLabel {
        slot,
        label: label.trim().to_string(),
    }))
}

fn parse_full_status(frame: &str, rest: Option<&str>) -> ParseResult<Vec<Event>> {
    let mut fields = Fields::new(frame, rest);

    let logical = fields.number::<u8>("logical_input")?;
    let physical = fields.number::<u8>("physical_input")?;
    let memory_raw = fields.next("input_memory")?;
    let memory: MemoryBank = memory_raw
        .parse()
        .map_err(|_| ParseError::invalid(frame, "input_memory", memory_raw))?;
    let resolution = OutputResolution {
        horizontal: fields.number("output_horizontal")?,
        vertical: fields.number("output_vertical")?,
        rate: fields.number("output_rate")?,
    };
    let aspect = AspectRatio::from_wire(fields.next("source_aspect")?);
    let dr_raw = fields.next("dynamic_range")?;
    let dynamic_range = dr_raw
        .parse::<u8>()
        .ok()
        .and_then(DynamicRange::from_wire)
        .ok_or_else(|| ParseError::invalid(frame, "dynamic_range", dr_raw))?;
    let input_config = fields.bounded("input_config", MAX_CONFIG)?;
    let cms = fields.bounded("output_cms", MAX_CONFIG)?;
    let style = fields.bounded("output_style", MAX_CONFIG)?;

    Ok([
        StatusUpdate::LogicalInput(logical),
        StatusUpdate::PhysicalInput(physical),
        StatusUpdate::InputMemory(memory),
        StatusUpdate::OutputResolution(resolution),
        StatusUpdate::SourceAspect(aspect),
        StatusUpdate::DynamicRange(dynamic_range),
        StatusUpdate::InputConfig(input_config),
        StatusUpdate::OutputCms(cms),
        StatusUpdate::OutputStyle(style),
    ]
    .into_iter()
    .map(Event::StatusChanged)
    .collect())
}

fn parse_ack(frame: &str, rest: Option<&str>) -> ParseResult<Event> {
    let mut fields = Fields::new(frame, rest);
    let kind: CommandKind = fields.next("command")?.parse()?;
    let success = match fields.next("result")? {
        "1" => true,
        "0" => false,
        other => return Err(ParseError::invalid(frame, "result", other)),
    };
    Ok(Event::CommandAck { kind, success })
}

/// Comma-separated field cursor that reports which field was missing
struct Fields<'a> {
    frame: &'a str,
    iter: Option<std::str::Split<'a, char>>,
}

impl<'a> Fields<'a> {
    fn new(frame: &'a str, rest: Option<&'a str>) -> Self {
        Self {
            frame,
            iter: rest.map(|r| r.split(',')),
        }
    }

    fn next(&mut self, name: &'static str) -> ParseResult<&'a str> {
        self.iter
            .as_mut()
            .and_then(|it| it.next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::missing(self.frame, name))
    }

    fn text(&mut self, name: &'static str) -> ParseResult<String> {
        self.next(name).map(str::to_string)
    }

    fn number<T: std::str::FromStr>(&mut self, name: &'static str) -> ParseResult<T> {
        let raw = self.next(name)?;
        raw.parse().map_err(|_| ParseError::invalid(self.frame, name, raw))
    }

    fn bounded(&mut self, name: &'static str, max: u8) -> ParseResult<u8> {
        let raw = self.next(name)?;
        raw.parse::<u8>()
            .ok()
            .filter(|v| *v <= max)
            .ok_or_else(|| ParseError::invalid(self.frame, name, raw))
    }
}
