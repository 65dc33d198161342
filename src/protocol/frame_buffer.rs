//! Frame buffer for splitting a byte stream into raw frames.
//!
//! Works over a caller-owned `bytes::BytesMut` so transport reads can land
//! directly in the buffer. Implements a state machine for handling
//! fragmented frames:
//! - `WaitingForHeader`: Need at least 7 bytes
//! - `WaitingForPayload`: Header parsed, need payload + frame-end bytes
//!
//! # Example
//!
//! ```
//! use amqp_session::protocol::{frame_type, FrameBuffer, Header, FRAME_END};
//! use bytes::BytesMut;
//!
//! let mut buffer = FrameBuffer::new();
//! let mut input = BytesMut::new();
//! input.extend_from_slice(&Header::new(frame_type::BODY, 1, 2).encode());
//! input.extend_from_slice(b"hi");
//! input.extend_from_slice(&[FRAME_END]);
//!
//! let raw = buffer.try_extract(&mut input).unwrap().unwrap();
//! assert_eq!(&raw.payload[..], b"hi");
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{Header, DEFAULT_FRAME_MAX, FRAME_END, HEADER_SIZE};
use crate::error::{Error, Result};

/// A frame split off the stream but not yet interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes without the frame-end octet.
    pub payload: Bytes,
}

/// State machine for frame parsing.
#[derive(Debug, Clone)]
enum State {
    /// Waiting for complete header (need 7 bytes).
    WaitingForHeader,
    /// Header parsed, waiting for payload and frame-end bytes.
    WaitingForPayload { header: Header },
}

/// Incremental frame splitter.
///
/// Keeps only the parsing state; unconsumed bytes stay in the caller's
/// buffer between calls.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame size (0 = unlimited).
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer accepting frames up to the default frame_max.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_FRAME_MAX)
    }

    /// Create a new frame buffer with a custom frame size limit.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Change the frame size limit (after tuning).
    pub fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.max_frame_size = max_frame_size;
    }

    /// Current frame size limit.
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    /// Try to extract a single frame from `src`.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was extracted
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` on protocol violation (bad type, oversize, bad frame end)
    pub fn try_extract(&mut self, src: &mut BytesMut) -> Result<Option<RawFrame>> {
        loop {
            match &self.state {
                State::WaitingForHeader => {
                    let header = match Header::decode(src) {
                        Some(header) => header,
                        None => return Ok(None),
                    };
                    header.validate(self.max_frame_size)?;

                    let _ = src.split_to(HEADER_SIZE);
                    self.state = State::WaitingForPayload { header };
                }

                State::WaitingForPayload { header } => {
                    let needed = header.payload_length as usize + 1;
                    if src.len() < needed {
                        return Ok(None);
                    }

                    let header = *header;
                    self.state = State::WaitingForHeader;

                    let payload = src.split_to(needed - 1).freeze();
                    let end = src.split_to(1)[0];
                    if end != FRAME_END {
                        return Err(Error::Decode(format!(
                            "bad frame end octet 0x{:02X} on channel {}",
                            end, header.channel
                        )));
                    }

                    return Ok(Some(RawFrame { header, payload }));
                }
            }
        }
    }

    /// Reset state, e.g. after the transport was replaced.
    pub fn clear(&mut self) {
        self.state = State::WaitingForHeader;
    }

    /// Get the current state for debugging.
    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match &self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPayload { .. } => "WaitingForPayload",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}
