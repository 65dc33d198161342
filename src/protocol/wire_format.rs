//! Wire format encoding and decoding.
//!
//! Implements the 7-byte general frame header, followed by the payload and
//! a single frame-end octet:
//! ```text
//! ┌──────────┬──────────┬──────────┬─────────────┬──────┐
//! │ Type     │ Channel  │ Size     │ Payload     │ End  │
//! │ 1 byte   │ uint16 BE│ uint32 BE│ Size bytes  │ 0xCE │
//! └──────────┴──────────┴──────────┴─────────────┴──────┘
//! ```
//!
//! All multi-byte integers are Big Endian.

use crate::error::{Error, Result};

/// Header size in bytes (fixed, exactly 7).
pub const HEADER_SIZE: usize = 7;

/// Octet terminating every frame.
pub const FRAME_END: u8 = 0xCE;

/// Bytes a frame occupies beyond its payload (header + frame end).
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + 1;

/// Protocol header sent by the client before the first frame.
pub const PROTOCOL_HEADER: &[u8; 8] = b"AMQP\x00\x00\x09\x01";

/// Default maximum frame size requested during tuning (128 KiB).
pub const DEFAULT_FRAME_MAX: u32 = 131_072;

/// Smallest frame size a peer may negotiate.
pub const FRAME_MIN_SIZE: u32 = 4096;

/// Highest usable channel id.
pub const CHANNEL_MAX_ID: u16 = u16::MAX;

/// Frame type constants.
pub mod frame_type {
    /// Method frame.
    pub const METHOD: u8 = 1;
    /// Content header frame.
    pub const HEADER: u8 = 2;
    /// Content body fragment.
    pub const BODY: u8 = 3;
    /// Heartbeat frame (always channel 0, empty payload).
    pub const HEARTBEAT: u8 = 8;

    /// Check that a type octet is one of the known frame types.
    #[inline]
    pub fn is_known(frame_type: u8) -> bool {
        matches!(frame_type, METHOD | HEADER | BODY | HEARTBEAT)
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Frame type (see `frame_type` module).
    pub frame_type: u8,
    /// Channel the frame belongs to (0 = connection).
    pub channel: u16,
    /// Payload length in bytes, excluding the frame-end octet.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(frame_type: u8, channel: u16, payload_length: u32) -> Self {
        Self {
            frame_type,
            channel,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use amqp_session::protocol::{frame_type, Header};
    ///
    /// let header = Header::new(frame_type::METHOD, 1, 100);
    /// let bytes = header.encode();
    /// assert_eq!(bytes.len(), 7);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (7 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0] = self.frame_type;
        buf[1..3].copy_from_slice(&self.channel.to_be_bytes());
        buf[3..7].copy_from_slice(&self.payload_length.to_be_bytes());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// Returns `None` if buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            frame_type: buf[0],
            channel: u16::from_be_bytes([buf[1], buf[2]]),
            payload_length: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Frame type is known
    /// - Whole frame fits in `max_frame_size` (0 = unlimited)
    /// - Heartbeats travel on channel 0
    pub fn validate(&self, max_frame_size: u32) -> Result<()> {
        if !frame_type::is_known(self.frame_type) {
            return Err(Error::Decode(format!(
                "unknown frame type {}",
                self.frame_type
            )));
        }

        let frame_size = self.payload_length as u64 + FRAME_OVERHEAD as u64;
        if max_frame_size != 0 && frame_size > max_frame_size as u64 {
            return Err(Error::Decode(format!(
                "frame size {} exceeds maximum {}",
                frame_size, max_frame_size
            )));
        }

        if self.frame_type == frame_type::HEARTBEAT && self.channel != 0 {
            return Err(Error::Decode(format!(
                "heartbeat on channel {}",
                self.channel
            )));
        }

        Ok(())
    }
}
