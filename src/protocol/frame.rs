//! Decoded frames.
//!
//! A [`Frame`] is the lowest-level unit exchanged with the broker: a method,
//! a content header, one body fragment or a heartbeat, tagged with the
//! channel it travels on.
//!
//! # Example
//!
//! ```
//! use amqp_session::protocol::{frame_type, Frame, Method};
//! use amqp_session::field_table;
//!
//! let frame = Frame::method(1, Method::QueueDeclare, field_table! { "queue" => "q1" });
//! assert_eq!(frame.channel, 1);
//! assert_eq!(frame.frame_type(), frame_type::METHOD);
//! assert_eq!(frame.method_kind(), Some(Method::QueueDeclare));
//! ```

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::method::Method;
use super::value::FieldTable;
use super::wire_format::{frame_type, FRAME_OVERHEAD};

/// Class id carried by content headers of the `basic` class.
pub const BASIC_CLASS_ID: u16 = 60;

/// Content header: announces the size of the body that follows a
/// content-bearing method and carries the message properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentHeader {
    /// Class of the content-bearing method (60 for `basic`).
    pub class_id: u16,
    /// Total body length across all body frames.
    pub body_size: u64,
    /// Message properties (content type, headers, delivery mode, ...).
    pub properties: FieldTable,
}

impl ContentHeader {
    /// Header for a `basic` class message.
    pub fn basic(body_size: u64, properties: FieldTable) -> Self {
        Self {
            class_id: BASIC_CLASS_ID,
            body_size,
            properties,
        }
    }
}

/// Frame payload by frame type.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    /// A method with its (normalized) properties.
    Method {
        /// Which method.
        method: Method,
        /// Field values.
        properties: FieldTable,
    },
    /// Content header.
    Header(ContentHeader),
    /// One fragment of a content body.
    Body(Bytes),
    /// Heartbeat (no payload).
    Heartbeat,
}

/// A complete protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Channel the frame belongs to (0 = connection).
    pub channel: u16,
    /// Typed payload.
    pub payload: FramePayload,
}

impl Frame {
    /// Method frame.
    pub fn method(channel: u16, method: Method, properties: FieldTable) -> Self {
        Self {
            channel,
            payload: FramePayload::Method { method, properties },
        }
    }

    /// Content header frame.
    pub fn header(channel: u16, header: ContentHeader) -> Self {
        Self {
            channel,
            payload: FramePayload::Header(header),
        }
    }

    /// Content body frame.
    pub fn body(channel: u16, body: Bytes) -> Self {
        Self {
            channel,
            payload: FramePayload::Body(body),
        }
    }

    /// Heartbeat frame (always channel 0).
    pub fn heartbeat() -> Self {
        Self {
            channel: 0,
            payload: FramePayload::Heartbeat,
        }
    }

    /// The wire frame type octet.
    #[inline]
    pub fn frame_type(&self) -> u8 {
        match self.payload {
            FramePayload::Method { .. } => frame_type::METHOD,
            FramePayload::Header(_) => frame_type::HEADER,
            FramePayload::Body(_) => frame_type::BODY,
            FramePayload::Heartbeat => frame_type::HEARTBEAT,
        }
    }

    /// The method, if this is a method frame.
    #[inline]
    pub fn method_kind(&self) -> Option<Method> {
        match &self.payload {
            FramePayload::Method { method, .. } => Some(*method),
            _ => None,
        }
    }

    /// Check if this is a heartbeat.
    #[inline]
    pub fn is_heartbeat(&self) -> bool {
        matches!(self.payload, FramePayload::Heartbeat)
    }
}

/// Build the frame sequence of a content-bearing method: the method frame,
/// the content header and the body split into fragments that fit
/// `max_frame_size` (0 = unlimited).
pub fn content_frames(
    channel: u16,
    method: Method,
    properties: FieldTable,
    header_properties: FieldTable,
    body: Bytes,
    max_frame_size: u32,
) -> Vec<Frame> {
    let chunk = match max_frame_size {
        0 => usize::MAX,
        max => (max as usize).saturating_sub(FRAME_OVERHEAD).max(1),
    };

    let mut frames = Vec::with_capacity(2 + body.len().div_ceil(chunk));
    frames.push(Frame::method(channel, method, properties));
    frames.push(Frame::header(
        channel,
        ContentHeader::basic(body.len() as u64, header_properties),
    ));

    let mut rest = body;
    while !rest.is_empty() {
        let take = rest.len().min(chunk);
        frames.push(Frame::body(channel, rest.split_to(take)));
    }
    frames
}
