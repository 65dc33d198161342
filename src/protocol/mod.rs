//! Protocol module - wire format, framing, method registry and values.
//!
//! This module implements the data model shared by the codec and the
//! session layer:
//! - 7-byte general frame header and frame-end octet
//! - Frame buffer for accumulating partial reads
//! - Closed method table (`Method` / `MethodInfo`)
//! - Field values, frames, content headers and assembled events

mod event;
mod frame;
mod frame_buffer;
mod method;
mod properties;
mod value;
mod wire_format;

pub use event::Event;
pub(crate) use event::delivery_tag_value;
pub use frame::{content_frames, ContentHeader, Frame, FramePayload, BASIC_CLASS_ID};
pub use frame_buffer::{FrameBuffer, RawFrame};
pub use method::{Field, FieldKind, Method, MethodInfo};
pub use properties::{BasicProperties, DELIVERY_MODE_PERSISTENT, DELIVERY_MODE_TRANSIENT};
pub use value::{FieldTable, Value};
pub use wire_format::{
    frame_type, Header, CHANNEL_MAX_ID, DEFAULT_FRAME_MAX, FRAME_END, FRAME_MIN_SIZE,
    FRAME_OVERHEAD, HEADER_SIZE, PROTOCOL_HEADER,
};
