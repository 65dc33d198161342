//! Codec module - frame encoding/decoding.
//!
//! - [`FrameCodec`] - the seam between the session layer and the wire
//! - [`MsgPackFrameCodec`] - default frame codec, MessagePack method payloads
//! - [`MsgPackCodec`] - MessagePack helpers using `rmp-serde` (`to_vec_named`)
//!
//! # Example
//!
//! ```
//! use amqp_session::codec::{FrameCodec, MsgPackFrameCodec};
//! use amqp_session::protocol::{Frame, Method};
//! use amqp_session::field_table;
//! use bytes::BytesMut;
//!
//! let mut codec = MsgPackFrameCodec::new();
//! let mut wire = BytesMut::new();
//! let qos = Frame::method(1, Method::BasicQos, field_table! { "prefetch_count" => 10u16 });
//! codec.encode(&qos, &mut wire).unwrap();
//!
//! let frame = codec.decode(&mut wire).unwrap().unwrap();
//! assert_eq!(frame.method_kind(), Some(Method::BasicQos));
//! ```

mod msgpack;

use bytes::BytesMut;

use crate::error::Result;
use crate::protocol::Frame;

pub use msgpack::{MsgPackCodec, MsgPackFrameCodec};

/// Encodes frames to and decodes frames from a byte stream.
///
/// Decoding is incremental: `decode` consumes whole frames from `src` and
/// leaves any partial frame in place for the next call.
pub trait FrameCodec: Send + 'static {
    /// Decode the next complete frame, or `Ok(None)` if more bytes are needed.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>>;

    /// Append the encoded frame to `dst`.
    ///
    /// Method properties are validated against the method's field list;
    /// invalid values fail with `Error::Encoding`.
    fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()>;

    /// Bytes sent once before the first frame.
    fn protocol_header(&self) -> &'static [u8];

    /// Apply the negotiated frame size limit (0 = unlimited).
    fn set_max_frame_size(&mut self, max_frame_size: u32);

    /// Forget any partially decoded frame.
    fn reset(&mut self) {}
}
