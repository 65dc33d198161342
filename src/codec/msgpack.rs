//! MsgPack codecs using `rmp-serde`.
//!
//! **Always use `to_vec_named`, never `to_vec`.** Structs must go on the wire
//! as maps (with field names) so that peers written against the same frame
//! layout in other languages can read them.
//!
//! # Example
//!
//! ```
//! use amqp_session::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Message {
//!     id: u32,
//!     content: String,
//! }
//!
//! let msg = Message { id: 42, content: "hello".to_string() };
//! let encoded = MsgPackCodec::encode(&msg).unwrap();
//! let decoded: Message = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, msg);
//! ```

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};

use super::FrameCodec;
use crate::error::{Error, Result};
use crate::protocol::{
    frame_type, ContentHeader, FieldTable, Frame, FrameBuffer, FramePayload, Header, Method,
    RawFrame, DEFAULT_FRAME_MAX, FRAME_END, FRAME_OVERHEAD, HEADER_SIZE, PROTOCOL_HEADER,
};

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps
/// rather than arrays (positional).
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Method frame payload as it appears on the wire.
#[derive(Serialize)]
struct MethodPayloadRef<'a> {
    id: u32,
    properties: &'a FieldTable,
}

#[derive(Deserialize)]
struct MethodPayload {
    id: u32,
    #[serde(default)]
    properties: FieldTable,
}

/// Default [`FrameCodec`].
///
/// General frame layout `[type][channel][size][payload][0xCE]`; method and
/// content-header payloads are MessagePack, body payloads are raw bytes.
#[derive(Debug, Default)]
pub struct MsgPackFrameCodec {
    buffer: FrameBuffer,
}

impl MsgPackFrameCodec {
    /// Codec accepting frames up to the default frame_max.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_FRAME_MAX)
    }

    /// Codec with a custom frame size limit (0 = unlimited).
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: FrameBuffer::with_max_frame_size(max_frame_size),
        }
    }

    fn decode_raw(raw: RawFrame) -> Result<Frame> {
        let channel = raw.header.channel;
        match raw.header.frame_type {
            frame_type::METHOD => {
                let payload: MethodPayload = rmp_serde::from_slice(&raw.payload)
                    .map_err(|e| Error::Decode(format!("method payload: {}", e)))?;
                let method = Method::from_id(payload.id).ok_or_else(|| {
                    Error::Decode(format!("unknown method id 0x{:08X}", payload.id))
                })?;
                let properties = method.normalize(&payload.properties).map_err(Error::Decode)?;
                Ok(Frame::method(channel, method, properties))
            }
            frame_type::HEADER => {
                let header: ContentHeader = rmp_serde::from_slice(&raw.payload)
                    .map_err(|e| Error::Decode(format!("content header: {}", e)))?;
                Ok(Frame::header(channel, header))
            }
            frame_type::BODY => Ok(Frame::body(channel, raw.payload)),
            frame_type::HEARTBEAT => Ok(Frame::heartbeat()),
            other => Err(Error::Decode(format!("unknown frame type {}", other))),
        }
    }
}

impl FrameCodec for MsgPackFrameCodec {
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.buffer.try_extract(src)? {
            Some(raw) => Self::decode_raw(raw).map(Some),
            None => Ok(None),
        }
    }

    fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<()> {
        let payload: Vec<u8> = match &frame.payload {
            FramePayload::Method { method, properties } => {
                let properties = method.normalize(properties).map_err(Error::Encoding)?;
                rmp_serde::to_vec_named(&MethodPayloadRef {
                    id: method.id(),
                    properties: &properties,
                })
                .map_err(|e| Error::Encoding(format!("{}: {}", method, e)))?
            }
            FramePayload::Header(header) => rmp_serde::to_vec_named(header)
                .map_err(|e| Error::Encoding(format!("content header: {}", e)))?,
            FramePayload::Body(body) => body.to_vec(),
            FramePayload::Heartbeat => Vec::new(),
        };

        let max = self.buffer.max_frame_size();
        let frame_size = payload.len() as u64 + FRAME_OVERHEAD as u64;
        if payload.len() > u32::MAX as usize || (max != 0 && frame_size > max as u64) {
            return Err(Error::Encoding(format!(
                "frame size {} exceeds maximum {}",
                frame_size, max
            )));
        }

        let header = Header::new(frame.frame_type(), frame.channel, payload.len() as u32);
        dst.reserve(HEADER_SIZE + payload.len() + 1);
        dst.put_slice(&header.encode());
        dst.put_slice(&payload);
        dst.put_u8(FRAME_END);
        Ok(())
    }

    fn protocol_header(&self) -> &'static [u8] {
        PROTOCOL_HEADER
    }

    fn set_max_frame_size(&mut self, max_frame_size: u32) {
        self.buffer.set_max_frame_size(max_frame_size);
    }

    fn reset(&mut self) {
        self.buffer.clear();
    }
}
