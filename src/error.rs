//! Error types for amqp-session.
//!
//! Broker-reported failures are split into two disjoint families keyed by
//! reply code: [`ChannelErrorKind`] (the channel has already been reopened
//! when the caller sees the error) and [`ConnectionErrorKind`] (the
//! connection has been torn down and must be restarted).

use std::fmt;

use thiserror::Error;

use crate::protocol::Method;

/// Main error type for all session operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error while connecting, reading or writing the transport.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer closed the transport (EOF) underneath an operation.
    #[error("connection broken: transport closed by peer")]
    ConnectionBroken,

    /// Malformed or unexpected frame on the wire.
    #[error("protocol decode error: {0}")]
    Decode(String),

    /// A method could not be encoded (invalid field values).
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Handshake or protocol sequencing failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The broker closed a channel; the channel was reopened before this was raised.
    #[error("{0}")]
    Channel(ServerError<ChannelErrorKind>),

    /// The broker closed the connection; it is unusable until restarted.
    #[error("{0}")]
    Connection(ServerError<ConnectionErrorKind>),

    /// A close notification carried a reply code missing from the lookup table.
    #[error("unrecognized reply code {code} in {method}")]
    UnknownReplyCode {
        /// The reply code received.
        code: u16,
        /// The close method that carried it.
        method: Method,
    },

    /// No matching event arrived before the deadline.
    #[error("timed out waiting for {} on channel {channel}", method_list(.methods))]
    ResponseTimeout {
        /// Channel the caller was waiting on.
        channel: u16,
        /// Methods that would have satisfied the wait.
        methods: Vec<Method>,
    },

    /// Operation attempted on a connection that is not open.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Invalid use of the API.
    #[error("usage error: {0}")]
    Usage(#[from] UsageError),

    /// Invalid or unreadable configuration.
    #[error("config error: {0}")]
    Config(String),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

fn method_list(methods: &[Method]) -> String {
    methods
        .iter()
        .map(|m| m.name())
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Caller mistakes detected before anything is sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// Channel id 0 carries connection-level traffic only.
    #[error("channel 0 is reserved for the connection")]
    ReservedChannel,

    /// The requested channel id is currently open.
    #[error("channel {0} is already in use")]
    AlreadyInUse(u16),

    /// The requested or next free channel id exceeds `max_channels`.
    #[error("channel {id} is too high (max_channels is {max})")]
    ChannelIdTooHigh {
        /// Offending id.
        id: u32,
        /// Negotiated channel limit.
        max: u16,
    },

    /// The channel handle refers to a channel that is not open on the
    /// current connection (closed, being reopened, or from before a restart).
    #[error("channel {0} is not open")]
    ChannelNotOpen(u16),

    /// The method name is not part of the protocol table.
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
}

/// Common shape of broker close notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError<K> {
    /// Classified reply code.
    pub kind: K,
    /// Raw reply code.
    pub reply_code: u16,
    /// Human readable text from the broker.
    pub reply_text: String,
    /// Class of the method that caused the close (0 if unknown).
    pub class_id: u16,
    /// Method that caused the close (0 if unknown).
    pub method_id: u16,
    /// Channel the notification arrived on.
    pub channel: u16,
}

impl<K: fmt::Debug> fmt::Display for ServerError<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({}) on channel {}: {}",
            self.kind, self.reply_code, self.channel, self.reply_text
        )
    }
}

/// Channel-scoped broker errors (the channel is recoverable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelErrorKind {
    /// 311
    ContentTooLarge,
    /// 313
    NoConsumers,
    /// 403
    AccessRefused,
    /// 404
    NotFound,
    /// 405
    ResourceLocked,
    /// 406
    PreconditionFailed,
}

impl ChannelErrorKind {
    /// Look up a reply code in the channel-error table.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            311 => Self::ContentTooLarge,
            313 => Self::NoConsumers,
            403 => Self::AccessRefused,
            404 => Self::NotFound,
            405 => Self::ResourceLocked,
            406 => Self::PreconditionFailed,
            _ => return None,
        })
    }

    /// The reply code for this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::ContentTooLarge => 311,
            Self::NoConsumers => 313,
            Self::AccessRefused => 403,
            Self::NotFound => 404,
            Self::ResourceLocked => 405,
            Self::PreconditionFailed => 406,
        }
    }
}

/// Connection-scoped broker errors (fatal for the connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionErrorKind {
    /// 320
    ConnectionForced,
    /// 402
    InvalidPath,
    /// 501
    FrameError,
    /// 502
    SyntaxError,
    /// 503
    CommandInvalid,
    /// 504
    ChannelError,
    /// 505
    UnexpectedFrame,
    /// 506
    ResourceError,
    /// 530
    NotAllowed,
    /// 540
    NotImplemented,
    /// 541
    InternalError,
}

impl ConnectionErrorKind {
    /// Look up a reply code in the connection-error table.
    pub fn from_code(code: u16) -> Option<Self> {
        Some(match code {
            320 => Self::ConnectionForced,
            402 => Self::InvalidPath,
            501 => Self::FrameError,
            502 => Self::SyntaxError,
            503 => Self::CommandInvalid,
            504 => Self::ChannelError,
            505 => Self::UnexpectedFrame,
            506 => Self::ResourceError,
            530 => Self::NotAllowed,
            540 => Self::NotImplemented,
            541 => Self::InternalError,
            _ => return None,
        })
    }

    /// The reply code for this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::ConnectionForced => 320,
            Self::InvalidPath => 402,
            Self::FrameError => 501,
            Self::SyntaxError => 502,
            Self::CommandInvalid => 503,
            Self::ChannelError => 504,
            Self::UnexpectedFrame => 505,
            Self::ResourceError => 506,
            Self::NotAllowed => 530,
            Self::NotImplemented => 540,
            Self::InternalError => 541,
        }
    }
}

impl Error {
    /// The channel error kind, if this is a channel-scoped broker error.
    pub fn channel_kind(&self) -> Option<ChannelErrorKind> {
        match self {
            Self::Channel(e) => Some(e.kind),
            _ => None,
        }
    }

    /// The connection error kind, if this is a connection-scoped broker error.
    pub fn connection_kind(&self) -> Option<ConnectionErrorKind> {
        match self {
            Self::Connection(e) => Some(e.kind),
            _ => None,
        }
    }

    /// True for errors after which the connection must be restarted.
    pub fn is_availability_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectionBroken
                | Self::ConnectionClosed
                | Self::Transport(_)
                | Self::Decode(_)
                | Self::ResponseTimeout { .. }
        )
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_and_connection_tables_are_disjoint() {
        for code in 0..=u16::MAX {
            let channel = ChannelErrorKind::from_code(code).is_some();
            let connection = ConnectionErrorKind::from_code(code).is_some();
            assert!(!(channel && connection), "code {} in both tables", code);
        }
    }

    #[test]
    fn test_codes_roundtrip_through_table() {
        for code in [311, 313, 403, 404, 405, 406] {
            assert_eq!(ChannelErrorKind::from_code(code).unwrap().code(), code);
        }
        for code in [320, 402, 501, 502, 503, 504, 505, 506, 530, 540, 541] {
            assert_eq!(ConnectionErrorKind::from_code(code).unwrap().code(), code);
        }
        assert!(ChannelErrorKind::from_code(200).is_none());
        assert!(ConnectionErrorKind::from_code(200).is_none());
    }

    #[test]
    fn test_timeout_message_names_channel_and_methods() {
        let err = Error::ResponseTimeout {
            channel: 7,
            methods: vec![Method::BasicGetOk, Method::BasicGetEmpty],
        };
        let msg = err.to_string();
        assert!(msg.contains("channel 7"));
        assert!(msg.contains("basic_get_ok | basic_get_empty"));
    }

    #[test]
    fn test_server_error_display() {
        let err = Error::Channel(ServerError {
            kind: ChannelErrorKind::NotFound,
            reply_code: 404,
            reply_text: "NOT_FOUND - no queue 'q'".into(),
            class_id: 50,
            method_id: 30,
            channel: 3,
        });
        assert_eq!(err.channel_kind(), Some(ChannelErrorKind::NotFound));
        assert!(!err.is_availability_error());
        assert!(err.to_string().contains("NotFound (404) on channel 3"));
    }
}
