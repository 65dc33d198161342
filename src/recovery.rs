//! Broker close notifications.
//!
//! A `channel_close` with a channel-level reply code is recovered in place:
//! the close is acknowledged, the same id is reopened, and only then is the
//! error raised to the caller. Connection-level codes and `connection_close`
//! tear the whole session down.

use crate::channel::ChannelState;
use crate::connection::deadline;
use crate::error::{ChannelErrorKind, ConnectionErrorKind, Error, Result, ServerError};
use crate::protocol::{Event, FieldTable, Method};
use crate::session::Session;

/// Reply code classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplyClass {
    /// 200, a normal close.
    Clean,
    Channel(ChannelErrorKind),
    Connection(ConnectionErrorKind),
    Unknown(u16),
}

impl ReplyClass {
    fn of(code: u16) -> Self {
        if code == 200 {
            return Self::Clean;
        }
        if let Some(kind) = ChannelErrorKind::from_code(code) {
            return Self::Channel(kind);
        }
        match ConnectionErrorKind::from_code(code) {
            Some(kind) => Self::Connection(kind),
            None => Self::Unknown(code),
        }
    }
}

fn reply_code(event: &Event) -> u16 {
    event
        .int_property("reply_code")
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(0)
}

fn server_error<K>(kind: K, event: &Event) -> ServerError<K> {
    let id = |name: &str| {
        event
            .int_property(name)
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(0)
    };
    ServerError {
        kind,
        reply_code: reply_code(event),
        reply_text: event.str_property("reply_text").unwrap_or_default().to_string(),
        class_id: id("class_id"),
        method_id: id("method_id"),
        channel: event.channel,
    }
}

/// The error a `connection_close` notification maps to.
pub(crate) fn connection_close_error(event: &Event) -> Error {
    match ReplyClass::of(reply_code(event)) {
        ReplyClass::Clean => Error::ConnectionClosed,
        ReplyClass::Connection(kind) => Error::Connection(server_error(kind, event)),
        ReplyClass::Channel(kind) => Error::Protocol(format!(
            "connection closed with channel-level reply code {} ({:?}): {}",
            kind.code(),
            kind,
            event.str_property("reply_text").unwrap_or_default()
        )),
        ReplyClass::Unknown(code) => Error::UnknownReplyCode {
            code,
            method: Method::ConnectionClose,
        },
    }
}

impl Session {
    /// Dispatch an event nobody is waiting for: close notifications are
    /// recovered from, everything else goes to the pending store.
    pub(crate) async fn store_or_recover(&mut self, event: Event) -> Result<()> {
        match event.method {
            Method::ConnectionClose => Err(self.on_connection_close(event).await),
            Method::ChannelClose if event.channel != 0 => self.on_channel_close(event).await,
            _ => {
                self.router.store(event);
                Ok(())
            }
        }
    }

    async fn on_connection_close(&mut self, event: Event) -> Error {
        let error = connection_close_error(&event);
        tracing::warn!("Broker closed the connection: {}", error);

        if let Err(e) = self
            .conn
            .send_method(0, Method::ConnectionCloseOk, FieldTable::new())
            .await
        {
            tracing::debug!("Failed to send connection_close_ok: {}", e);
        }
        self.destroy();
        error
    }

    async fn on_channel_close(&mut self, event: Event) -> Result<()> {
        let id = event.channel;
        let error = match ReplyClass::of(reply_code(&event)) {
            ReplyClass::Clean => None,
            ReplyClass::Channel(kind) => Some(Error::Channel(server_error(kind, &event))),
            ReplyClass::Connection(kind) => {
                let error = Error::Connection(server_error(kind, &event));
                tracing::warn!("Connection-level error on channel {}: {}", id, error);
                self.destroy();
                return Err(error);
            }
            ReplyClass::Unknown(code) => {
                tracing::warn!("Unrecognized reply code {} closing channel {}", code, id);
                self.destroy();
                return Err(Error::UnknownReplyCode {
                    code,
                    method: Method::ChannelClose,
                });
            }
        };

        self.conn
            .send_method(id, Method::ChannelCloseOk, FieldTable::new())
            .await?;
        self.router.discard_pending(id);

        match self.channels.state(id) {
            Some(ChannelState::Open) => {}
            Some(ChannelState::Closing) => {
                // Closed again while reopening; the channel stays unusable.
                tracing::warn!("Channel {} closed during reopen", id);
                return error.map_or(Ok(()), Err);
            }
            None => {
                self.channels.mark_server_terminated(id);
                tracing::debug!("Broker closed released channel {}", id);
                return error.map_or(Ok(()), Err);
            }
        }

        match &error {
            Some(e) => tracing::warn!("Reopening channel {} after {}", id, e),
            None => tracing::debug!("Reopening channel {} after a normal close", id),
        }
        self.channels.set_state(id, ChannelState::Closing);
        let deadline = deadline(Some(self.protocol_timeout()));
        let reopened = match self
            .conn
            .send_method(id, Method::ChannelOpen, FieldTable::new())
            .await
        {
            Ok(()) => self
                .fetch_response_boxed(id, &[Method::ChannelOpenOk], deadline)
                .await
                .map(drop),
            Err(e) => Err(e),
        };
        if let Err(e) = reopened {
            // The channel stays Closing; releasing it forces a new handshake.
            match &error {
                Some(original) => {
                    tracing::warn!("Failed to reopen channel {} after {}: {}", id, original, e)
                }
                None => tracing::warn!("Failed to reopen channel {}: {}", id, e),
            }
            return Err(e);
        }
        self.channels.set_state(id, ChannelState::Open);

        error.map_or(Ok(()), Err)
    }
}
