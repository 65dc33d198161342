//! Physical connection: transport, codec, handshake and event assembly.
//!
//! [`Connection`] owns the transport exclusively. Reads only happen while a
//! caller is awaiting one of the fetch operations; there is no reader task.
//! All waits are bounded by a [`Deadline`] that the caller computes once at
//! the start of its top-level operation and passes down unchanged, so a
//! multi-frame event cannot stretch the wait past the caller's timeout.

use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;

use crate::codec::FrameCodec;
use crate::config::ConnectionOptions;
use crate::error::{Error, Result};
use crate::field_table;
use crate::protocol::{
    content_frames, Event, FieldTable, Frame, FramePayload, Method, Value, CHANNEL_MAX_ID,
    FRAME_MIN_SIZE,
};
use crate::recovery::connection_close_error;
use crate::transport::{Connector, Transport};

/// Absolute point in time a wait gives up at; `None` waits forever.
pub(crate) type Deadline = Option<Instant>;

/// Turn a timeout into a deadline, starting now.
///
/// `None` never expires, `Some(Duration::ZERO)` allows exactly one poll.
pub(crate) fn deadline(timeout: Option<Duration>) -> Deadline {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

const READ_CHUNK: usize = 64 * 1024;

/// Body buffers are preallocated up to this size; larger bodies grow.
const MAX_BODY_PREALLOC: u64 = 1024 * 1024;

pub(crate) struct Connection {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    codec: Box<dyn FrameCodec>,
    transport: Option<Box<dyn Transport>>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    max_channels: u16,
    max_frame_size: u32,
    heartbeat: Option<Duration>,
    last_write: Instant,
    server_properties: FieldTable,
}

impl Connection {
    pub(crate) fn new(
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        codec: Box<dyn FrameCodec>,
    ) -> Self {
        Self {
            max_channels: options.max_channels,
            max_frame_size: options.max_frame_size,
            options,
            connector,
            codec,
            transport: None,
            read_buf: BytesMut::new(),
            write_buf: BytesMut::new(),
            heartbeat: None,
            last_write: Instant::now(),
            server_properties: FieldTable::new(),
        }
    }

    pub(crate) fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Highest usable channel id (negotiated once logged in).
    pub(crate) fn max_channels(&self) -> u16 {
        self.max_channels
    }

    /// Frame size limit (negotiated once logged in, 0 = unlimited).
    pub(crate) fn max_frame_size(&self) -> u32 {
        self.max_frame_size
    }

    pub(crate) fn server_properties(&self) -> &FieldTable {
        &self.server_properties
    }

    pub(crate) fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Open the transport. Any previous transport is dropped first.
    pub(crate) async fn connect(&mut self) -> Result<()> {
        if self.options.ssl {
            return Err(Error::Config("TLS connections are not supported".into()));
        }

        self.destroy();
        let transport = self
            .connector
            .connect(&self.options.host, self.options.port)
            .await?;
        self.transport = Some(transport);
        self.last_write = Instant::now();
        Ok(())
    }

    /// Run the opening handshake on a freshly connected transport.
    pub(crate) async fn login(&mut self) -> Result<()> {
        let deadline = deadline(Some(self.options.protocol_timeout));

        let header = self.codec.protocol_header();
        self.write_raw(header).await?;

        let start = self.expect(Method::ConnectionStart, deadline).await?;
        let major = start.int_property("version_major").unwrap_or(-1);
        let minor = start.int_property("version_minor").unwrap_or(-1);
        if (major, minor) != (0, 9) {
            return Err(self.handshake_failed(format!(
                "unsupported protocol version {}-{}",
                major, minor
            )));
        }
        let mechanisms = start
            .property("mechanisms")
            .and_then(Value::as_bytes)
            .unwrap_or_default();
        if !mechanisms.split(|b| *b == b' ').any(|m| m == b"PLAIN") {
            return Err(self.handshake_failed(format!(
                "server does not offer PLAIN authentication (offers {:?})",
                String::from_utf8_lossy(mechanisms)
            )));
        }
        self.server_properties = start
            .property("server_properties")
            .and_then(Value::as_table)
            .cloned()
            .unwrap_or_default();

        let mut response =
            Vec::with_capacity(self.options.user.len() + self.options.password.len() + 2);
        response.push(0);
        response.extend_from_slice(self.options.user.as_bytes());
        response.push(0);
        response.extend_from_slice(self.options.password.as_bytes());
        self.send_method(
            0,
            Method::ConnectionStartOk,
            field_table! {
                "client_properties" => client_properties(),
                "mechanism" => "PLAIN",
                "response" => response,
                "locale" => "en_US",
            },
        )
        .await?;

        let tune = self.expect(Method::ConnectionTune, deadline).await?;
        let Tuning {
            channel_max,
            frame_max,
            heartbeat,
        } = negotiate_tune(&self.options, &tune)?;

        self.send_method(
            0,
            Method::ConnectionTuneOk,
            field_table! {
                "channel_max" => channel_max,
                "frame_max" => frame_max,
                "heartbeat" => heartbeat,
            },
        )
        .await?;

        self.max_channels = channel_max;
        self.max_frame_size = frame_max;
        self.codec.set_max_frame_size(frame_max);
        self.heartbeat = match heartbeat {
            0 => None,
            secs => Some(Duration::from_secs(secs as u64)),
        };

        self.send_method(
            0,
            Method::ConnectionOpen,
            field_table! { "virtual_host" => self.options.vhost.as_str() },
        )
        .await?;
        self.expect(Method::ConnectionOpenOk, deadline).await?;

        tracing::debug!(
            "Logged in to {} (vhost {:?}, channel_max {}, frame_max {}, heartbeat {}s)",
            self.options.address(),
            self.options.vhost,
            channel_max,
            frame_max,
            heartbeat
        );
        Ok(())
    }

    /// Graceful shutdown; failures are logged and otherwise ignored.
    pub(crate) async fn close(&mut self) {
        if self.transport.is_none() {
            return;
        }

        let deadline = deadline(Some(self.options.protocol_timeout));
        let sent = self
            .send_method(
                0,
                Method::ConnectionClose,
                field_table! { "reply_code" => 200u16, "reply_text" => "Normal shutdown" },
            )
            .await;

        if let Err(e) = sent {
            tracing::warn!("Failed to send connection_close: {}", e);
        } else {
            loop {
                match self.fetch_next_event(deadline).await {
                    Ok(Some(event))
                        if event.channel == 0
                            && matches!(
                                event.method,
                                Method::ConnectionCloseOk | Method::ConnectionClose
                            ) =>
                    {
                        break
                    }
                    Ok(Some(event)) => tracing::trace!(
                        "Dropping {} on channel {} during close",
                        event.method,
                        event.channel
                    ),
                    Ok(None) => {
                        tracing::warn!("Timed out waiting for connection_close_ok");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("Error while waiting for connection_close_ok: {}", e);
                        break;
                    }
                }
            }
        }

        self.destroy();
        tracing::debug!("Connection to {} closed", self.options.address());
    }

    /// Drop the transport without a handshake. Idempotent.
    pub(crate) fn destroy(&mut self) {
        self.transport = None;
        self.read_buf.clear();
        self.write_buf.clear();
        self.codec.reset();
        self.codec.set_max_frame_size(self.options.max_frame_size);
        self.max_channels = self.options.max_channels;
        self.max_frame_size = self.options.max_frame_size;
        self.heartbeat = None;
    }

    /// Encode and send one method frame.
    pub(crate) async fn send_method(
        &mut self,
        channel: u16,
        method: Method,
        properties: FieldTable,
    ) -> Result<()> {
        self.send_frames(&[Frame::method(channel, method, properties)])
            .await
    }

    /// Send a content-bearing method with its header and body in one write.
    pub(crate) async fn send_content(
        &mut self,
        channel: u16,
        method: Method,
        properties: FieldTable,
        header_properties: FieldTable,
        body: Bytes,
    ) -> Result<()> {
        let frames = content_frames(
            channel,
            method,
            properties,
            header_properties,
            body,
            self.max_frame_size,
        );
        self.send_frames(&frames).await
    }

    /// Encode all frames, then write them with a single transport write.
    ///
    /// Nothing is written if any frame fails to encode.
    pub(crate) async fn send_frames(&mut self, frames: &[Frame]) -> Result<()> {
        if self.transport.is_none() {
            return Err(Error::ConnectionClosed);
        }

        self.write_buf.clear();
        for frame in frames {
            if let Err(e) = self.codec.encode(frame, &mut self.write_buf) {
                self.write_buf.clear();
                return Err(e);
            }
            tracing::trace!(
                "Send frame type {} on channel {}{}",
                frame.frame_type(),
                frame.channel,
                frame.method_kind().map(|m| format!(" ({})", m)).unwrap_or_default()
            );
        }

        let buf = self.write_buf.split().freeze();
        self.write_raw(&buf).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
        let written = async {
            transport.write_all(bytes).await?;
            transport.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                self.last_write = Instant::now();
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Write to {} failed: {}", self.options.address(), e);
                self.destroy();
                Err(Error::Transport(e))
            }
        }
    }

    fn heartbeat_due(&self) -> Option<Instant> {
        self.heartbeat.map(|interval| self.last_write + interval / 2)
    }

    /// Next frame from the transport, or `None` once `deadline` has passed.
    ///
    /// Already buffered bytes are decoded before any read. EOF or a read
    /// error drops the transport and fails with `ConnectionBroken`.
    pub(crate) async fn fetch_next_frame(&mut self, deadline: Deadline) -> Result<Option<Frame>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.read_buf)? {
                tracing::trace!(
                    "Received frame type {} on channel {}{}",
                    frame.frame_type(),
                    frame.channel,
                    frame.method_kind().map(|m| format!(" ({})", m)).unwrap_or_default()
                );
                return Ok(Some(frame));
            }

            let wake = match (deadline, self.heartbeat_due()) {
                (Some(d), Some(h)) => Some(d.min(h)),
                (d, h) => d.or(h),
            };

            let read = {
                let transport = self.transport.as_mut().ok_or(Error::ConnectionClosed)?;
                self.read_buf.reserve(READ_CHUNK);
                let read = transport.read_buf(&mut self.read_buf);
                match wake {
                    Some(at) => tokio::time::timeout_at(at, read).await.ok(),
                    None => Some(read.await),
                }
            };

            match read {
                Some(Ok(0)) => {
                    tracing::debug!("Transport closed by {}", self.options.address());
                    self.destroy();
                    return Err(Error::ConnectionBroken);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    tracing::warn!("Read from {} failed: {}", self.options.address(), e);
                    self.destroy();
                    return Err(Error::ConnectionBroken);
                }
                None => {
                    let now = Instant::now();
                    if self.heartbeat_due().is_some_and(|due| now >= due) {
                        self.send_frames(&[Frame::heartbeat()]).await?;
                    }
                    if deadline.is_some_and(|d| now >= d) {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Next complete event, or `None` once `deadline` has passed.
    ///
    /// Content-bearing methods are returned only after their header and the
    /// full body have arrived. A deadline hit mid-assembly drops the partial
    /// event; its remaining content frames are discarded when they arrive.
    pub(crate) async fn fetch_next_event(&mut self, deadline: Deadline) -> Result<Option<Event>> {
        let (channel, method, properties) = loop {
            let frame = match self.fetch_next_frame(deadline).await? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            match frame.payload {
                FramePayload::Method { method, properties } => {
                    break (frame.channel, method, properties)
                }
                FramePayload::Heartbeat => continue,
                FramePayload::Header(_) | FramePayload::Body(_) => {
                    tracing::warn!(
                        "Discarding content frame without a method on channel {}",
                        frame.channel
                    );
                }
            }
        };

        let mut event = Event::new(channel, method, properties);
        if !method.has_content() {
            return Ok(Some(event));
        }

        let header = loop {
            let frame = match self.fetch_next_frame(deadline).await? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            match frame.payload {
                FramePayload::Heartbeat => continue,
                FramePayload::Header(header) if frame.channel == channel => break header,
                _ => {
                    return Err(Error::Decode(format!(
                        "expected content header for {} on channel {}, \
                         got frame type {} on channel {}",
                        method,
                        channel,
                        frame.frame_type(),
                        frame.channel
                    )))
                }
            }
        };

        let mut body = BytesMut::with_capacity(header.body_size.min(MAX_BODY_PREALLOC) as usize);
        while (body.len() as u64) < header.body_size {
            let frame = match self.fetch_next_frame(deadline).await? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            match frame.payload {
                FramePayload::Heartbeat => continue,
                FramePayload::Body(fragment) if frame.channel == channel => {
                    body.extend_from_slice(&fragment);
                    if body.len() as u64 > header.body_size {
                        return Err(Error::Decode(format!(
                            "body of {} on channel {} exceeds declared size {}",
                            method, channel, header.body_size
                        )));
                    }
                }
                _ => {
                    return Err(Error::Decode(format!(
                        "expected body for {} on channel {}, got frame type {} on channel {}",
                        method,
                        channel,
                        frame.frame_type(),
                        frame.channel
                    )))
                }
            }
        }

        event.header = Some(header);
        event.body = Some(body.freeze());
        Ok(Some(event))
    }

    /// Wait for `method` on channel 0 during the handshake.
    async fn expect(&mut self, method: Method, deadline: Deadline) -> Result<Event> {
        loop {
            let event = self
                .fetch_next_event(deadline)
                .await?
                .ok_or_else(|| Error::ResponseTimeout {
                    channel: 0,
                    methods: vec![method],
                })?;

            if event.channel != 0 {
                tracing::warn!(
                    "Ignoring {} on channel {} during handshake",
                    event.method,
                    event.channel
                );
                continue;
            }
            if event.method == method {
                return Ok(event);
            }
            if event.method == Method::ConnectionClose {
                let _ = self
                    .send_method(0, Method::ConnectionCloseOk, FieldTable::new())
                    .await;
                self.destroy();
                return Err(connection_close_error(&event));
            }
            return Err(self.handshake_failed(format!(
                "expected {} during handshake, got {}",
                method, event.method
            )));
        }
    }

    fn handshake_failed(&mut self, reason: String) -> Error {
        self.destroy();
        Error::Protocol(reason)
    }
}

/// Pick the smaller of two limits where 0 means "no limit".
/// Limits agreed in `connection_tune_ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Tuning {
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
}

fn negotiate_tune(options: &ConnectionOptions, tune: &Event) -> Result<Tuning> {
    let server_channel_max: u16 = tune_field(tune, "channel_max")?;
    let server_frame_max: u32 = tune_field(tune, "frame_max")?;
    let server_heartbeat: u16 = tune_field(tune, "heartbeat")?;

    if server_frame_max != 0 && server_frame_max < FRAME_MIN_SIZE {
        return Err(Error::Protocol(format!(
            "broker frame_max {} is below the minimum of {}",
            server_frame_max, FRAME_MIN_SIZE
        )));
    }

    let channel_max = negotiate(options.max_channels.into(), server_channel_max.into());
    let heartbeat = negotiate(options.heartbeat.into(), server_heartbeat.into());
    Ok(Tuning {
        channel_max: match u16::try_from(channel_max) {
            Ok(0) | Err(_) => CHANNEL_MAX_ID,
            Ok(n) => n,
        },
        frame_max: negotiate(options.max_frame_size, server_frame_max),
        heartbeat: u16::try_from(heartbeat).unwrap_or(u16::MAX),
    })
}

/// An integer field of `connection_tune`, absent meaning 0.
fn tune_field<T: TryFrom<i64>>(tune: &Event, name: &str) -> Result<T> {
    let value = tune.int_property(name).unwrap_or(0);
    T::try_from(value).map_err(|_| {
        Error::Protocol(format!("connection_tune {} out of range: {}", name, value))
    })
}

fn negotiate(client: u32, server: u32) -> u32 {
    match (client, server) {
        (0, s) => s,
        (c, 0) => c,
        (c, s) => c.min(s),
    }
}

fn client_properties() -> FieldTable {
    field_table! {
        "product" => env!("CARGO_PKG_NAME"),
        "version" => env!("CARGO_PKG_VERSION"),
        "platform" => "Rust",
        "capabilities" => field_table! {
            "publisher_confirms" => true,
            "consumer_cancel_notify" => true,
            "basic.nack" => true,
            "connection.blocked" => true,
        },
    }
}
