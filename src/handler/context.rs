//! Context passed to event handlers.
//!
//! Handlers run while the session is busy reading, so they cannot call back
//! into the [`Client`](crate::Client). Instead the context queues
//! fire-and-forget replies that are written right after the handler
//! returns, before the next event is processed:
//! - `ack` / `nack` / `reject` - settle a delivery
//! - `publish` - publish a message
//! - `send` - any other method without a response
//! - `break_loop` - stop the surrounding run loop
//!
//! # Example
//!
//! ```ignore
//! channel.on(Method::BasicDeliver, |event: &Event, ctx: &mut EventContext| {
//!     if let Some(tag) = event.delivery_tag() {
//!         ctx.ack(event.channel, tag, false)?;
//!     }
//!     Ok(())
//! }).await;
//! ```

use bytes::Bytes;

use crate::channel::PublishOptions;
use crate::error::Result;
use crate::field_table;
use crate::protocol::{content_frames, delivery_tag_value, FieldTable, Frame, Method};
use crate::run_loop::BreakHandle;

/// Outbox and loop control for one handler invocation.
pub struct EventContext {
    frames: Vec<Frame>,
    breaker: BreakHandle,
    max_frame_size: u32,
}

impl EventContext {
    pub(crate) fn new(breaker: BreakHandle, max_frame_size: u32) -> Self {
        Self {
            frames: Vec::new(),
            breaker,
            max_frame_size,
        }
    }

    /// Acknowledge a delivery.
    pub fn ack(&mut self, channel: u16, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.send(
            channel,
            Method::BasicAck,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "multiple" => multiple,
            },
        );
        Ok(())
    }

    /// Negatively acknowledge a delivery.
    pub fn nack(
        &mut self,
        channel: u16,
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    ) -> Result<()> {
        self.send(
            channel,
            Method::BasicNack,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "multiple" => multiple,
                "requeue" => requeue,
            },
        );
        Ok(())
    }

    /// Reject a single delivery.
    pub fn reject(&mut self, channel: u16, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.send(
            channel,
            Method::BasicReject,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "requeue" => requeue,
            },
        );
        Ok(())
    }

    /// Publish a message.
    pub fn publish(
        &mut self,
        channel: u16,
        exchange: &str,
        routing_key: &str,
        body: impl Into<Bytes>,
        options: &PublishOptions,
    ) {
        self.frames.extend(content_frames(
            channel,
            Method::BasicPublish,
            options.to_table(exchange, routing_key),
            options.properties.to_table(),
            body.into(),
            self.max_frame_size,
        ));
    }

    /// Queue any method. Fields are validated when the outbox is written.
    pub fn send(&mut self, channel: u16, method: Method, properties: FieldTable) {
        self.frames.push(Frame::method(channel, method, properties));
    }

    /// Stop the run loop after the current event.
    pub fn break_loop(&self) {
        self.breaker.break_loop();
    }

    /// Number of queued frames.
    pub fn pending(&self) -> usize {
        self.frames.len()
    }

    pub(crate) fn into_frames(self) -> Vec<Frame> {
        self.frames
    }
}
