//! Request/response correlation.
//!
//! A request is fire-and-forget; its reply is awaited separately by naming
//! the channel and the acceptable response methods. Events for other
//! `(channel, method)` pairs read while waiting are routed and stored, so
//! a later wait for them finds them without touching the transport.

use crate::connection::Deadline;
use crate::error::{Error, Result};
use crate::protocol::{Event, FieldTable, Method};
use crate::session::Session;
use crate::transport::BoxFuture;

impl Session {
    /// Send one method frame on `channel`.
    pub(crate) async fn send_request(
        &mut self,
        channel: u16,
        method: Method,
        properties: FieldTable,
    ) -> Result<()> {
        self.conn.send_method(channel, method, properties).await
    }

    /// Wait for the first event on `channel` whose method is in `methods`.
    ///
    /// A matching pending event is returned immediately. Otherwise events
    /// are read until one matches; each is routed first, and non-matching
    /// events go through recovery or into the pending store. Hitting the
    /// deadline fails with `ResponseTimeout`.
    pub(crate) async fn fetch_response(
        &mut self,
        channel: u16,
        methods: &[Method],
        deadline: Deadline,
    ) -> Result<Event> {
        if let Some(event) = self.router.take(channel, methods) {
            return Ok(event);
        }

        loop {
            let event = self
                .conn
                .fetch_next_event(deadline)
                .await?
                .ok_or_else(|| Error::ResponseTimeout {
                    channel,
                    methods: methods.to_vec(),
                })?;

            self.route(&event).await?;

            if event.channel == channel && methods.contains(&event.method) {
                return Ok(event);
            }
            self.store_or_recover(event).await?;
        }
    }

    /// [`fetch_response`](Self::fetch_response) behind a box, for the
    /// channel reopen performed during recovery.
    pub(crate) fn fetch_response_boxed<'a>(
        &'a mut self,
        channel: u16,
        methods: &'a [Method],
        deadline: Deadline,
    ) -> BoxFuture<'a, Result<Event>> {
        Box::pin(self.fetch_response(channel, methods, deadline))
    }

    /// Send `method` and wait for one of `responses` on the same channel.
    pub(crate) async fn call(
        &mut self,
        channel: u16,
        method: Method,
        properties: FieldTable,
        responses: &[Method],
        deadline: Deadline,
    ) -> Result<Event> {
        self.send_request(channel, method, properties).await?;
        self.fetch_response(channel, responses, deadline).await
    }
}
