//! Channel handles and the broker operation surface.
//!
//! A [`Channel`] is obtained from [`Client::channel`](crate::Client::channel)
//! and owns one channel id until it is released, explicitly with
//! [`Channel::release`] or implicitly when the handle is dropped.
//!
//! Request/response operations return the broker's reply as an [`Event`].
//! If the broker closes the channel in response, the channel is reopened
//! before the error is returned, so the handle stays usable.
//!
//! # Example
//!
//! ```ignore
//! let channel = client.channel(None).await?;
//! let ok = channel.queue_declare("q1", &QueueDeclareOptions::default()).await?;
//! assert_eq!(ok.str_property("queue"), Some("q1"));
//! channel.basic_publish(&b"hello"[..], "", "q1", &PublishOptions::persistent()).await?;
//! ```

pub(crate) mod allocator;
mod options;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::MutexGuard;

use crate::connection::{deadline, Deadline};
use crate::error::Result;
use crate::field_table;
use crate::handler::{BoxedHandler, EventContext};
use crate::protocol::{delivery_tag_value, Event, FieldTable, Method};
use crate::session::{Session, Shared};

pub use allocator::ChannelState;
pub use options::{
    BindOptions, ConsumeOptions, ExchangeDeclareOptions, ExchangeDeleteOptions, GetOptions,
    NackOptions, PublishOptions, QosOptions, QueueDeclareOptions, QueueDeleteOptions,
};

/// One open channel.
pub struct Channel {
    shared: Arc<Shared>,
    id: u16,
    epoch: u64,
    released: bool,
}

impl Channel {
    pub(crate) fn new(shared: Arc<Shared>, id: u16, epoch: u64) -> Self {
        Self {
            shared,
            id,
            epoch,
            released: false,
        }
    }

    /// The channel id.
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Give the id back to the allocator.
    ///
    /// No `channel_close` is sent: the channel stays open on the broker and
    /// the next allocation of this id skips the open handshake. Handlers and
    /// pending events of the channel are dropped.
    pub async fn release(mut self) {
        let mut session = self.shared.lock().await;
        session.release_channel(self.id, self.epoch);
        self.released = true;
    }

    async fn session(&self) -> Result<MutexGuard<'_, Session>> {
        let session = self.shared.lock().await;
        session.check_channel(self.id, self.epoch)?;
        Ok(session)
    }

    fn protocol_deadline(&self) -> Deadline {
        deadline(Some(self.shared.timeout.get()))
    }

    /// Send a method and wait for one of `responses`.
    async fn rpc(
        &self,
        method: Method,
        properties: FieldTable,
        responses: &[Method],
    ) -> Result<Event> {
        let deadline = self.protocol_deadline();
        let mut session = self.session().await?;
        session
            .call(self.id, method, properties, responses, deadline)
            .await
    }

    /// Send any method on this channel without waiting for a reply.
    pub async fn send_request(&self, method: Method, properties: FieldTable) -> Result<()> {
        let mut session = self.session().await?;
        session.send_request(self.id, method, properties).await
    }

    /// Wait for one of `methods` on this channel, within the protocol timeout.
    pub async fn fetch_response(&self, methods: &[Method]) -> Result<Event> {
        self.fetch_response_timeout(methods, Some(self.shared.timeout.get()))
            .await
    }

    /// Wait for one of `methods` on this channel; `None` waits forever.
    pub async fn fetch_response_timeout(
        &self,
        methods: &[Method],
        timeout: Option<Duration>,
    ) -> Result<Event> {
        let deadline = deadline(timeout);
        let mut session = self.session().await?;
        session.fetch_response(self.id, methods, deadline).await
    }

    /// Register the handler for `method` on this channel, returning the one
    /// it replaces.
    pub async fn on<F>(&self, method: Method, handler: F) -> Result<Option<BoxedHandler>>
    where
        F: FnMut(&Event, &mut EventContext) -> Result<()> + Send + 'static,
    {
        let mut session = self.session().await?;
        Ok(session.router.on(self.id, method, Box::new(handler)))
    }

    /// Remove the handler for `method` on this channel.
    pub async fn clear(&self, method: Method) -> Option<BoxedHandler> {
        let mut session = self.shared.lock().await;
        session.router.clear(self.id, method)
    }

    /// Run the connection's event loop; see [`Client::run_loop`](crate::Client::run_loop).
    pub async fn run_loop(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = deadline(timeout);
        let mut session = self.session().await?;
        session.run_loop(deadline, None).await
    }

    /// Stop the running event loop after the current event.
    pub fn break_loop(&self) {
        self.shared.breaker.break_loop();
    }

    pub async fn exchange_declare(
        &self,
        exchange: &str,
        kind: &str,
        options: &ExchangeDeclareOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::ExchangeDeclare,
            options.to_table(exchange, kind),
            &[Method::ExchangeDeclareOk],
        )
        .await
    }

    pub async fn exchange_delete(
        &self,
        exchange: &str,
        options: &ExchangeDeleteOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::ExchangeDelete,
            field_table! { "exchange" => exchange, "if_unused" => options.if_unused },
            &[Method::ExchangeDeleteOk],
        )
        .await
    }

    /// Bind exchange `destination` to exchange `source`.
    pub async fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        options: &BindOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::ExchangeBind,
            exchange_binding(destination, source, options),
            &[Method::ExchangeBindOk],
        )
        .await
    }

    pub async fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        options: &BindOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::ExchangeUnbind,
            exchange_binding(destination, source, options),
            &[Method::ExchangeUnbindOk],
        )
        .await
    }

    /// Declare a queue; the reply carries `queue`, `message_count` and
    /// `consumer_count`.
    pub async fn queue_declare(&self, queue: &str, options: &QueueDeclareOptions) -> Result<Event> {
        self.rpc(Method::QueueDeclare, options.to_table(queue), &[Method::QueueDeclareOk]).await
    }

    pub async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        options: &BindOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::QueueBind,
            queue_binding(queue, exchange, options),
            &[Method::QueueBindOk],
        )
        .await
    }

    pub async fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        options: &BindOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::QueueUnbind,
            queue_binding(queue, exchange, options),
            &[Method::QueueUnbindOk],
        )
        .await
    }

    pub async fn queue_purge(&self, queue: &str) -> Result<Event> {
        self.rpc(
            Method::QueuePurge,
            field_table! { "queue" => queue },
            &[Method::QueuePurgeOk],
        )
        .await
    }

    pub async fn queue_delete(&self, queue: &str, options: &QueueDeleteOptions) -> Result<Event> {
        self.rpc(
            Method::QueueDelete,
            field_table! {
                "queue" => queue,
                "if_unused" => options.if_unused,
                "if_empty" => options.if_empty,
            },
            &[Method::QueueDeleteOk],
        )
        .await
    }

    pub async fn basic_qos(&self, options: &QosOptions) -> Result<Event> {
        self.rpc(
            Method::BasicQos,
            field_table! {
                "prefetch_size" => options.prefetch_size,
                "prefetch_count" => options.prefetch_count,
                "global" => options.global,
            },
            &[Method::BasicQosOk],
        )
        .await
    }

    /// Start a consumer. An empty `consumer_tag` lets the broker pick one;
    /// the reply carries the tag in use.
    ///
    /// Deliveries arrive as `basic_deliver` events; register a handler with
    /// [`on`](Self::on) and drive them with [`run_loop`](Self::run_loop).
    pub async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
        options: &ConsumeOptions,
    ) -> Result<Event> {
        self.rpc(
            Method::BasicConsume,
            field_table! {
                "queue" => queue,
                "consumer_tag" => consumer_tag,
                "no_local" => options.no_local,
                "no_ack" => options.no_ack,
                "exclusive" => options.exclusive,
                "arguments" => options.arguments.clone(),
            },
            &[Method::BasicConsumeOk],
        )
        .await
    }

    pub async fn basic_cancel(&self, consumer_tag: &str) -> Result<Event> {
        self.rpc(
            Method::BasicCancel,
            field_table! { "consumer_tag" => consumer_tag },
            &[Method::BasicCancelOk],
        )
        .await
    }

    /// Fetch one message. The reply is `basic_get_ok` with the message
    /// content, or `basic_get_empty`.
    pub async fn basic_get(&self, queue: &str, options: &GetOptions) -> Result<Event> {
        self.rpc(
            Method::BasicGet,
            field_table! { "queue" => queue, "no_ack" => options.no_ack },
            &[Method::BasicGetOk, Method::BasicGetEmpty],
        )
        .await
    }

    /// Publish a message. Nothing is awaited after the write.
    pub async fn basic_publish(
        &self,
        body: impl Into<Bytes>,
        exchange: &str,
        routing_key: &str,
        options: &PublishOptions,
    ) -> Result<()> {
        let mut session = self.session().await?;
        session
            .conn
            .send_content(
                self.id,
                Method::BasicPublish,
                options.to_table(exchange, routing_key),
                options.properties.to_table(),
                body.into(),
            )
            .await
    }

    pub async fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<()> {
        self.send_request(
            Method::BasicAck,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "multiple" => multiple,
            },
        )
        .await
    }

    pub async fn basic_nack(&self, delivery_tag: u64, options: &NackOptions) -> Result<()> {
        self.send_request(
            Method::BasicNack,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "multiple" => options.multiple,
                "requeue" => options.requeue,
            },
        )
        .await
    }

    pub async fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        self.send_request(
            Method::BasicReject,
            field_table! {
                "delivery_tag" => delivery_tag_value(delivery_tag)?,
                "requeue" => requeue,
            },
        )
        .await
    }

    /// Redeliver unacknowledged messages.
    pub async fn basic_recover(&self, requeue: bool) -> Result<Event> {
        self.rpc(
            Method::BasicRecover,
            field_table! { "requeue" => requeue },
            &[Method::BasicRecoverOk],
        )
        .await
    }

    /// Enable publisher confirms on this channel.
    pub async fn confirm_select(&self) -> Result<Event> {
        self.rpc(Method::ConfirmSelect, FieldTable::new(), &[Method::ConfirmSelectOk])
            .await
    }

    pub async fn tx_select(&self) -> Result<Event> {
        self.rpc(Method::TxSelect, FieldTable::new(), &[Method::TxSelectOk])
            .await
    }

    pub async fn tx_commit(&self) -> Result<Event> {
        self.rpc(Method::TxCommit, FieldTable::new(), &[Method::TxCommitOk])
            .await
    }

    pub async fn tx_rollback(&self) -> Result<Event> {
        self.rpc(Method::TxRollback, FieldTable::new(), &[Method::TxRollbackOk])
            .await
    }
}

fn exchange_binding(destination: &str, source: &str, options: &BindOptions) -> FieldTable {
    field_table! {
        "destination" => destination,
        "source" => source,
        "routing_key" => options.routing_key.as_str(),
        "arguments" => options.arguments.clone(),
    }
}

fn queue_binding(queue: &str, exchange: &str, options: &BindOptions) -> FieldTable {
    field_table! {
        "queue" => queue,
        "exchange" => exchange,
        "routing_key" => options.routing_key.as_str(),
        "arguments" => options.arguments.clone(),
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if !self.released {
            self.shared.defer_release(self.id, self.epoch);
        }
    }
}
