//! # amqp-session
//!
//! Session layer of an AMQP 0-9-1 style broker client.
//!
//! One physical connection carries many logical channels. This crate
//! allocates channel ids, turns the shared asynchronous frame stream into
//! request/response calls, hands unsolicited events to per-channel
//! handlers, and recovers from broker-initiated channel closes.
//!
//! ## Architecture
//!
//! - **Connection**: transport + codec, handshake, multi-frame event assembly
//! - **Session**: channel allocator, handler registry, pending-event store
//! - **Client / Channel**: the public operation surface
//!
//! There is no background reader. Frames are read only while an operation
//! (a request/response call, the run loop, the handshake) is awaiting them;
//! events read on behalf of one call are kept for the next call that asks.
//!
//! ## Example
//!
//! ```ignore
//! use amqp_session::channel::{GetOptions, PublishOptions, QueueDeclareOptions};
//! use amqp_session::{Client, Method};
//!
//! #[tokio::main]
//! async fn main() -> amqp_session::Result<()> {
//!     let client = Client::builder().url("amqp://localhost").build()?;
//!     client.start().await?;
//!
//!     let channel = client.channel(None).await?;
//!     channel
//!         .queue_declare("q1", &QueueDeclareOptions { durable: true, ..Default::default() })
//!         .await?;
//!     channel.basic_publish(&b"hello"[..], "", "q1", &PublishOptions::persistent()).await?;
//!
//!     let reply = channel.basic_get("q1", &GetOptions { no_ack: true }).await?;
//!     assert_eq!(reply.method, Method::BasicGetOk);
//!     assert_eq!(reply.body(), b"hello");
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;

mod client;
mod connection;
mod recovery;
mod rpc;
mod run_loop;
mod session;

pub use channel::{Channel, ChannelState};
pub use client::{Client, ClientBuilder};
pub use config::ConnectionOptions;
pub use error::{ChannelErrorKind, ConnectionErrorKind, Error, Result, ServerError, UsageError};
pub use handler::{BoxedHandler, EventContext, EventHandler};
pub use protocol::{BasicProperties, Event, FieldTable, Method, Value};
pub use run_loop::BreakHandle;
