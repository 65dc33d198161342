//! Transport module - byte streams to the broker.
//!
//! Provides:
//! - [`Transport`] - any bidirectional async byte stream
//! - [`Connector`] - opens a [`Transport`] to `host:port`
//! - [`TcpConnector`] - the default, plain TCP

mod tcp;

use std::future::Future;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

pub use tcp::TcpConnector;

/// Boxed future returned by [`Connector::connect`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A connected, bidirectional byte stream.
///
/// Readiness is expressed by a read completing; the session layer bounds
/// reads with its own deadlines.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Opens transports.
///
/// Called once per [`Client::start`](crate::Client::start); a restart opens a
/// fresh transport.
pub trait Connector: Send + Sync + 'static {
    /// Connect to `host:port`.
    fn connect<'a>(&'a self, host: &'a str, port: u16) -> BoxFuture<'a, Result<Box<dyn Transport>>>;
}
