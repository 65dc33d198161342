//! Handler module - event dispatch.
//!
//! Provides:
//! - [`EventHandler`] - callbacks registered per `(channel, method)`
//! - [`EventContext`] - lets handlers queue replies and break the run loop
//!
//! The registry that stores handlers also buffers unconsumed events for
//! later response matching.

mod context;
mod registry;

pub use context::EventContext;
pub use registry::{BoxedHandler, EventHandler};

pub(crate) use registry::EventRouter;
