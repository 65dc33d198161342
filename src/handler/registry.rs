//! Per-channel handler registry and pending-event store.
//!
//! Both maps are keyed by `(channel, method)` and hold at most one entry per
//! key: registering a handler replaces the previous one, and storing an
//! event overwrites any unconsumed event of the same kind (last write wins,
//! not a queue).

use std::collections::HashMap;

use super::EventContext;
use crate::error::Result;
use crate::protocol::{Event, Method};

/// Callback invoked for events on one `(channel, method)`.
///
/// Implemented for every `FnMut(&Event, &mut EventContext) -> Result<()>`.
/// Errors propagate to the caller of the operation that read the event.
pub trait EventHandler: Send + 'static {
    /// Handle one event.
    fn handle(&mut self, event: &Event, ctx: &mut EventContext) -> Result<()>;
}

impl<F> EventHandler for F
where
    F: FnMut(&Event, &mut EventContext) -> Result<()> + Send + 'static,
{
    fn handle(&mut self, event: &Event, ctx: &mut EventContext) -> Result<()> {
        self(event, ctx)
    }
}

/// A registered handler.
pub type BoxedHandler = Box<dyn EventHandler>;

type Key = (u16, Method);

#[derive(Default)]
pub(crate) struct EventRouter {
    handlers: HashMap<Key, BoxedHandler>,
    pending: HashMap<Key, Event>,
}

impl EventRouter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register `handler`, returning the one it replaces.
    pub(crate) fn on(
        &mut self,
        channel: u16,
        method: Method,
        handler: BoxedHandler,
    ) -> Option<BoxedHandler> {
        self.handlers.insert((channel, method), handler)
    }

    /// Remove and return the handler for `(channel, method)`.
    pub(crate) fn clear(&mut self, channel: u16, method: Method) -> Option<BoxedHandler> {
        self.handlers.remove(&(channel, method))
    }

    pub(crate) fn handler_mut(
        &mut self,
        channel: u16,
        method: Method,
    ) -> Option<&mut BoxedHandler> {
        self.handlers.get_mut(&(channel, method))
    }

    pub(crate) fn has_handler(&self, channel: u16, method: Method) -> bool {
        self.handlers.contains_key(&(channel, method))
    }

    /// Keep `event` for a later [`take`](Self::take), replacing any
    /// unconsumed event with the same key.
    pub(crate) fn store(&mut self, event: Event) {
        if let Some(old) = self.pending.insert((event.channel, event.method), event) {
            tracing::trace!(
                "Overwrote unconsumed {} on channel {}",
                old.method,
                old.channel
            );
        }
    }

    /// Pop the first pending event among `methods` (in the given order).
    pub(crate) fn take(&mut self, channel: u16, methods: &[Method]) -> Option<Event> {
        methods
            .iter()
            .find_map(|&method| self.pending.remove(&(channel, method)))
    }

    pub(crate) fn pending_count(&self, channel: u16) -> usize {
        self.pending.keys().filter(|(ch, _)| *ch == channel).count()
    }

    /// Drop the pending events of one channel.
    pub(crate) fn discard_pending(&mut self, channel: u16) {
        self.pending.retain(|(ch, _), _| *ch != channel);
    }

    /// Drop handlers and pending events of one channel.
    pub(crate) fn clear_channel(&mut self, channel: u16) {
        self.handlers.retain(|(ch, _), _| *ch != channel);
        self.discard_pending(channel);
    }

    pub(crate) fn clear_all(&mut self) {
        self.handlers.clear();
        self.pending.clear();
    }
}
