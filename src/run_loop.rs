//! Event loop for consumers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::connection::Deadline;
use crate::error::Result;
use crate::handler::EventContext;
use crate::protocol::Event;
use crate::session::Session;

/// Cooperative stop flag for [`Client::run_loop`](crate::Client::run_loop).
///
/// The flag is checked between events, never in the middle of one, and is
/// cleared whenever a loop starts. Clones share the same flag, so a handle
/// can be moved into a handler or another task.
#[derive(Debug, Clone, Default)]
pub struct BreakHandle(Arc<AtomicBool>);

impl BreakHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running loop to return after the current event.
    pub fn break_loop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Loop-level callback invoked for every event after routing.
pub(crate) type LoopCallback<'a> =
    &'a mut (dyn FnMut(&Event, &mut EventContext) -> Result<()> + Send);

impl Session {
    /// Read and dispatch events until the deadline passes or the loop is
    /// broken.
    ///
    /// Each event is routed to its handler, then recovered from or stored.
    /// `on_event` sees every event last. A deadline expiry ends the loop
    /// without an error; any other failure propagates.
    pub(crate) async fn run_loop(
        &mut self,
        deadline: Deadline,
        mut on_event: Option<LoopCallback<'_>>,
    ) -> Result<()> {
        self.breaker.reset();

        while let Some(event) = self.conn.fetch_next_event(deadline).await? {
            self.route(&event).await?;

            match on_event.as_deref_mut() {
                Some(callback) => {
                    let seen = event.clone();
                    self.store_or_recover(event).await?;
                    let mut ctx =
                        EventContext::new(self.breaker.clone(), self.conn.max_frame_size());
                    callback(&seen, &mut ctx)?;
                    self.flush(ctx).await?;
                }
                None => self.store_or_recover(event).await?,
            }

            if self.breaker.is_set() {
                tracing::debug!("Run loop interrupted");
                break;
            }
        }
        Ok(())
    }
}
