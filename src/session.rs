//! Per-connection session state.
//!
//! A [`Session`] groups the connection, the channel allocator and the event
//! router. It lives behind one `tokio::sync::Mutex` shared by the client and
//! all of its channel handles; every operation holds the lock from start to
//! finish, so there is exactly one logical thread of control per connection.
//!
//! Channel handles release their id on drop. `Drop` cannot await the lock,
//! so the id is parked on a side list and applied at the start of the next
//! locked operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::channel::ChannelState;
use crate::channel::allocator::ChannelAllocator;
use crate::connection::{deadline, Connection};
use crate::error::{Error, Result, UsageError};
use crate::handler::{EventContext, EventRouter};
use crate::protocol::{Event, FieldTable, Method};
use crate::run_loop::BreakHandle;

/// Default operation timeout, readable without taking the session lock.
#[derive(Debug)]
pub(crate) struct ProtocolTimeout(AtomicU64);

impl ProtocolTimeout {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self(AtomicU64::new(Self::to_nanos(timeout)))
    }

    pub(crate) fn get(&self) -> Duration {
        Duration::from_nanos(self.0.load(Ordering::Relaxed))
    }

    pub(crate) fn set(&self, timeout: Duration) {
        self.0.store(Self::to_nanos(timeout), Ordering::Relaxed);
    }

    fn to_nanos(timeout: Duration) -> u64 {
        u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// State shared by a client and its channel handles.
pub(crate) struct Shared {
    session: Mutex<Session>,
    /// `(channel id, epoch)` pairs released by dropped handles.
    deferred: StdMutex<Vec<(u16, u64)>>,
    pub(crate) breaker: BreakHandle,
    pub(crate) timeout: Arc<ProtocolTimeout>,
}

impl Shared {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            breaker: session.breaker.clone(),
            timeout: session.timeout.clone(),
            session: Mutex::new(session),
            deferred: StdMutex::new(Vec::new()),
        }
    }

    /// Lock the session and apply releases deferred by dropped handles.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, Session> {
        let mut session = self.session.lock().await;
        let deferred = std::mem::take(
            &mut *self
                .deferred
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for (id, epoch) in deferred {
            session.release_channel(id, epoch);
        }
        session
    }

    pub(crate) fn defer_release(&self, id: u16, epoch: u64) {
        self.deferred
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, epoch));
    }
}

pub(crate) struct Session {
    pub(crate) conn: Connection,
    pub(crate) channels: ChannelAllocator,
    pub(crate) router: EventRouter,
    pub(crate) breaker: BreakHandle,
    pub(crate) timeout: Arc<ProtocolTimeout>,
    /// Bumped whenever every channel is released, so handles from an
    /// earlier connection cannot release ids reallocated since.
    pub(crate) epoch: u64,
}

impl Session {
    pub(crate) fn new(conn: Connection, protocol_timeout: Duration) -> Self {
        Self {
            conn,
            channels: ChannelAllocator::new(),
            router: EventRouter::new(),
            breaker: BreakHandle::new(),
            timeout: Arc::new(ProtocolTimeout::new(protocol_timeout)),
            epoch: 0,
        }
    }

    /// A session whose connector never connects.
    #[cfg(test)]
    pub(crate) fn offline() -> Self {
        let conn = Connection::new(
            crate::config::ConnectionOptions::default(),
            Arc::new(crate::transport::TcpConnector::new()),
            Box::new(crate::codec::MsgPackFrameCodec::new()),
        );
        Self::new(conn, Duration::from_secs(1))
    }

    pub(crate) fn protocol_timeout(&self) -> Duration {
        self.timeout.get()
    }

    /// Close any previous connection, then connect and log in.
    pub(crate) async fn start(&mut self) -> Result<()> {
        self.close().await;
        self.conn.connect().await?;
        if let Err(e) = self.conn.login().await {
            self.destroy();
            return Err(e);
        }
        Ok(())
    }

    /// Graceful close; every channel id is released.
    pub(crate) async fn close(&mut self) {
        self.conn.close().await;
        self.release_all();
    }

    /// Drop the transport without a handshake; every channel id is released.
    pub(crate) fn destroy(&mut self) {
        self.conn.destroy();
        self.release_all();
    }

    pub(crate) fn release_all(&mut self) {
        self.channels.release_all();
        self.router.clear_all();
        self.epoch += 1;
    }

    /// Allocate a channel id, opening it on the broker when needed.
    ///
    /// Allocator state is only updated once the id is usable.
    pub(crate) async fn allocate(&mut self, requested: Option<u16>) -> Result<u16> {
        if !self.conn.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let plan = self.channels.plan(requested, self.conn.max_channels())?;
        if plan.needs_handshake {
            let deadline = deadline(Some(self.protocol_timeout()));
            self.conn
                .send_method(plan.id, Method::ChannelOpen, FieldTable::new())
                .await?;
            self.fetch_response(plan.id, &[Method::ChannelOpenOk], deadline)
                .await?;
        }

        self.channels.commit(plan.id);
        self.router.discard_pending(plan.id);
        tracing::debug!(
            "Allocated channel {}{}",
            plan.id,
            if plan.needs_handshake { "" } else { " (reused)" }
        );
        Ok(plan.id)
    }

    /// Release an id allocated in `epoch`. Ignored for stale epochs and ids
    /// that are not open.
    pub(crate) fn release_channel(&mut self, id: u16, epoch: u64) {
        if epoch != self.epoch {
            return;
        }
        if self.channels.release(id) {
            self.router.clear_channel(id);
            tracing::debug!("Released channel {}", id);
        }
    }

    /// Fail fast if a handle's channel cannot be used right now.
    pub(crate) fn check_channel(&self, id: u16, epoch: u64) -> Result<()> {
        if !self.conn.is_open() {
            return Err(Error::ConnectionClosed);
        }
        if epoch != self.epoch || self.channels.state(id) != Some(ChannelState::Open) {
            return Err(UsageError::ChannelNotOpen(id).into());
        }
        Ok(())
    }

    /// Invoke the handler registered for the event, if any, then write the
    /// replies it queued.
    pub(crate) async fn route(&mut self, event: &Event) -> Result<()> {
        let Some(handler) = self.router.handler_mut(event.channel, event.method) else {
            return Ok(());
        };
        let mut ctx = EventContext::new(self.breaker.clone(), self.conn.max_frame_size());
        handler.handle(event, &mut ctx)?;
        self.flush(ctx).await
    }

    pub(crate) async fn flush(&mut self, ctx: EventContext) -> Result<()> {
        let frames = ctx.into_frames();
        if frames.is_empty() {
            return Ok(());
        }
        self.conn.send_frames(&frames).await
    }
}
