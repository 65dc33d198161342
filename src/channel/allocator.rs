//! Channel id bookkeeping.
//!
//! Ids move `open -> released -> open`. Released ids are preferred over
//! fresh ones. An id that was released by the client is still open on the
//! broker side and can be reused without a new `channel_open` handshake;
//! an id the broker closed must handshake again.

use std::collections::BTreeMap;

use crate::error::{Result, UsageError};

/// Client-side state of an allocated channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Usable.
    Open,
    /// Closed by the broker; the reopen handshake is in progress or failed.
    Closing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// Released by the client; still open on the broker.
    Clean,
    /// Closed by the broker while released.
    ServerTerminated,
}

/// The outcome of [`ChannelAllocator::plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Allocation {
    pub(crate) id: u16,
    /// True unless the id was cleanly released earlier.
    pub(crate) needs_handshake: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ChannelAllocator {
    open: BTreeMap<u16, ChannelState>,
    released: BTreeMap<u16, Release>,
}

impl ChannelAllocator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Choose an id without changing any state.
    ///
    /// An explicit id must not be 0 or currently open. Without one, the
    /// smallest released id wins, else `max(open) + 1`. Either way the id
    /// must not exceed `max_channels`.
    pub(crate) fn plan(&self, requested: Option<u16>, max_channels: u16) -> Result<Allocation> {
        let id: u32 = match requested {
            Some(0) => return Err(UsageError::ReservedChannel.into()),
            Some(id) if self.open.contains_key(&id) => {
                return Err(UsageError::AlreadyInUse(id).into())
            }
            Some(id) => id as u32,
            None => match self.released.keys().next() {
                Some(&id) => id as u32,
                None => self.open.keys().next_back().map_or(1, |&max| max as u32 + 1),
            },
        };

        if id > max_channels as u32 {
            return Err(UsageError::ChannelIdTooHigh {
                id,
                max: max_channels,
            }
            .into());
        }

        let id = id as u16;
        Ok(Allocation {
            id,
            needs_handshake: self.released.get(&id) != Some(&Release::Clean),
        })
    }

    /// Mark a planned id open.
    pub(crate) fn commit(&mut self, id: u16) {
        self.released.remove(&id);
        self.open.insert(id, ChannelState::Open);
    }

    /// Move an open id to the released set. Returns false if it was not open.
    ///
    /// A `Closing` id was closed by the broker and never reopened, so it
    /// must handshake again when reused.
    pub(crate) fn release(&mut self, id: u16) -> bool {
        let release = match self.open.remove(&id) {
            None => return false,
            Some(ChannelState::Open) => Release::Clean,
            Some(ChannelState::Closing) => Release::ServerTerminated,
        };
        self.released.insert(id, release);
        true
    }

    /// Forget every id (connection closed or restarted).
    pub(crate) fn release_all(&mut self) {
        self.open.clear();
        self.released.clear();
    }

    /// The broker closed an id we had already released.
    pub(crate) fn mark_server_terminated(&mut self, id: u16) {
        if let Some(release) = self.released.get_mut(&id) {
            *release = Release::ServerTerminated;
        }
    }

    pub(crate) fn set_state(&mut self, id: u16, state: ChannelState) {
        if let Some(current) = self.open.get_mut(&id) {
            *current = state;
        }
    }

    pub(crate) fn state(&self, id: u16) -> Option<ChannelState> {
        self.open.get(&id).copied()
    }

    pub(crate) fn is_open(&self, id: u16) -> bool {
        self.open.contains_key(&id)
    }

    pub(crate) fn open_ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.open.keys().copied()
    }
}
