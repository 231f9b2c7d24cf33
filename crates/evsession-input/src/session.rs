//! Device session: descriptor binding, grab state, and the read-and-sync
//! state machine.
//!
//! A session pulls raw records from its [`EventChannel`], decodes them, and
//! tags each one as a live event or as part of a resynchronization diff.
//! After the kernel reports `SYN_DROPPED` (or the caller forces a resync) the
//! session is in [`SyncMode::Draining`] and every record it returns is a
//! [`ReadOutcome::SyncBoundary`] until the channel runs dry.
//!
//! Callers that skip sync-boundary events must not assume any device state
//! (held keys, absolute positions) carried across the boundary; they should
//! re-query the device instead.

use evsession_types::{DeviceIdentity, StampedEvent};
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::{EventChannel, GrabMode, ReadFlag};

/// Exclusive-access state of the current descriptor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrabState {
    #[default]
    Ungrabbed,
    Grabbed,
}

/// Protocol mode of the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// Delivering live events.
    #[default]
    Normal,
    /// Replaying a device-state diff after an overflow or forced resync.
    Draining,
}

/// How [`DeviceSession::next_event`] should behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    Normal,
    /// Throw away the channel's notion of device state and start a
    /// resynchronization pass. Produces no event.
    ForceResync,
}

/// Result of a successful [`DeviceSession::next_event`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A live event.
    Delivered(StampedEvent),
    /// The `SYN_DROPPED` marker itself, or one element of the state diff.
    SyncBoundary(StampedEvent),
    /// A forced resync was started; drain it with further normal reads.
    ResyncStarted,
}

impl ReadOutcome {
    pub fn event(&self) -> Option<&StampedEvent> {
        match self {
            Self::Delivered(event) | Self::SyncBoundary(event) => Some(event),
            Self::ResyncStarted => None,
        }
    }

    pub fn is_sync_boundary(&self) -> bool {
        matches!(self, Self::SyncBoundary(_))
    }
}

/// A typed view of one evdev device.
///
/// The session owns its channel but not the caller's descriptor: channels
/// built from a borrowed descriptor hold their own duplicate, so dropping the
/// session never closes the caller's handle.
pub struct DeviceSession<C> {
    channel: Option<C>,
    grab: GrabState,
    mode: SyncMode,
}

impl<C> Default for DeviceSession<C> {
    fn default() -> Self {
        Self {
            channel: None,
            grab: GrabState::Ungrabbed,
            mode: SyncMode::Normal,
        }
    }
}

impl<C: EventChannel> DeviceSession<C> {
    /// Create a session with no descriptor bound.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with `channel` bound immediately.
    pub fn with_channel(channel: C) -> Self {
        Self {
            channel: Some(channel),
            ..Self::default()
        }
    }

    /// Bind the initial descriptor. Only valid once; use [`rebind`] after.
    ///
    /// [`rebind`]: Self::rebind
    pub fn bind(&mut self, channel: C) -> Result<(), SessionError> {
        if self.channel.is_some() {
            return Err(SessionError::AlreadyBound);
        }
        debug!(device = %channel.identity().name, "bound descriptor");
        self.channel = Some(channel);
        Ok(())
    }

    /// Swap the active descriptor in place and hand back the previous one.
    ///
    /// The grab does not carry over. No resync is started: the caller should
    /// force one if it needs device state to match the new descriptor.
    pub fn rebind(&mut self, channel: C) -> Result<C, SessionError> {
        let previous = self.channel.take().ok_or(SessionError::NoPriorBind)?;
        if self.grab == GrabState::Grabbed {
            debug!("grab released by rebind");
        }
        self.grab = GrabState::Ungrabbed;
        info!(device = %channel.identity().name, "rebound descriptor");
        self.channel = Some(channel);
        Ok(previous)
    }

    /// Grab or release the device. Requesting the current state is a no-op.
    pub fn set_grab(&mut self, mode: GrabMode) -> Result<(), SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotBound)?;
        let target = match mode {
            GrabMode::Grab => GrabState::Grabbed,
            GrabMode::Ungrab => GrabState::Ungrabbed,
        };
        if self.grab == target {
            return Ok(());
        }

        channel.set_grab(mode).map_err(SessionError::GrabDenied)?;
        self.grab = target;
        info!(state = ?target, "grab state changed");
        Ok(())
    }

    /// Produce the next typed event, or start a resync.
    ///
    /// `Err(WouldBlock)` is the routine "nothing now" result. When it is
    /// returned while draining, the session is back in [`SyncMode::Normal`].
    pub fn next_event(&mut self, mode: ReadMode) -> Result<ReadOutcome, SessionError> {
        let channel = self.channel.as_mut().ok_or(SessionError::NotBound)?;

        if mode == ReadMode::ForceResync {
            channel
                .force_resync()
                .map_err(SessionError::from_channel)?;
            self.mode = SyncMode::Draining;
            info!("forced resync started");
            return Ok(ReadOutcome::ResyncStarted);
        }

        let flag = match self.mode {
            SyncMode::Normal => ReadFlag::Normal,
            SyncMode::Draining => ReadFlag::Sync,
        };

        let raw = match channel.read_event(flag) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                if self.mode == SyncMode::Draining {
                    self.mode = SyncMode::Normal;
                    debug!("resync diff drained");
                }
                return Err(SessionError::WouldBlock);
            }
            Err(err) => return Err(SessionError::from_channel(err)),
        };

        let event = StampedEvent::decode(&raw);
        trace!(
            type_id = raw.type_id,
            code_id = raw.code_id,
            value = raw.value,
            "read event"
        );

        if event.event.is_dropped() {
            if self.mode == SyncMode::Normal {
                warn!("kernel event buffer overflowed, draining state diff");
            }
            self.mode = SyncMode::Draining;
            return Ok(ReadOutcome::SyncBoundary(event));
        }

        Ok(match self.mode {
            SyncMode::Normal => ReadOutcome::Delivered(event),
            SyncMode::Draining => ReadOutcome::SyncBoundary(event),
        })
    }

    /// Identity of the bound device.
    pub fn identity(&self) -> Result<DeviceIdentity, SessionError> {
        self.channel
            .as_ref()
            .map(EventChannel::identity)
            .ok_or(SessionError::NotBound)
    }

    pub fn grab_state(&self) -> GrabState {
        self.grab
    }

    pub fn sync_mode(&self) -> SyncMode {
        self.mode
    }

    pub fn is_bound(&self) -> bool {
        self.channel.is_some()
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    pub fn channel_mut(&mut self) -> Option<&mut C> {
        self.channel.as_mut()
    }

    /// Tear the session down, handing back the channel if one was bound.
    pub fn into_channel(self) -> Option<C> {
        self.channel
    }
}
