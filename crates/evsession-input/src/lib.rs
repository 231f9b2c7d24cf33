//! Device sessions and virtual device emitters over evdev.
//!
//! This crate defines the [`EventChannel`] and [`VirtualSink`] seams that
//! platform backends implement, the [`DeviceSession`] read-and-sync state
//! machine that drives a channel, the [`ResyncReader`] that recovers from
//! kernel overflows, and the [`VirtualEmitter`] that replays
//! typed events into a sink. The Linux backends live behind the `linux`
//! feature; scripted test doubles live behind `mock`.

use std::io;

use evsession_types::{DeviceIdentity, RawEvent};

pub mod emitter;
pub mod error;
pub mod resync;
pub mod session;

#[cfg(all(feature = "linux", target_os = "linux"))]
pub mod linux;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use emitter::VirtualEmitter;
pub use error::{EmitterError, SessionError};
pub use resync::{DeviceState, ResyncReader, StateSource};
pub use session::{DeviceSession, GrabState, ReadMode, ReadOutcome, SyncMode};

/// Which queue a channel read draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFlag {
    /// Live events as the device produces them.
    Normal,
    /// Pending resynchronization diff only.
    Sync,
}

/// Exclusive-access request, with the values of the grab ioctl contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GrabMode {
    Grab = 3,
    Ungrab = 4,
}

/// A source of raw event records bound to one open descriptor.
///
/// Channels report "nothing right now" as `Ok(None)`, never as an error. A
/// closed or vanished descriptor is reported as an error of kind
/// [`io::ErrorKind::UnexpectedEof`].
pub trait EventChannel {
    /// Pull one record. With [`ReadFlag::Sync`], `Ok(None)` also means the
    /// resynchronization diff is exhausted.
    fn read_event(&mut self, flag: ReadFlag) -> io::Result<Option<RawEvent>>;

    /// Discard buffered device state and queue a diff against the kernel's
    /// current state, to be drained with [`ReadFlag::Sync`].
    fn force_resync(&mut self) -> io::Result<()>;

    /// Issue the grab ioctl.
    fn set_grab(&mut self, mode: GrabMode) -> io::Result<()>;

    /// Identity of the device behind the descriptor.
    fn identity(&self) -> DeviceIdentity;
}

/// Accepts raw records for injection into the kernel.
pub trait VirtualSink {
    /// Write a single record. No synchronization marker is implied.
    fn write_event(&mut self, event: &RawEvent) -> io::Result<()>;
}

impl<C: EventChannel + ?Sized> EventChannel for Box<C> {
    fn read_event(&mut self, flag: ReadFlag) -> io::Result<Option<RawEvent>> {
        (**self).read_event(flag)
    }

    fn force_resync(&mut self) -> io::Result<()> {
        (**self).force_resync()
    }

    fn set_grab(&mut self, mode: GrabMode) -> io::Result<()> {
        (**self).set_grab(mode)
    }

    fn identity(&self) -> DeviceIdentity {
        (**self).identity()
    }
}
