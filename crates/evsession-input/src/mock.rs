//! Scripted backends for testing sessions and emitters without a kernel.

use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use evsession_types::{DeviceIdentity, RawEvent};

use crate::{EventChannel, GrabMode, ReadFlag, VirtualSink};

fn lock<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// MockChannel
// ---------------------------------------------------------------------------

/// One scripted result for [`MockChannel::read_event`].
#[derive(Debug, Clone)]
pub enum Scripted {
    Event(RawEvent),
    /// Nothing available right now.
    Empty,
    /// The descriptor went away.
    Close,
    /// Any other read failure.
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct MockChannelState {
    script: VecDeque<Scripted>,
    /// Records queued by `force_resync`, served before the script.
    resync_diff: VecDeque<RawEvent>,
    read_flags: Vec<ReadFlag>,
    grab_calls: Vec<GrabMode>,
    deny_grab: bool,
    resync_count: usize,
    closed: bool,
}

/// Event channel that replays a script. Once the script is exhausted every
/// read returns `Ok(None)`.
pub struct MockChannel {
    identity: DeviceIdentity,
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannel {
    /// Create a channel with a placeholder identity, and a handle to drive it.
    pub fn new() -> (Self, MockChannelHandle) {
        Self::with_identity(DeviceIdentity {
            name: "mock device".to_string(),
            ..DeviceIdentity::default()
        })
    }

    pub fn with_identity(identity: DeviceIdentity) -> (Self, MockChannelHandle) {
        let state = Arc::new(Mutex::new(MockChannelState::default()));
        let handle = MockChannelHandle {
            state: Arc::clone(&state),
        };
        (Self { identity, state }, handle)
    }
}

impl EventChannel for MockChannel {
    fn read_event(&mut self, flag: ReadFlag) -> io::Result<Option<RawEvent>> {
        let mut state = lock(&self.state);
        state.read_flags.push(flag);
        if state.closed {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if let Some(event) = state.resync_diff.pop_front() {
            return Ok(Some(event));
        }
        match state.script.pop_front() {
            None | Some(Scripted::Empty) => Ok(None),
            Some(Scripted::Event(event)) => Ok(Some(event)),
            Some(Scripted::Close) => {
                state.closed = true;
                Err(io::ErrorKind::UnexpectedEof.into())
            }
            Some(Scripted::Fail(kind)) => Err(kind.into()),
        }
    }

    fn force_resync(&mut self) -> io::Result<()> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        state.resync_count += 1;
        Ok(())
    }

    fn set_grab(&mut self, mode: GrabMode) -> io::Result<()> {
        let mut state = lock(&self.state);
        state.grab_calls.push(mode);
        if state.deny_grab && mode == GrabMode::Grab {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "device grabbed by another client",
            ));
        }
        Ok(())
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }
}

/// Clonable handle for scripting and observing a [`MockChannel`].
#[derive(Clone)]
pub struct MockChannelHandle {
    state: Arc<Mutex<MockChannelState>>,
}

impl MockChannelHandle {
    pub fn push(&self, item: Scripted) {
        lock(&self.state).script.push_back(item);
    }

    pub fn push_event(&self, event: RawEvent) {
        self.push(Scripted::Event(event));
    }

    pub fn push_events(&self, events: impl IntoIterator<Item = RawEvent>) {
        let mut state = lock(&self.state);
        state
            .script
            .extend(events.into_iter().map(Scripted::Event));
    }

    pub fn push_empty(&self) {
        self.push(Scripted::Empty);
    }

    pub fn push_close(&self) {
        self.push(Scripted::Close);
    }

    /// Records the next `force_resync` drain will serve first.
    pub fn set_resync_diff(&self, events: impl IntoIterator<Item = RawEvent>) {
        lock(&self.state).resync_diff = events.into_iter().collect();
    }

    /// Make every subsequent grab request fail as if another client held it.
    pub fn deny_grab(&self, deny: bool) {
        lock(&self.state).deny_grab = deny;
    }

    pub fn grab_calls(&self) -> Vec<GrabMode> {
        lock(&self.state).grab_calls.clone()
    }

    pub fn read_flags(&self) -> Vec<ReadFlag> {
        lock(&self.state).read_flags.clone()
    }

    pub fn resync_count(&self) -> usize {
        lock(&self.state).resync_count
    }
}

// ---------------------------------------------------------------------------
// MockSink
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockSinkState {
    writes: Vec<RawEvent>,
    attempts: usize,
    fail_at: BTreeSet<usize>,
}

/// Virtual sink that records every successful write.
pub struct MockSink {
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSink {
    pub fn new() -> (Self, MockSinkHandle) {
        let state = Arc::new(Mutex::new(MockSinkState::default()));
        let handle = MockSinkHandle {
            state: Arc::clone(&state),
        };
        (Self { state }, handle)
    }
}

impl VirtualSink for MockSink {
    fn write_event(&mut self, event: &RawEvent) -> io::Result<()> {
        let mut state = lock(&self.state);
        let attempt = state.attempts;
        state.attempts += 1;
        if state.fail_at.remove(&attempt) {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        state.writes.push(*event);
        Ok(())
    }
}

/// Clonable observer handle for [`MockSink`].
#[derive(Clone)]
pub struct MockSinkHandle {
    state: Arc<Mutex<MockSinkState>>,
}

impl MockSinkHandle {
    /// Successful writes so far, in order.
    pub fn writes(&self) -> Vec<RawEvent> {
        lock(&self.state).writes.clone()
    }

    /// Fail the write attempt with this zero-based index.
    pub fn fail_write(&self, attempt: usize) {
        lock(&self.state).fail_at.insert(attempt);
    }

    pub fn attempts(&self) -> usize {
        lock(&self.state).attempts
    }
}
