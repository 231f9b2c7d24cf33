//! Resynchronization after the kernel drops events.
//!
//! [`ResyncReader`] sits between a raw event source and a channel. It keeps
//! a cache of device state fed by live events. When the source reports
//! `SYN_DROPPED`, or a resync is forced, it snapshots the kernel's state and
//! queues the difference, to be drained with [`ReadFlag::Sync`]. Live events
//! from a `SYN_DROPPED` up to the next `SYN_REPORT` describe an incomplete
//! frame and are discarded.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::time::SystemTime;

use evsession_types::{AbsAxis, EventType, RawEvent, SynCode, Timestamp};
use tracing::{debug, warn};

use crate::ReadFlag;

/// Where a [`ResyncReader`] gets its records and state snapshots.
pub trait StateSource {
    /// Pull whatever records are ready. `Ok(None)` means nothing right now.
    fn fetch(&mut self) -> io::Result<Option<Vec<RawEvent>>>;

    /// The kernel's current view of the device state.
    fn snapshot(&self) -> io::Result<DeviceState>;
}

/// The parts of device state a reader can lose track of when the kernel
/// drops events: held keys, lit LEDs, closed switches and absolute axis
/// positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub keys: BTreeSet<u16>,
    pub leds: BTreeSet<u16>,
    pub switches: BTreeSet<u16>,
    pub abs: BTreeMap<u16, i32>,
}

impl DeviceState {
    /// Fold one live event into the cache.
    pub fn apply(&mut self, event: &RawEvent) {
        let set = match EventType::from_raw(event.type_id) {
            Some(EventType::EV_KEY) => &mut self.keys,
            Some(EventType::EV_LED) => &mut self.leds,
            Some(EventType::EV_SW) => &mut self.switches,
            Some(EventType::EV_ABS) => {
                if !AbsAxis::is_multitouch_code(event.code_id) {
                    self.abs.insert(event.code_id, event.value);
                }
                return;
            }
            _ => return,
        };
        // Autorepeat (2) leaves a key held.
        if event.value == 0 {
            set.remove(&event.code_id);
        } else {
            set.insert(event.code_id);
        }
    }

    /// Events that move a reader holding `self` to `current`, stamped with
    /// `time`. Always ends with `SYN_REPORT`, even when nothing changed.
    pub fn diff(&self, current: &Self, time: Timestamp) -> Vec<RawEvent> {
        let mut events = Vec::new();
        let mut push = |event_type: EventType, code: u16, value: i32| {
            events.push(RawEvent::with_time(time, event_type.raw(), code, value));
        };

        for (event_type, old, new) in [
            (EventType::EV_KEY, &self.keys, &current.keys),
            (EventType::EV_LED, &self.leds, &current.leds),
            (EventType::EV_SW, &self.switches, &current.switches),
        ] {
            for &code in old.difference(new) {
                push(event_type, code, 0);
            }
            for &code in new.difference(old) {
                push(event_type, code, 1);
            }
        }

        for (&code, &value) in &current.abs {
            if AbsAxis::is_multitouch_code(code) {
                continue;
            }
            if self.abs.get(&code) != Some(&value) {
                push(EventType::EV_ABS, code, value);
            }
        }

        push(EventType::EV_SYN, SynCode::SYN_REPORT.raw(), 0);
        events
    }
}

/// The read-side sync protocol over a [`StateSource`].
pub struct ResyncReader<S> {
    source: S,
    live: VecDeque<RawEvent>,
    diff: VecDeque<RawEvent>,
    state: DeviceState,
    needs_sync: bool,
    discarding: bool,
}

impl<S: StateSource> ResyncReader<S> {
    /// Wrap `source`, seeding the cache from its current state.
    pub fn new(source: S) -> io::Result<Self> {
        let state = source.snapshot()?;
        Ok(Self {
            source,
            live: VecDeque::new(),
            diff: VecDeque::new(),
            state,
            needs_sync: false,
            discarding: false,
        })
    }

    /// Next record for `flag`. With [`ReadFlag::Sync`], `Ok(None)` means the
    /// diff is exhausted; with [`ReadFlag::Normal`], that nothing is ready.
    pub fn read(&mut self, flag: ReadFlag) -> io::Result<Option<RawEvent>> {
        if flag == ReadFlag::Sync {
            if self.needs_sync {
                let current = self.source.snapshot()?;
                let now = Timestamp::from(SystemTime::now());
                self.diff = self.state.diff(&current, now).into();
                self.state = current;
                self.needs_sync = false;
                debug!(len = self.diff.len(), "computed resync diff");
            }
            return Ok(self.diff.pop_front());
        }

        self.abandon_sync()?;
        while let Some(event) = self.next_live()? {
            let is_syn = event.type_id == EventType::EV_SYN.raw();
            // An overflow inside the discard window restarts it.
            if is_syn && event.code_id == SynCode::SYN_DROPPED.raw() {
                warn!("kernel dropped events");
                self.discarding = true;
                self.needs_sync = true;
                return Ok(Some(event));
            }
            if self.discarding {
                if is_syn && event.code_id == SynCode::SYN_REPORT.raw() {
                    self.discarding = false;
                }
                continue;
            }
            self.state.apply(&event);
            return Ok(Some(event));
        }
        Ok(None)
    }

    /// Drop any pending diff and schedule a fresh one.
    pub fn force_resync(&mut self) {
        self.diff.clear();
        self.needs_sync = true;
    }

    /// The cached device state as of the last record handed out.
    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn next_live(&mut self) -> io::Result<Option<RawEvent>> {
        if self.live.is_empty() {
            match self.source.fetch()? {
                Some(events) => self.live.extend(events),
                None => return Ok(None),
            }
        }
        Ok(self.live.pop_front())
    }

    /// A normal read while a resync is pending: the caller chose not to
    /// drain, so bring the cache up to date and drop the diff.
    fn abandon_sync(&mut self) -> io::Result<()> {
        if !self.diff.is_empty() {
            debug!(pending = self.diff.len(), "discarding undrained resync diff");
            self.diff.clear();
        }
        if self.needs_sync {
            self.state = self.source.snapshot()?;
            self.needs_sync = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    use evsession_types::KeyCode;

    const T: Timestamp = Timestamp::new(5, 10);

    fn triples(events: &[RawEvent]) -> Vec<(u16, u16, i32)> {
        events.iter().map(RawEvent::triple).collect()
    }

    #[test]
    fn unchanged_state_yields_bare_report() {
        let state = DeviceState::default();
        let diff = state.diff(&state.clone(), T);
        assert_eq!(triples(&diff), vec![(0, 0, 0)]);
        assert_eq!(diff[0].time, T);
    }

    #[test]
    fn apply_tracks_keys_and_axes() {
        let mut state = DeviceState::default();
        state.apply(&RawEvent::new(1, KeyCode::KEY_A.raw(), 1));
        state.apply(&RawEvent::new(1, KeyCode::KEY_B.raw(), 2));
        state.apply(&RawEvent::new(1, KeyCode::KEY_A.raw(), 0));
        state.apply(&RawEvent::new(3, AbsAxis::ABS_X.raw(), 512));
        state.apply(&RawEvent::new(3, AbsAxis::ABS_MT_POSITION_X.raw(), 7));
        state.apply(&RawEvent::new(2, 0, 5));

        assert_eq!(state.keys, BTreeSet::from([KeyCode::KEY_B.raw()]));
        assert_eq!(state.abs, BTreeMap::from([(AbsAxis::ABS_X.raw(), 512)]));
    }

    #[test]
    fn diff_releases_then_presses_then_moves() {
        let mut old = DeviceState::default();
        old.keys.insert(KeyCode::KEY_A.raw());
        old.abs.insert(AbsAxis::ABS_X.raw(), 10);
        old.abs.insert(AbsAxis::ABS_Y.raw(), 20);

        let mut new = DeviceState::default();
        new.keys.insert(KeyCode::KEY_B.raw());
        new.leds.insert(1);
        new.abs.insert(AbsAxis::ABS_X.raw(), 10);
        new.abs.insert(AbsAxis::ABS_Y.raw(), 25);

        assert_eq!(
            triples(&old.diff(&new, T)),
            vec![
                (1, KeyCode::KEY_A.raw(), 0),
                (1, KeyCode::KEY_B.raw(), 1),
                (0x11, 1, 1),
                (3, AbsAxis::ABS_Y.raw(), 25),
                (0, 0, 0),
            ]
        );
    }

    #[test]
    fn diff_skips_multitouch_axes() {
        let old = DeviceState::default();
        let mut new = DeviceState::default();
        new.abs.insert(AbsAxis::ABS_MT_SLOT.raw(), 3);
        assert_eq!(triples(&old.diff(&new, T)), vec![(0, 0, 0)]);
    }

    /// Source fed from a queue of batches, with a shared kernel state.
    struct ScriptedSource {
        batches: VecDeque<Vec<RawEvent>>,
        kernel: Rc<RefCell<DeviceState>>,
        snapshots: Rc<RefCell<usize>>,
    }

    impl StateSource for ScriptedSource {
        fn fetch(&mut self) -> io::Result<Option<Vec<RawEvent>>> {
            Ok(self.batches.pop_front())
        }

        fn snapshot(&self) -> io::Result<DeviceState> {
            *self.snapshots.borrow_mut() += 1;
            Ok(self.kernel.borrow().clone())
        }
    }

    struct Harness {
        reader: ResyncReader<ScriptedSource>,
        kernel: Rc<RefCell<DeviceState>>,
        snapshots: Rc<RefCell<usize>>,
    }

    fn harness(batches: Vec<Vec<RawEvent>>) -> Harness {
        let kernel = Rc::new(RefCell::new(DeviceState::default()));
        let snapshots = Rc::new(RefCell::new(0));
        let source = ScriptedSource {
            batches: batches.into(),
            kernel: Rc::clone(&kernel),
            snapshots: Rc::clone(&snapshots),
        };
        Harness {
            reader: ResyncReader::new(source).unwrap(),
            kernel,
            snapshots,
        }
    }

    fn key(code: KeyCode, value: i32) -> RawEvent {
        RawEvent::new(0x01, code.raw(), value)
    }

    fn report() -> RawEvent {
        RawEvent::new(0x00, SynCode::SYN_REPORT.raw(), 0)
    }

    fn dropped() -> RawEvent {
        RawEvent::new(0x00, SynCode::SYN_DROPPED.raw(), 0)
    }

    fn drain(reader: &mut ResyncReader<ScriptedSource>, flag: ReadFlag) -> Vec<(u16, u16, i32)> {
        let mut out = Vec::new();
        while let Some(event) = reader.read(flag).unwrap() {
            out.push(event.triple());
        }
        out
    }

    #[test]
    fn live_events_update_the_cache() {
        let mut h = harness(vec![vec![key(KeyCode::KEY_A, 1), report()]]);
        assert_eq!(
            drain(&mut h.reader, ReadFlag::Normal),
            vec![(1, 30, 1), (0, 0, 0)]
        );
        assert!(h.reader.state().keys.contains(&30));
    }

    #[test]
    fn incomplete_frame_after_overflow_is_discarded() {
        let mut h = harness(vec![vec![
            dropped(),
            key(KeyCode::KEY_A, 1),
            report(),
            key(KeyCode::KEY_B, 1),
        ]]);
        h.kernel.borrow_mut().keys.insert(KeyCode::KEY_A.raw());

        assert_eq!(h.reader.read(ReadFlag::Normal).unwrap().unwrap().triple(), (0, 3, 0));
        // The diff is computed on the first sync read.
        assert_eq!(*h.snapshots.borrow(), 1);
        assert_eq!(
            drain(&mut h.reader, ReadFlag::Sync),
            vec![(1, 30, 1), (0, 0, 0)]
        );
        assert_eq!(*h.snapshots.borrow(), 2);

        // KEY_A and its report belonged to the dropped frame.
        assert_eq!(drain(&mut h.reader, ReadFlag::Normal), vec![(1, 48, 1)]);
    }

    #[test]
    fn overflow_inside_discard_window_is_reported() {
        let mut h = harness(vec![
            vec![dropped()],
            vec![
                key(KeyCode::KEY_Q, 1),
                dropped(),
                key(KeyCode::KEY_A, 1),
                report(),
                RawEvent::new(0x02, 0, 3),
            ],
        ]);

        assert_eq!(h.reader.read(ReadFlag::Normal).unwrap().unwrap().triple(), (0, 3, 0));
        assert_eq!(drain(&mut h.reader, ReadFlag::Sync), vec![(0, 0, 0)]);

        // Still discarding the first frame when the second overflow arrives.
        assert_eq!(h.reader.read(ReadFlag::Normal).unwrap().unwrap().triple(), (0, 3, 0));
        h.kernel.borrow_mut().keys.insert(KeyCode::KEY_A.raw());
        assert_eq!(
            drain(&mut h.reader, ReadFlag::Sync),
            vec![(1, 30, 1), (0, 0, 0)]
        );
        assert_eq!(drain(&mut h.reader, ReadFlag::Normal), vec![(2, 0, 3)]);
    }

    #[test]
    fn normal_read_abandons_pending_diff() {
        let mut h = harness(vec![vec![dropped()], vec![report(), key(KeyCode::KEY_C, 1)]]);
        h.kernel.borrow_mut().keys.insert(KeyCode::KEY_Z.raw());

        h.reader.read(ReadFlag::Normal).unwrap();
        assert_eq!(
            h.reader.read(ReadFlag::Sync).unwrap().map(|e| e.triple()),
            Some((1, 44, 1))
        );

        // Skip the rest of the diff; the cache still catches up.
        assert_eq!(drain(&mut h.reader, ReadFlag::Normal), vec![(1, 46, 1)]);
        assert!(h.reader.state().keys.contains(&KeyCode::KEY_Z.raw()));
        assert_eq!(drain(&mut h.reader, ReadFlag::Sync), vec![]);
    }

    #[test]
    fn undrained_overflow_refreshes_cache_on_next_normal_read() {
        let mut h = harness(vec![vec![dropped()], vec![report()]]);
        h.kernel.borrow_mut().leds.insert(1);

        h.reader.read(ReadFlag::Normal).unwrap();
        assert_eq!(h.reader.read(ReadFlag::Normal).unwrap(), None);
        assert!(h.reader.state().leds.contains(&1));
        assert_eq!(drain(&mut h.reader, ReadFlag::Sync), vec![]);
    }

    #[test]
    fn forced_resync_replaces_pending_diff() {
        let mut h = harness(vec![]);
        h.kernel.borrow_mut().switches.insert(0);

        h.reader.force_resync();
        assert_eq!(
            drain(&mut h.reader, ReadFlag::Sync),
            vec![(5, 0, 1), (0, 0, 0)]
        );
        assert_eq!(drain(&mut h.reader, ReadFlag::Sync), vec![]);
    }
}
