//! Virtual device emitter.

use evsession_types::{RawEvent, TypedEvent};
use tracing::{error, trace};

use crate::error::EmitterError;
use crate::VirtualSink;

/// Replays typed events into a [`VirtualSink`], each followed by its own
/// `SYN_REPORT`.
///
/// If the event is written but the trailing report is not, the device is left
/// holding an unterminated frame. The emitter then refuses further writes and
/// reports [`EmitterError::Poisoned`]; recreate the virtual device to recover.
pub struct VirtualEmitter<S> {
    sink: S,
    poisoned: bool,
}

impl<S: VirtualSink> VirtualEmitter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            poisoned: false,
        }
    }

    /// Write `event` followed by `SYN_REPORT` with value 0.
    pub fn emit(&mut self, event: &TypedEvent) -> Result<(), EmitterError> {
        self.emit_raw(event.to_raw())
    }

    /// Write a raw record followed by `SYN_REPORT` with value 0.
    pub fn emit_raw(&mut self, event: RawEvent) -> Result<(), EmitterError> {
        if self.poisoned {
            return Err(EmitterError::Poisoned);
        }

        self.sink
            .write_event(&event)
            .map_err(EmitterError::EmitFailed)?;

        if let Err(err) = self.sink.write_event(&TypedEvent::report().to_raw()) {
            self.poisoned = true;
            error!(
                type_id = event.type_id,
                code_id = event.code_id,
                "event written without its SYN_REPORT, emitter poisoned: {err}"
            );
            return Err(EmitterError::EmitFailed(err));
        }

        trace!(
            type_id = event.type_id,
            code_id = event.code_id,
            value = event.value,
            "emitted event"
        );
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSink;
    use evsession_types::{KeyCode, KeyState};

    #[test]
    fn report_follows_every_event() {
        let (sink, handle) = MockSink::new();
        let mut emitter = VirtualEmitter::new(sink);
        emitter
            .emit(&TypedEvent::key(KeyCode::KEY_B, KeyState::Pressed))
            .unwrap();

        let writes = handle.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].triple(), (0x01, 48, 1));
        assert_eq!(writes[1].triple(), (0x00, 0x00, 0));
    }

    #[test]
    fn failed_primary_write_does_not_poison() {
        let (sink, handle) = MockSink::new();
        handle.fail_write(0);
        let mut emitter = VirtualEmitter::new(sink);

        let err = emitter.emit(&TypedEvent::report()).unwrap_err();
        assert!(matches!(err, EmitterError::EmitFailed(_)));
        assert!(!emitter.is_poisoned());
        assert!(handle.writes().is_empty());

        emitter.emit(&TypedEvent::report()).unwrap();
        assert_eq!(handle.writes().len(), 2);
    }

    #[test]
    fn failed_report_poisons() {
        let (sink, handle) = MockSink::new();
        handle.fail_write(1);
        let mut emitter = VirtualEmitter::new(sink);

        let err = emitter
            .emit(&TypedEvent::key(KeyCode::KEY_C, KeyState::Released))
            .unwrap_err();
        assert!(matches!(err, EmitterError::EmitFailed(_)));
        assert!(emitter.is_poisoned());
        assert!(matches!(
            emitter.emit(&TypedEvent::report()),
            Err(EmitterError::Poisoned)
        ));
        assert_eq!(handle.writes().len(), 1);
    }
}
