//! Typed event model and the total decoder.
//!
//! [`decode`] turns any raw triple into a [`TypedEvent`] without failing:
//! unregistered types become [`TypedEvent::Unclassified`], and codes a
//! registered domain does not enumerate become [`Code::Unknown`] carrying the
//! raw code. [`TypedEvent::to_raw`] reverses the mapping exactly.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codes::{
    AbsAxis, FfCode, KeyCode, LedCode, MiscCode, RelAxis, RepeatCode, SoundCode, SwitchCode,
    SynCode,
};
use crate::raw::{RawEvent, Timestamp};
use crate::registry::{self, Domain, EventType, ValueKind};

/// An event code within a registered domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Code<T> {
    /// The code is enumerated by the domain table.
    Known(T),
    /// Fallback for codes the table does not enumerate. The value is the raw
    /// code as reported by the kernel.
    Unknown(u16),
}

impl<T: Copy> Code<T> {
    pub fn known(self) -> Option<T> {
        match self {
            Self::Known(code) => Some(code),
            Self::Unknown(_) => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Self::Known(_))
    }
}

macro_rules! impl_code {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Code<$ty> {
                /// Classify `raw` within `domain`. Codes past the domain's
                /// maximum are kept as unknown, never clamped.
                fn within(domain: &Domain, raw: u16) -> Self {
                    if !domain.in_range(raw) {
                        return Self::Unknown(raw);
                    }
                    <$ty>::from_raw(raw).map_or(Self::Unknown(raw), Self::Known)
                }

                /// The raw code, whether enumerated or not.
                pub fn raw(self) -> u16 {
                    match self {
                        Self::Known(code) => code.raw(),
                        Self::Unknown(raw) => raw,
                    }
                }
            }

            impl From<$ty> for Code<$ty> {
                fn from(code: $ty) -> Self {
                    Self::Known(code)
                }
            }
        )*
    };
}

impl_code!(
    SynCode, KeyCode, RelAxis, AbsAxis, MiscCode, SwitchCode, LedCode, SoundCode, RepeatCode,
    FfCode,
);

/// Value of a key or button event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyState {
    Released,
    Pressed,
    /// Autorepeat while held.
    Repeated,
    /// Any other value the device reported, kept verbatim.
    Other(i32),
}

impl KeyState {
    pub const fn from_value(value: i32) -> Self {
        match value {
            0 => Self::Released,
            1 => Self::Pressed,
            2 => Self::Repeated,
            other => Self::Other(other),
        }
    }

    pub const fn value(self) -> i32 {
        match self {
            Self::Released => 0,
            Self::Pressed => 1,
            Self::Repeated => 2,
            Self::Other(value) => value,
        }
    }

    /// Pressed or autorepeating.
    pub const fn is_down(self) -> bool {
        matches!(self, Self::Pressed | Self::Repeated)
    }
}

/// Value of a switch or LED event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Toggle {
    Off,
    On,
    /// Any other value the device reported, kept verbatim.
    Other(i32),
}

impl Toggle {
    pub const fn from_value(value: i32) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::On,
            other => Self::Other(other),
        }
    }

    pub const fn value(self) -> i32 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Other(value) => value,
        }
    }
}

/// A decoded input event. One variant per registered domain, plus a
/// catch-all for types the registry does not know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypedEvent {
    /// Synchronization marker. `value` is unspecified by the kernel but kept.
    Syn { code: Code<SynCode>, value: i32 },

    /// Key or button state change.
    Key { code: Code<KeyCode>, state: KeyState },

    /// Relative axis motion.
    Relative { axis: Code<RelAxis>, delta: i32 },

    /// Absolute axis position.
    Absolute { axis: Code<AbsAxis>, position: i32 },

    /// Miscellaneous data such as scan codes.
    Misc { code: Code<MiscCode>, value: i32 },

    /// Switch state change.
    Switch { code: Code<SwitchCode>, state: Toggle },

    /// LED state change or request.
    Led { code: Code<LedCode>, state: Toggle },

    /// Sound start/stop or request.
    Sound { code: Code<SoundCode>, value: i32 },

    /// Autorepeat parameter change.
    Repeat { code: Code<RepeatCode>, value: i32 },

    /// Force-feedback playback or control.
    ForceFeedback { code: Code<FfCode>, value: i32 },

    /// A type the registry does not cover, kept as the raw triple.
    Unclassified { type_id: u16, code_id: u16, value: i32 },
}

/// Decode a raw record. Total over the full 16 x 16 x 32 bit space.
pub fn decode(raw: &RawEvent) -> TypedEvent {
    match registry::lookup(raw.type_id) {
        Some(domain) => decode_in(domain, raw.code_id, raw.value),
        None => TypedEvent::Unclassified {
            type_id: raw.type_id,
            code_id: raw.code_id,
            value: raw.value,
        },
    }
}

/// Type one record against its domain descriptor. The descriptor's value
/// kind picks the value interpretation; a kind the event type cannot carry
/// is a registry inconsistency and leaves the record unclassified.
fn decode_in(domain: &Domain, code_id: u16, value: i32) -> TypedEvent {
    match (domain.event_type, domain.value_kind) {
        (EventType::EV_SYN, ValueKind::Marker) => TypedEvent::Syn {
            code: Code::<SynCode>::within(domain, code_id),
            value,
        },
        (EventType::EV_KEY, ValueKind::KeyState) => TypedEvent::Key {
            code: Code::<KeyCode>::within(domain, code_id),
            state: KeyState::from_value(value),
        },
        (EventType::EV_REL, ValueKind::Delta) => TypedEvent::Relative {
            axis: Code::<RelAxis>::within(domain, code_id),
            delta: value,
        },
        (EventType::EV_ABS, ValueKind::Position) => TypedEvent::Absolute {
            axis: Code::<AbsAxis>::within(domain, code_id),
            position: value,
        },
        (EventType::EV_MSC, ValueKind::Scalar) => TypedEvent::Misc {
            code: Code::<MiscCode>::within(domain, code_id),
            value,
        },
        (EventType::EV_SW, ValueKind::Toggle) => TypedEvent::Switch {
            code: Code::<SwitchCode>::within(domain, code_id),
            state: Toggle::from_value(value),
        },
        (EventType::EV_LED, ValueKind::Toggle) => TypedEvent::Led {
            code: Code::<LedCode>::within(domain, code_id),
            state: Toggle::from_value(value),
        },
        (EventType::EV_SND, ValueKind::Scalar) => TypedEvent::Sound {
            code: Code::<SoundCode>::within(domain, code_id),
            value,
        },
        (EventType::EV_REP, ValueKind::Scalar) => TypedEvent::Repeat {
            code: Code::<RepeatCode>::within(domain, code_id),
            value,
        },
        (EventType::EV_FF, ValueKind::Scalar) => TypedEvent::ForceFeedback {
            code: Code::<FfCode>::within(domain, code_id),
            value,
        },
        (event_type, value_kind) => {
            let type_id = event_type.raw();
            warn!(
                type_id,
                code_id,
                ?value_kind,
                "registry inconsistency: domain has no typed variant"
            );
            TypedEvent::Unclassified {
                type_id,
                code_id,
                value,
            }
        }
    }
}

impl TypedEvent {
    /// Build a synchronization report marker.
    pub const fn report() -> Self {
        Self::Syn {
            code: Code::Known(SynCode::SYN_REPORT),
            value: 0,
        }
    }

    pub fn key(code: KeyCode, state: KeyState) -> Self {
        Self::Key {
            code: Code::Known(code),
            state,
        }
    }

    /// The raw `(type, code, value)` triple this event came from.
    pub fn triple(&self) -> (u16, u16, i32) {
        match *self {
            Self::Syn { code, value } => (EventType::EV_SYN.raw(), code.raw(), value),
            Self::Key { code, state } => (EventType::EV_KEY.raw(), code.raw(), state.value()),
            Self::Relative { axis, delta } => (EventType::EV_REL.raw(), axis.raw(), delta),
            Self::Absolute { axis, position } => (EventType::EV_ABS.raw(), axis.raw(), position),
            Self::Misc { code, value } => (EventType::EV_MSC.raw(), code.raw(), value),
            Self::Switch { code, state } => (EventType::EV_SW.raw(), code.raw(), state.value()),
            Self::Led { code, state } => (EventType::EV_LED.raw(), code.raw(), state.value()),
            Self::Sound { code, value } => (EventType::EV_SND.raw(), code.raw(), value),
            Self::Repeat { code, value } => (EventType::EV_REP.raw(), code.raw(), value),
            Self::ForceFeedback { code, value } => (EventType::EV_FF.raw(), code.raw(), value),
            Self::Unclassified {
                type_id,
                code_id,
                value,
            } => (type_id, code_id, value),
        }
    }

    /// Re-encode as a raw record with a zero timestamp.
    pub fn to_raw(&self) -> RawEvent {
        let (type_id, code_id, value) = self.triple();
        RawEvent::new(type_id, code_id, value)
    }

    /// The raw event type identifier.
    pub fn type_id(&self) -> u16 {
        self.triple().0
    }

    /// Whether this is a synchronization marker of any kind.
    pub fn is_syn(&self) -> bool {
        matches!(self, Self::Syn { .. })
    }

    /// Whether this is the overflow marker that starts a resynchronization.
    pub fn is_dropped(&self) -> bool {
        matches!(
            self,
            Self::Syn {
                code: Code::Known(SynCode::SYN_DROPPED),
                ..
            }
        )
    }

    /// Whether the code within a registered domain was not enumerated.
    pub fn has_unknown_code(&self) -> bool {
        match *self {
            Self::Syn { code, .. } => !code.is_known(),
            Self::Key { code, .. } => !code.is_known(),
            Self::Relative { axis, .. } => !axis.is_known(),
            Self::Absolute { axis, .. } => !axis.is_known(),
            Self::Misc { code, .. } => !code.is_known(),
            Self::Switch { code, .. } => !code.is_known(),
            Self::Led { code, .. } => !code.is_known(),
            Self::Sound { code, .. } => !code.is_known(),
            Self::Repeat { code, .. } => !code.is_known(),
            Self::ForceFeedback { code, .. } => !code.is_known(),
            Self::Unclassified { .. } => false,
        }
    }
}

impl From<&RawEvent> for TypedEvent {
    fn from(raw: &RawEvent) -> Self {
        decode(raw)
    }
}

/// A decoded event together with the kernel timestamp of its record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StampedEvent {
    pub time: Timestamp,
    pub event: TypedEvent,
}

impl StampedEvent {
    pub fn decode(raw: &RawEvent) -> Self {
        Self {
            time: raw.time,
            event: decode(raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::DOMAINS;

    /// xorshift64*, enough to spread samples over the whole triple space.
    struct Sampler(u64);

    impl Sampler {
        fn next(&mut self) -> u64 {
            self.0 ^= self.0 >> 12;
            self.0 ^= self.0 << 25;
            self.0 ^= self.0 >> 27;
            self.0.wrapping_mul(0x2545_F491_4F6C_DD1D)
        }

        #[allow(clippy::cast_possible_truncation)]
        fn triple(&mut self) -> (u16, u16, i32) {
            let bits = self.next();
            (bits as u16, (bits >> 16) as u16, (bits >> 32) as i32)
        }
    }

    #[test]
    fn decode_is_total_over_random_triples() {
        let mut sampler = Sampler(0x9E37_79B9_7F4A_7C15);
        for _ in 0..1_000_000 {
            let (type_id, code_id, value) = sampler.triple();
            let raw = RawEvent::new(type_id, code_id, value);
            assert_eq!(decode(&raw).triple(), (type_id, code_id, value));
        }
    }

    #[test]
    fn every_code_of_every_registered_type_roundtrips() {
        for domain in &DOMAINS {
            let type_id = domain.event_type.raw();
            for code_id in 0..=u16::MAX {
                for value in [i32::MIN, -1, 0, 1, 2, 3, i32::MAX] {
                    let raw = RawEvent::new(type_id, code_id, value);
                    let typed = decode(&raw);
                    assert!(!matches!(typed, TypedEvent::Unclassified { .. }));
                    assert_eq!(typed.to_raw(), raw);
                }
            }
        }
    }

    #[test]
    fn unknown_type_is_unclassified() {
        let raw = RawEvent::new(0x0e, 7, -3);
        assert_eq!(
            decode(&raw),
            TypedEvent::Unclassified {
                type_id: 0x0e,
                code_id: 7,
                value: -3
            }
        );
    }

    #[test]
    fn power_events_are_unclassified() {
        let raw = RawEvent::new(EventType::EV_PWR.raw(), 0, 1);
        assert!(matches!(decode(&raw), TypedEvent::Unclassified { .. }));
    }

    #[test]
    fn value_kind_selects_the_value_interpretation() {
        let switches = registry::lookup(EventType::EV_SW.raw()).unwrap();
        assert_eq!(
            decode_in(switches, 0, 1),
            TypedEvent::Switch {
                code: Code::Known(SwitchCode::SW_LID),
                state: Toggle::On
            }
        );
    }

    #[test]
    fn mismatched_value_kind_is_unclassified() {
        let keys_as_toggles = Domain::new(
            EventType::EV_KEY,
            KeyCode::MAX,
            ValueKind::Toggle,
            KeyCode::name_of,
        );
        assert_eq!(
            decode_in(&keys_as_toggles, 30, 1),
            TypedEvent::Unclassified {
                type_id: 0x01,
                code_id: 30,
                value: 1
            }
        );

        let power = Domain::new(EventType::EV_PWR, 0, ValueKind::Scalar, |_| None);
        assert!(matches!(
            decode_in(&power, 0, 0),
            TypedEvent::Unclassified { type_id: 0x16, .. }
        ));
    }

    #[test]
    fn codes_past_the_domain_maximum_stay_unknown() {
        let narrow = Domain::new(EventType::EV_KEY, 10, ValueKind::KeyState, KeyCode::name_of);
        assert_eq!(
            decode_in(&narrow, 30, 1),
            TypedEvent::Key {
                code: Code::Unknown(30),
                state: KeyState::Pressed
            }
        );
    }

    #[test]
    fn unknown_code_keeps_raw_code_and_value() {
        let raw = RawEvent::new(EventType::EV_KEY.raw(), 84, 1);
        let typed = decode(&raw);
        assert_eq!(
            typed,
            TypedEvent::Key {
                code: Code::Unknown(84),
                state: KeyState::Pressed
            }
        );
        assert!(typed.has_unknown_code());
        assert_eq!(typed.to_raw(), raw);
    }

    #[test]
    fn out_of_range_code_is_not_clamped() {
        let raw = RawEvent::new(EventType::EV_REL.raw(), 0x40, 5);
        assert_eq!(
            decode(&raw),
            TypedEvent::Relative {
                axis: Code::Unknown(0x40),
                delta: 5
            }
        );
    }

    #[test]
    fn key_values_are_tri_state() {
        let press = decode(&RawEvent::new(0x01, 30, 1));
        let hold = decode(&RawEvent::new(0x01, 30, 2));
        let release = decode(&RawEvent::new(0x01, 30, 0));
        let odd = decode(&RawEvent::new(0x01, 30, 7));

        assert_eq!(press, TypedEvent::key(KeyCode::KEY_A, KeyState::Pressed));
        assert_eq!(hold, TypedEvent::key(KeyCode::KEY_A, KeyState::Repeated));
        assert_eq!(release, TypedEvent::key(KeyCode::KEY_A, KeyState::Released));
        assert_eq!(odd, TypedEvent::key(KeyCode::KEY_A, KeyState::Other(7)));
    }

    #[test]
    fn relative_and_absolute_keep_signed_values() {
        assert_eq!(
            decode(&RawEvent::new(0x02, 0x01, -15)),
            TypedEvent::Relative {
                axis: Code::Known(RelAxis::REL_Y),
                delta: -15
            }
        );
        assert_eq!(
            decode(&RawEvent::new(0x03, 0x00, 32_000)),
            TypedEvent::Absolute {
                axis: Code::Known(AbsAxis::ABS_X),
                position: 32_000
            }
        );
    }

    #[test]
    fn dropped_marker_is_recognised() {
        let dropped = decode(&RawEvent::new(0x00, 3, 0));
        assert!(dropped.is_syn());
        assert!(dropped.is_dropped());
        assert!(!TypedEvent::report().is_dropped());
    }

    #[test]
    fn stamped_event_keeps_timestamp() {
        let raw = RawEvent::with_time(Timestamp::new(10, 20), 0x04, 0x04, 458_756);
        let stamped = StampedEvent::decode(&raw);
        assert_eq!(stamped.time, Timestamp::new(10, 20));
        assert_eq!(
            stamped.event,
            TypedEvent::Misc {
                code: Code::Known(MiscCode::MSC_SCAN),
                value: 458_756
            }
        );
    }

    #[test]
    fn typed_event_serializes_with_kernel_names() {
        let event = TypedEvent::key(KeyCode::KEY_LEFTCTRL, KeyState::Pressed);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("KEY_LEFTCTRL"));
        let back: TypedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
