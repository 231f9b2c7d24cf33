//! Static registry of event domains.
//!
//! Maps an event-type identifier to the domain descriptor the decoder needs:
//! the highest legal code, the kind of value the domain carries, and a
//! name lookup for its codes. Pure data, built once at compile time.

use serde::{Deserialize, Serialize};

use crate::codes::{
    event_codes, AbsAxis, FfCode, KeyCode, LedCode, MiscCode, RelAxis, RepeatCode, SoundCode,
    SwitchCode, SynCode,
};

event_codes! {
    /// Event types (`EV_*`).
    pub enum EventType (max = 0x1f) {
        EV_SYN = 0x00,
        EV_KEY = 0x01,
        EV_REL = 0x02,
        EV_ABS = 0x03,
        EV_MSC = 0x04,
        EV_SW = 0x05,
        EV_LED = 0x11,
        EV_SND = 0x12,
        EV_REP = 0x14,
        EV_FF = 0x15,
        EV_PWR = 0x16,
        EV_FF_STATUS = 0x17,
    }
}

/// How a domain's `value` field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Ignored; only the position in the stream matters.
    Marker,
    /// 0 = release, 1 = press, 2 = autorepeat.
    KeyState,
    /// 0 = off, 1 = on.
    Toggle,
    /// Signed relative motion since the previous report.
    Delta,
    /// Signed absolute position within the axis range.
    Position,
    /// Domain-specific scalar (scan codes, repeat periods, tone frequency).
    Scalar,
}

/// Describes one registered event domain.
#[derive(Debug, Clone, Copy)]
pub struct Domain {
    pub event_type: EventType,
    pub max_code: u16,
    pub value_kind: ValueKind,
    code_name: fn(u16) -> Option<&'static str>,
}

impl Domain {
    pub(crate) const fn new(
        event_type: EventType,
        max_code: u16,
        value_kind: ValueKind,
        code_name: fn(u16) -> Option<&'static str>,
    ) -> Self {
        Self {
            event_type,
            max_code,
            value_kind,
            code_name,
        }
    }

    /// Kernel constant name of `code` within this domain, if enumerated.
    pub fn code_name(&self, code: u16) -> Option<&'static str> {
        (self.code_name)(code)
    }

    /// Whether `code` lies within the range the kernel defines for this
    /// domain. Codes in range may still be unenumerated gaps.
    pub fn in_range(&self, code: u16) -> bool {
        code <= self.max_code
    }
}

/// Every domain the decoder knows how to type. `EV_PWR` and `EV_FF_STATUS`
/// have no code tables and are deliberately absent; their events decode as
/// unclassified.
pub static DOMAINS: [Domain; 10] = [
    Domain::new(EventType::EV_SYN, SynCode::MAX, ValueKind::Marker, SynCode::name_of),
    Domain::new(EventType::EV_KEY, KeyCode::MAX, ValueKind::KeyState, KeyCode::name_of),
    Domain::new(EventType::EV_REL, RelAxis::MAX, ValueKind::Delta, RelAxis::name_of),
    Domain::new(EventType::EV_ABS, AbsAxis::MAX, ValueKind::Position, AbsAxis::name_of),
    Domain::new(EventType::EV_MSC, MiscCode::MAX, ValueKind::Scalar, MiscCode::name_of),
    Domain::new(EventType::EV_SW, SwitchCode::MAX, ValueKind::Toggle, SwitchCode::name_of),
    Domain::new(EventType::EV_LED, LedCode::MAX, ValueKind::Toggle, LedCode::name_of),
    Domain::new(EventType::EV_SND, SoundCode::MAX, ValueKind::Scalar, SoundCode::name_of),
    Domain::new(EventType::EV_REP, RepeatCode::MAX, ValueKind::Scalar, RepeatCode::name_of),
    Domain::new(EventType::EV_FF, FfCode::MAX, ValueKind::Scalar, FfCode::name_of),
];

/// Find the domain registered for `type_id`.
pub fn lookup(type_id: u16) -> Option<&'static Domain> {
    DOMAINS
        .iter()
        .find(|domain| domain.event_type.raw() == type_id)
}

/// Human-readable `(type, code)` names, falling back to hex for anything
/// not enumerated.
pub fn describe(type_id: u16, code_id: u16) -> (String, String) {
    let type_name = EventType::name_of(type_id)
        .map_or_else(|| format!("{type_id:#04x}"), str::to_string);
    let code_name = lookup(type_id)
        .and_then(|domain| domain.code_name(code_id))
        .map_or_else(|| format!("{code_id:#06x}"), str::to_string);
    (type_name, code_name)
}

/// The code whose kernel constant name is `name` within the domain of
/// `type_id`.
pub fn code_by_name(type_id: u16, name: &str) -> Option<u16> {
    let domain = lookup(type_id)?;
    (0..=domain.max_code).find(|&code| domain.code_name(code) == Some(name))
}
