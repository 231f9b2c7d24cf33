//! Device identity and capability descriptors.

use serde::{Deserialize, Serialize};

use crate::registry::EventType;

/// Identity of an input device as reported by the kernel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Human-readable name (e.g. "AT Translated Set 2 keyboard").
    pub name: String,
    /// Physical topology path. Usually absent for virtual devices.
    pub phys: Option<String>,
    /// Unique identifier such as a serial number, if the driver sets one.
    pub uniq: Option<String>,
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Axis parameters for an absolute axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsInfo {
    pub value: i32,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// One supported `(type, code)` pair, with any parameters the kernel needs to
/// enable it on a virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    /// A plain code bit.
    Code { event_type: u16, code: u16 },
    /// An absolute axis with its range.
    Abs { code: u16, info: AbsInfo },
    /// An autorepeat parameter with its current value.
    Repeat { code: u16, value: i32 },
}

impl Capability {
    pub fn event_type(&self) -> u16 {
        match *self {
            Self::Code { event_type, .. } => event_type,
            Self::Abs { .. } => EventType::EV_ABS.raw(),
            Self::Repeat { .. } => EventType::EV_REP.raw(),
        }
    }

    pub fn code(&self) -> u16 {
        match *self {
            Self::Code { code, .. } | Self::Abs { code, .. } | Self::Repeat { code, .. } => code,
        }
    }
}

/// Everything needed to clone a device as a virtual one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTemplate {
    pub identity: DeviceIdentity,
    pub capabilities: Vec<Capability>,
}

impl DeviceTemplate {
    pub fn new(identity: DeviceIdentity) -> Self {
        Self {
            identity,
            capabilities: Vec::new(),
        }
    }

    /// Add a plain `(type, code)` capability.
    #[must_use]
    pub fn with_code(mut self, event_type: EventType, code: u16) -> Self {
        self.capabilities.push(Capability::Code {
            event_type: event_type.raw(),
            code,
        });
        self
    }

    /// Add an absolute axis with its range.
    #[must_use]
    pub fn with_abs(mut self, code: u16, info: AbsInfo) -> Self {
        self.capabilities.push(Capability::Abs { code, info });
        self
    }

    /// Whether the template advertises `(event_type, code)`.
    pub fn supports(&self, event_type: u16, code: u16) -> bool {
        self.capabilities
            .iter()
            .any(|cap| cap.event_type() == event_type && cap.code() == code)
    }

    /// Distinct event types the template touches, in ascending order.
    pub fn event_types(&self) -> Vec<u16> {
        let mut types: Vec<u16> = self.capabilities.iter().map(Capability::event_type).collect();
        types.sort_unstable();
        types.dedup();
        types
    }
}
