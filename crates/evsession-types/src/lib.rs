//! Shared types for evsession.
//!
//! This crate holds everything that does not touch a file descriptor: the
//! fixed-size raw record and its codec, the type/code registry, the per-domain
//! code enumerations, the typed event model with its total decoder, and the
//! device identity/capability descriptors used to clone a device.

pub mod codes;
pub mod device;
pub mod error;
pub mod event;
pub mod raw;
pub mod registry;

pub use codes::{
    AbsAxis, FfCode, KeyCode, LedCode, MiscCode, RelAxis, RepeatCode, SoundCode, SwitchCode,
    SynCode, UnknownCode,
};
pub use device::{AbsInfo, Capability, DeviceIdentity, DeviceTemplate};
pub use error::CodecError;
pub use event::{decode, Code, KeyState, StampedEvent, Toggle, TypedEvent};
pub use raw::{decode_records, RawEvent, Timestamp, RECORD_SIZE};
pub use registry::{Domain, EventType, ValueKind};
