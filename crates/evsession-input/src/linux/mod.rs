//! Linux backends: an evdev channel for reading and a uinput sink for
//! emitting.

mod channel;
mod uinput;

pub use channel::{EvdevChannel, EvdevSource};
pub use uinput::{OutputTarget, UinputDevice};
