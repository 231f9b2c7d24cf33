//! evdev-backed event channel.

use std::io;
use std::os::fd::BorrowedFd;

use evdev::raw_stream::RawDevice;
use evsession_types::{
    AbsInfo, Capability, DeviceIdentity, DeviceTemplate, EventType, RawEvent, RepeatCode,
    Timestamp,
};
use tracing::info;

use crate::resync::{DeviceState, ResyncReader, StateSource};
use crate::{EventChannel, GrabMode, ReadFlag};

/// Raw record and state access over an evdev descriptor.
pub struct EvdevSource {
    device: RawDevice,
}

impl StateSource for EvdevSource {
    fn fetch(&mut self) -> io::Result<Option<Vec<RawEvent>>> {
        match self.device.fetch_events() {
            Ok(events) => {
                let events: Vec<RawEvent> = events
                    .map(|ev| {
                        RawEvent::with_time(
                            Timestamp::from(ev.timestamp()),
                            ev.event_type().0,
                            ev.code(),
                            ev.value(),
                        )
                    })
                    .collect();
                if events.is_empty() {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                Ok(Some(events))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(classify(err)),
        }
    }

    fn snapshot(&self) -> io::Result<DeviceState> {
        let device = &self.device;
        let mut state = DeviceState::default();
        if device.supported_keys().is_some() {
            state.keys = device.get_key_state().map_err(classify)?.iter().map(|k| k.0).collect();
        }
        if device.supported_leds().is_some() {
            state.leds = device.get_led_state().map_err(classify)?.iter().map(|l| l.0).collect();
        }
        if device.supported_switches().is_some() {
            state.switches = device
                .get_switch_state()
                .map_err(classify)?
                .iter()
                .map(|s| s.0)
                .collect();
        }
        if let Some(axes) = device.supported_absolute_axes() {
            let infos = device.get_abs_state().map_err(classify)?;
            for axis in axes.iter() {
                if let Some(info) = infos.get(usize::from(axis.0)) {
                    state.abs.insert(axis.0, info.value);
                }
            }
        }
        Ok(state)
    }
}

/// A channel over one `/dev/input/event*` descriptor.
///
/// Holds its own duplicate of the descriptor, so the caller's handle stays
/// open and owned by the caller. The duplicate shares the open file
/// description: open the device with `O_NONBLOCK` to get "nothing now"
/// results instead of blocking reads.
pub struct EvdevChannel {
    reader: ResyncReader<EvdevSource>,
    identity: DeviceIdentity,
}

impl EvdevChannel {
    pub fn from_fd(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let device = RawDevice::from_fd(fd.try_clone_to_owned()?).map_err(classify)?;
        let identity = identity_of(&device);
        let reader = ResyncReader::new(EvdevSource { device })?;
        info!(name = %identity.name, "opened evdev channel");
        Ok(Self { reader, identity })
    }

    /// Everything needed to recreate this device as a virtual one.
    pub fn template(&self) -> io::Result<DeviceTemplate> {
        let device = &self.reader.source().device;
        let mut template = DeviceTemplate::new(self.identity.clone());

        if let Some(keys) = device.supported_keys() {
            push_codes(&mut template, EventType::EV_KEY, keys.iter().map(|k| k.0));
        }
        if let Some(rel) = device.supported_relative_axes() {
            push_codes(&mut template, EventType::EV_REL, rel.iter().map(|r| r.0));
        }
        if let Some(msc) = device.misc_properties() {
            push_codes(&mut template, EventType::EV_MSC, msc.iter().map(|m| m.0));
        }
        if let Some(sw) = device.supported_switches() {
            push_codes(&mut template, EventType::EV_SW, sw.iter().map(|s| s.0));
        }
        if let Some(leds) = device.supported_leds() {
            push_codes(&mut template, EventType::EV_LED, leds.iter().map(|l| l.0));
        }
        if let Some(snd) = device.supported_sounds() {
            push_codes(&mut template, EventType::EV_SND, snd.iter().map(|s| s.0));
        }
        if let Some(ff) = device.supported_ff() {
            push_codes(&mut template, EventType::EV_FF, ff.iter().map(|f| f.0));
        }

        if let Some(axes) = device.supported_absolute_axes() {
            let infos = device.get_abs_state().map_err(classify)?;
            for axis in axes.iter() {
                let Some(raw) = infos.get(usize::from(axis.0)) else {
                    continue;
                };
                template = template.with_abs(
                    axis.0,
                    AbsInfo {
                        value: raw.value,
                        minimum: raw.minimum,
                        maximum: raw.maximum,
                        fuzz: raw.fuzz,
                        flat: raw.flat,
                        resolution: raw.resolution,
                    },
                );
            }
        }

        if let Some(repeat) = device.get_auto_repeat() {
            for (code, value) in [
                (RepeatCode::REP_DELAY, repeat.delay),
                (RepeatCode::REP_PERIOD, repeat.period),
            ] {
                template.capabilities.push(Capability::Repeat {
                    code: code.raw(),
                    value: i32::try_from(value).unwrap_or(i32::MAX),
                });
            }
        }

        Ok(template)
    }

    /// The cached device state as of the last event handed out.
    pub fn state(&self) -> &DeviceState {
        self.reader.state()
    }
}

impl EventChannel for EvdevChannel {
    fn read_event(&mut self, flag: ReadFlag) -> io::Result<Option<RawEvent>> {
        self.reader.read(flag)
    }

    fn force_resync(&mut self) -> io::Result<()> {
        self.reader.force_resync();
        Ok(())
    }

    fn set_grab(&mut self, mode: GrabMode) -> io::Result<()> {
        match mode {
            GrabMode::Grab => self.reader.source_mut().device.grab(),
            GrabMode::Ungrab => self.reader.source_mut().device.ungrab(),
        }
        .map_err(classify)
    }

    fn identity(&self) -> DeviceIdentity {
        self.identity.clone()
    }
}

fn push_codes(template: &mut DeviceTemplate, event_type: EventType, codes: impl Iterator<Item = u16>) {
    template.capabilities.extend(codes.map(|code| Capability::Code {
        event_type: event_type.raw(),
        code,
    }));
}

fn identity_of(device: &RawDevice) -> DeviceIdentity {
    let id = device.input_id();
    DeviceIdentity {
        name: device.name().unwrap_or("Unknown Device").to_string(),
        phys: device.physical_path().map(str::to_string),
        uniq: device.unique_name().map(str::to_string),
        bustype: id.bus_type().0,
        vendor: id.vendor(),
        product: id.product(),
        version: id.version(),
    }
}

/// A vanished device surfaces as `ENODEV`; report it as end of stream.
fn classify(err: io::Error) -> io::Error {
    match err.raw_os_error() {
        Some(libc::ENODEV | libc::EBADF) => {
            io::Error::new(io::ErrorKind::UnexpectedEof, err)
        }
        _ => err,
    }
}
