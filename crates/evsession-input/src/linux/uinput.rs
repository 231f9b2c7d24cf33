//! uinput virtual devices.
//!
//! Device creation goes through the `UI_*` ioctls directly. Events are written
//! verbatim; unlike higher-level builders nothing appends a `SYN_REPORT`, so
//! framing stays with [`VirtualEmitter`].

#![allow(unsafe_code)]

use std::ffi::{c_char, c_int, c_ulong};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use evsession_types::{Capability, DeviceTemplate, EventType, RawEvent};
use tracing::{debug, info, warn};

use crate::error::EmitterError;
use crate::{VirtualEmitter, VirtualSink};

const UINPUT_PATH: &str = "/dev/uinput";
const UINPUT_MAX_NAME_SIZE: usize = 80;
const SYSFS_INPUT: &str = "/sys/devices/virtual/input";

const IOC_NONE: c_ulong = 0;
const IOC_WRITE: c_ulong = 1;
const IOC_READ: c_ulong = 2;

const fn ioc(dir: c_ulong, nr: c_ulong, size: usize) -> c_ulong {
    (dir << 30) | ((size as c_ulong) << 16) | ((b'U' as c_ulong) << 8) | nr
}

const UI_DEV_CREATE: c_ulong = ioc(IOC_NONE, 1, 0);
const UI_DEV_DESTROY: c_ulong = ioc(IOC_NONE, 2, 0);
const UI_DEV_SETUP: c_ulong = ioc(IOC_WRITE, 3, std::mem::size_of::<UinputSetup>());
const UI_ABS_SETUP: c_ulong = ioc(IOC_WRITE, 4, std::mem::size_of::<UinputAbsSetup>());
const UI_SET_EVBIT: c_ulong = ioc(IOC_WRITE, 100, std::mem::size_of::<c_int>());
const UI_SET_KEYBIT: c_ulong = ioc(IOC_WRITE, 101, std::mem::size_of::<c_int>());
const UI_SET_RELBIT: c_ulong = ioc(IOC_WRITE, 102, std::mem::size_of::<c_int>());
const UI_SET_ABSBIT: c_ulong = ioc(IOC_WRITE, 103, std::mem::size_of::<c_int>());
const UI_SET_MSCBIT: c_ulong = ioc(IOC_WRITE, 104, std::mem::size_of::<c_int>());
const UI_SET_LEDBIT: c_ulong = ioc(IOC_WRITE, 105, std::mem::size_of::<c_int>());
const UI_SET_SNDBIT: c_ulong = ioc(IOC_WRITE, 106, std::mem::size_of::<c_int>());
const UI_SET_FFBIT: c_ulong = ioc(IOC_WRITE, 107, std::mem::size_of::<c_int>());
const UI_SET_SWBIT: c_ulong = ioc(IOC_WRITE, 109, std::mem::size_of::<c_int>());

const fn ui_get_sysname(len: usize) -> c_ulong {
    ioc(IOC_READ, 44, len)
}

#[repr(C)]
struct UinputSetup {
    id: libc::input_id,
    name: [c_char; UINPUT_MAX_NAME_SIZE],
    ff_effects_max: u32,
}

#[repr(C)]
struct UinputAbsSetup {
    code: u16,
    absinfo: libc::input_absinfo,
}

/// Where the virtual device's control descriptor comes from.
#[derive(Debug, Clone, Copy)]
pub enum OutputTarget<'fd> {
    /// Open `/dev/uinput` and close it when the device is dropped.
    KernelManaged,
    /// Use a descriptor the caller already opened on the uinput node. The
    /// device works on a duplicate; the caller's handle stays the caller's.
    CallerSupplied(BorrowedFd<'fd>),
}

/// A created uinput device. Destroyed when dropped.
#[derive(Debug)]
pub struct UinputDevice {
    file: File,
    sysname: Option<String>,
}

impl UinputDevice {
    /// Create a virtual device advertising everything in `template`.
    pub fn create(template: &DeviceTemplate, target: OutputTarget<'_>) -> Result<Self, EmitterError> {
        let name = template.identity.name.as_bytes();
        if name.len() >= UINPUT_MAX_NAME_SIZE {
            return Err(EmitterError::InvalidTemplate(format!(
                "device name is {} bytes, at most {} allowed",
                name.len(),
                UINPUT_MAX_NAME_SIZE - 1
            )));
        }
        if name.contains(&0) {
            return Err(EmitterError::InvalidTemplate(
                "device name contains a NUL byte".to_string(),
            ));
        }

        let file = match target {
            OutputTarget::KernelManaged => OpenOptions::new()
                .write(true)
                .custom_flags(libc::O_NONBLOCK)
                .open(UINPUT_PATH),
            OutputTarget::CallerSupplied(fd) => fd.try_clone_to_owned().map(File::from),
        }
        .map_err(EmitterError::CreationDenied)?;

        let fd = file.as_raw_fd();
        enable_capabilities(fd, template).map_err(EmitterError::CreationDenied)?;

        let mut setup = UinputSetup {
            id: libc::input_id {
                bustype: template.identity.bustype,
                vendor: template.identity.vendor,
                product: template.identity.product,
                version: template.identity.version,
            },
            name: [0; UINPUT_MAX_NAME_SIZE],
            ff_effects_max: 0,
        };
        for (dst, &src) in setup.name.iter_mut().zip(name) {
            *dst = c_char::from_ne_bytes([src]);
        }
        if template.event_types().contains(&EventType::EV_FF.raw()) {
            setup.ff_effects_max = 16;
        }

        // SAFETY: `fd` is open for the duration of the call and `setup`
        // matches the kernel's `struct uinput_setup`.
        unsafe { ioctl_ptr(fd, UI_DEV_SETUP, std::ptr::addr_of!(setup).cast()) }
            .map_err(EmitterError::CreationDenied)?;
        // SAFETY: argument-less request on an open descriptor.
        unsafe { ioctl_int(fd, UI_DEV_CREATE, 0) }.map_err(EmitterError::CreationDenied)?;

        let sysname = match fetch_sysname(fd) {
            Ok(sysname) => Some(sysname),
            Err(err) => {
                warn!("could not query uinput sysname: {err}");
                None
            }
        };

        let mut device = Self { file, sysname };
        device
            .write_repeat_settings(template)
            .map_err(EmitterError::CreationDenied)?;

        info!(
            name = %template.identity.name,
            capabilities = template.capabilities.len(),
            sysname = device.sysname.as_deref().unwrap_or("?"),
            "created virtual device"
        );
        Ok(device)
    }

    /// Kernel-assigned directory name, such as `input42`.
    pub fn sysname(&self) -> Option<&str> {
        self.sysname.as_deref()
    }

    /// The device's sysfs directory.
    pub fn syspath(&self) -> Option<PathBuf> {
        self.sysname.as_ref().map(|name| Path::new(SYSFS_INPUT).join(name))
    }

    /// The `/dev/input/event*` node for the device, once udev has made it.
    pub fn devnode(&self) -> io::Result<Option<PathBuf>> {
        let Some(syspath) = self.syspath() else {
            return Ok(None);
        };
        for entry in fs::read_dir(syspath)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with("event") {
                return Ok(Some(Path::new("/dev/input").join(name)));
            }
        }
        Ok(None)
    }

    fn write_repeat_settings(&mut self, template: &DeviceTemplate) -> io::Result<()> {
        let mut wrote = false;
        for cap in &template.capabilities {
            if let Capability::Repeat { code, value } = *cap {
                self.write_event(&RawEvent::new(EventType::EV_REP.raw(), code, value))?;
                wrote = true;
            }
        }
        if wrote {
            self.write_event(&RawEvent::new(EventType::EV_SYN.raw(), 0, 0))?;
        }
        Ok(())
    }
}

impl VirtualSink for UinputDevice {
    fn write_event(&mut self, event: &RawEvent) -> io::Result<()> {
        let bytes = event
            .to_bytes()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.file.write_all(&bytes)
    }
}

impl Drop for UinputDevice {
    fn drop(&mut self) {
        // SAFETY: argument-less request on a descriptor we still own.
        if let Err(err) = unsafe { ioctl_int(self.file.as_raw_fd(), UI_DEV_DESTROY, 0) } {
            warn!("failed to destroy virtual device: {err}");
        } else {
            debug!(sysname = self.sysname.as_deref().unwrap_or("?"), "destroyed virtual device");
        }
    }
}

impl VirtualEmitter<UinputDevice> {
    /// Create a uinput device from `template` and wrap it in an emitter.
    pub fn create(template: &DeviceTemplate, target: OutputTarget<'_>) -> Result<Self, EmitterError> {
        UinputDevice::create(template, target).map(Self::new)
    }

    pub fn syspath(&self) -> Option<PathBuf> {
        self.sink().syspath()
    }

    pub fn devnode(&self) -> io::Result<Option<PathBuf>> {
        self.sink().devnode()
    }
}

fn set_bit_request(event_type: u16) -> Option<c_ulong> {
    Some(match EventType::from_raw(event_type)? {
        EventType::EV_KEY => UI_SET_KEYBIT,
        EventType::EV_REL => UI_SET_RELBIT,
        EventType::EV_ABS => UI_SET_ABSBIT,
        EventType::EV_MSC => UI_SET_MSCBIT,
        EventType::EV_LED => UI_SET_LEDBIT,
        EventType::EV_SND => UI_SET_SNDBIT,
        EventType::EV_FF => UI_SET_FFBIT,
        EventType::EV_SW => UI_SET_SWBIT,
        _ => return None,
    })
}

fn enable_capabilities(fd: c_int, template: &DeviceTemplate) -> io::Result<()> {
    // SAFETY (all calls below): `fd` is open and every request takes either
    // an int or a pointer to a struct laid out as the kernel expects.
    unsafe { ioctl_int(fd, UI_SET_EVBIT, c_int::from(EventType::EV_SYN.raw()))? };
    for event_type in template.event_types() {
        unsafe { ioctl_int(fd, UI_SET_EVBIT, c_int::from(event_type))? };
    }

    for cap in &template.capabilities {
        match *cap {
            Capability::Code { event_type, code } => {
                if let Some(request) = set_bit_request(event_type) {
                    unsafe { ioctl_int(fd, request, c_int::from(code))? };
                }
            }
            Capability::Abs { code, info } => {
                unsafe { ioctl_int(fd, UI_SET_ABSBIT, c_int::from(code))? };
                let setup = UinputAbsSetup {
                    code,
                    absinfo: libc::input_absinfo {
                        value: info.value,
                        minimum: info.minimum,
                        maximum: info.maximum,
                        fuzz: info.fuzz,
                        flat: info.flat,
                        resolution: info.resolution,
                    },
                };
                unsafe { ioctl_ptr(fd, UI_ABS_SETUP, std::ptr::addr_of!(setup).cast())? };
            }
            // Written as events once the device exists.
            Capability::Repeat { .. } => {}
        }
    }
    Ok(())
}

fn fetch_sysname(fd: c_int) -> io::Result<String> {
    let mut buf = vec![0_u8; 64];
    loop {
        // SAFETY: the request encodes `buf.len()`, so the kernel writes at
        // most that many bytes.
        let len = unsafe {
            ioctl_ptr(fd, ui_get_sysname(buf.len()), buf.as_mut_ptr().cast())?
        };
        let len = usize::try_from(len).unwrap_or(0);
        if len < buf.len() {
            // `len` counts the trailing NUL.
            buf.truncate(len.saturating_sub(1));
            return String::from_utf8(buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
        let doubled = buf.len() * 2;
        buf.resize(doubled, 0);
    }
}

unsafe fn ioctl_int(fd: c_int, request: c_ulong, arg: c_int) -> io::Result<c_int> {
    let ret = libc::ioctl(fd, request as _, arg);
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

unsafe fn ioctl_ptr(fd: c_int, request: c_ulong, arg: *const libc::c_void) -> io::Result<c_int> {
    let ret = libc::ioctl(fd, request as _, arg);
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_numbers_match_kernel_headers() {
        assert_eq!(UI_DEV_CREATE, 0x5501);
        assert_eq!(UI_DEV_DESTROY, 0x5502);
        assert_eq!(UI_DEV_SETUP, 0x405c_5503);
        assert_eq!(UI_ABS_SETUP, 0x401c_5504);
        assert_eq!(UI_SET_EVBIT, 0x4004_5564);
        assert_eq!(UI_SET_SWBIT, 0x4004_556d);
        assert_eq!(ui_get_sysname(64), 0x8040_552c);
    }

    #[test]
    fn overlong_name_is_rejected_before_opening() {
        let mut template = DeviceTemplate::default();
        template.identity.name = "x".repeat(UINPUT_MAX_NAME_SIZE);
        let err = UinputDevice::create(&template, OutputTarget::KernelManaged).unwrap_err();
        assert!(matches!(err, EmitterError::InvalidTemplate(_)));
    }

    #[test]
    fn nul_in_name_is_rejected() {
        let mut template = DeviceTemplate::default();
        template.identity.name = "bad\0name".to_string();
        let err = UinputDevice::create(&template, OutputTarget::KernelManaged).unwrap_err();
        assert!(matches!(err, EmitterError::InvalidTemplate(_)));
    }
}
