//! evdev-backed input device handle.

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use evdev::{AbsoluteAxisType, InputEventKind, RelativeAxisType};

use crate::daemon::DeviceEvent;
use crate::error::DeviceError;
use crate::platform::DeviceHandle;

/// An open `/dev/input/eventN` node in nonblocking mode.
///
/// Grabbing uses the `EVIOCGRAB` ioctl, which redirects the device's
/// events exclusively to this process; until released, the compositor
/// never sees them.
pub struct EvdevInput {
    device: evdev::Device,
    // Absolute events arrive one axis at a time; the other axis repeats
    // its last seen value.
    abs_x: i32,
    abs_y: i32,
}

impl std::fmt::Debug for EvdevInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvdevInput")
            .field("abs_x", &self.abs_x)
            .field("abs_y", &self.abs_y)
            .finish_non_exhaustive()
    }
}

impl EvdevInput {
    pub fn open(path: &Path) -> Result<Self, DeviceError> {
        let device = evdev::Device::open(path).map_err(|e| {
            let shown = path.display();
            match e.kind() {
                io::ErrorKind::NotFound => DeviceError::NotFound(shown.to_string()),
                io::ErrorKind::PermissionDenied => DeviceError::PermissionDenied(format!(
                    "cannot open {shown}; add the user to the 'input' group or run as root"
                )),
                _ => DeviceError::Io(e),
            }
        })?;

        set_nonblocking(device.as_raw_fd())?;

        Ok(Self {
            device,
            abs_x: 0,
            abs_y: 0,
        })
    }

    /// The underlying evdev device, for identity and capability probing.
    #[must_use]
    pub fn device(&self) -> &evdev::Device {
        &self.device
    }
}

impl DeviceHandle for EvdevInput {
    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.device.ungrab()
    }

    fn raw_fd(&self) -> i32 {
        self.device.as_raw_fd()
    }

    /// Drains currently readable events, translating the subset the
    /// dispatcher understands. Key repeats are dropped (the output side
    /// regenerates them), as are key codes outside the 8-bit range
    /// (BTN_* and friends pass through grabbed pointer devices unmapped).
    fn read_events(&mut self, out: &mut Vec<DeviceEvent>) -> io::Result<()> {
        let events = match self.device.fetch_events() {
            Ok(events) => events,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e),
        };

        for event in events {
            match event.kind() {
                InputEventKind::Key(key) => {
                    let value = event.value();
                    if value == 2 {
                        continue;
                    }
                    let code = key.code();
                    if code == 0 || code > u16::from(u8::MAX) {
                        continue;
                    }
                    out.push(DeviceEvent::Key {
                        code: code as u8,
                        pressed: value == 1,
                    });
                }
                InputEventKind::RelAxis(axis) => {
                    let value = event.value();
                    if axis == RelativeAxisType::REL_X {
                        out.push(DeviceEvent::MouseMove { dx: value, dy: 0 });
                    } else if axis == RelativeAxisType::REL_Y {
                        out.push(DeviceEvent::MouseMove { dx: 0, dy: value });
                    } else if axis == RelativeAxisType::REL_WHEEL {
                        out.push(DeviceEvent::MouseScroll { dx: 0, dy: value });
                    } else if axis == RelativeAxisType::REL_HWHEEL {
                        out.push(DeviceEvent::MouseScroll { dx: value, dy: 0 });
                    }
                }
                InputEventKind::AbsAxis(axis) => {
                    let value = event.value();
                    if axis == AbsoluteAxisType::ABS_X {
                        self.abs_x = value;
                        out.push(DeviceEvent::MouseMoveAbs {
                            x: self.abs_x,
                            y: self.abs_y,
                        });
                    } else if axis == AbsoluteAxisType::ABS_Y {
                        self.abs_y = value;
                        out.push(DeviceEvent::MouseMoveAbs {
                            x: self.abs_x,
                            y: self.abs_y,
                        });
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Puts the descriptor into nonblocking mode so a poll wakeup never turns
/// into a blocking read.
fn set_nonblocking(fd: i32) -> Result<(), DeviceError> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(DeviceError::Io(io::Error::last_os_error()));
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(DeviceError::Io(io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_node_is_not_found() {
        let err = EvdevInput::open(Path::new("/dev/input/event-does-not-exist")).unwrap_err();
        assert!(matches!(err, DeviceError::NotFound(_)));
    }

    #[test]
    fn open_first_accessible_device_reports_identity() {
        // Runtime skip when input devices are not accessible (CI, plain
        // user without the input group).
        let Ok(entries) = std::fs::read_dir(super::super::INPUT_DIR) else {
            eprintln!("SKIPPED: /dev/input not readable");
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let named_event = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with("event"));
            if !named_event {
                continue;
            }
            if let Ok(input) = EvdevInput::open(&path) {
                assert!(input.raw_fd() >= 0);
                let _ = input.device().input_id();
                return;
            }
        }
        eprintln!("SKIPPED: no accessible input devices");
    }
}
