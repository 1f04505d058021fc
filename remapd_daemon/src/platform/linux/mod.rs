//! Linux platform integration: evdev input, uinput output, inotify
//! hotplug, and process scheduling.

pub mod evdev_input;
pub mod hotplug;
pub mod uinput_output;

use std::path::Path;

use log::{debug, warn};

use remapd_core::DeviceId;

use crate::device_manager::{Capabilities, Device};
use crate::error::DeviceError;

pub use evdev_input::EvdevInput;
pub use hotplug::Hotplug;
pub use uinput_output::UinputOutput;

/// Directory holding the kernel's input device nodes.
pub const INPUT_DIR: &str = "/dev/input";

/// Letter keys a device must mostly support to count as a keyboard;
/// filters out power buttons and consumer-control devices that also claim
/// EV_KEY.
const ALPHA_KEYS: std::ops::RangeInclusive<u16> = 16..=50; // q..m block
const MIN_ALPHA_KEYS: usize = 20;

/// Asks for the most favorable niceness. Needs CAP_SYS_NICE; refusal only
/// costs latency, so it is logged and ignored.
pub fn raise_priority() {
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS as _, 0, -20) };
    if rc != 0 {
        warn!(
            "could not raise scheduling priority: {}",
            std::io::Error::last_os_error()
        );
    }
}

fn is_keyboard(device: &evdev::Device) -> bool {
    if !device.supported_events().contains(evdev::EventType::KEY) {
        return false;
    }
    let Some(keys) = device.supported_keys() else {
        return false;
    };
    let count = ALPHA_KEYS
        .filter(|code| keys.contains(evdev::Key::new(*code)))
        .count();
    count >= MIN_ALPHA_KEYS
}

fn probe_capabilities(device: &evdev::Device) -> Capabilities {
    let rel = device.supported_relative_axes().map_or(false, |axes| {
        axes.contains(evdev::RelativeAxisType::REL_X)
            && axes.contains(evdev::RelativeAxisType::REL_Y)
    });
    let abs = device
        .supported_absolute_axes()
        .map_or(false, |axes| axes.contains(evdev::AbsoluteAxisType::ABS_X));
    Capabilities {
        keys: is_keyboard(device),
        rel,
        abs,
    }
}

/// Opens an input node and wraps it as a table entry with its identity and
/// capability set.
pub fn open_device(path: &Path) -> Result<Device, DeviceError> {
    let input = EvdevInput::open(path)?;
    let dev = input.device();
    let name = dev.name().unwrap_or("Unknown Device").to_string();
    let ids = dev.input_id();
    let id = DeviceId::new(ids.vendor(), ids.product());
    let caps = probe_capabilities(dev);
    Ok(Device::new(
        path.to_path_buf(),
        name,
        id,
        caps,
        Box::new(input),
    ))
}

/// Enumerates every openable `eventN` node, sorted by path. Nodes that
/// fail to open (permissions, races with removal) are skipped.
pub fn enumerate() -> Result<Vec<Device>, DeviceError> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(INPUT_DIR)? {
        let entry = entry?;
        let path = entry.path();
        let is_event_node = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(false, |n| n.starts_with("event"));
        if is_event_node {
            paths.push(path);
        }
    }
    paths.sort();

    let mut devices = Vec::new();
    for path in paths {
        match open_device(&path) {
            Ok(device) => devices.push(device),
            Err(e) => debug!("skipping {}: {e}", path.display()),
        }
    }
    Ok(devices)
}
