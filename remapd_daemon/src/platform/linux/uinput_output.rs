//! uinput-backed output device.
//!
//! One virtual device carries both the keyboard and pointer sides of the
//! sink, so everything the daemon replays appears to come from a single
//! piece of hardware.

use std::io;

use evdev::uinput::{VirtualDevice, VirtualDeviceBuilder};
use evdev::{
    AbsInfo, AbsoluteAxisType, AttributeSet, EventType, InputEvent, Key, RelativeAxisType,
    UinputAbsSetup,
};

use crate::platform::OutputBackend;

const ABS_RANGE: i32 = 65535;

pub struct UinputOutput {
    device: VirtualDevice,
}

impl UinputOutput {
    /// Creates the virtual device with the full 8-bit key range plus
    /// relative and absolute pointer axes. Requires write access to
    /// `/dev/uinput`.
    pub fn create(name: &str) -> io::Result<Self> {
        let mut keys = AttributeSet::<Key>::new();
        for code in 1..=u16::from(u8::MAX) {
            keys.insert(Key::new(code));
        }

        let mut rel = AttributeSet::<RelativeAxisType>::new();
        rel.insert(RelativeAxisType::REL_X);
        rel.insert(RelativeAxisType::REL_Y);
        rel.insert(RelativeAxisType::REL_WHEEL);
        rel.insert(RelativeAxisType::REL_HWHEEL);

        let abs_info = AbsInfo::new(0, 0, ABS_RANGE, 0, 0, 0);
        let abs_x = UinputAbsSetup::new(AbsoluteAxisType::ABS_X, abs_info);
        let abs_y = UinputAbsSetup::new(AbsoluteAxisType::ABS_Y, abs_info);

        let device = VirtualDeviceBuilder::new()?
            .name(name)
            .with_keys(&keys)?
            .with_relative_axes(&rel)?
            .with_absolute_axis(&abs_x)?
            .with_absolute_axis(&abs_y)?
            .build()?;

        Ok(Self { device })
    }
}

impl OutputBackend for UinputOutput {
    fn emit_key(&mut self, code: u8, pressed: bool) -> io::Result<()> {
        self.device.emit(&[InputEvent::new(
            EventType::KEY,
            u16::from(code),
            i32::from(pressed),
        )])
    }

    fn emit_rel(&mut self, dx: i32, dy: i32) -> io::Result<()> {
        let mut events = Vec::with_capacity(2);
        if dx != 0 {
            events.push(InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_X.0,
                dx,
            ));
        }
        if dy != 0 {
            events.push(InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_Y.0,
                dy,
            ));
        }
        if events.is_empty() {
            return Ok(());
        }
        self.device.emit(&events)
    }

    fn emit_abs(&mut self, x: i32, y: i32) -> io::Result<()> {
        self.device.emit(&[
            InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_X.0, x),
            InputEvent::new(EventType::ABSOLUTE, AbsoluteAxisType::ABS_Y.0, y),
        ])
    }

    fn emit_scroll(&mut self, dx: i32, dy: i32) -> io::Result<()> {
        let mut events = Vec::with_capacity(2);
        if dy != 0 {
            events.push(InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_WHEEL.0,
                dy,
            ));
        }
        if dx != 0 {
            events.push(InputEvent::new(
                EventType::RELATIVE,
                RelativeAxisType::REL_HWHEEL.0,
                dx,
            ));
        }
        if events.is_empty() {
            return Ok(());
        }
        self.device.emit(&events)
    }
}
