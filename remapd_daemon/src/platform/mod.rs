//! Platform seams for input and output devices.
//!
//! The daemon core talks to hardware through two small traits so that the
//! event pipeline runs identically against evdev/uinput and against the
//! mock implementations the tests use.

use std::io;

#[cfg(target_os = "linux")]
pub mod linux;

pub mod mock;

use crate::daemon::DeviceEvent;

/// The raw transport behind the virtual sink. Implementations forward
/// events verbatim; key-state accounting stays in [`crate::sink::VirtualSink`].
pub trait OutputBackend {
    fn emit_key(&mut self, code: u8, pressed: bool) -> io::Result<()>;
    fn emit_rel(&mut self, dx: i32, dy: i32) -> io::Result<()>;
    fn emit_abs(&mut self, x: i32, y: i32) -> io::Result<()>;
    fn emit_scroll(&mut self, dx: i32, dy: i32) -> io::Result<()>;
}

/// An open input device: exclusive-grab control plus event readout.
pub trait DeviceHandle {
    /// Takes exclusive ownership of the device's events.
    fn grab(&mut self) -> io::Result<()>;

    /// Returns the device's events to the rest of the system.
    fn ungrab(&mut self) -> io::Result<()>;

    /// Descriptor for the central poll. Mock handles return -1 and are
    /// never polled.
    fn raw_fd(&self) -> i32;

    /// Drains whatever events are currently readable into `out`.
    fn read_events(&mut self, out: &mut Vec<DeviceEvent>) -> io::Result<()>;
}
