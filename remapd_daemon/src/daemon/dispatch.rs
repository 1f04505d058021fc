//! Event dispatcher.
//!
//! One entry point per event kind; each returns the next timer delay in
//! milliseconds (0 = no timer). The only cross-event state is `last_kbd`,
//! the keyboard that most recently processed a key event: expired timers
//! are delivered to it as ticks no matter which device is active now.

use remapd_core::keycode::EXTERNAL_MOUSE_BUTTON;

use super::context::DaemonContext;

/// A raw event read from a grabbed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Key { code: u8, pressed: bool },
    MouseMove { dx: i32, dy: i32 },
    MouseMoveAbs { x: i32, y: i32 },
    MouseScroll { dx: i32, dy: i32 },
}

impl DaemonContext {
    /// Handles timer expiry: the last active keyboard gets a tick and its
    /// answer chains the next timeout.
    pub fn tick(&mut self) -> u64 {
        let Some(index) = self.last_kbd() else {
            return 0;
        };
        match self.registry_mut().entry_mut(index) {
            Some(entry) => entry.kbd.process_key_event(0, false),
            None => 0,
        }
    }

    /// Routes one device event. `timeleft` is the remaining time of the
    /// in-flight timeout; events on unbound devices hand it back untouched
    /// so the timer is not disturbed.
    pub fn dispatch(&mut self, device: usize, event: DeviceEvent, timeleft: u64) -> u64 {
        let Some(binding) = self.devices().get(device).and_then(|d| d.binding()) else {
            return timeleft;
        };

        match event {
            DeviceEvent::Key { code, pressed } => {
                self.set_last_kbd(binding);
                match self.registry_mut().entry_mut(binding) {
                    Some(entry) => entry.kbd.process_key_event(code, pressed),
                    None => timeleft,
                }
            }
            DeviceEvent::MouseMove { dx, dy } => {
                self.sink().borrow_mut().mouse_move(dx, dy);
                timeleft
            }
            DeviceEvent::MouseMoveAbs { x, y } => {
                self.sink().borrow_mut().mouse_move_abs(x, y);
                timeleft
            }
            DeviceEvent::MouseScroll { dx, dy } => {
                // A press+release of the reserved button code lets the bound
                // keyboard resolve oneshot/hold state before the scroll goes
                // out.
                if let Some(entry) = self.registry_mut().entry_mut(binding) {
                    entry.kbd.process_key_event(EXTERNAL_MOUSE_BUTTON, true);
                    entry.kbd.process_key_event(EXTERNAL_MOUSE_BUTTON, false);
                }
                self.sink().borrow_mut().mouse_scroll(dx, dy);
                timeleft
            }
        }
    }
}
