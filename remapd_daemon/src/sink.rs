//! Virtual output sink.
//!
//! The sink is the single synthesized device all remapped traffic leaves
//! through. It owns the keystate vector: every key event forwarded to the
//! backend is recorded here first, so `clear` can release exactly the keys
//! the outside world currently believes are down.

use log::warn;

use crate::platform::OutputBackend;

/// Display name of the synthesized device. Device-add events carrying this
/// exact name are the daemon seeing its own output and are ignored.
pub const VIRTUAL_DEVICE_NAME: &str = "remapd virtual device";

const KEYSTATE_SIZE: usize = 256;

pub struct VirtualSink {
    backend: Box<dyn OutputBackend>,
    keystate: [bool; KEYSTATE_SIZE],
}

impl VirtualSink {
    pub fn new(backend: Box<dyn OutputBackend>) -> Self {
        Self {
            backend,
            keystate: [false; KEYSTATE_SIZE],
        }
    }

    /// Records the new state and forwards the event. Repeated releases are
    /// harmless; the entry is simply overwritten.
    pub fn send_key(&mut self, code: u8, pressed: bool) {
        self.keystate[code as usize] = pressed;
        if let Err(e) = self.backend.emit_key(code, pressed) {
            warn!("failed to emit key {code} ({}): {e}", if pressed { "down" } else { "up" });
        }
    }

    pub fn mouse_move(&mut self, dx: i32, dy: i32) {
        if let Err(e) = self.backend.emit_rel(dx, dy) {
            warn!("failed to emit relative motion: {e}");
        }
    }

    pub fn mouse_move_abs(&mut self, x: i32, y: i32) {
        if let Err(e) = self.backend.emit_abs(x, y) {
            warn!("failed to emit absolute motion: {e}");
        }
    }

    pub fn mouse_scroll(&mut self, dx: i32, dy: i32) {
        if let Err(e) = self.backend.emit_scroll(dx, dy) {
            warn!("failed to emit scroll: {e}");
        }
    }

    /// Releases every key currently recorded pressed, exactly once each.
    pub fn clear(&mut self) {
        for code in 0..KEYSTATE_SIZE {
            if self.keystate[code] {
                self.send_key(code as u8, false);
            }
        }
    }

    #[must_use]
    pub fn is_pressed(&self, code: u8) -> bool {
        self.keystate[code as usize]
    }

    /// Number of keys currently recorded pressed.
    #[must_use]
    pub fn pressed_count(&self) -> usize {
        self.keystate.iter().filter(|p| **p).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockOutput, SinkEvent};

    fn sink() -> (VirtualSink, MockOutput) {
        let mock = MockOutput::new();
        (VirtualSink::new(Box::new(mock.clone())), mock)
    }

    #[test]
    fn send_key_records_and_forwards() {
        let (mut sink, mock) = sink();
        sink.send_key(30, true);
        assert!(sink.is_pressed(30));
        assert_eq!(
            mock.events(),
            vec![SinkEvent::Key {
                code: 30,
                pressed: true
            }]
        );
        sink.send_key(30, false);
        assert!(!sink.is_pressed(30));
    }

    #[test]
    fn clear_releases_each_pressed_key_once() {
        let (mut sink, mock) = sink();
        sink.send_key(30, true);
        sink.send_key(48, true);
        sink.send_key(30, true); // repeat press, still one entry
        mock.clear();

        sink.clear();
        let mut released = mock.key_events();
        released.sort_unstable();
        assert_eq!(released, vec![(30, false), (48, false)]);
        assert_eq!(sink.pressed_count(), 0);

        mock.clear();
        sink.clear();
        assert!(mock.events().is_empty());
    }

    #[test]
    fn repeated_release_is_safe() {
        let (mut sink, mock) = sink();
        sink.send_key(30, false);
        sink.send_key(30, false);
        assert!(!sink.is_pressed(30));
        assert_eq!(mock.key_events(), vec![(30, false), (30, false)]);
        sink.clear();
        assert_eq!(mock.key_events().len(), 2);
    }

    #[test]
    fn pointer_events_forward_unchanged() {
        let (mut sink, mock) = sink();
        sink.mouse_move(3, -2);
        sink.mouse_move_abs(100, 200);
        sink.mouse_scroll(0, -1);
        assert_eq!(
            mock.events(),
            vec![
                SinkEvent::Rel { dx: 3, dy: -2 },
                SinkEvent::Abs { x: 100, y: 200 },
                SinkEvent::Scroll { dx: 0, dy: -1 },
            ]
        );
        assert_eq!(sink.pressed_count(), 0);
    }
}
