//! Mock input/output implementations for tests.

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use crate::daemon::DeviceEvent;

use super::{DeviceHandle, OutputBackend};

/// Everything a mock output backend has observed, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    Key { code: u8, pressed: bool },
    Rel { dx: i32, dy: i32 },
    Abs { x: i32, y: i32 },
    Scroll { dx: i32, dy: i32 },
}

/// Output backend that records instead of injecting. Clones share the same
/// event log, so tests keep one clone and hand the other to the sink.
#[derive(Clone, Default)]
pub struct MockOutput {
    events: Rc<RefCell<Vec<SinkEvent>>>,
}

impl MockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    /// Key events only, for tests that ignore pointer traffic.
    pub fn key_events(&self) -> Vec<(u8, bool)> {
        self.events
            .borrow()
            .iter()
            .filter_map(|ev| match ev {
                SinkEvent::Key { code, pressed } => Some((*code, *pressed)),
                _ => None,
            })
            .collect()
    }
}

impl OutputBackend for MockOutput {
    fn emit_key(&mut self, code: u8, pressed: bool) -> io::Result<()> {
        self.events.borrow_mut().push(SinkEvent::Key { code, pressed });
        Ok(())
    }

    fn emit_rel(&mut self, dx: i32, dy: i32) -> io::Result<()> {
        self.events.borrow_mut().push(SinkEvent::Rel { dx, dy });
        Ok(())
    }

    fn emit_abs(&mut self, x: i32, y: i32) -> io::Result<()> {
        self.events.borrow_mut().push(SinkEvent::Abs { x, y });
        Ok(())
    }

    fn emit_scroll(&mut self, dx: i32, dy: i32) -> io::Result<()> {
        self.events.borrow_mut().push(SinkEvent::Scroll { dx, dy });
        Ok(())
    }
}

/// Device handle whose grab state is observable from outside and which can
/// be told to fail its next grab.
pub struct MockHandle {
    grabbed: Rc<Cell<bool>>,
    fail_grab: bool,
}

impl MockHandle {
    /// Returns the handle and a shared view of its grab state.
    pub fn new() -> (Self, Rc<Cell<bool>>) {
        let grabbed = Rc::new(Cell::new(false));
        (
            Self {
                grabbed: Rc::clone(&grabbed),
                fail_grab: false,
            },
            grabbed,
        )
    }

    /// A handle whose `grab` always fails with permission denied.
    pub fn failing() -> Self {
        Self {
            grabbed: Rc::new(Cell::new(false)),
            fail_grab: true,
        }
    }
}

impl DeviceHandle for MockHandle {
    fn grab(&mut self) -> io::Result<()> {
        if self.fail_grab {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "mock grab failure",
            ));
        }
        self.grabbed.set(true);
        Ok(())
    }

    fn ungrab(&mut self) -> io::Result<()> {
        self.grabbed.set(false);
        Ok(())
    }

    fn raw_fd(&self) -> i32 {
        -1
    }

    fn read_events(&mut self, _out: &mut Vec<DeviceEvent>) -> io::Result<()> {
        Ok(())
    }
}
