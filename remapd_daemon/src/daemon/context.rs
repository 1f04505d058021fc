//! Daemon context: the bundle of state the event loop mutates.
//!
//! The sink and the layer broadcaster sit behind `Rc<RefCell<..>>` because
//! every keyboard instance holds callbacks into them; everything stays on
//! the one event-loop thread.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::{debug, info};

use crate::device_manager::{Device, DeviceTable};
use crate::error::DaemonError;
use crate::ipc::LayerBroadcaster;
use crate::platform::OutputBackend;
use crate::registry::Registry;
use crate::sink::{VirtualSink, VIRTUAL_DEVICE_NAME};

pub struct DaemonContext {
    sink: Rc<RefCell<VirtualSink>>,
    broadcaster: Rc<RefCell<LayerBroadcaster>>,
    registry: Registry,
    devices: DeviceTable,
    last_kbd: Option<usize>,
    config_dir: PathBuf,
}

impl DaemonContext {
    /// Creates the context and performs the initial configuration load.
    pub fn new(backend: Box<dyn OutputBackend>, config_dir: PathBuf) -> Result<Self, DaemonError> {
        let sink = Rc::new(RefCell::new(VirtualSink::new(backend)));
        let broadcaster = Rc::new(RefCell::new(LayerBroadcaster::new()));
        let registry = Registry::load(&config_dir, &sink, &broadcaster)?;
        Ok(Self {
            sink,
            broadcaster,
            registry,
            devices: DeviceTable::default(),
            last_kbd: None,
            config_dir,
        })
    }

    /// Rebuilds the registry from disk, rebinds every device, and clears
    /// the sink so no key stays pressed on behalf of a dropped keyboard.
    pub fn reload(&mut self) -> Result<(), DaemonError> {
        info!("reloading configuration from {}", self.config_dir.display());
        self.registry = Registry::load(&self.config_dir, &self.sink, &self.broadcaster)?;
        self.last_kbd = None;
        self.devices.rebind_all(&self.registry);
        self.sink.borrow_mut().clear();
        Ok(())
    }

    /// Adds a device to the table and binds it. Add events carrying the
    /// virtual sink's own name are ignored.
    pub fn add_device(&mut self, device: Device) {
        if device.name == VIRTUAL_DEVICE_NAME {
            debug!("ignoring our own virtual device at {}", device.path.display());
            return;
        }
        self.devices.add(device, &self.registry);
    }

    pub fn remove_device(&mut self, path: &Path) {
        if self.devices.remove_by_path(path) {
            info!("device removed: {}", path.display());
        }
    }

    /// Releases anything the outside world could still see: pressed keys
    /// on the sink. Device grabs release when the table drops.
    pub fn shutdown(&mut self) {
        self.sink.borrow_mut().clear();
    }

    pub fn sink(&self) -> &Rc<RefCell<VirtualSink>> {
        &self.sink
    }

    pub fn broadcaster(&self) -> &Rc<RefCell<LayerBroadcaster>> {
        &self.broadcaster
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn devices(&self) -> &DeviceTable {
        &self.devices
    }

    pub fn devices_mut(&mut self) -> &mut DeviceTable {
        &mut self.devices
    }

    #[must_use]
    pub fn last_kbd(&self) -> Option<usize> {
        self.last_kbd
    }

    pub(crate) fn set_last_kbd(&mut self, index: usize) {
        self.last_kbd = Some(index);
    }
}
