//! Device table and grab management.
//!
//! Every input device the daemon knows about lives in the bounded
//! [`DeviceTable`]. Binding a device asks the registry for the best match
//! rank of its identity and grabs or releases it accordingly; a grab
//! failure leaves the device in the table unbound.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use remapd_core::DeviceId;

use crate::platform::DeviceHandle;
use crate::registry::Registry;

/// Capacity of the device table.
pub const MAX_DEVICES: usize = 64;

/// What kinds of events a device can produce.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub keys: bool,
    pub rel: bool,
    pub abs: bool,
}

impl Capabilities {
    /// True if the device moves a pointer in any way.
    #[must_use]
    pub fn pointer(&self) -> bool {
        self.rel || self.abs
    }
}

pub struct Device {
    pub path: PathBuf,
    pub name: String,
    pub id: DeviceId,
    pub caps: Capabilities,
    handle: Box<dyn DeviceHandle>,
    binding: Option<usize>,
    grabbed: bool,
}

impl Device {
    pub fn new(
        path: PathBuf,
        name: String,
        id: DeviceId,
        caps: Capabilities,
        handle: Box<dyn DeviceHandle>,
    ) -> Self {
        Self {
            path,
            name,
            id,
            caps,
            handle,
            binding: None,
            grabbed: false,
        }
    }

    /// Registry index of the bound entry, or `None` when ignored.
    #[must_use]
    pub fn binding(&self) -> Option<usize> {
        self.binding
    }

    #[must_use]
    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn handle_mut(&mut self) -> &mut dyn DeviceHandle {
        self.handle.as_mut()
    }

    /// Resolves this device against the registry: grab and associate when
    /// the best rank covers one of the device's capabilities, release
    /// otherwise.
    pub fn bind(&mut self, registry: &Registry) {
        let (rank, index) = registry.lookup(self.id);
        let wanted = index.is_some()
            && ((rank.binds_keys() && self.caps.keys)
                || (rank.binds_pointer() && self.caps.pointer()));
        if !wanted {
            self.unbind();
            return;
        }

        if !self.grabbed {
            if let Err(e) = self.handle.grab() {
                warn!("failed to grab {} ({}): {e}", self.path.display(), self.name);
                self.binding = None;
                return;
            }
            self.grabbed = true;
        }
        self.binding = index;
        info!(
            "bound {} ({}, {}) at rank {:?}",
            self.path.display(),
            self.name,
            self.id,
            rank
        );
    }

    fn unbind(&mut self) {
        if self.grabbed {
            if let Err(e) = self.handle.ungrab() {
                warn!("failed to release {}: {e}", self.path.display());
            }
            self.grabbed = false;
        }
        self.binding = None;
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.unbind();
    }
}

#[derive(Default)]
pub struct DeviceTable {
    devices: Vec<Device>,
}

impl DeviceTable {
    /// Appends a device and binds it. Returns its table index, or `None`
    /// when the table is full.
    pub fn add(&mut self, mut device: Device, registry: &Registry) -> Option<usize> {
        if self.devices.len() >= MAX_DEVICES {
            warn!(
                "device table full ({MAX_DEVICES}), ignoring {}",
                device.path.display()
            );
            return None;
        }
        device.bind(registry);
        self.devices.push(device);
        Some(self.devices.len() - 1)
    }

    /// Removes a device by path, compacting the table in place. Remaining
    /// devices keep their relative order.
    pub fn remove_by_path(&mut self, path: &Path) -> bool {
        let before = self.devices.len();
        self.devices.retain(|d| d.path != path);
        let removed = self.devices.len() != before;
        if removed {
            debug!("removed device {}", path.display());
        }
        removed
    }

    /// Re-resolves every device against a (typically reloaded) registry.
    pub fn rebind_all(&mut self, registry: &Registry) {
        for device in &mut self.devices {
            device.bind(registry);
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Device> {
        self.devices.get_mut(index)
    }

    #[must_use]
    pub fn contains_path(&self, path: &Path) -> bool {
        self.devices.iter().any(|d| d.path == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// `(table index, raw fd)` for every pollable device.
    #[must_use]
    pub fn poll_fds(&self) -> Vec<(usize, i32)> {
        self.devices
            .iter()
            .enumerate()
            .filter(|(_, d)| d.handle.raw_fd() >= 0)
            .map(|(i, d)| (i, d.handle.raw_fd()))
            .collect()
    }
}
