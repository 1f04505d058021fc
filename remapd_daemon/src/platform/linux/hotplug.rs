//! Hotplug watch over `/dev/input`.

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use inotify::{EventMask, Inotify, WatchMask};
use log::warn;

use super::INPUT_DIR;

pub struct Hotplug {
    inotify: Inotify,
    buffer: [u8; 4096],
}

impl Hotplug {
    pub fn new() -> io::Result<Self> {
        let inotify = Inotify::init()?;
        inotify
            .watches()
            .add(INPUT_DIR, WatchMask::CREATE | WatchMask::DELETE)?;
        Ok(Self {
            inotify,
            buffer: [0; 4096],
        })
    }

    #[must_use]
    pub fn raw_fd(&self) -> i32 {
        self.inotify.as_raw_fd()
    }

    /// Drains pending watch events into `(added, removed)` device paths.
    /// Only `eventN` nodes are of interest; everything else under
    /// `/dev/input` (by-id symlink dirs, js nodes) is ignored.
    pub fn drain(&mut self) -> (Vec<PathBuf>, Vec<PathBuf>) {
        let mut added = Vec::new();
        let mut removed = Vec::new();

        match self.inotify.read_events(&mut self.buffer) {
            Ok(events) => {
                for event in events {
                    let Some(name) = event.name.and_then(|n| n.to_str()) else {
                        continue;
                    };
                    if !name.starts_with("event") {
                        continue;
                    }
                    let path = Path::new(INPUT_DIR).join(name);
                    if event.mask.contains(EventMask::CREATE) {
                        added.push(path);
                    } else if event.mask.contains(EventMask::DELETE) {
                        removed.push(path);
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => warn!("hotplug watch read failed: {e}"),
        }

        (added, removed)
    }
}
