//! Configuration registry.
//!
//! Owns every loaded configuration together with the keyboard instance
//! built from it. The list is ordered most-recently-loaded first, so on
//! equal match rank the last file loaded wins.

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use log::info;

use remapd_core::{Config, ConfigError, DeviceId, Keyboard, MatchRank};

use crate::error::DaemonError;
use crate::ipc::LayerBroadcaster;
use crate::sink::VirtualSink;

#[derive(Debug)]
pub struct ConfigEntry {
    pub config: Config,
    pub kbd: Keyboard,
}

#[derive(Debug, Default)]
pub struct Registry {
    entries: Vec<ConfigEntry>,
}

impl Registry {
    /// Loads every `*.conf` file under `dir`. Subdirectories and other
    /// files are skipped; any parse failure aborts the load. Files are
    /// visited in sorted name order and pushed to the front, so iteration
    /// order is reverse-lexicographic.
    pub fn load(
        dir: &Path,
        sink: &Rc<RefCell<VirtualSink>>,
        broadcaster: &Rc<RefCell<LayerBroadcaster>>,
    ) -> Result<Self, DaemonError> {
        let entries = fs::read_dir(dir).map_err(|source| {
            DaemonError::Config(ConfigError::Io {
                file: dir.display().to_string(),
                source,
            })
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| {
                DaemonError::Config(ConfigError::Io {
                    file: dir.display().to_string(),
                    source,
                })
            })?;
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            if path.extension().and_then(|ext| ext.to_str()) != Some("conf") {
                continue;
            }
            paths.push(path);
        }
        paths.sort();

        let mut registry = Self::default();
        for path in paths {
            let config = Config::from_file(&path)?;
            info!("loaded configuration '{}' from {}", config.name(), path.display());
            registry.insert(config, sink, broadcaster);
        }
        Ok(registry)
    }

    /// Builds the keyboard for `config` and pushes the entry to the front
    /// of the list.
    pub fn insert(
        &mut self,
        config: Config,
        sink: &Rc<RefCell<VirtualSink>>,
        broadcaster: &Rc<RefCell<LayerBroadcaster>>,
    ) {
        let s = Rc::clone(sink);
        let b = Rc::clone(broadcaster);
        let kbd = Keyboard::new(
            &config,
            Box::new(move |code: u8, pressed: bool| s.borrow_mut().send_key(code, pressed)),
            Box::new(move |layer: &str, active: bool| b.borrow_mut().broadcast(layer, active)),
        );
        self.entries.insert(0, ConfigEntry { config, kbd });
    }

    /// Finds the entry with the strictly greatest match rank for `id`.
    /// Ties keep the first entry encountered, i.e. the most recently
    /// loaded one.
    #[must_use]
    pub fn lookup(&self, id: DeviceId) -> (MatchRank, Option<usize>) {
        let mut best = (MatchRank::None, None);
        for (index, entry) in self.entries.iter().enumerate() {
            let rank = entry.config.check_match(id);
            if rank > best.0 {
                best = (rank, Some(index));
            }
        }
        best
    }

    /// Evaluates a binding expression against every keyboard. Succeeds if
    /// at least one accepts it; otherwise returns the last error text.
    pub fn eval_all(&mut self, expr: &str) -> Result<(), String> {
        let mut last_err = String::from("no configurations loaded");
        let mut accepted = false;
        for entry in &mut self.entries {
            match entry.kbd.eval(expr) {
                Ok(()) => accepted = true,
                Err(e) => last_err = e.to_string(),
            }
        }
        if accepted {
            Ok(())
        } else {
            Err(last_err)
        }
    }

    pub fn entry_mut(&mut self, index: usize) -> Option<&mut ConfigEntry> {
        self.entries.get_mut(index)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ConfigEntry> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
