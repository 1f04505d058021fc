//! Layer activation broadcaster.
//!
//! Holds the bounded set of subscribed listener connections and writes
//! `+<layer>\n` / `-<layer>\n` lines to each. A listener that cannot take a
//! whole line within the send timeout is dropped on the spot; the event
//! loop never waits on a slow consumer longer than that.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use log::{debug, warn};

/// Capacity of the listener set.
pub const MAX_LAYER_LISTENERS: usize = 32;

/// Per-listener send timeout.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(50);

#[derive(Default)]
pub struct LayerBroadcaster {
    listeners: Vec<UnixStream>,
}

impl LayerBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to the set. Hands the stream back if the set is
    /// full or the socket rejects the send timeout.
    pub fn subscribe(&mut self, stream: UnixStream) -> Result<(), UnixStream> {
        if self.listeners.len() >= MAX_LAYER_LISTENERS {
            return Err(stream);
        }
        if let Err(e) = stream.set_write_timeout(Some(SEND_TIMEOUT)) {
            warn!("rejecting layer listener, cannot set send timeout: {e}");
            return Err(stream);
        }
        self.listeners.push(stream);
        debug!("layer listener added ({} active)", self.listeners.len());
        Ok(())
    }

    /// Sends one activation line to every listener, evicting any that
    /// cannot take the whole line. The set is compacted in place.
    pub fn broadcast(&mut self, layer: &str, active: bool) {
        if self.listeners.is_empty() {
            return;
        }
        let line = format!("{}{layer}\n", if active { '+' } else { '-' });
        let payload = line.as_bytes();
        self.listeners.retain_mut(|stream| match stream.write(payload) {
            Ok(n) if n == payload.len() => true,
            Ok(n) => {
                debug!("dropping layer listener after short write ({n}/{})", payload.len());
                false
            }
            Err(e) => {
                debug!("dropping layer listener: {e}");
                false
            }
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}
