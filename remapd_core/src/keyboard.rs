//! Per-configuration keyboard state machine.
//!
//! One `Keyboard` exists per loaded configuration. It consumes raw key
//! events, resolves them through the active layer stack, and reports the
//! results through two callbacks handed over at construction: one for key
//! output and one for layer activation changes. Keeping the couplings as
//! plain callbacks means the state machine never learns about the virtual
//! device or the IPC broadcaster behind them.
//!
//! `process_key_event` returns the number of milliseconds after which the
//! caller should deliver a tick (`code == 0`) if nothing else happens; 0
//! means no tick is needed. Ticks drive oneshot expiry.

use std::collections::BTreeMap;

use log::debug;
use thiserror::Error;

use crate::config::{self, Action, Config, LayerMap, MAIN_LAYER};
use crate::keycode::{self, EXTERNAL_MOUSE_BUTTON};

/// Key output capability: `(code, pressed)`.
pub type KeyCallback = Box<dyn FnMut(u8, bool)>;

/// Layer notification capability: `(layer name, active)`.
pub type LayerCallback = Box<dyn FnMut(&str, bool)>;

/// Failure of a runtime binding expression.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EvalError(pub(crate) String);

pub struct Keyboard {
    layers: BTreeMap<String, LayerMap>,
    oneshot_timeout_ms: u64,
    on_key: KeyCallback,
    on_layer: LayerCallback,
    /// Momentarily held layers, oldest first: (holding code, layer).
    holds: Vec<(u8, String)>,
    /// Latched layers, oldest first.
    toggles: Vec<String>,
    /// Layer armed for the next key press, if any.
    oneshot: Option<String>,
    /// Emitted code for each physical code currently down, so the release
    /// mirrors the press even if the layer stack changed in between.
    down: [Option<u8>; 256],
}

impl std::fmt::Debug for Keyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyboard")
            .field("layers", &self.layers)
            .field("oneshot_timeout_ms", &self.oneshot_timeout_ms)
            .field("holds", &self.holds)
            .field("toggles", &self.toggles)
            .field("oneshot", &self.oneshot)
            .finish_non_exhaustive()
    }
}

impl Keyboard {
    pub fn new(config: &Config, on_key: KeyCallback, on_layer: LayerCallback) -> Self {
        Self {
            layers: config.layers.clone(),
            oneshot_timeout_ms: config.oneshot_timeout_ms,
            on_key,
            on_layer,
            holds: Vec::new(),
            toggles: Vec::new(),
            oneshot: None,
            down: [None; 256],
        }
    }

    /// Feeds one key event. `code == 0` is a pure tick advancing internal
    /// timers. Returns the next requested tick delay in milliseconds.
    pub fn process_key_event(&mut self, code: u8, pressed: bool) -> u64 {
        if code == 0 {
            self.expire_oneshot();
            return 0;
        }
        if code == EXTERNAL_MOUSE_BUTTON {
            // Pointer activity resolves pending oneshot state but produces
            // no output of its own.
            if pressed {
                self.expire_oneshot();
            }
            return self.pending_timeout();
        }
        if pressed {
            self.press(code)
        } else {
            self.release(code)
        }
    }

    /// Applies a runtime binding of the form `key = action` or
    /// `layer.key = action` to this instance.
    pub fn eval(&mut self, expr: &str) -> Result<(), EvalError> {
        let (lhs, rhs) = expr
            .split_once('=')
            .ok_or_else(|| EvalError(format!("expected <key> = <action>, got '{}'", expr.trim())))?;
        let (lhs, rhs) = (lhs.trim(), rhs.trim());
        let (layer, key) = match lhs.split_once('.') {
            Some((l, k)) => (l.trim(), k.trim()),
            None => (MAIN_LAYER, lhs),
        };
        let code = keycode::code_for_name(key)
            .ok_or_else(|| EvalError(format!("unknown key '{key}'")))?;
        let action = config::parse_action(rhs).map_err(EvalError)?;
        if let Action::Layer(t) | Action::Oneshot(t) | Action::Toggle(t) = &action {
            if !self.layers.contains_key(t) {
                return Err(EvalError(format!("unknown layer '{t}'")));
            }
        }
        let map = self
            .layers
            .get_mut(layer)
            .ok_or_else(|| EvalError(format!("unknown layer '{layer}'")))?;
        map.insert(code, action);
        debug!("applied binding {layer}.{key} = {rhs}");
        Ok(())
    }

    fn press(&mut self, code: u8) -> u64 {
        match self.resolve(code) {
            Some(Action::Key(out)) => {
                self.down[code as usize] = Some(out);
                (self.on_key)(out, true);
                self.consume_oneshot();
                0
            }
            Some(Action::Layer(layer)) => {
                (self.on_layer)(&layer, true);
                self.holds.push((code, layer));
                self.pending_timeout()
            }
            Some(Action::Oneshot(layer)) => {
                match self.oneshot.take() {
                    Some(prev) if prev == layer => self.oneshot = Some(prev),
                    Some(prev) => {
                        (self.on_layer)(&prev, false);
                        (self.on_layer)(&layer, true);
                        self.oneshot = Some(layer);
                    }
                    None => {
                        (self.on_layer)(&layer, true);
                        self.oneshot = Some(layer);
                    }
                }
                self.oneshot_timeout_ms
            }
            Some(Action::Toggle(layer)) => {
                match self.toggles.iter().position(|l| *l == layer) {
                    Some(pos) => {
                        self.toggles.remove(pos);
                        (self.on_layer)(&layer, false);
                    }
                    None => {
                        (self.on_layer)(&layer, true);
                        self.toggles.push(layer);
                    }
                }
                self.pending_timeout()
            }
            None => {
                // Unmapped keys pass through.
                self.down[code as usize] = Some(code);
                (self.on_key)(code, true);
                self.consume_oneshot();
                0
            }
        }
    }

    fn release(&mut self, code: u8) -> u64 {
        if let Some(pos) = self.holds.iter().position(|(c, _)| *c == code) {
            let (_, layer) = self.holds.remove(pos);
            (self.on_layer)(&layer, false);
            return self.pending_timeout();
        }
        if let Some(out) = self.down[code as usize].take() {
            (self.on_key)(out, false);
        }
        // A release neither consumes nor advances a pending oneshot; the
        // window restarts rather than resuming (ticks carry no clock).
        self.pending_timeout()
    }

    /// Resolution order: pending oneshot layer, held layers (most recent
    /// first), latched layers (most recent first), then the main layer.
    fn resolve(&self, code: u8) -> Option<Action> {
        if let Some(layer) = &self.oneshot {
            if let Some(action) = self.layer_lookup(layer, code) {
                return Some(action);
            }
        }
        for (_, layer) in self.holds.iter().rev() {
            if let Some(action) = self.layer_lookup(layer, code) {
                return Some(action);
            }
        }
        for layer in self.toggles.iter().rev() {
            if let Some(action) = self.layer_lookup(layer, code) {
                return Some(action);
            }
        }
        self.layer_lookup(MAIN_LAYER, code)
    }

    fn layer_lookup(&self, layer: &str, code: u8) -> Option<Action> {
        self.layers.get(layer).and_then(|m| m.get(&code)).cloned()
    }

    fn pending_timeout(&self) -> u64 {
        if self.oneshot.is_some() {
            self.oneshot_timeout_ms
        } else {
            0
        }
    }

    fn consume_oneshot(&mut self) {
        self.expire_oneshot();
    }

    fn expire_oneshot(&mut self) {
        if let Some(layer) = self.oneshot.take() {
            (self.on_layer)(&layer, false);
        }
    }
}
