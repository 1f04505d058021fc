//! Core remapping model for remapd.
//!
//! This crate holds the platform-independent pieces of the daemon: the
//! configuration format (device matching plus layered key bindings) and the
//! per-configuration keyboard state machine that turns raw key events into
//! remapped output. The daemon crate wires these to evdev, uinput and the
//! IPC surface.

pub mod config;
pub mod keyboard;
pub mod keycode;

pub use config::{Config, ConfigError, DeviceId, MatchRank};
pub use keyboard::{EvalError, KeyCallback, Keyboard, LayerCallback};
