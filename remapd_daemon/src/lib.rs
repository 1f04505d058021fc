//! remapd daemon library.
//!
//! Everything the `remapd` binary runs on: the daemon context and event
//! dispatcher, device table and grab management, the virtual output sink,
//! the configuration registry, and the Unix-socket IPC surface.

pub mod daemon;
pub mod device_manager;
pub mod error;
pub mod ipc;
pub mod platform;
pub mod registry;
pub mod sink;

/// Directory scanned for `*.conf` files unless overridden on the command
/// line.
pub const DEFAULT_CONFIG_DIR: &str = "/etc/remapd";

/// IPC socket path unless overridden on the command line.
pub const DEFAULT_SOCKET_PATH: &str = "/run/remapd.sock";
