//! Daemon lifecycle and event loop.
//!
//! [`DaemonContext`] bundles every piece of state the event dispatcher
//! touches; [`dispatch`] holds the per-event routing table. The Linux
//! [`Daemon`] wraps both in the actual poll loop over device descriptors,
//! the hotplug watch and the IPC socket.

pub mod context;
pub mod dispatch;

pub use context::DaemonContext;
pub use dispatch::DeviceEvent;

#[cfg(target_os = "linux")]
mod run;

#[cfg(target_os = "linux")]
pub use run::{Daemon, RunOptions};
