//! Error types for the remapd daemon.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use remapd_core::ConfigError;

/// Errors from input-device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device node does not exist.
    #[error("device not found: {0}")]
    NotFound(String),

    /// Insufficient privileges to open or grab a device.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// I/O error during a device operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from the IPC socket.
#[derive(Debug, Error)]
pub enum SocketError {
    /// Binding the listening socket failed, usually because a daemon is
    /// already holding it.
    #[error("failed to bind {path} (another instance already running?): {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O error during a socket operation.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Top-level daemon error type. Module-specific errors convert into this
/// via `From`.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration loading or parsing failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// IPC socket failure.
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),

    /// Input device failure.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    /// The virtual output device could not be created.
    #[error("virtual device error: {0}")]
    Sink(#[source] io::Error),

    /// Anything that breaks the event loop itself.
    #[error("runtime error: {0}")]
    Runtime(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_names_the_likely_cause() {
        let err = SocketError::Bind {
            path: PathBuf::from("/run/remapd.sock"),
            source: io::Error::new(io::ErrorKind::AddrInUse, "in use"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/run/remapd.sock"));
        assert!(msg.contains("another instance already running?"));
    }

    #[test]
    fn module_errors_convert_to_daemon_error() {
        let dev = DeviceError::NotFound("/dev/input/event9".into());
        let err: DaemonError = dev.into();
        assert!(matches!(err, DaemonError::Device(_)));

        let sock = SocketError::Io(io::Error::other("boom"));
        let err: DaemonError = sock.into();
        assert!(matches!(err, DaemonError::Socket(_)));
    }

    #[test]
    fn context_is_preserved_through_conversion() {
        let dev = DeviceError::PermissionDenied("/dev/input/event0".into());
        let err: DaemonError = dev.into();
        assert!(err.to_string().contains("/dev/input/event0"));
    }
}
