//! IPC request server.
//!
//! One nonblocking listening socket whose descriptor joins the central
//! poll. Each accepted connection carries a single framed request handled
//! synchronously: `RELOAD` and `BIND` answer and close, `LAYER_LISTEN`
//! hands the connection over to the broadcaster.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info, warn};

use crate::daemon::DaemonContext;
use crate::error::{DaemonError, SocketError};

use super::frame::{Frame, MSG_BIND, MSG_LAYER_LISTEN, MSG_RELOAD};

/// How long a connected client gets to deliver its request frame.
const REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

const LISTENER_REJECT: &[u8] = b"too many layer listeners\n";

#[derive(Debug)]
pub struct IpcServer {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcServer {
    /// Binds the listening socket. A live daemon on the same path is
    /// detected by connecting first; a stale socket file is removed.
    pub fn bind(path: &Path) -> Result<Self, SocketError> {
        if path.exists() {
            match UnixStream::connect(path) {
                Ok(_) => {
                    return Err(SocketError::Bind {
                        path: path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::AddrInUse,
                            "socket is in use",
                        ),
                    });
                }
                Err(_) => {
                    // Leftover from a dead instance.
                    let _ = fs::remove_file(path);
                }
            }
        }

        let listener = UnixListener::bind(path).map_err(|source| SocketError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        listener.set_nonblocking(true)?;

        // Owner-only: the socket reconfigures input handling.
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            warn!("failed to restrict socket permissions: {e}");
        }

        info!("IPC socket listening on {}", path.display());
        Ok(Self {
            listener,
            path: path.to_path_buf(),
        })
    }

    #[must_use]
    pub fn raw_fd(&self) -> i32 {
        self.listener.as_raw_fd()
    }

    /// Accepts and services at most one pending connection.
    pub fn accept_one(&self, ctx: &mut DaemonContext) -> Result<(), DaemonError> {
        match self.listener.accept() {
            Ok((stream, _)) => handle_client(stream, ctx),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => {
                warn!("IPC accept failed: {e}");
                Ok(())
            }
        }
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!("could not remove socket file {}: {e}", self.path.display());
        }
    }
}

/// Services one client connection. Only a failed `RELOAD` propagates an
/// error; a broken config must take the daemon down rather than leave it
/// running a mix of generations.
pub fn handle_client(mut stream: UnixStream, ctx: &mut DaemonContext) -> Result<(), DaemonError> {
    if let Err(e) = stream.set_read_timeout(Some(REQUEST_TIMEOUT)) {
        warn!("dropping IPC client, cannot set read timeout: {e}");
        return Ok(());
    }

    let request = match Frame::read_from(&mut stream) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("malformed IPC request: {e}");
            respond(&mut stream, &Frame::fail("malformed request"));
            return Ok(());
        }
    };

    match request.kind {
        MSG_RELOAD => {
            ctx.reload()?;
            respond(&mut stream, &Frame::success());
        }
        MSG_BIND => match request.payload_str() {
            Some(expr) => match ctx.registry_mut().eval_all(expr) {
                Ok(()) => respond(&mut stream, &Frame::success()),
                Err(msg) => respond(&mut stream, &Frame::fail(&msg)),
            },
            None => respond(&mut stream, &Frame::fail("binding expression is not valid UTF-8")),
        },
        MSG_LAYER_LISTEN => {
            // The connection stays open as a text stream; reads are done.
            let _ = stream.set_read_timeout(None);
            if let Err(mut rejected) = ctx.broadcaster().borrow_mut().subscribe(stream) {
                let _ = rejected.write_all(LISTENER_REJECT);
            }
        }
        other => {
            debug!("unknown IPC command {other}");
            respond(&mut stream, &Frame::fail("Unknown command"));
        }
    }
    Ok(())
}

fn respond(stream: &mut UnixStream, frame: &Frame) {
    if let Err(e) = frame.write_to(stream) {
        debug!("failed to write IPC response: {e}");
    }
}
