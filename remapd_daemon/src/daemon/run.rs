//! The event loop: a single poll over device descriptors, the hotplug
//! watch, and the IPC socket, bounded by whatever timeout the dispatcher
//! last requested.

use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::error::{DaemonError, DeviceError};
use crate::ipc::IpcServer;
use crate::platform::linux::{self, Hotplug, UinputOutput};
use crate::sink::VIRTUAL_DEVICE_NAME;

use super::context::DaemonContext;

/// Poll cap while no timer is armed, so shutdown signals are noticed
/// promptly even on an idle system.
const IDLE_POLL_MS: u16 = 500;

/// Retry spacing for hotplugged nodes that open with permission denied:
/// udev may still be applying access rules. The retries ride the poll
/// timeout; nothing sleeps outside the poll.
const PENDING_RETRY_DELAY: Duration = Duration::from_millis(20);
const PENDING_RETRY_ATTEMPTS: u32 = 3;

pub struct RunOptions {
    pub config_dir: PathBuf,
    pub socket: PathBuf,
}

/// A hotplugged node waiting for another open attempt.
struct PendingAdd {
    path: PathBuf,
    attempts: u32,
    next_try: Instant,
}

pub struct Daemon {
    ctx: DaemonContext,
    server: IpcServer,
    hotplug: Hotplug,
    shutdown: Arc<AtomicBool>,
    deadline: Option<Instant>,
    pending: Vec<PendingAdd>,
}

impl Daemon {
    /// Brings the daemon up: priority, virtual device, IPC socket, config
    /// load, device enumeration, signal handlers. Everything that can fail
    /// fatally fails here, before any grab is held for long.
    pub fn new(options: &RunOptions) -> Result<Self, DaemonError> {
        linux::raise_priority();

        let backend = UinputOutput::create(VIRTUAL_DEVICE_NAME).map_err(DaemonError::Sink)?;
        let server = IpcServer::bind(&options.socket)?;
        let mut ctx = DaemonContext::new(Box::new(backend), options.config_dir.clone())?;

        // Watch before enumerating so a device plugged in between is not
        // missed.
        let hotplug = Hotplug::new()
            .map_err(|e| DaemonError::Runtime(format!("hotplug watch failed: {e}")))?;
        for device in linux::enumerate()? {
            ctx.add_device(device);
        }
        info!(
            "{} device(s) present, {} configuration(s) loaded",
            ctx.devices().len(),
            ctx.registry().len()
        );

        let shutdown = Arc::new(AtomicBool::new(false));
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&shutdown))
                .map_err(|e| DaemonError::Runtime(format!("signal handler failed: {e}")))?;
        }

        Ok(Self {
            ctx,
            server,
            hotplug,
            shutdown,
            deadline: None,
            pending: Vec::new(),
        })
    }

    /// Runs until a shutdown signal arrives or a fatal error surfaces.
    pub fn run(&mut self) -> Result<(), DaemonError> {
        info!("entering event loop");
        while !self.shutdown.load(Ordering::Relaxed) {
            self.step()?;
        }
        info!("shutting down");
        Ok(())
    }

    fn step(&mut self) -> Result<(), DaemonError> {
        let dev_fds = self.ctx.devices().poll_fds();
        let ipc_fd = self.server.raw_fd();
        let hot_fd = self.hotplug.raw_fd();

        let mut fds = Vec::with_capacity(dev_fds.len() + 2);
        // SAFETY: every fd is owned by the server, the hotplug watch, or a
        // device held in the table; all outlive this poll call.
        unsafe {
            fds.push(PollFd::new(BorrowedFd::borrow_raw(ipc_fd), PollFlags::POLLIN));
            fds.push(PollFd::new(BorrowedFd::borrow_raw(hot_fd), PollFlags::POLLIN));
            for (_, fd) in &dev_fds {
                fds.push(PollFd::new(BorrowedFd::borrow_raw(*fd), PollFlags::POLLIN));
            }
        }

        let now = Instant::now();
        let mut timeout_ms = match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(now).as_millis(),
            None => u128::from(IDLE_POLL_MS),
        };
        // Pending open retries also bound the wait so they come due on
        // their own, without any sleep outside the poll.
        if let Some(next_try) = self.pending.iter().map(|p| p.next_try).min() {
            timeout_ms = timeout_ms.min(next_try.saturating_duration_since(now).as_millis());
        }
        let timeout = PollTimeout::from(timeout_ms.min(u128::from(u16::MAX)) as u16);

        let ready = match poll(&mut fds, timeout) {
            Ok(n) => n,
            Err(Errno::EINTR) => return Ok(()),
            Err(e) => return Err(DaemonError::Runtime(format!("poll failed: {e}"))),
        };

        self.retry_pending_adds();

        if ready == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.deadline = None;
                    let delay = self.ctx.tick();
                    self.arm(delay);
                }
            }
            return Ok(());
        }

        let ipc_ready = has_input(&fds[0]);
        let hot_ready = has_input(&fds[1]);
        let mut readable = Vec::new();
        let mut dead = Vec::new();
        for (slot, (index, _)) in dev_fds.iter().enumerate() {
            let Some(revents) = fds[slot + 2].revents() else {
                continue;
            };
            if revents.intersects(PollFlags::POLLERR | PollFlags::POLLHUP | PollFlags::POLLNVAL) {
                dead.push(*index);
            } else if revents.contains(PollFlags::POLLIN) {
                readable.push(*index);
            }
        }
        drop(fds);

        let mut events = Vec::new();
        for index in readable {
            events.clear();
            let outcome = match self.ctx.devices_mut().get_mut(index) {
                Some(device) => device.handle_mut().read_events(&mut events),
                None => continue,
            };
            if let Err(e) = outcome {
                if e.raw_os_error() == Some(libc::ENODEV) {
                    dead.push(index);
                } else {
                    warn!("read failed on device #{index}: {e}");
                }
            }
            for event in events.drain(..) {
                let timeleft = self.remaining_ms();
                let delay = self.ctx.dispatch(index, event, timeleft);
                self.arm(delay);
            }
        }

        // Indices were only valid against the unmodified table; turn them
        // into paths before removing anything.
        dead.sort_unstable();
        dead.dedup();
        let gone: Vec<PathBuf> = dead
            .iter()
            .filter_map(|i| self.ctx.devices().get(*i).map(|d| d.path.clone()))
            .collect();
        for path in gone {
            self.ctx.remove_device(&path);
        }

        if hot_ready {
            let (added, removed) = self.hotplug.drain();
            for path in removed {
                self.pending.retain(|p| p.path != path);
                self.ctx.remove_device(&path);
            }
            for path in added {
                if self.ctx.devices().contains_path(&path) {
                    continue;
                }
                match linux::open_device(&path) {
                    Ok(device) => self.ctx.add_device(device),
                    Err(DeviceError::PermissionDenied(_)) => {
                        // udev may still be applying access rules; try
                        // again from the next poll wake.
                        debug!("deferring {}", path.display());
                        self.pending.push(PendingAdd {
                            path,
                            attempts: 0,
                            next_try: Instant::now() + PENDING_RETRY_DELAY,
                        });
                    }
                    Err(e) => debug!("not adding {}: {e}", path.display()),
                }
            }
        }

        if ipc_ready {
            self.server.accept_one(&mut self.ctx)?;
        }

        Ok(())
    }

    /// Re-attempts deferred hotplug opens whose retry time has come.
    fn retry_pending_adds(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut still_pending = Vec::new();
        for mut pending in std::mem::take(&mut self.pending) {
            if now < pending.next_try {
                still_pending.push(pending);
                continue;
            }
            if self.ctx.devices().contains_path(&pending.path) {
                continue;
            }
            match linux::open_device(&pending.path) {
                Ok(device) => self.ctx.add_device(device),
                Err(DeviceError::PermissionDenied(_))
                    if pending.attempts + 1 < PENDING_RETRY_ATTEMPTS =>
                {
                    pending.attempts += 1;
                    pending.next_try = now + PENDING_RETRY_DELAY;
                    still_pending.push(pending);
                }
                Err(e) => debug!("not adding {}: {e}", pending.path.display()),
            }
        }
        self.pending = still_pending;
    }

    fn remaining_ms(&self) -> u64 {
        self.deadline.map_or(0, |d| {
            d.saturating_duration_since(Instant::now()).as_millis() as u64
        })
    }

    fn arm(&mut self, delay_ms: u64) {
        self.deadline = if delay_ms > 0 {
            Some(Instant::now() + Duration::from_millis(delay_ms))
        } else {
            None
        };
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        // Keys still recorded pressed are released while the virtual
        // device is alive; grabs and the socket file go with their owners.
        self.ctx.shutdown();
    }
}

fn has_input(fd: &PollFd) -> bool {
    fd.revents()
        .map_or(false, |revents| revents.contains(PollFlags::POLLIN))
}
