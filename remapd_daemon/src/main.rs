//! remapd - device-aware key remapping daemon.
//!
//! # Subcommands
//!
//! - `run`: grab matching devices and start remapping
//! - `list-devices`: show input devices with identity and capabilities
//! - `check`: parse configurations and report device matches, no grabs

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

use remapd_daemon::{DEFAULT_CONFIG_DIR, DEFAULT_SOCKET_PATH};

#[derive(Parser)]
#[command(name = "remapd")]
#[command(version, about = "Device-aware key remapping daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon: grab matching devices, open the virtual output
    /// device and the IPC socket, and process events until terminated.
    Run {
        /// Directory scanned for *.conf files.
        #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
        config_dir: PathBuf,

        /// IPC socket path.
        #[arg(long, value_name = "PATH", default_value = DEFAULT_SOCKET_PATH)]
        socket: PathBuf,

        /// Enable debug logging.
        #[arg(short, long)]
        debug: bool,
    },

    /// List input devices with path, name, vendor:product id and
    /// capability flags.
    ListDevices,

    /// Parse all configurations and show which present devices each one
    /// would bind. No devices are grabbed.
    Check {
        /// Directory scanned for *.conf files.
        #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
        config_dir: PathBuf,
    },
}

/// Exit codes following Unix conventions.
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    /// Configuration error (directory missing, parse failure).
    pub const CONFIG_ERROR: i32 = 1;
    /// Permission error (cannot open devices, cannot create uinput).
    #[allow(dead_code)]
    pub const PERMISSION_ERROR: i32 = 2;
    /// Runtime error (socket, poll, device loss).
    #[allow(dead_code)]
    pub const RUNTIME_ERROR: i32 = 3;
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            config_dir,
            socket,
            debug,
        } => {
            init_logging(debug);
            handle_run(config_dir, socket)
        }
        Commands::ListDevices => {
            init_logging(false);
            handle_list_devices()
        }
        Commands::Check { config_dir } => {
            init_logging(false);
            handle_check(&config_dir)
        }
    };

    match result {
        Ok(()) => process::exit(exit_codes::SUCCESS),
        Err((code, message)) => {
            eprintln!("Error: {message}");
            process::exit(code);
        }
    }
}

fn init_logging(debug: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    Builder::new()
        .filter_level(level)
        .format_timestamp_millis()
        .init();
}

#[cfg(target_os = "linux")]
fn handle_run(config_dir: PathBuf, socket: PathBuf) -> Result<(), (i32, String)> {
    use remapd_daemon::daemon::{Daemon, RunOptions};

    let options = RunOptions { config_dir, socket };
    let mut daemon = Daemon::new(&options).map_err(daemon_error_to_exit)?;
    daemon.run().map_err(daemon_error_to_exit)
}

#[cfg(target_os = "linux")]
fn daemon_error_to_exit(error: remapd_daemon::error::DaemonError) -> (i32, String) {
    use remapd_daemon::error::{DaemonError, DeviceError};

    let code = match &error {
        DaemonError::Config(_) => exit_codes::CONFIG_ERROR,
        DaemonError::Device(DeviceError::PermissionDenied(_)) | DaemonError::Sink(_) => {
            exit_codes::PERMISSION_ERROR
        }
        _ => exit_codes::RUNTIME_ERROR,
    };
    (code, error.to_string())
}

#[cfg(target_os = "linux")]
fn handle_list_devices() -> Result<(), (i32, String)> {
    use remapd_daemon::platform::linux::enumerate;

    let devices = enumerate().map_err(|e| {
        (
            exit_codes::PERMISSION_ERROR,
            format!("failed to enumerate devices: {e}"),
        )
    })?;

    if devices.is_empty() {
        println!("No input devices found.");
        println!();
        println!("If devices are connected, this is a permission problem:");
        println!("  - add your user to the 'input' group, or");
        println!("  - run as root");
        return Ok(());
    }

    println!("{:<24} {:<32} {:<10} CAPS", "PATH", "NAME", "ID");
    println!("{}", "-".repeat(78));
    for device in &devices {
        let mut caps = Vec::new();
        if device.caps.keys {
            caps.push("keys");
        }
        if device.caps.rel {
            caps.push("rel");
        }
        if device.caps.abs {
            caps.push("abs");
        }
        println!(
            "{:<24} {:<32} {:<10} {}",
            device.path.display(),
            truncate(&device.name, 31),
            device.id.to_string(),
            caps.join(",")
        );
    }
    println!();
    println!("Found {} device(s).", devices.len());
    Ok(())
}

#[cfg(target_os = "linux")]
fn handle_check(config_dir: &std::path::Path) -> Result<(), (i32, String)> {
    use remapd_core::{Config, MatchRank};
    use remapd_daemon::platform::linux::enumerate;

    let mut configs = Vec::new();
    let entries = std::fs::read_dir(config_dir).map_err(|e| {
        (
            exit_codes::CONFIG_ERROR,
            format!("cannot open {}: {e}", config_dir.display()),
        )
    })?;
    let mut paths: Vec<_> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| !p.is_dir() && p.extension().and_then(|e| e.to_str()) == Some("conf"))
        .collect();
    paths.sort();
    for path in paths {
        let config = Config::from_file(&path)
            .map_err(|e| (exit_codes::CONFIG_ERROR, e.to_string()))?;
        println!("parsed {}", path.display());
        configs.push(config);
    }

    if configs.is_empty() {
        println!("No configurations found in {}.", config_dir.display());
        return Ok(());
    }

    let devices = enumerate().unwrap_or_default();
    for device in &devices {
        let mut best: Option<(&str, MatchRank)> = None;
        for config in &configs {
            let rank = config.check_match(device.id);
            if rank > best.map_or(MatchRank::None, |(_, r)| r) {
                best = Some((config.name(), rank));
            }
        }
        match best {
            Some((name, rank)) => println!(
                "[MATCH] {} ({}) -> '{}' at rank {:?}",
                device.path.display(),
                device.id,
                name,
                rank
            ),
            None => println!("[SKIP]  {} ({})", device.path.display(), device.id),
        }
    }
    Ok(())
}

// Device names are arbitrary bytes from the kernel; cut on character
// boundaries, never byte offsets.
#[cfg(target_os = "linux")]
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(not(target_os = "linux"))]
fn handle_run(_config_dir: PathBuf, _socket: PathBuf) -> Result<(), (i32, String)> {
    Err((
        exit_codes::CONFIG_ERROR,
        "the 'run' command is only available on Linux".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn handle_list_devices() -> Result<(), (i32, String)> {
    Err((
        exit_codes::CONFIG_ERROR,
        "the 'list-devices' command is only available on Linux".to_string(),
    ))
}

#[cfg(not(target_os = "linux"))]
fn handle_check(_config_dir: &std::path::Path) -> Result<(), (i32, String)> {
    Err((
        exit_codes::CONFIG_ERROR,
        "the 'check' command is only available on Linux".to_string(),
    ))
}
