//! nsm66d, the daemon and server for audio/MIDI sessions.
//!
//! Headless operation with existing sessions works out of the box; to
//! create new ones a controller (GUI or `nsmctl`) drives this daemon
//! over OSC.
//!
//! # Fork safety
//!
//! `--detach` forks before anything else interesting happens. The whole
//! daemon is single-threaded, so this is trivially safe, but the order
//! is kept deliberate: daemonize first, then bind sockets and write the
//! advertisement file, so the files always carry the surviving pid.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use clap::Parser;
use nsm66_core::osc::OscAddr;
use nsm66_daemon::daemon::{Daemon, DaemonConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Daemon and server for audio/MIDI sessions.
#[derive(Parser, Debug)]
#[command(name = "nsm66d")]
#[command(version, about, long_about = None)]
struct Args {
    /// OSC port number. Default: provided by the system.
    #[arg(long, default_value_t = 0)]
    osc_port: u16,

    /// Base path for sessions. Default: $XDG_DATA_HOME/nsm.
    #[arg(long)]
    session_root: Option<PathBuf>,

    /// Load an existing session by name on startup.
    #[arg(long)]
    load_session: Option<String>,

    /// Connect to a running controller GUI at this URL.
    /// Example: osc.udp://localhost:38356/.
    #[arg(long)]
    gui_url: Option<String>,

    /// Detach from the console.
    #[arg(long)]
    detach: bool,

    /// Suppress messages except warnings and errors.
    #[arg(long)]
    quiet: bool,
}

extern "C" fn handle_signal(_sig: i32) {
    EXIT_REQUESTED.store(true, Ordering::SeqCst);
}

fn set_traps() -> Result<()> {
    use nix::sys::signal::{SigHandler, Signal, signal};
    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic flag.
        unsafe { signal(sig, SigHandler::Handler(handle_signal)) }
            .with_context(|| format!("failed to trap {sig}"))?;
    }
    Ok(())
}

/// Double-fork daemonization: the parent exits, the child becomes a
/// session leader and forks again so it can never reacquire a
/// controlling terminal. Must run while still single-threaded.
fn detach() -> Result<()> {
    use nix::unistd::{ForkResult, fork, setsid};

    // SAFETY: no threads exist yet; the parent exits immediately.
    match unsafe { fork() }.context("first fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {},
    }
    setsid().context("setsid failed")?;
    // SAFETY: still single-threaded, we are the first fork's child.
    match unsafe { fork() }.context("second fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => {},
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.detach {
        detach()?;
    }

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    set_traps()?;

    let defaults = DaemonConfig::default();
    let config = DaemonConfig {
        osc_port: args.osc_port,
        // A trailing slash would corrupt relative-path computation.
        session_root: args
            .session_root
            .map(|root| PathBuf::from(root.to_string_lossy().trim_end_matches('/')))
            .unwrap_or(defaults.session_root),
        lock_dir: defaults.lock_dir,
    };

    let mut daemon = Daemon::new(config).context("daemon startup failed")?;
    info!(
        "nsm66d started (pid {}, url {})",
        std::process::id(),
        daemon.url()
    );

    if let Some(url) = &args.gui_url {
        // Started directly and instructed to connect out to a GUI.
        let addr = OscAddr::parse_url(url)
            .with_context(|| format!("invalid GUI URL '{url}'"))?;
        daemon.announce_gui(addr, false);
    }
    if let Some(name) = &args.load_session {
        daemon.open_session_on_startup(name);
    }

    daemon.run(&EXIT_REQUESTED)?;
    info!("daemon shutdown complete");
    Ok(())
}
