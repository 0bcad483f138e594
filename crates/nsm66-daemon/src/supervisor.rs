//! Process supervision primitives.
//!
//! The daemon keeps SIGCHLD blocked and reads it through a signal
//! descriptor between message dispatches; reaping therefore never happens
//! inside a dispatch. Children unblock SIGCHLD in a `pre_exec` hook so
//! they start with a clean signal disposition.
//!
//! Exec failures surface two ways: a synchronous spawn error (the
//! executable is missing or not permitted), or a child that exits with
//! the sentinel status 255 before doing anything useful. Both are
//! classified as a launch error.

use std::io;
use std::os::unix::process::CommandExt;
use std::process::Command;

use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use tracing::warn;

use nsm66_core::NSM_URL_ENV;

/// Exit status a child reports when `exec` itself failed.
pub const LAUNCH_ERROR_STATUS: i32 = 255;

/// Block SIGCHLD for this process and open a non-blocking signal
/// descriptor delivering it.
///
/// # Errors
///
/// Returns an I/O error if the signal mask or descriptor cannot be set
/// up.
pub fn install_sigchld_fd() -> io::Result<SignalFd> {
    let mut mask = SigSet::empty();
    mask.add(Signal::SIGCHLD);
    signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&mask), None).map_err(io::Error::from)?;
    let fd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
        .map_err(io::Error::from)?;
    Ok(fd)
}

/// Drain the signal descriptor; returns whether any SIGCHLD was queued.
pub fn drain_sigchld(fd: &mut SignalFd) -> bool {
    let mut delivered = false;
    loop {
        match fd.read_signal() {
            Ok(Some(info)) => {
                if info.ssi_signo == Signal::SIGCHLD as u32 {
                    delivered = true;
                }
            },
            Ok(None) => break,
            Err(e) => {
                warn!("signal descriptor read failed: {e}");
                break;
            },
        }
    }
    delivered
}

/// Spawn a client executable with the daemon URL in its environment.
///
/// The child unblocks SIGCHLD before `exec`; unblocking there does not
/// affect the daemon's own mask.
///
/// # Errors
///
/// Returns the spawn error when the executable cannot be started; the
/// caller records this as a launch error.
pub fn spawn_client(executable: &str, daemon_url: &str) -> io::Result<u32> {
    let mut command = Command::new(executable);
    command.env(NSM_URL_ENV, daemon_url);
    // SAFETY: the hook only manipulates the signal mask, which is
    // async-signal-safe between fork and exec.
    unsafe {
        command.pre_exec(|| {
            let mut mask = SigSet::empty();
            mask.add(Signal::SIGCHLD);
            signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&mask), None)
                .map_err(io::Error::from)
        });
    }
    let child = command.spawn()?;
    Ok(child.id())
}

/// How a reaped child went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    /// Normal or signalled exit.
    Exited,
    /// The exec sentinel: the program never started.
    LaunchError,
}

/// One reaped child.
#[derive(Debug, Clone, Copy)]
pub struct Reaped {
    /// Process id of the dead child.
    pub pid: u32,
    /// Exit classification.
    pub kind: ExitKind,
}

/// Reap every dead child via non-blocking wait-for-any.
#[must_use]
pub fn reap_children() -> Vec<Reaped> {
    let mut reaped = Vec::new();
    loop {
        match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(pid, status)) => {
                let kind = if status == LAUNCH_ERROR_STATUS {
                    ExitKind::LaunchError
                } else {
                    ExitKind::Exited
                };
                reaped.push(Reaped {
                    pid: pid_to_u32(pid),
                    kind,
                });
            },
            Ok(WaitStatus::Signaled(pid, _, _)) => {
                reaped.push(Reaped {
                    pid: pid_to_u32(pid),
                    kind: ExitKind::Exited,
                });
            },
            // Stopped/continued children are not deaths.
            Ok(WaitStatus::StillAlive) | Err(_) => break,
            Ok(_) => {},
        }
    }
    reaped
}

/// Null-signal probe: whether a process still exists.
#[must_use]
pub fn process_is_running(pid: u32) -> bool {
    signal::kill(Pid::from_raw(pid_to_i32(pid)), None).is_ok()
}

/// Ask a process to terminate (SIGTERM).
pub fn terminate(pid: u32) {
    if let Err(e) = signal::kill(Pid::from_raw(pid_to_i32(pid)), Signal::SIGTERM) {
        warn!("SIGTERM to {pid} failed: {e}");
    }
}

/// Forcefully kill a process (SIGKILL), the last resort for clients
/// that survived the termination grace period.
pub fn force_kill(pid: u32) {
    warn!("sending SIGKILL to {pid}");
    if let Err(e) = signal::kill(Pid::from_raw(pid_to_i32(pid)), Signal::SIGKILL) {
        warn!("SIGKILL to {pid} failed: {e}");
    }
}

fn pid_to_u32(pid: Pid) -> u32 {
    u32::try_from(pid.as_raw()).unwrap_or(0)
}

fn pid_to_i32(pid: u32) -> i32 {
    i32::try_from(pid).unwrap_or(0)
}
