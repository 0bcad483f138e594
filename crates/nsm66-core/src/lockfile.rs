//! Per-host lock and discovery files.
//!
//! Layout below the user's runtime directory:
//!
//! ```text
//! <run_root>/nsm/
//! <run_root>/nsm/d/<pid>      daemon advertisement (content: daemon URL)
//! <run_root>/nsm/<digest>     session lockfile (content: path + URL)
//! ```
//!
//! The lockfile name is a digest over both the simple session name and
//! the absolute session path, so two sessions with the same simple name
//! in different locations do not collide. Presence of a lockfile is
//! sufficient evidence that some daemon holds the session.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::Error;

/// Hex characters of the digest kept for the lockfile name.
const LOCK_NAME_LEN: usize = 16;

/// The `nsm` runtime directory for the current user.
///
/// `$XDG_RUNTIME_DIR` is preferred, then `/run/user/<uid>`, then `/tmp`.
#[must_use]
pub fn runtime_directory() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir).join("nsm");
        }
    }
    let run_user = PathBuf::from(format!("/run/user/{}", current_uid()));
    if run_user.is_dir() {
        return run_user.join("nsm");
    }
    PathBuf::from("/tmp").join("nsm")
}

fn current_uid() -> u32 {
    extern "C" {
        fn getuid() -> u32;
    }
    // SAFETY: getuid(2) cannot fail and takes no arguments.
    unsafe { getuid() }
}

/// Create the runtime lock directory.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn make_lock_directory(lock_dir: &Path) -> Result<(), Error> {
    fs::create_dir_all(lock_dir).map_err(|e| Error::io(lock_dir, e))
}

/// Create the daemon advertisement directory `<lock_dir>/d`.
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be created.
pub fn make_daemon_directory(lock_dir: &Path) -> Result<PathBuf, Error> {
    let dir = lock_dir.join("d");
    fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
    Ok(dir)
}

/// The lockfile path for a session identity.
///
/// The name depends on both the simple name and the absolute path.
#[must_use]
pub fn lock_file_path(lock_dir: &Path, simple_name: &str, session_path: &Path) -> PathBuf {
    let mut hasher = Sha256::new();
    hasher.update(simple_name.as_bytes());
    hasher.update(b"\n");
    hasher.update(session_path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    let mut name = String::with_capacity(LOCK_NAME_LEN);
    for byte in digest.iter().take(LOCK_NAME_LEN / 2) {
        name.push_str(&format!("{byte:02x}"));
    }
    lock_dir.join(name)
}

/// Write a session lockfile: session path line, then daemon URL line.
///
/// # Errors
///
/// Returns an I/O error if the lockfile cannot be written.
pub fn write_lock_file(lock_file: &Path, session_path: &Path, url: &str) -> Result<(), Error> {
    let content = format!("{}\n{url}\n", session_path.display());
    fs::write(lock_file, content).map_err(|e| Error::io(lock_file, e))?;
    info!("wrote lock file {lock_file:?}");
    Ok(())
}

/// Delete a session lockfile, logging failure without propagating it.
pub fn delete_lock_file(lock_file: &Path) {
    match fs::remove_file(lock_file) {
        Ok(()) => info!("deleted lock file {lock_file:?}"),
        Err(e) => warn!("failed to delete lock file {lock_file:?}: {e}"),
    }
}

/// The advertisement file for a daemon process id.
#[must_use]
pub fn daemon_file_path(daemon_dir: &Path, pid: u32) -> PathBuf {
    daemon_dir.join(pid.to_string())
}

/// Write this daemon's URL into its advertisement file.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be written.
pub fn write_daemon_file(daemon_file: &Path, url: &str) -> Result<(), Error> {
    fs::write(daemon_file, format!("{url}\n")).map_err(|e| Error::io(daemon_file, e))
}

/// Delete this daemon's advertisement file on clean exit.
pub fn delete_daemon_file(daemon_file: &Path) {
    match fs::remove_file(daemon_file) {
        Ok(()) => info!("deleted daemon file {daemon_file:?}"),
        Err(e) => warn!("failed to delete daemon file {daemon_file:?}: {e}"),
    }
}

/// Find the URL of a live daemon by enumerating advertisement files.
///
/// Entries whose process id is no longer alive are stale and skipped;
/// a stale URL would simply fail to connect, so readers tolerate them.
#[must_use]
pub fn lookup_daemon_url(lock_dir: &Path) -> Option<String> {
    let daemon_dir = lock_dir.join("d");
    let entries = fs::read_dir(&daemon_dir).ok()?;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if !Path::new(&format!("/proc/{pid}")).exists() {
            continue;
        }
        match fs::read_to_string(entry.path()) {
            Ok(content) => {
                let url = content.lines().next().unwrap_or("").trim();
                if !url.is_empty() {
                    return Some(url.to_string());
                }
            },
            Err(e) => warn!("unreadable daemon file {:?}: {e}", entry.path()),
        }
    }
    None
}

/// Remove the whole runtime `nsm` directory (the `nsmctl --clean` path).
///
/// # Errors
///
/// Returns an I/O error if the directory cannot be removed.
pub fn remove_runtime_directory(lock_dir: &Path) -> Result<(), Error> {
    fs::remove_dir_all(lock_dir).map_err(|e| Error::io(lock_dir, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_name_depends_on_name_and_path() {
        let dir = Path::new("/run/user/1000/nsm");
        let a = lock_file_path(dir, "demo", Path::new("/home/a/sessions/demo"));
        let b = lock_file_path(dir, "demo", Path::new("/home/b/sessions/demo"));
        let c = lock_file_path(dir, "other", Path::new("/home/a/sessions/demo"));
        assert_ne!(a, b);
        assert_ne!(a, c);
        // Deterministic for a fixed identity.
        assert_eq!(a, lock_file_path(dir, "demo", Path::new("/home/a/sessions/demo")));
    }

    #[test]
    fn test_lock_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = lock_file_path(tmp.path(), "alpha", Path::new("/sessions/alpha"));
        write_lock_file(&lock, Path::new("/sessions/alpha"), "osc.udp://127.0.0.1:9000/")
            .unwrap();
        assert!(lock.is_file());
        let content = std::fs::read_to_string(&lock).unwrap();
        assert!(content.starts_with("/sessions/alpha\n"));
        delete_lock_file(&lock);
        assert!(!lock.exists());
    }

    #[test]
    fn test_daemon_discovery_skips_dead_pids() {
        let tmp = tempfile::tempdir().unwrap();
        let daemon_dir = make_daemon_directory(tmp.path()).unwrap();

        // A pid that is certainly not alive.
        let stale = daemon_file_path(&daemon_dir, 4_000_000);
        write_daemon_file(&stale, "osc.udp://127.0.0.1:1111/").unwrap();
        assert_eq!(lookup_daemon_url(tmp.path()), None);

        // Our own pid is alive.
        let live = daemon_file_path(&daemon_dir, std::process::id());
        write_daemon_file(&live, "osc.udp://127.0.0.1:2222/").unwrap();
        assert_eq!(
            lookup_daemon_url(tmp.path()),
            Some("osc.udp://127.0.0.1:2222/".to_string())
        );
    }
}
