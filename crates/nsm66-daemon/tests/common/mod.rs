//! Shared helpers for the daemon integration tests.
//!
//! The daemon runs on the test thread and is pumped explicitly; clients
//! are scripted peers on background threads that announce, reply to
//! directives and record everything they receive. Client pids are real
//! `sleep` children so the supervision paths (probe, SIGTERM, reap) are
//! exercised against live processes.

#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use nsm66_core::osc::{self, Endpoint, OscAddr, OscMessage, OscType, Tag};
use nsm66_daemon::daemon::{Daemon, DaemonConfig};

pub struct Fixture {
    pub daemon: Daemon,
    pub session_root: PathBuf,
    pub lock_dir: PathBuf,
    _root: tempfile::TempDir,
    _lock: tempfile::TempDir,
}

pub fn fixture() -> Fixture {
    let root = tempfile::tempdir().unwrap();
    let lock = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        osc_port: 0,
        session_root: root.path().to_path_buf(),
        lock_dir: lock.path().to_path_buf(),
    };
    let daemon = Daemon::new(config).unwrap();
    Fixture {
        daemon,
        session_root: root.path().to_path_buf(),
        lock_dir: lock.path().to_path_buf(),
        _root: root,
        _lock: lock,
    }
}

/// A controller peer on the test thread.
pub struct Controller {
    pub endpoint: Endpoint,
    pub daemon_addr: OscAddr,
}

impl Controller {
    pub fn new(daemon: &Daemon) -> Self {
        Self {
            endpoint: Endpoint::bind(0).unwrap(),
            daemon_addr: OscAddr::parse_url(daemon.url()).unwrap(),
        }
    }

    pub fn send(&self, tag: Tag, args: Vec<OscType>) {
        self.endpoint
            .send(self.daemon_addr, osc::message(tag, args))
            .unwrap();
    }

    pub fn drain(&self) -> Vec<OscMessage> {
        self.endpoint
            .wait(Duration::from_millis(100))
            .into_iter()
            .map(|(msg, _)| msg)
            .collect()
    }
}

/// Pump the daemon until `predicate` holds or the deadline passes.
pub fn pump_until(
    daemon: &mut Daemon,
    secs: u64,
    mut predicate: impl FnMut(&Daemon) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(secs);
    while Instant::now() < deadline {
        daemon.wait(Duration::from_millis(50));
        if predicate(daemon) {
            return true;
        }
    }
    false
}

pub fn pump(daemon: &mut Daemon, iterations: usize) {
    for _ in 0..iterations {
        daemon.wait(Duration::from_millis(50));
    }
}

/// A scripted session client on a background thread.
///
/// It announces with the pid of a real `sleep` child, acknowledges every
/// open/save directive (optionally after a delay) and records everything
/// it receives.
pub struct FakeClient {
    received: Arc<Mutex<Vec<OscMessage>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    child: Child,
}

impl FakeClient {
    pub fn start(daemon_url: &str, name: &str, exe: &str, caps: &str) -> Self {
        Self::start_with_delay(daemon_url, name, exe, caps, Duration::ZERO)
    }

    pub fn start_with_delay(
        daemon_url: &str,
        name: &str,
        exe: &str,
        caps: &str,
        reply_delay: Duration,
    ) -> Self {
        let child = std::process::Command::new("sleep")
            .arg("300")
            .spawn()
            .expect("sleep must be available");
        let pid = i32::try_from(child.id()).unwrap();

        let endpoint = Endpoint::bind(0).unwrap();
        let daemon_addr = OscAddr::parse_url(daemon_url).unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let name = name.to_string();
        let exe = exe.to_string();
        let caps = caps.to_string();
        let received_in_thread = Arc::clone(&received);
        let stop_in_thread = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            endpoint
                .send(
                    daemon_addr,
                    osc::message(
                        Tag::SrvAnnounce,
                        vec![
                            osc::s(name),
                            osc::s(caps),
                            osc::s(exe),
                            osc::i(1),
                            osc::i(1),
                            osc::i(pid),
                        ],
                    ),
                )
                .unwrap();
            while !stop_in_thread.load(Ordering::SeqCst) {
                for (msg, from) in endpoint.wait(Duration::from_millis(50)) {
                    let reply = match Tag::from_path(&msg.addr) {
                        Some(Tag::CliOpen) => Some(Tag::CliOpen.path()),
                        Some(Tag::CliSave) => Some(Tag::CliSave.path()),
                        _ => None,
                    };
                    received_in_thread.lock().unwrap().push(msg);
                    if let Some(path) = reply {
                        if !reply_delay.is_zero() {
                            std::thread::sleep(reply_delay);
                        }
                        endpoint
                            .send(
                                from,
                                osc::message(Tag::Reply, vec![osc::s(path), osc::s("OK")]),
                            )
                            .unwrap();
                    }
                }
            }
        });

        Self {
            received,
            stop,
            handle: Some(handle),
            child,
        }
    }

    pub fn received_paths(&self) -> Vec<String> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.addr.clone())
            .collect()
    }

    pub fn received_messages(&self) -> Vec<OscMessage> {
        self.received.lock().unwrap().clone()
    }

    pub fn child_is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

impl Drop for FakeClient {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn has_reply_with(messages: &[OscMessage], text: &str) -> bool {
    messages
        .iter()
        .any(|m| m.addr == "/reply" && m.args.iter().any(|a| arg_is(a, text)))
}

pub fn arg_is(arg: &OscType, text: &str) -> bool {
    matches!(arg, OscType::String(s) if s == text)
}

pub fn error_code_of(msg: &OscMessage) -> Option<i32> {
    if msg.addr != "/error" {
        return None;
    }
    osc::int_arg(msg, 1)
}
