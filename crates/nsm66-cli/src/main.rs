//! nsmctl, the command-line controller for the session daemon.
//!
//! Performs the controller side of the protocol without a GUI: find (or
//! start) a daemon, attach to it, optionally run one action, optionally
//! keep monitoring. The daemon URL is resolved from `--url`, then the
//! `NSM_URL` environment, then the per-host discovery directory; if no
//! daemon is found one is spawned with `--gui-url` pointing back here.

use std::process::Child;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::Parser;
use nsm66_core::lockfile;
use nsm66_core::osc::messages::{Action, action_by_name, ACTIONS};
use nsm66_core::osc::{self, Endpoint, OscAddr, OscMessage, OscType, Tag};
use nsm66_core::NSM_URL_ENV;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// How long to wait for the daemon to complete the attach handshake.
const ATTACH_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line controller for the session daemon.
#[derive(Parser, Debug)]
#[command(name = "nsmctl")]
#[command(version, about, long_about = None)]
#[command(after_help = action_help())]
struct Args {
    /// Connect to a daemon running at this URL.
    /// Example: osc.udp://localhost:38356/.
    #[arg(short, long)]
    url: Option<String>,

    /// Find a running daemon via the runtime directory instead of the
    /// NSM_URL environment variable.
    #[arg(short, long)]
    lookup: bool,

    /// Path to the daemon executable used when none is running.
    #[arg(short, long, default_value = "nsm66d")]
    nsmd_path: String,

    /// Ping the daemon and exit.
    #[arg(short, long)]
    ping: bool,

    /// Keep running and print daemon activity until interrupted.
    #[arg(short, long)]
    monitor: bool,

    /// Suppress messages except warnings and errors.
    #[arg(short, long)]
    quiet: bool,

    /// On exit, also tell the daemon to quit.
    #[arg(short, long)]
    stop: bool,

    /// Run one action before exiting; client actions take
    /// `action@subject` where the subject is a client name or id.
    #[arg(short, long, value_name = "ACTION[@SUBJECT]")]
    action: Option<String>,

    /// Remove the runtime directory left behind by aborted daemons.
    #[arg(short, long)]
    clean: bool,

    /// Arguments after `--` are passed to a spawned daemon.
    #[arg(last = true)]
    daemon_args: Vec<String>,
}

fn action_help() -> String {
    let mut out = String::from("Actions:\n");
    for action in ACTIONS {
        out.push_str(&format!(
            "  {:12}{}{}\n",
            action.name,
            if action.is_client_action {
                "client action"
            } else {
                "server action"
            },
            if action.needs_argument {
                ", requires @subject"
            } else {
                ""
            },
        ));
    }
    out
}

extern "C" fn handle_signal(_sig: i32) {
    EXIT_REQUESTED.store(true, Ordering::SeqCst);
}

fn set_traps() {
    use nix::sys::signal::{SigHandler, Signal, signal};
    for sig in [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores to an atomic flag.
        if let Err(e) = unsafe { signal(sig, SigHandler::Handler(handle_signal)) } {
            warn!("failed to trap {sig}: {e}");
        }
    }
}

/// A parsed `--action` request.
struct ActionRequest {
    action: &'static Action,
    subject: Option<String>,
}

/// Split `name[@subject]` and validate it against the registry.
fn parse_action_item(item: &str) -> Result<ActionRequest> {
    let (name, subject) = match item.split_once('@') {
        Some((name, subject)) => (name, Some(subject.to_string())),
        None => (item, None),
    };
    let action = action_by_name(name)
        .with_context(|| format!("unknown action '{name}'"))?;
    if action.needs_argument && subject.is_none() {
        bail!("action '{name}' requires a subject: use '{name}@subject'");
    }
    Ok(ActionRequest { action, subject })
}

/// The controller's transport half.
struct Controller {
    endpoint: Endpoint,
    daemon: OscAddr,
}

impl Controller {
    fn new(daemon_url: &str) -> Result<Self> {
        let endpoint = Endpoint::bind(0).context("could not create an OSC endpoint")?;
        let daemon = OscAddr::parse_url(daemon_url)
            .with_context(|| format!("invalid daemon URL '{daemon_url}'"))?;
        Ok(Self { endpoint, daemon })
    }

    fn send(&self, tag: Tag, args: Vec<OscType>) -> Result<()> {
        self.endpoint.send(self.daemon, osc::message(tag, args))?;
        Ok(())
    }

    /// Attach as a controller and wait for the welcome payload.
    ///
    /// The daemon always answers an attach with the session root, so its
    /// arrival is the "we are active" signal.
    fn attach(&self) -> Result<()> {
        self.send(Tag::GuiAnnounce, vec![])?;
        self.wait_for(ATTACH_TIMEOUT, |msg| {
            Tag::from_path(&msg.addr) == Some(Tag::GuiSessionRoot)
        })
        .context("the daemon did not answer the attach handshake")?;
        info!("going active");
        Ok(())
    }

    /// Pump until a message satisfies `predicate`; returns it.
    fn wait_for(
        &self,
        timeout: Duration,
        mut predicate: impl FnMut(&OscMessage) -> bool,
    ) -> Option<OscMessage> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            for (msg, _) in self.endpoint.wait(Duration::from_millis(100)) {
                log_incoming(&msg);
                if predicate(&msg) {
                    return Some(msg);
                }
            }
            if EXIT_REQUESTED.load(Ordering::SeqCst) {
                return None;
            }
        }
        None
    }

    fn ping(&self) -> Result<()> {
        for _ in 0..5 {
            self.send(Tag::Ping, vec![])?;
            let reply = self.wait_for(Duration::from_secs(1), |msg| {
                msg.addr == "/reply" && osc::str_arg(msg, 0) == Some(Tag::Ping.path())
            });
            if reply.is_some() {
                println!("pong");
                return Ok(());
            }
        }
        bail!("the daemon did not answer the ping");
    }

    /// Stream the session list to stdout until the empty sentinel.
    fn list_sessions(&self) -> Result<()> {
        self.send(Tag::SrvList, vec![])?;
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            for (msg, _) in self.endpoint.wait(Duration::from_millis(100)) {
                if msg.addr != "/reply" || osc::str_arg(&msg, 0) != Some(Tag::SrvList.path()) {
                    continue;
                }
                match osc::str_arg(&msg, 1) {
                    Some("") => return Ok(()),
                    Some(name) => println!("{name}"),
                    None => {},
                }
            }
        }
        bail!("the session list never completed");
    }

    /// Run one parsed action and report the daemon's answer.
    fn run_action(&self, request: &ActionRequest) -> Result<()> {
        if request.action.tag == Tag::SrvList {
            return self.list_sessions();
        }
        let mut args = Vec::new();
        if let Some(subject) = &request.subject {
            args.push(osc::s(subject.clone()));
        }
        let path = request.action.tag.path();
        info!("sending {path}");
        self.send(request.action.tag, args)?;

        // Server operations echo the request path on their answer;
        // GUI-side client actions answer with a bare reply.
        let answer = self.wait_for(Duration::from_secs(60), |msg| {
            matches!(msg.addr.as_str(), "/reply" | "/error")
        });
        match answer {
            Some(msg) if msg.addr == "/error" => {
                let code = osc::int_arg(&msg, 1).unwrap_or_default();
                let text = osc::str_arg(&msg, 2)
                    .or_else(|| osc::str_arg(&msg, 1))
                    .unwrap_or_default();
                bail!("action failed ({code}): {text}");
            },
            Some(_) => {
                info!("action sent");
                Ok(())
            },
            None => bail!("no answer from the daemon"),
        }
    }

    /// Print activity until interrupted or the daemon goes away.
    fn monitor(&self) {
        println!("Monitoring. Hit Ctrl-C to quit.");
        while !EXIT_REQUESTED.load(Ordering::SeqCst) {
            for (msg, _) in self.endpoint.wait(Duration::from_millis(1000)) {
                log_incoming(&msg);
            }
        }
    }
}

fn log_incoming(msg: &OscMessage) {
    let rendered: Vec<String> = msg
        .args
        .iter()
        .map(|a| match a {
            OscType::String(s) => s.clone(),
            OscType::Int(i) => i.to_string(),
            OscType::Float(f) => f.to_string(),
            other => format!("{other:?}"),
        })
        .collect();
    info!("{} {}", msg.addr, rendered.join(" "));
}

/// Spawn a daemon that will report back to our own URL.
fn spawn_daemon(nsmd_path: &str, own_url: &str, extra_args: &[String]) -> Result<Child> {
    info!("starting daemon {nsmd_path}");
    std::process::Command::new(nsmd_path)
        .arg("--gui-url")
        .arg(own_url)
        .args(extra_args)
        .spawn()
        .with_context(|| format!("could not start '{nsmd_path}'"))
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    set_traps();

    if args.clean {
        let dir = lockfile::runtime_directory();
        lockfile::remove_runtime_directory(&dir)
            .with_context(|| format!("failed to delete {}", dir.display()))?;
        println!("deleted {}", dir.display());
        return Ok(());
    }

    let request = args.action.as_deref().map(parse_action_item).transpose()?;

    // URL resolution: explicit flag, then environment, then discovery.
    let url = if let Some(url) = &args.url {
        Some(url.clone())
    } else if !args.lookup {
        std::env::var(NSM_URL_ENV).ok().filter(|u| !u.is_empty())
    } else {
        None
    };
    let url = url.or_else(|| lockfile::lookup_daemon_url(&lockfile::runtime_directory()));

    let mut spawned: Option<Child> = None;
    let controller;
    if let Some(url) = url {
        info!("attaching to daemon at {url}");
        controller = Controller::new(&url)?;
        controller.attach()?;
    } else {
        // No daemon anywhere: start one and let it announce back to us.
        let endpoint = Endpoint::bind(0).context("could not create an OSC endpoint")?;
        let own_url = endpoint.url().to_string();
        let child = spawn_daemon(&args.nsmd_path, &own_url, &args.daemon_args)?;
        info!("forked daemon with pid {}", child.id());
        // The daemon's URL is not known yet; it arrives with the
        // announce push, sender address included. The session root is
        // the last guaranteed part of the welcome, so its arrival means
        // the handshake completed.
        let deadline = Instant::now() + ATTACH_TIMEOUT;
        let mut daemon_addr = None;
        'outer: while Instant::now() < deadline {
            for (msg, from) in endpoint.wait(Duration::from_millis(100)) {
                log_incoming(&msg);
                if Tag::from_path(&msg.addr) == Some(Tag::GuiSessionRoot) {
                    daemon_addr = Some(from);
                    break 'outer;
                }
            }
        }
        let daemon_addr = daemon_addr.context("the spawned daemon never announced itself")?;
        info!("going active");
        controller = Controller {
            endpoint,
            daemon: daemon_addr,
        };
        spawned = Some(child);
    }

    if args.ping {
        controller.ping()?;
    }
    if let Some(request) = &request {
        controller.run_action(request)?;
    }

    if args.monitor || spawned.is_some() {
        // Without monitoring, exiting would orphan a daemon we started.
        controller.monitor();
    } else {
        // Give late replies a moment before going away.
        let _ = controller.endpoint.wait(Duration::from_millis(1000));
    }

    if args.stop {
        info!("telling the daemon to quit");
        controller.send(Tag::SrvQuit, vec![])?;
    }
    if let Some(child) = &spawned {
        if !args.stop {
            terminate_child(child.id());
        }
    }
    Ok(())
}

fn terminate_child(pid: u32) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    if let Ok(pid) = i32::try_from(pid) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            warn!("failed to stop the spawned daemon ({pid}): {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action_item_server() {
        let request = parse_action_item("save").unwrap();
        assert_eq!(request.action.tag, Tag::SrvSave);
        assert!(request.subject.is_none());
    }

    #[test]
    fn test_parse_action_item_with_subject() {
        let request = parse_action_item("open@alpha").unwrap();
        assert_eq!(request.action.tag, Tag::SrvOpen);
        assert_eq!(request.subject.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_parse_action_item_missing_subject() {
        assert!(parse_action_item("open").is_err());
        assert!(parse_action_item("stop").is_err());
    }

    #[test]
    fn test_parse_action_item_unknown() {
        assert!(parse_action_item("frobnicate").is_err());
    }
}
