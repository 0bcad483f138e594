//! jackpatch66: remember and restore the audio routing graph.
//!
//! Runs as a session client: it announces itself to the daemon, loads
//! `<project>.jackpatch` on open, snapshots the live graph on save, and
//! in between reconciles intended edges with port registrations. It also
//! has limited standalone modes for testing: monitoring a snapshot file
//! and one-shot saving.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::Receiver;
use nsm66_core::lockfile;
use nsm66_core::osc::{self, Endpoint, OscAddr, OscMessage, Tag};
use nsm66_core::{API_VERSION_MAJOR, API_VERSION_MINOR, CAP_SWITCH, NSM_URL_ENV};
use nsm66_patch::jack_driver::JackGraph;
use nsm66_patch::{PatchBay, PortEvent};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const APP_TITLE: &str = "jackpatch66";

/// Period of the steady-state pump.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

static DIE_NOW: AtomicBool = AtomicBool::new(false);

/// Remember and restore the audio connection graph.
#[derive(Parser, Debug)]
#[command(name = "jackpatch66")]
#[command(version, about, long_about = None)]
struct Args {
    /// Restore a saved snapshot file and monitor it (standalone mode).
    file: Option<PathBuf>,

    /// Save the current graph to a file, then exit.
    #[arg(long)]
    save: Option<PathBuf>,

    /// Don't try to connect to the session daemon; verbose status.
    #[arg(long)]
    debug: bool,

    /// Show informational messages.
    #[arg(long)]
    verbose: bool,
}

extern "C" fn handle_signal(_sig: i32) {
    DIE_NOW.store(true, Ordering::SeqCst);
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

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.debug || args.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let (mut graph, events) =
        JackGraph::open(APP_TITLE).context("could not open a JACK client")?;
    set_traps();

    let mut bay = PatchBay::new();

    if let Some(file) = &args.save {
        // To not discard temporarily missing clients, load the current
        // snapshot first, unless debugging.
        if !args.debug && file.is_file() {
            bay.read_config(file)
                .with_context(|| format!("could not read {}", file.display()))?;
            bay.register_preexisting(&mut graph);
        }
        info!("standalone: saving current graph to {}", file.display());
        bay.save(file, &graph)
            .with_context(|| format!("could not write {}", file.display()))?;
        return Ok(());
    }

    if let Some(file) = &args.file {
        bay.read_config(file)
            .with_context(|| format!("could not read {}", file.display()))?;
        bay.register_preexisting(&mut graph);
        info!("monitoring in standalone mode");
        loop {
            std::thread::sleep(Duration::from_millis(50));
            drain_events(&mut bay, &mut graph, &events);
            if DIE_NOW.load(Ordering::SeqCst) {
                return Ok(());
            }
        }
    }

    let mut app = App::new(graph, events, args.debug)?;
    app.run(&mut bay)
}

/// The session-client shell around the engine.
struct App {
    endpoint: Endpoint,
    graph: JackGraph,
    events: Receiver<PortEvent>,
    daemon: Option<OscAddr>,
    active: bool,
    project_file: Option<PathBuf>,
}

impl App {
    fn new(graph: JackGraph, events: Receiver<PortEvent>, debug: bool) -> Result<Self> {
        let endpoint = Endpoint::bind(0).context("could not create an OSC endpoint")?;
        info!("OSC endpoint at {}", endpoint.url());

        let mut app = Self {
            endpoint,
            graph,
            events,
            daemon: None,
            active: false,
            project_file: None,
        };
        if !debug {
            let url = std::env::var(NSM_URL_ENV)
                .ok()
                .filter(|u| !u.is_empty())
                .or_else(|| lockfile::lookup_daemon_url(&lockfile::runtime_directory()));
            let Some(url) = url else {
                bail!("could not register as a session client: no daemon URL");
            };
            app.announce(&url)?;
        }
        Ok(app)
    }

    fn announce(&mut self, url: &str) -> Result<()> {
        info!("announcing to the session daemon at {url}");
        let to = OscAddr::parse_url(url)?;
        let exe = std::env::args().next().unwrap_or_else(|| APP_TITLE.to_string());
        self.endpoint.send(
            to,
            osc::message(
                Tag::SrvAnnounce,
                vec![
                    osc::s(APP_TITLE),
                    osc::s(CAP_SWITCH),
                    osc::s(exe),
                    osc::i(API_VERSION_MAJOR),
                    osc::i(API_VERSION_MINOR),
                    osc::i(i32::try_from(std::process::id()).unwrap_or(0)),
                ],
            ),
        )?;
        Ok(())
    }

    fn run(&mut self, bay: &mut PatchBay) -> Result<()> {
        loop {
            for (msg, from) in self.endpoint.wait(POLL_INTERVAL) {
                self.dispatch(bay, &msg, from);
            }
            drain_events(bay, &mut self.graph, &self.events);
            if DIE_NOW.load(Ordering::SeqCst) {
                info!("closing JACK client");
                return Ok(());
            }
        }
    }

    fn dispatch(&mut self, bay: &mut PatchBay, msg: &OscMessage, from: OscAddr) {
        match Tag::from_path(&msg.addr) {
            Some(Tag::Reply) => {
                if osc::str_arg(msg, 0) == Some(Tag::SrvAnnounce.path()) {
                    info!(
                        "successfully registered: {}",
                        osc::str_arg(msg, 1).unwrap_or_default()
                    );
                    self.active = true;
                    self.daemon = Some(from);
                }
            },
            Some(Tag::Error) => {
                if osc::str_arg(msg, 0) == Some(Tag::SrvAnnounce.path()) {
                    error!(
                        "failed to register with the session daemon: {}",
                        osc::str_arg(msg, 2).unwrap_or_default()
                    );
                    self.active = false;
                }
            },
            Some(Tag::CliOpen) => self.handle_open(bay, msg, from),
            Some(Tag::CliSave) => self.handle_save(bay, from),
            _ => {},
        }
    }

    fn handle_open(&mut self, bay: &mut PatchBay, msg: &OscMessage, from: OscAddr) {
        let Some(project) = osc::str_arg(msg, 0) else {
            return;
        };
        let file = PathBuf::from(format!("{project}.jackpatch"));
        if file.is_file() {
            match bay.read_config(&file) {
                Ok(count) => {
                    info!("restored {count} connections from {}", file.display());
                    bay.register_preexisting(&mut self.graph);
                },
                Err(e) => {
                    error!("could not open {}: {e}", file.display());
                    self.send_to(
                        from,
                        osc::message(
                            Tag::Error,
                            vec![
                                osc::s(Tag::CliOpen.path()),
                                osc::i(nsm66_core::ErrorCode::General.code()),
                                osc::s("Could not open file"),
                            ],
                        ),
                    );
                    return;
                },
            }
        } else {
            bay.clear_patches();
        }
        self.project_file = Some(file);
        self.send_to(
            from,
            osc::message(Tag::Reply, vec![osc::s(Tag::CliOpen.path()), osc::s("OK")]),
        );
    }

    fn handle_save(&mut self, bay: &mut PatchBay, from: OscAddr) {
        let Some(file) = self.project_file.clone() else {
            warn!("save directive before any project was opened");
            return;
        };
        if let Err(e) = bay.save(&file, &self.graph) {
            error!("could not write {}: {e}", file.display());
            self.send_to(
                from,
                osc::message(
                    Tag::Error,
                    vec![
                        osc::s(Tag::CliSave.path()),
                        osc::i(nsm66_core::ErrorCode::SaveFailed.code()),
                        osc::s("Could not write snapshot"),
                    ],
                ),
            );
            return;
        }
        self.send_to(
            from,
            osc::message(Tag::Reply, vec![osc::s(Tag::CliSave.path()), osc::s("OK")]),
        );
    }

    fn send_to(&self, to: OscAddr, msg: OscMessage) {
        if let Err(e) = self.endpoint.send(to, msg) {
            warn!("send failed: {e}");
        }
    }
}

fn drain_events(bay: &mut PatchBay, graph: &mut JackGraph, events: &Receiver<PortEvent>) {
    while let Ok(event) = events.try_recv() {
        bay.handle_event(&event, graph);
    }
}
