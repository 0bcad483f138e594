//! The daemon core: message dispatch and session orchestration.
//!
//! A [`Daemon`] owns the transport endpoint, the client roster, the GUI
//! link and the session state, and runs the single-threaded cooperative
//! main loop. Handlers run to completion between drains; the
//! orchestration phases (open, close, save) pump the transport
//! themselves with bounded waits, which is how per-client replies and
//! child deaths are folded into a long-running operation.
//!
//! Global operations are serialized by a one-slot guard: a second
//! save/open/close/duplicate/new/abort while one is in flight is
//! answered with `operation_pending`, never queued.

use std::cell::Cell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use nix::sys::signalfd::SignalFd;
use nsm66_core::lockfile;
use nsm66_core::osc::{self, Endpoint, OscAddr, OscMessage, OscType, Tag};
use nsm66_core::session::{self, ClientId};
use nsm66_core::{
    API_VERSION_MAJOR, CAP_OPTIONAL_GUI, Error, ErrorCode,
};
use tracing::{error, info, warn};

use crate::client::{Client, ClientStatus, PendingCommand, Roster};
use crate::gui::GuiLink;
use crate::supervisor::{self, ExitKind};

/// Name the daemon acknowledges announces with.
const APP_TITLE: &str = "nsm66d";

/// Capabilities the daemon itself advertises in announce replies.
const SERVER_CAPS: &str = ":server-control:broadcast:optional-gui:";

/// Grace period for client announcements during a session load.
const ANNOUNCE_GRACE: Duration = Duration::from_secs(5);

/// Upper bound on waiting for per-client replies.
const REPLY_GRACE: Duration = Duration::from_secs(60);

/// Seconds of grace before terminated clients are SIGKILLed.
const KILL_GRACE_SECS: u32 = 10;

/// Polling granularity of the orchestration waits.
const POLL_STEP: Duration = Duration::from_millis(100);

/// Spacing between successive launches during a session load. The
/// classic transport library derives UDP ports from coarse-grained
/// time, and clients started back-to-back would collide.
const LAUNCH_SPACING: Duration = Duration::from_millis(100);

/// The one global operation slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operation {
    /// No operation in flight.
    #[default]
    None,
    /// Session save.
    Save,
    /// Session open (also the tail of a duplicate).
    Open,
    /// Session close or abort.
    Close,
    /// Session creation.
    New,
    /// Session duplication.
    Duplicate,
}

/// Scope guard for the operation slot; clears it on every exit path.
pub struct OperationGuard {
    slot: Rc<Cell<Operation>>,
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.slot.set(Operation::None);
    }
}

/// Daemon start-up configuration, assembled from the command line.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// UDP port to bind; 0 requests an ephemeral port.
    pub osc_port: u16,
    /// Root directory that holds the sessions.
    pub session_root: PathBuf,
    /// Runtime directory for lockfiles and daemon advertisements.
    pub lock_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            osc_port: 0,
            session_root: session::default_session_root(),
            lock_dir: lockfile::runtime_directory(),
        }
    }
}

/// The session daemon.
pub struct Daemon {
    endpoint: Endpoint,
    roster: Roster,
    gui: GuiLink,
    session_root: PathBuf,
    session_path: Option<PathBuf>,
    session_name: String,
    lock_dir: PathBuf,
    daemon_file: PathBuf,
    pending_operation: Rc<Cell<Operation>>,
    signal_fd: SignalFd,
    quit_requested: bool,
}

impl Daemon {
    /// Bind the endpoint, set up the runtime directories, advertise the
    /// daemon and install the SIGCHLD descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error when the socket, directories or signal
    /// descriptor cannot be set up.
    pub fn new(config: DaemonConfig) -> Result<Self, Error> {
        lockfile::make_lock_directory(&config.lock_dir)?;
        let daemon_dir = lockfile::make_daemon_directory(&config.lock_dir)?;
        std::fs::create_dir_all(&config.session_root)
            .map_err(|e| Error::io(&config.session_root, e))?;

        let endpoint = Endpoint::bind(config.osc_port)?;
        let daemon_file = lockfile::daemon_file_path(&daemon_dir, std::process::id());
        lockfile::write_daemon_file(&daemon_file, endpoint.url())?;
        info!("wrote daemon file {daemon_file:?}");

        let signal_fd = supervisor::install_sigchld_fd()?;

        Ok(Self {
            endpoint,
            roster: Roster::new(),
            gui: GuiLink::new(),
            session_root: config.session_root,
            session_path: None,
            session_name: String::new(),
            lock_dir: config.lock_dir,
            daemon_file,
            pending_operation: Rc::new(Cell::new(Operation::None)),
            signal_fd,
            quit_requested: false,
        })
    }

    /// The daemon's own URL.
    #[must_use]
    pub fn url(&self) -> &str {
        self.endpoint.url()
    }

    /// The client roster (primarily for tests and status inspection).
    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    /// Currently open session path, if any.
    #[must_use]
    pub fn session_path(&self) -> Option<&Path> {
        self.session_path.as_deref()
    }

    /// The operation currently holding the global slot.
    #[must_use]
    pub fn pending_operation(&self) -> Operation {
        self.pending_operation.get()
    }

    /// Claim the global operation slot, or fail if it is occupied.
    fn begin_operation(&self, op: Operation) -> Option<OperationGuard> {
        if self.pending_operation.get() != Operation::None {
            return None;
        }
        self.pending_operation.set(op);
        Some(OperationGuard {
            slot: Rc::clone(&self.pending_operation),
        })
    }

    // ------------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------------

    /// Run until a quit request, an exit signal, or re-parenting.
    ///
    /// `exit_flag` is set from the signal handlers installed by the
    /// binary; checking it between iterations keeps handler code
    /// async-signal-safe.
    ///
    /// # Errors
    ///
    /// Currently infallible but kept fallible for parity with setup.
    pub fn run(&mut self, exit_flag: &AtomicBool) -> Result<(), Error> {
        let start_ppid = nix::unistd::getppid();
        loop {
            self.wait(Duration::from_millis(1000));
            if self.quit_requested {
                info!("quit requested over the wire");
                break;
            }
            if exit_flag.load(Ordering::SeqCst) {
                info!("exit signal received");
                break;
            }
            if nix::unistd::getppid() != start_ppid {
                warn!(
                    "parent process changed; the user has no control over \
                     the session anymore, shutting down cleanly"
                );
                break;
            }
        }
        self.shutdown();
        Ok(())
    }

    /// Close the session (if any) and withdraw the daemon advertisement.
    pub fn shutdown(&mut self) {
        self.close_session();
        lockfile::delete_daemon_file(&self.daemon_file);
    }

    /// One loop iteration: reap, pump the transport, sweep liveness.
    pub fn wait(&mut self, timeout: Duration) {
        self.handle_child_signals();
        for (msg, from) in self.endpoint.wait(timeout) {
            self.dispatch(&msg, from);
        }
        self.purge_dead_clients();
    }

    /// Drain the signal descriptor and reap every dead child.
    fn handle_child_signals(&mut self) {
        supervisor::drain_sigchld(&mut self.signal_fd);
        // Reap unconditionally: a signal coalesced or consumed by
        // another thread must not leave zombies behind.
        for reaped in supervisor::reap_children() {
            if reaped.kind == ExitKind::LaunchError {
                if let Some(idx) = self.roster.position_by_pid(reaped.pid) {
                    if let Some(c) = self.roster.get_mut(idx) {
                        c.launch_error = true;
                    }
                }
            }
            self.handle_client_process_death(reaped.pid);
        }
    }

    /// Probe every recorded pid; a vanished process is synthesized as a
    /// death. Closes the race where a child dies between blocking the
    /// signal and reading it.
    fn purge_dead_clients(&mut self) {
        let pids: Vec<u32> = self.roster.iter().filter_map(|c| c.pid).collect();
        for pid in pids {
            if !supervisor::process_is_running(pid) {
                self.handle_client_process_death(pid);
            }
        }
    }

    /// Drive the state machine for one dead child.
    fn handle_client_process_death(&mut self, pid: u32) {
        let Some(idx) = self.roster.position_by_pid(pid) else {
            return;
        };
        let (name_with_id, id, pending, launch_error) = {
            let c = self.roster.get(idx).expect("index just found");
            (c.name_with_id(), c.client_id.clone(), c.pending, c.launch_error)
        };

        if matches!(pending, PendingCommand::Quit | PendingCommand::Kill) {
            self.gui
                .msg(&self.endpoint, format!("Client {name_with_id} terminated by server"));
        } else {
            self.gui
                .msg(&self.endpoint, format!("Client {name_with_id} terminated itself"));
        }

        if pending == PendingCommand::Quit {
            // Removal does not delete the client's save data.
            self.gui
                .client_status(&self.endpoint, &id, ClientStatus::Removed);
            self.roster.remove(idx);
            return;
        }

        // A stopped record is kept; the user decides whether to remove
        // it. A launch failure can only be relayed through the label,
        // since the GUI wire protocol has no status for it.
        let label = if launch_error {
            "Launch error!".to_string()
        } else {
            String::new()
        };
        {
            let c = self.roster.get_mut(idx).expect("index just found");
            c.label = label.clone();
            c.status = Some(ClientStatus::Stopped);
            c.pending = PendingCommand::None;
            c.active = false;
            c.pid = None;
        }
        self.gui.client_label(&self.endpoint, &id, &label);
        self.gui
            .client_status(&self.endpoint, &id, ClientStatus::Stopped);
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    /// Route one decoded message to its handler.
    pub fn dispatch(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(tag) = Tag::from_path(&msg.addr) else {
            warn!(
                "unrecognized message with signature \"{}\" at path \"{}\"",
                typespec_of(msg),
                msg.addr
            );
            return;
        };
        if !tag.accepts_typespec(&typespec_of(msg)) {
            warn!(
                "dropping {} with unexpected signature \"{}\"",
                msg.addr,
                typespec_of(msg)
            );
            return;
        }
        match tag {
            Tag::SrvAnnounce => self.osc_announce(msg, from),
            Tag::SrvSave => self.osc_save(msg, from),
            Tag::SrvOpen => self.osc_open(msg, from),
            Tag::SrvNew => self.osc_new(msg, from),
            Tag::SrvDuplicate => self.osc_duplicate(msg, from),
            Tag::SrvClose => self.osc_close(msg, from),
            Tag::SrvAbort => self.osc_abort(msg, from),
            Tag::SrvQuit => self.osc_quit(),
            Tag::SrvList => self.osc_list(from),
            Tag::SrvAdd => self.osc_add(msg, from),
            Tag::SrvBroadcast => self.osc_broadcast(msg, from),
            Tag::CliProgress => self.osc_progress(msg, from),
            Tag::CliIsDirty => self.osc_dirty(from, true),
            Tag::CliIsClean => self.osc_dirty(from, false),
            Tag::CliGuiHidden => self.osc_gui_visible(from, false),
            Tag::CliGuiShown => self.osc_gui_visible(from, true),
            Tag::CliMessage => self.osc_client_message(msg, from),
            Tag::CliLabel => self.osc_label(msg, from),
            Tag::Reply => self.osc_reply(msg, from),
            Tag::Error => self.osc_error(msg, from),
            Tag::Ping => self.reply_to(from, Tag::Ping.path(), None),
            Tag::GuiAnnounce => self.announce_gui(from, true),
            Tag::GuiStop => self.osc_gui_stop(msg),
            Tag::GuiRemove => self.osc_gui_remove(msg),
            Tag::GuiResume => self.osc_gui_resume(msg),
            Tag::GuiClientSave => self.osc_gui_client_save(msg),
            Tag::GuiShowOptionalGui => self.osc_gui_optional_gui(msg, true),
            Tag::GuiHideOptionalGui => self.osc_gui_optional_gui(msg, false),
            _ => warn!("no handler for incoming {}", msg.addr),
        }
    }

    fn send_to(&self, to: OscAddr, msg: OscMessage) {
        if let Err(e) = self.endpoint.send(to, msg) {
            warn!("send failed: {e}");
        }
    }

    /// `/reply` carrying the echoed request path and an optional text.
    fn reply_to(&self, to: OscAddr, path: &str, text: Option<&str>) {
        let mut args = vec![osc::s(path)];
        if let Some(text) = text {
            info!("reply: {text}");
            args.push(osc::s(text));
        }
        self.send_to(to, osc::message(Tag::Reply, args));
    }

    /// `/error` carrying the echoed request path, code and message.
    fn error_to(&self, to: OscAddr, path: &str, code: ErrorCode, text: &str) {
        warn!("{text}");
        self.send_to(
            to,
            osc::message(
                Tag::Error,
                vec![osc::s(path), osc::i(code.code()), osc::s(text)],
            ),
        );
    }

    // ------------------------------------------------------------------
    // Client directives
    // ------------------------------------------------------------------

    /// Launch an executable into the session, reusing a roster slot when
    /// `client_id` names one. Returns false when the spawn failed.
    fn launch(&mut self, executable: &str, client_id: Option<ClientId>) -> bool {
        let idx = client_id
            .as_ref()
            .and_then(|id| self.roster.position_by_id_or_name(id.as_str()))
            .unwrap_or_else(|| {
                let base = basename(executable);
                let id = client_id
                    .clone()
                    .unwrap_or_else(|| self.roster.generate_id());
                self.roster.push(Client::new(base, executable, id));
                self.roster.len() - 1
            });

        self.gui.msg(&self.endpoint, format!("Launching {executable}"));
        let url = self.endpoint.url().to_string();
        let spawned = supervisor::spawn_client(executable, &url);
        let (id, exe, label) = {
            let c = self.roster.get_mut(idx).expect("slot exists");
            match &spawned {
                Ok(pid) => {
                    info!("process {executable} has pid {pid}");
                    c.set_pending(PendingCommand::Start);
                    c.pid = Some(*pid);
                    // A previous launch error fixed by the user and then
                    // resumed needs this reset.
                    c.launch_error = false;
                    c.status = Some(ClientStatus::Launch);
                    c.label.clear();
                },
                Err(e) => {
                    error!("error starting process {executable}: {e}");
                    c.pending = PendingCommand::None;
                    c.pid = None;
                    c.launch_error = true;
                    c.status = Some(ClientStatus::Stopped);
                    c.label = "Launch error!".to_string();
                },
            }
            (c.client_id.clone(), c.executable.clone(), c.label.clone())
        };

        // The slot is announced either way so an attached GUI sees it; a
        // second client/new follows if the client announces.
        self.gui.client_new(&self.endpoint, &id, &exe);
        let status = self.roster.get(idx).and_then(|c| c.status);
        if let Some(status) = status {
            self.gui.client_status(&self.endpoint, &id, status);
        }
        self.gui.client_label(&self.endpoint, &id, &label);
        spawned.is_ok()
    }

    fn command_client_to_save(&mut self, idx: usize) {
        let Some(c) = self.roster.get(idx) else {
            return;
        };
        if c.active {
            let (id, addr, name_with_id) = (c.client_id.clone(), c.address, c.name_with_id());
            info!("telling {name_with_id} to save");
            if let Some(addr) = addr {
                self.send_to(addr, osc::message(Tag::CliSave, vec![]));
            }
            let c = self.roster.get_mut(idx).expect("index valid");
            c.set_pending(PendingCommand::Save);
            c.status = Some(ClientStatus::Save);
            self.gui.client_status(&self.endpoint, &id, ClientStatus::Save);
        } else if c.is_dumb() && c.pid.is_some() {
            let id = c.client_id.clone();
            let c = self.roster.get_mut(idx).expect("index valid");
            c.status = Some(ClientStatus::Noop);
            self.gui.client_status(&self.endpoint, &id, ClientStatus::Noop);
        }
    }

    /// Re-issue `client/open` in place under a new identifier.
    fn command_client_to_switch(&mut self, idx: usize, new_id: ClientId) {
        let session_path = self.session_path.clone().unwrap_or_default();
        let session_name = self.session_name.clone();
        let (old_id, project, name_with_id, addr) = {
            let c = self.roster.get_mut(idx).expect("index valid");
            let old_id = c.client_id.clone();
            c.client_id = new_id.clone();
            let project = session::client_project_path(&session_path, &c.name, &c.client_id);
            (old_id, project, c.name_with_id(), c.address)
        };
        info!("commanding {name_with_id} to switch to \"{}\"", project.display());
        if let Some(addr) = addr {
            self.send_to(
                addr,
                osc::message(
                    Tag::CliOpen,
                    vec![
                        osc::s(project.to_string_lossy()),
                        osc::s(session_name),
                        osc::s(name_with_id),
                    ],
                ),
            );
        }
        let c = self.roster.get_mut(idx).expect("index valid");
        c.set_pending(PendingCommand::Open);
        c.status = Some(ClientStatus::Switch);
        self.gui
            .client_status(&self.endpoint, &new_id, ClientStatus::Switch);
        self.gui.send(
            &self.endpoint,
            Tag::GuiClientSwitch,
            vec![osc::s(old_id.as_str()), osc::s(new_id.as_str())],
        );
    }

    fn command_client_to_quit(&mut self, idx: usize) {
        let Some(c) = self.roster.get(idx) else {
            return;
        };
        let (id, name_with_id, pid, active, dumb) = (
            c.client_id.clone(),
            c.name_with_id(),
            c.pid,
            c.active,
            c.is_dumb(),
        );
        info!("commanding client {name_with_id} to quit");
        if active {
            if let Some(pid) = pid {
                supervisor::terminate(pid);
            }
            let c = self.roster.get_mut(idx).expect("index valid");
            c.set_pending(PendingCommand::Quit);
            c.status = Some(ClientStatus::Quit);
            self.gui.client_status(&self.endpoint, &id, ClientStatus::Quit);
        } else if dumb {
            if let Some(pid) = pid {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.status = Some(ClientStatus::Quit);
                c.set_pending(PendingCommand::Quit);
                self.gui.client_status(&self.endpoint, &id, ClientStatus::Quit);
                supervisor::terminate(pid);
            } else {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.status = Some(ClientStatus::Removed);
                self.gui
                    .client_status(&self.endpoint, &id, ClientStatus::Removed);
            }
        }
    }

    fn command_client_to_stop(&mut self, idx: usize) {
        let Some(c) = self.roster.get(idx) else {
            return;
        };
        let (id, name_with_id, pid) = (c.client_id.clone(), c.name_with_id(), c.pid);
        self.gui
            .msg(&self.endpoint, format!("Stopping client {name_with_id}"));
        if let Some(pid) = pid {
            let c = self.roster.get_mut(idx).expect("index valid");
            c.set_pending(PendingCommand::Kill);
            supervisor::terminate(pid);
            c.status = Some(ClientStatus::Stopped);
            self.gui
                .client_status(&self.endpoint, &id, ClientStatus::Stopped);
        }
    }

    /// Drop every record that has not announced.
    fn purge_inactive_clients(&mut self) {
        let mut idx = 0;
        while idx < self.roster.len() {
            let inactive = self.roster.get(idx).is_some_and(|c| !c.active);
            if inactive {
                let id = self.roster.get(idx).expect("index valid").client_id.clone();
                self.gui
                    .client_status(&self.endpoint, &id, ClientStatus::Removed);
                self.roster.remove(idx);
            } else {
                idx += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Orchestration waits
    // ------------------------------------------------------------------

    /// Wait until every client has announced or conclusively failed.
    fn wait_for_announce(&mut self) {
        self.gui
            .msg(&self.endpoint, "Waiting for announcements from clients");
        let mut remaining = ANNOUNCE_GRACE;
        let mut responsive = self.roster.responsive_count();
        while remaining > Duration::ZERO {
            remaining = remaining.saturating_sub(POLL_STEP);
            self.wait(POLL_STEP);
            responsive = self.roster.responsive_count();
            if responsive == self.roster.len() {
                break;
            }
        }
        self.gui.msg(
            &self.endpoint,
            format!(
                "Done. {responsive} out of {} clients announced (or failed to \
                 launch) within the initialization grace period",
                self.roster.len()
            ),
        );
    }

    /// Wait until no active client has a directive in flight.
    fn wait_for_replies(&mut self) {
        self.gui
            .msg(&self.endpoint, "Waiting for clients to reply to commands");
        let mut remaining = REPLY_GRACE;
        while remaining > Duration::ZERO {
            remaining = remaining.saturating_sub(POLL_STEP);
            self.wait(POLL_STEP);
            if !self.roster.replies_still_pending() {
                break;
            }
        }
        self.gui.msg(&self.endpoint, "Done waiting");
    }

    fn killed_clients_are_alive(&self) -> bool {
        for c in &self.roster {
            let quitting = matches!(c.pending, PendingCommand::Quit | PendingCommand::Kill);
            if quitting && c.pid.is_some() {
                info!("waiting for {}", c.name_with_id());
                return true;
            }
        }
        false
    }

    /// Give terminated clients a grace period, then SIGKILL survivors.
    ///
    /// A client that hangs here would otherwise stay open and invisible
    /// after its session is gone.
    fn wait_for_killed_clients_to_die(&mut self) {
        info!("waiting {KILL_GRACE_SECS} seconds for killed clients to die");
        for _ in 0..KILL_GRACE_SECS {
            if !self.killed_clients_are_alive() {
                info!("all clients have died");
                return;
            }
            // Clients may still emit /progress while going down, so the
            // transport is pumped alongside the reaping.
            self.wait(Duration::from_millis(1000));
        }
        warn!("killed clients are still alive");
        let survivors: Vec<u32> = self.roster.iter().filter_map(|c| c.pid).collect();
        for pid in survivors {
            supervisor::force_kill(pid);
        }
    }

    // ------------------------------------------------------------------
    // Session operations
    // ------------------------------------------------------------------

    /// Persist the manifest in roster order.
    fn save_session_file(&self) -> Result<(), Error> {
        let path = self.session_path.as_deref().expect("session is open");
        session::store_manifest(path, &self.roster.triples())
    }

    /// Save the manifest and fan the save directive out to the clients.
    ///
    /// If the manifest cannot be written the clients are NOT told to
    /// save: their state on disk would no longer match the session file.
    fn command_all_clients_to_save(&mut self) {
        if self.session_path.is_none() {
            return;
        }
        self.gui
            .msg(&self.endpoint, "Commanding attached clients to save");
        if let Err(e) = self.save_session_file() {
            warn!("aborting client saves, the session file is write-protected: {e}");
            self.gui.msg(
                &self.endpoint,
                "The session file is write-protected; will not forward save \
                 command to clients",
            );
            return;
        }
        for idx in 0..self.roster.len() {
            self.command_client_to_save(idx);
        }
        self.wait_for_replies();
    }

    /// Quit all clients, purge the roster, release the lock and clear
    /// the session state.
    fn close_session(&mut self) {
        if self.session_path.is_none() {
            return;
        }
        for idx in 0..self.roster.len() {
            self.command_client_to_quit(idx);
        }
        self.wait_for_killed_clients_to_die();
        self.purge_inactive_clients();
        self.roster.clear();

        let path = self.session_path.take().expect("session was open");
        let lock = lockfile::lock_file_path(&self.lock_dir, &self.session_name, &path);
        lockfile::delete_lock_file(&lock);
        info!("session closed: {}", path.display());
        self.session_name.clear();
        self.gui.send(
            &self.endpoint,
            Tag::GuiSessionName,
            vec![osc::s(""), osc::s("")],
        );
    }

    fn tell_all_clients_session_is_loaded(&self) {
        info!("telling all clients that the session is loaded");
        for c in &self.roster {
            if c.active {
                if let Some(addr) = c.address {
                    self.send_to(addr, osc::message(Tag::CliSessionLoaded, vec![]));
                }
            }
        }
    }

    /// The load/switch engine behind open and duplicate.
    ///
    /// `path` is the absolute session path below the session root.
    fn load_session(&mut self, path: &Path) -> Result<(), (ErrorCode, &'static str)> {
        let relative = self.relative_session_path(path);
        info!("loading session {}", path.display());
        if !session::session_exists(&self.session_root, &relative) {
            warn!("request to load non-existent session {}", path.display());
            return Err((ErrorCode::NoSuchFile, "The named session does not exist"));
        }

        if self.session_path.is_some() && !self.session_name.is_empty() {
            // Already in a session; this is a switch (or the tail of a
            // duplicate). The current lock is released, clients are
            // switched in place where they can be.
            info!(
                "instructed to load {} while another session is open; \
                 switching clients where they support it",
                path.display()
            );
            let old_path = self.session_path.clone().expect("session is open");
            let lock =
                lockfile::lock_file_path(&self.lock_dir, &self.session_name, &old_path);
            lockfile::delete_lock_file(&lock);
        }
        self.session_name = session::simple_name(path);

        let lock = lockfile::lock_file_path(&self.lock_dir, &self.session_name, path);
        if lock.exists() {
            warn!(
                "session {} already loaded and locked by {}",
                self.session_name,
                lock.display()
            );
            return Err((
                ErrorCode::SessionLocked,
                "Session is locked by another process",
            ));
        }

        let Ok(triples) = session::load_manifest(path) else {
            return Err((ErrorCode::CreateFailed, "Could not read session file"));
        };
        self.session_path = Some(path.to_path_buf());

        info!("commanding unneeded and dumb clients to quit");
        // How many instances of each client name the new session wants.
        let mut wanted: HashMap<String, i64> = HashMap::new();
        for t in &triples {
            *wanted.entry(t.name.clone()).or_insert(0) += 1;
        }
        for idx in 0..self.roster.len() {
            let (switchable, name) = {
                let c = self.roster.get(idx).expect("index valid");
                (c.is_switch_capable(), c.name.clone())
            };
            match wanted.get_mut(&name) {
                Some(count) if switchable => {
                    // Multiplicity already satisfied: stop the excess.
                    if *count <= 0 {
                        self.command_client_to_quit(idx);
                    }
                    *count -= 1;
                },
                _ => self.command_client_to_quit(idx),
            }
        }

        self.wait_for_killed_clients_to_die();
        self.purge_inactive_clients();
        for c in self.roster.iter_mut() {
            c.pre_existing = true;
        }

        // In a duplicated session clients keep their identifiers, so the
        // name+id match must win over the name match.
        info!("commanding smart clients to switch");
        for t in &triples {
            let idx = self
                .roster
                .position_by_name_and_id(&t.name, &t.client_id)
                .or_else(|| self.roster.position_by_name(&t.name));
            let switchable = idx.is_some_and(|i| {
                self.roster
                    .get(i)
                    .is_some_and(|c| c.pre_existing && !c.reply_pending())
            });
            if switchable {
                self.command_client_to_switch(idx.expect("checked above"), t.client_id.clone());
            } else {
                std::thread::sleep(LAUNCH_SPACING);
                self.launch(&t.executable, Some(t.client_id.clone()));
            }
        }

        // Clients need time to announce before the opens go out and
        // replies become pending, so both grace periods run in turn.
        self.wait_for_announce();
        self.wait_for_replies();
        self.tell_all_clients_session_is_loaded();

        let url = self.endpoint.url().to_string();
        let session_path = self.session_path.clone().expect("session is open");
        if let Err(e) = lockfile::write_lock_file(&lock, &session_path, &url) {
            warn!("could not write session lock: {e}");
        }
        info!("session was loaded: {}", session_path.display());

        if self.gui.is_active() {
            let relative = self.relative_session_path(&session_path);
            info!(
                "informing GUI: session {}, relative path {relative}",
                self.session_name
            );
            let name = self.session_name.clone();
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionName,
                vec![osc::s(name), osc::s(relative)],
            );
        }
        Ok(())
    }

    fn relative_session_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.session_root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }

    /// Open a session during startup (`--load-session`).
    pub fn open_session_on_startup(&mut self, name: &str) {
        let path = self.session_root.join(name);
        if let Err((code, text)) = self.load_session(&path) {
            error!("could not load session {name}: {text} ({code})");
        }
    }

    // ------------------------------------------------------------------
    // Server operation handlers
    // ------------------------------------------------------------------

    fn osc_announce(&mut self, msg: &OscMessage, from: OscAddr) {
        let (Some(client_name), Some(caps), Some(exe)) = (
            osc::str_arg(msg, 0),
            osc::str_arg(msg, 1),
            osc::str_arg(msg, 2),
        ) else {
            return;
        };
        let major = osc::int_arg(msg, 3).unwrap_or(0);
        let minor = osc::int_arg(msg, 4).unwrap_or(0);
        let pid = osc::int_arg(msg, 5).unwrap_or(0);
        self.gui
            .msg(&self.endpoint, format!("Announce from {client_name}"));
        info!("announce from {client_name}");

        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "No session open for this application to join",
            );
            return;
        }
        if major > API_VERSION_MAJOR {
            warn!(
                "client {client_name} is using incompatible API version \
                 {major}.{minor}"
            );
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::IncompatibleApi,
                "Server is using an incompatible API version",
            );
            return;
        }

        // An expected client occupies the slot created at launch time:
        // same executable, not yet active, still pending its start.
        let expected = self.roster.iter().position(|c| {
            c.executable == exe && !c.active && c.pending == PendingCommand::Start
        });
        let idx = expected.unwrap_or_else(|| {
            let id = self.roster.generate_id();
            self.roster.push(Client::new(client_name, exe, id));
            self.roster.len() - 1
        });
        let was_expected = expected.is_some();
        if was_expected {
            info!("client was expected: {client_name}");
        }

        let (id, name_with_id, optional_gui) = {
            let c = self.roster.get_mut(idx).expect("slot exists");
            c.pid = u32::try_from(pid).ok().filter(|p| *p > 0);
            c.capabilities = caps.to_string();
            c.address = Some(from);
            // The executable basename gives way to the self-reported
            // pretty name; from here on they are unrelated.
            c.name = client_name.to_string();
            c.active = true;
            (
                c.client_id.clone(),
                c.name_with_id(),
                c.is_capable_of(CAP_OPTIONAL_GUI),
            )
        };
        info!("client \"{name_with_id}\" at {from} is ready to receive commands");

        let ack = if was_expected {
            "Acknowledged as session client (started ourselves)"
        } else {
            "Acknowledged as session client (registered itself from the outside)"
        };
        self.send_to(
            from,
            osc::message(
                Tag::Reply,
                vec![
                    osc::s(msg.addr.as_str()),
                    osc::s(ack),
                    osc::s(APP_TITLE),
                    osc::s(SERVER_CAPS),
                ],
            ),
        );

        {
            let c = self.roster.get_mut(idx).expect("slot exists");
            c.status = Some(ClientStatus::Open);
        }
        let name = self.roster.get(idx).expect("slot exists").name.clone();
        self.gui.client_new(&self.endpoint, &id, &name);
        self.gui.client_status(&self.endpoint, &id, ClientStatus::Open);
        if optional_gui {
            self.gui.send(
                &self.endpoint,
                Tag::GuiClientHasOptionalGui,
                vec![osc::s(id.as_str())],
            );
        }

        let session_path = self.session_path.clone().expect("session is open");
        let project = session::client_project_path(&session_path, &name, &id);
        self.send_to(
            from,
            osc::message(
                Tag::CliOpen,
                vec![
                    osc::s(project.to_string_lossy()),
                    osc::s(self.session_name.clone()),
                    osc::s(name_with_id),
                ],
            ),
        );
        let c = self.roster.get_mut(idx).expect("slot exists");
        c.set_pending(PendingCommand::Open);
    }

    fn osc_add(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(executable) = osc::str_arg(msg, 0) else {
            return;
        };
        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "Cannot add to session because no session is loaded",
            );
            return;
        }
        if executable.contains('/') {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::LaunchFailed,
                "Paths not permitted; clients must be in $PATH",
            );
            return;
        }
        if self.launch(executable, None) {
            self.reply_to(from, msg.addr.as_str(), Some("Launched"));
        } else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::LaunchFailed,
                "Failed to launch process",
            );
        }
    }

    fn osc_save(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(_guard) = self.begin_operation(Operation::Save) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "No session to save",
            );
            return;
        }
        self.command_all_clients_to_save();
        self.reply_to(from, msg.addr.as_str(), Some("Saved"));
    }

    fn osc_open(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(name) = osc::str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        self.gui
            .msg(&self.endpoint, format!("Opening session {name}"));
        let Some(_guard) = self.begin_operation(Operation::Open) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if session::validate_name(&name).is_err() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSuchFile,
                "Invalid session name",
            );
            return;
        }
        if self.session_path.is_some() {
            // Save in place first; the switch happens inside the load.
            self.command_all_clients_to_save();
            if self.roster.clients_have_errors() {
                self.error_to(
                    from,
                    msg.addr.as_str(),
                    ErrorCode::General,
                    "Some clients could not save",
                );
                return;
            }
        }
        let path = self.session_root.join(&name);
        info!("attempting to open {}", path.display());
        match self.load_session(&path) {
            Ok(()) => self.reply_to(from, msg.addr.as_str(), Some("Loaded")),
            Err((code, text)) => self.error_to(from, msg.addr.as_str(), code, text),
        }
        info!("done");
    }

    fn osc_new(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(name) = osc::str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        let Some(_guard) = self.begin_operation(Operation::New) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if session::validate_name(&name).is_err() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::CreateFailed,
                "Invalid session name",
            );
            return;
        }
        if session::session_exists(&self.session_root, &name) {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::CreateFailed,
                "Session name already exists",
            );
            return;
        }
        if self.session_path.is_some() {
            self.command_all_clients_to_save();
            self.close_session();
        }
        self.gui
            .msg(&self.endpoint, format!("Creating new session \"{name}\""));
        let path = self.session_root.join(&name);
        if std::fs::create_dir_all(&path).is_err() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::CreateFailed,
                "Could not create session directory",
            );
            return;
        }
        self.session_path = Some(path.clone());
        self.session_name = session::simple_name(&path);

        let lock = lockfile::lock_file_path(&self.lock_dir, &self.session_name, &path);
        if let Err(e) = lockfile::write_lock_file(&lock, &path, self.endpoint.url()) {
            warn!("could not write session lock: {e}");
        }
        self.reply_to(from, msg.addr.as_str(), Some("Created"));

        if self.gui.is_active() {
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionSession,
                vec![osc::s(name.clone())],
            );
            let relative = self.relative_session_path(&path);
            info!(
                "informing GUI of session {}, relative path {relative}",
                self.session_name
            );
            let session_name = self.session_name.clone();
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionName,
                vec![osc::s(session_name), osc::s(relative)],
            );
        }
        if let Err(e) = self.save_session_file() {
            warn!("could not persist the new session manifest: {e}");
        }
        self.reply_to(from, msg.addr.as_str(), Some("Session created"));
    }

    fn osc_duplicate(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(name) = osc::str_arg(msg, 0).map(str::to_string) else {
            return;
        };
        let Some(_guard) = self.begin_operation(Operation::Duplicate) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "No session to save",
            );
            return;
        }
        if session::validate_name(&name).is_err() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::CreateFailed,
                "Invalid session name",
            );
            return;
        }
        if session::session_exists(&self.session_root, &name) {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::CreateFailed,
                "Session name already exists",
            );
            return;
        }
        self.command_all_clients_to_save();
        if self.roster.clients_have_errors() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::General,
                "Some clients could not save",
            );
            return;
        }

        let source = self.session_path.clone().expect("session is open");
        let target = self.session_root.join(&name);
        if let Err(e) = copy_dir_recursive(&source, &target) {
            error!(
                "could not copy {} to {}: {e}",
                source.display(),
                target.display()
            );
        }
        if self.gui.is_active() {
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionSession,
                vec![osc::s(name.clone())],
            );
        }

        // The source session is still open; the load below closes it,
        // switching clients where possible.
        info!("attempting to open the duplicate {}", target.display());
        match self.load_session(&target) {
            Ok(()) => {
                self.reply_to(from, msg.addr.as_str(), Some("Loaded"));
                self.reply_to(from, msg.addr.as_str(), Some("Duplicated"));
            },
            Err((code, text)) => self.error_to(from, msg.addr.as_str(), code, text),
        }
    }

    fn osc_close(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(_guard) = self.begin_operation(Operation::Close) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "No session to close",
            );
            return;
        }
        self.command_all_clients_to_save();
        self.gui.msg(&self.endpoint, "Commanding clients to close");
        self.close_session();
        self.reply_to(from, msg.addr.as_str(), Some("Closed"));
    }

    fn osc_abort(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(_guard) = self.begin_operation(Operation::Close) else {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::OperationPending,
                "An operation pending",
            );
            return;
        };
        if self.session_path.is_none() {
            self.error_to(
                from,
                msg.addr.as_str(),
                ErrorCode::NoSessionOpen,
                "No session to abort",
            );
            return;
        }
        self.gui.msg(&self.endpoint, "Commanding clients to quit");
        self.close_session();
        self.reply_to(from, msg.addr.as_str(), Some("Aborted"));
    }

    fn osc_quit(&mut self) {
        self.close_session();
        self.quit_requested = true;
    }

    /// Stream the available sessions, then the empty-string sentinel.
    fn osc_list(&mut self, from: OscAddr) {
        self.gui.msg(&self.endpoint, "Listing sessions");
        for name in session::list_sessions(&self.session_root) {
            self.send_to(
                from,
                osc::message(
                    Tag::Reply,
                    vec![osc::s(Tag::SrvList.path()), osc::s(name)],
                ),
            );
        }
        // An empty name cannot conflict with a session, so it marks the
        // end of the stream.
        self.send_to(
            from,
            osc::message(Tag::Reply, vec![osc::s(Tag::SrvList.path()), osc::s("")]),
        );
    }

    /// Relay a broadcast between peers, excluding the sender. The
    /// session-management namespace must never be forwarded.
    fn osc_broadcast(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(target_path) = osc::str_arg(msg, 0) else {
            return;
        };
        if target_path.starts_with("/nsm/") {
            return;
        }
        let forwarded = OscMessage {
            addr: target_path.to_string(),
            args: msg.args[1..].to_vec(),
        };
        let recipients: Vec<OscAddr> = self
            .roster
            .iter()
            .filter_map(|c| c.address)
            .filter(|addr| *addr != from)
            .collect();
        for addr in recipients {
            self.send_to(addr, forwarded.clone());
        }
        // Also relay to an attached GUI so the broadcast can propagate
        // to another daemon instance.
        if let Some(gui_addr) = self.gui.address() {
            if gui_addr != from {
                let mut args = vec![osc::s(target_path)];
                args.extend_from_slice(&msg.args[1..]);
                self.send_to(gui_addr, osc::message(Tag::SrvBroadcast, args));
            }
        }
    }

    // ------------------------------------------------------------------
    // Client informational handlers
    // ------------------------------------------------------------------

    fn osc_progress(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(progress) = osc::float_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_address(from) {
            let id = {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.progress = progress;
                c.client_id.clone()
            };
            self.gui.send(
                &self.endpoint,
                Tag::GuiClientProgress,
                vec![osc::s(id.as_str()), osc::f(progress)],
            );
        }
    }

    fn osc_dirty(&mut self, from: OscAddr, dirty: bool) {
        info!("client sends {}", if dirty { "dirty" } else { "clean" });
        if let Some(idx) = self.roster.position_by_address(from) {
            let id = {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.dirty = dirty;
                c.client_id.clone()
            };
            self.gui.send(
                &self.endpoint,
                Tag::GuiClientDirty,
                vec![osc::s(id.as_str()), osc::i(i32::from(dirty))],
            );
        }
    }

    fn osc_gui_visible(&mut self, from: OscAddr, visible: bool) {
        info!("client sends gui {}", if visible { "shown" } else { "hidden" });
        if let Some(idx) = self.roster.position_by_address(from) {
            let id = {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.gui_visible = visible;
                c.client_id.clone()
            };
            self.gui.send(
                &self.endpoint,
                Tag::GuiClientGuiVisible,
                vec![osc::s(id.as_str()), osc::i(i32::from(visible))],
            );
        }
    }

    fn osc_client_message(&mut self, msg: &OscMessage, from: OscAddr) {
        let (Some(priority), Some(text)) = (osc::int_arg(msg, 0), osc::str_arg(msg, 1)) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_address(from) {
            let id = self.roster.get(idx).expect("index valid").client_id.clone();
            self.gui.send(
                &self.endpoint,
                Tag::GuiClientMessage,
                vec![osc::s(id.as_str()), osc::i(priority), osc::s(text)],
            );
        }
    }

    fn osc_label(&mut self, msg: &OscMessage, from: OscAddr) {
        let Some(label) = osc::str_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_address(from) {
            let id = {
                let c = self.roster.get_mut(idx).expect("index valid");
                c.label = label.to_string();
                c.client_id.clone()
            };
            self.gui.client_label(&self.endpoint, &id, label);
        }
    }

    // ------------------------------------------------------------------
    // Per-client response handlers
    // ------------------------------------------------------------------

    fn osc_reply(&mut self, msg: &OscMessage, from: OscAddr) {
        let message = osc::str_arg(msg, 1).unwrap_or_default().to_string();
        let Some(idx) = self.roster.position_by_address(from) else {
            warn!("reply from unknown client");
            return;
        };
        let id = {
            let c = self.roster.get_mut(idx).expect("index valid");
            c.set_reply(ErrorCode::Ok.code(), message.clone());
            let age = c.ms_since_last_command().unwrap_or(0);
            info!(
                "client \"{}\" replied with: {message} in {age}ms",
                c.name_with_id()
            );
            c.pending = PendingCommand::None;
            c.status = Some(ClientStatus::Ready);
            c.client_id.clone()
        };
        self.gui.client_status(&self.endpoint, &id, ClientStatus::Ready);
    }

    fn osc_error(&mut self, msg: &OscMessage, from: OscAddr) {
        let code = osc::int_arg(msg, 1).unwrap_or(ErrorCode::General.code());
        let message = osc::str_arg(msg, 2).unwrap_or_default().to_string();
        let Some(idx) = self.roster.position_by_address(from) else {
            warn!("error from unknown client");
            return;
        };
        let id = {
            let c = self.roster.get_mut(idx).expect("index valid");
            c.set_reply(code, message.clone());
            info!(
                "client \"{}\" replied with error: {message} ({code})",
                c.name_with_id()
            );
            c.pending = PendingCommand::None;
            c.status = Some(ClientStatus::Error);
            c.client_id.clone()
        };
        self.gui.client_status(&self.endpoint, &id, ClientStatus::Error);
    }

    // ------------------------------------------------------------------
    // GUI operations
    // ------------------------------------------------------------------

    /// Attach a GUI and push the structured welcome payload.
    ///
    /// `is_reply` distinguishes a GUI that announced itself from a cold
    /// daemon told to connect out (`--gui-url`), which pushes the same
    /// payload via `server_announce`.
    pub fn announce_gui(&mut self, addr: OscAddr, is_reply: bool) {
        info!("GUI announced from {addr}");
        self.gui.attach(addr);
        let hello = if is_reply {
            Tag::GuiAnnounce
        } else {
            Tag::GuiServerAnnounce
        };
        self.gui.send(&self.endpoint, hello, vec![osc::s("hi")]);
        self.gui.send(
            &self.endpoint,
            Tag::GuiSessionRoot,
            vec![osc::s(self.session_root.to_string_lossy())],
        );
        if self.session_name.is_empty() {
            info!("informing GUI: no session running");
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionName,
                vec![osc::s(""), osc::s("")],
            );
        } else {
            info!("informing GUI: {} running clients", self.roster.len());
            let snapshot: Vec<Client> = self.roster.iter().cloned().collect();
            for c in &snapshot {
                // client/new goes out twice for active clients: first
                // the executable, then the pretty name, mirroring the
                // two-phase announce flow.
                self.gui.client_new(&self.endpoint, &c.client_id, &c.executable);
                if let Some(status) = c.status {
                    self.gui.client_status(&self.endpoint, &c.client_id, status);
                }
                if c.is_capable_of(CAP_OPTIONAL_GUI) {
                    self.gui.send(
                        &self.endpoint,
                        Tag::GuiClientHasOptionalGui,
                        vec![osc::s(c.client_id.as_str())],
                    );
                }
                if !c.label.is_empty() {
                    self.gui.client_label(&self.endpoint, &c.client_id, &c.label);
                }
                if c.active {
                    self.gui.client_new(&self.endpoint, &c.client_id, &c.name);
                }
            }
            let session_path = self.session_path.clone().unwrap_or_default();
            let relative = self.relative_session_path(&session_path);
            info!(
                "informing GUI: session {}, relative path {relative}",
                self.session_name
            );
            let name = self.session_name.clone();
            self.gui.send(
                &self.endpoint,
                Tag::GuiSessionName,
                vec![osc::s(name), osc::s(relative)],
            );
        }
        info!("registration with GUI complete");
    }

    fn gui_feedback(&self, text: &str) {
        self.gui
            .send(&self.endpoint, Tag::Reply, vec![osc::s(text)]);
    }

    fn gui_no_such_client(&self) {
        self.gui.send(
            &self.endpoint,
            Tag::Error,
            vec![
                osc::i(ErrorCode::CreateFailed.code()),
                osc::s("No such client"),
            ],
        );
    }

    fn osc_gui_stop(&mut self, msg: &OscMessage) {
        let Some(subject) = osc::str_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_id_or_name(subject) {
            self.command_client_to_stop(idx);
            self.gui_feedback("Client stopped");
        } else {
            self.gui_no_such_client();
        }
    }

    fn osc_gui_remove(&mut self, msg: &OscMessage) {
        let Some(subject) = osc::str_arg(msg, 0) else {
            return;
        };
        let Some(idx) = self.roster.position_by_id_or_name(subject) else {
            self.gui_no_such_client();
            return;
        };
        let removable = self
            .roster
            .get(idx)
            .is_some_and(|c| c.pid.is_none() && !c.active);
        if removable {
            let id = self.roster.get(idx).expect("index valid").client_id.clone();
            self.gui
                .client_status(&self.endpoint, &id, ClientStatus::Removed);
            self.roster.remove(idx);
            self.gui_feedback("Client removed");
        }
    }

    fn osc_gui_resume(&mut self, msg: &OscMessage) {
        let Some(subject) = osc::str_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_id_or_name(subject) {
            let resumable = self
                .roster
                .get(idx)
                .is_some_and(|c| c.pid.is_none() && !c.active);
            if resumable {
                let (exe, id) = {
                    let c = self.roster.get(idx).expect("index valid");
                    (c.executable.clone(), c.client_id.clone())
                };
                self.launch(&exe, Some(id));
            }
        }
    }

    fn osc_gui_client_save(&mut self, msg: &OscMessage) {
        let Some(subject) = osc::str_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_id_or_name(subject) {
            if self.roster.get(idx).is_some_and(|c| c.active) {
                self.command_client_to_save(idx);
            }
        }
    }

    fn osc_gui_optional_gui(&mut self, msg: &OscMessage, show: bool) {
        let Some(subject) = osc::str_arg(msg, 0) else {
            return;
        };
        if let Some(idx) = self.roster.position_by_id_or_name(subject) {
            let addr = self
                .roster
                .get(idx)
                .filter(|c| c.active)
                .and_then(|c| c.address);
            if let Some(addr) = addr {
                let tag = if show {
                    Tag::CliShowOptionalGui
                } else {
                    Tag::CliHideOptionalGui
                };
                self.send_to(addr, osc::message(tag, vec![]));
            }
        }
    }
}

/// Basename of an executable path.
fn basename(executable: &str) -> String {
    Path::new(executable)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| executable.to_string())
}

/// The signature string of a decoded message.
fn typespec_of(msg: &OscMessage) -> String {
    msg.args
        .iter()
        .map(|a| match a {
            OscType::String(_) => 's',
            OscType::Int(_) => 'i',
            OscType::Float(_) => 'f',
            _ => '?',
        })
        .collect()
}

/// Recursive directory copy for session duplication.
fn copy_dir_recursive(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(target)?;
    for entry in std::fs::read_dir(source)? {
        let entry = entry?;
        let destination = target.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_guard_clears_slot_on_drop() {
        let slot = Rc::new(Cell::new(Operation::None));
        {
            slot.set(Operation::Open);
            let _guard = OperationGuard {
                slot: Rc::clone(&slot),
            };
            assert_eq!(slot.get(), Operation::Open);
        }
        assert_eq!(slot.get(), Operation::None);
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/usr/bin/mytool"), "mytool");
        assert_eq!(basename("mytool"), "mytool");
    }

    #[test]
    fn test_typespec_of() {
        let msg = osc::message(
            Tag::SrvAnnounce,
            vec![
                osc::s("a"),
                osc::s("b"),
                osc::s("c"),
                osc::i(1),
                osc::i(1),
                osc::i(42),
            ],
        );
        assert_eq!(typespec_of(&msg), "sssiii");
    }

    #[test]
    fn test_copy_dir_recursive() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("sub")).unwrap();
        std::fs::write(src.path().join("session.nsm"), "a:b:nABCD\n").unwrap();
        std::fs::write(src.path().join("sub/data"), "x").unwrap();

        let dst = tempfile::tempdir().unwrap();
        let target = dst.path().join("copy");
        copy_dir_recursive(src.path(), &target).unwrap();
        assert_eq!(
            std::fs::read_to_string(target.join("session.nsm")).unwrap(),
            "a:b:nABCD\n"
        );
        assert_eq!(std::fs::read_to_string(target.join("sub/data")).unwrap(), "x");
    }
}
