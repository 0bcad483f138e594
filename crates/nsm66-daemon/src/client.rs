//! Client records and the roster.
//!
//! A [`Client`] is the in-memory state of one supervised child. Its
//! observable [`ClientStatus`] and its in-flight [`PendingCommand`] are
//! typed enums; the status projects to the legacy wire strings the GUI
//! protocol expects. The [`Roster`] is an ordered collection whose order
//! is significant: it defines the manifest order and thus the launch
//! order on load.

use chrono::{DateTime, Utc};
use nsm66_core::osc::OscAddr;
use nsm66_core::session::{ClientId, SessionTriple};
use nsm66_core::{CAP_SWITCH, ErrorCode};

/// The last directive issued to a client that still awaits a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingCommand {
    /// Nothing in flight; the client may accept a new directive.
    #[default]
    None,
    /// Launched, waiting for the announce.
    Start,
    /// `client/open` sent.
    Open,
    /// `client/save` sent.
    Save,
    /// Told to quit (will be removed once dead).
    Quit,
    /// Told to stop (record is kept once dead).
    Kill,
    /// Part of a duplicate operation.
    Duplicate,
    /// Part of a new-session operation.
    New,
    /// Part of a close operation.
    Close,
}

/// Observable client state, surfaced to the GUI on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// Forked, not yet announced.
    Launch,
    /// Announced; `client/open` issued.
    Open,
    /// Replied to the last directive.
    Ready,
    /// Saving.
    Save,
    /// Told to quit.
    Quit,
    /// Process exited; record kept.
    Stopped,
    /// Record dropped from the roster.
    Removed,
    /// Last reply was an error.
    Error,
    /// Re-opening in place under a new identifier.
    Switch,
    /// Dumb client acknowledged a save it cannot perform.
    Noop,
}

impl ClientStatus {
    /// The wire string the GUI protocol expects.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Launch => "launch",
            Self::Open => "open",
            Self::Ready => "ready",
            Self::Save => "save",
            Self::Quit => "quit",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
            Self::Error => "error",
            Self::Switch => "switch",
            Self::Noop => "noop",
        }
    }
}

impl std::fmt::Display for ClientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// In-memory state of one supervised child.
#[derive(Debug, Clone)]
pub struct Client {
    /// Unique identifier within the roster, persisted in the manifest.
    pub client_id: ClientId,
    /// Basename of the executable until the client announces a pretty name.
    pub name: String,
    /// Command used to launch the client.
    pub executable: String,
    /// OS process id; `None` when not running.
    pub pid: Option<u32>,
    /// Colon-delimited capability set; empty means "dumb client".
    pub capabilities: String,
    /// True only after the client announced over the protocol.
    pub active: bool,
    /// Directive awaiting a reply.
    pub pending: PendingCommand,
    /// When the pending directive was issued.
    pub command_sent_at: Option<DateTime<Utc>>,
    /// Observable state; `None` before the first transition.
    pub status: Option<ClientStatus>,
    /// Client-reported label.
    pub label: String,
    /// Client-reported dirtiness.
    pub dirty: bool,
    /// Client-reported progress.
    pub progress: f32,
    /// Client-reported GUI visibility.
    pub gui_visible: bool,
    /// Set when an exec attempt failed (spawn error or exit code 255).
    pub launch_error: bool,
    /// Survived a session switch and may be re-used by the new session.
    pub pre_existing: bool,
    /// Error code of the last `/reply` or `/error` from this client.
    pub reply_errcode: i32,
    /// Message of the last `/reply` or `/error` from this client.
    pub reply_message: String,
    /// The transport address the client announced from.
    pub address: Option<OscAddr>,
}

impl Client {
    /// Create a fresh record for a client that is not yet running.
    #[must_use]
    pub fn new(name: impl Into<String>, executable: impl Into<String>, id: ClientId) -> Self {
        Self {
            client_id: id,
            name: name.into(),
            executable: executable.into(),
            pid: None,
            capabilities: String::new(),
            active: false,
            pending: PendingCommand::None,
            command_sent_at: None,
            status: None,
            label: String::new(),
            dirty: false,
            progress: 0.0,
            gui_visible: true,
            launch_error: false,
            pre_existing: false,
            reply_errcode: ErrorCode::Ok.code(),
            reply_message: String::new(),
            address: None,
        }
    }

    /// `"{name}.{client_id}"`, used in project directories and log lines.
    #[must_use]
    pub fn name_with_id(&self) -> String {
        format!("{}.{}", self.name, self.client_id)
    }

    /// Whether the client advertises a capability such as `":switch:"`.
    #[must_use]
    pub fn is_capable_of(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// A dumb client never announces and has no capabilities.
    #[must_use]
    pub fn is_dumb(&self) -> bool {
        self.capabilities.is_empty()
    }

    /// Whether the client can switch projects in place.
    #[must_use]
    pub fn is_switch_capable(&self) -> bool {
        self.is_capable_of(CAP_SWITCH)
    }

    /// Whether a directive is still awaiting its reply.
    #[must_use]
    pub fn reply_pending(&self) -> bool {
        self.pending != PendingCommand::None
    }

    /// Whether the last reply carried an error.
    #[must_use]
    pub fn has_error(&self) -> bool {
        self.reply_errcode != ErrorCode::Ok.code()
    }

    /// Issue a directive: records the command and stamps the clock.
    pub fn set_pending(&mut self, command: PendingCommand) {
        self.pending = command;
        self.command_sent_at = Some(Utc::now());
    }

    /// Record the latest `/reply` or `/error` payload.
    pub fn set_reply(&mut self, errcode: i32, message: impl Into<String>) {
        self.reply_errcode = errcode;
        self.reply_message = message.into();
    }

    /// Age of the pending directive in milliseconds.
    #[must_use]
    pub fn ms_since_last_command(&self) -> Option<i64> {
        self.command_sent_at
            .map(|sent| (Utc::now() - sent).num_milliseconds())
    }

    /// The manifest line for this client.
    #[must_use]
    pub fn triple(&self) -> SessionTriple {
        SessionTriple {
            name: self.name.clone(),
            executable: self.executable.clone(),
            client_id: self.client_id.clone(),
        }
    }
}

/// Ordered collection of client records.
///
/// Records are exclusively owned here; every lookup is a transient query
/// computed on demand, never a cached table.
#[derive(Debug, Default)]
pub struct Roster {
    clients: Vec<Client>,
}

impl Roster {
    /// Create an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the roster is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Append a record, preserving insertion order.
    pub fn push(&mut self, client: Client) {
        self.clients.push(client);
    }

    /// Remove and return the record at `index`.
    pub fn remove(&mut self, index: usize) -> Client {
        self.clients.remove(index)
    }

    /// Drop every record.
    pub fn clear(&mut self) {
        self.clients.clear();
    }

    /// Iterate the records in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Client> {
        self.clients.iter()
    }

    /// Iterate the records mutably, in order.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Client> {
        self.clients.iter_mut()
    }

    /// Record at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Client> {
        self.clients.get(index)
    }

    /// Mutable record at `index`.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Client> {
        self.clients.get_mut(index)
    }

    /// Index of the record with this process id.
    #[must_use]
    pub fn position_by_pid(&self, pid: u32) -> Option<usize> {
        self.clients.iter().position(|c| c.pid == Some(pid))
    }

    /// Index by identifier, falling back to a name lookup when the text
    /// does not have the identifier shape.
    #[must_use]
    pub fn position_by_id_or_name(&self, text: &str) -> Option<usize> {
        if ClientId::is_valid(text) {
            self.clients
                .iter()
                .position(|c| c.client_id.as_str() == text)
        } else {
            self.position_by_name(text)
        }
    }

    /// Index of the first record with this name.
    #[must_use]
    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.clients.iter().position(|c| c.name == name)
    }

    /// Index of the record matching both name and identifier.
    #[must_use]
    pub fn position_by_name_and_id(&self, name: &str, id: &ClientId) -> Option<usize> {
        self.clients
            .iter()
            .position(|c| c.name == name && c.client_id == *id)
    }

    /// Index of the record that announced from this address.
    #[must_use]
    pub fn position_by_address(&self, addr: OscAddr) -> Option<usize> {
        self.clients.iter().position(|c| c.address == Some(addr))
    }

    /// Identifiers currently in use, for collision-free generation.
    #[must_use]
    pub fn taken_ids(&self) -> std::collections::HashSet<ClientId> {
        self.clients.iter().map(|c| c.client_id.clone()).collect()
    }

    /// Generate a fresh identifier unique within the roster.
    #[must_use]
    pub fn generate_id(&self) -> ClientId {
        ClientId::generate(&self.taken_ids())
    }

    /// Whether any active client still has a directive in flight.
    #[must_use]
    pub fn replies_still_pending(&self) -> bool {
        self.clients.iter().any(|c| c.active && c.reply_pending())
    }

    /// Whether any active client's last reply was an error.
    #[must_use]
    pub fn clients_have_errors(&self) -> bool {
        self.clients.iter().any(|c| c.active && c.has_error())
    }

    /// Clients that have announced or conclusively failed to launch.
    ///
    /// Used by the announce grace period so a failed exec does not hang
    /// the session load.
    #[must_use]
    pub fn responsive_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.active || c.launch_error)
            .count()
    }

    /// The manifest triples in roster order.
    #[must_use]
    pub fn triples(&self) -> Vec<SessionTriple> {
        self.clients.iter().map(Client::triple).collect()
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a Client;
    type IntoIter = std::slice::Iter<'a, Client>;

    fn into_iter(self) -> Self::IntoIter {
        self.clients.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(name: &str, id: &str) -> Client {
        Client::new(name, name, ClientId::parse(id).unwrap())
    }

    #[test]
    fn test_name_with_id() {
        let c = client("seq", "nABCD");
        assert_eq!(c.name_with_id(), "seq.nABCD");
    }

    #[test]
    fn test_capabilities() {
        let mut c = client("seq", "nABCD");
        assert!(c.is_dumb());
        c.capabilities = ":switch:optional-gui:".to_string();
        assert!(!c.is_dumb());
        assert!(c.is_switch_capable());
        assert!(c.is_capable_of(":optional-gui:"));
        assert!(!c.is_capable_of(":server-control:"));
    }

    #[test]
    fn test_pending_command_stamps_clock() {
        let mut c = client("seq", "nABCD");
        assert!(c.command_sent_at.is_none());
        c.set_pending(PendingCommand::Save);
        assert!(c.reply_pending());
        assert!(c.command_sent_at.is_some());
        assert!(c.ms_since_last_command().unwrap() >= 0);
    }

    #[test]
    fn test_roster_lookups() {
        let mut roster = Roster::new();
        let mut a = client("alpha", "nAAAA");
        a.pid = Some(41);
        let b = client("beta", "nBBBB");
        roster.push(a);
        roster.push(b);

        assert_eq!(roster.position_by_pid(41), Some(0));
        assert_eq!(roster.position_by_pid(99), None);
        assert_eq!(roster.position_by_id_or_name("nBBBB"), Some(1));
        assert_eq!(roster.position_by_id_or_name("alpha"), Some(0));
        assert_eq!(
            roster.position_by_name_and_id("beta", &ClientId::parse("nBBBB").unwrap()),
            Some(1)
        );
        assert_eq!(
            roster.position_by_name_and_id("beta", &ClientId::parse("nAAAA").unwrap()),
            None
        );
    }

    #[test]
    fn test_generated_ids_are_unique_within_roster() {
        let mut roster = Roster::new();
        for _ in 0..32 {
            let id = roster.generate_id();
            assert!(!roster.taken_ids().contains(&id));
            roster.push(Client::new("x", "x", id));
        }
        let ids = roster.taken_ids();
        assert_eq!(ids.len(), roster.len());
    }

    #[test]
    fn test_responsive_count_includes_launch_failures() {
        let mut roster = Roster::new();
        let mut ok = client("alpha", "nAAAA");
        ok.active = true;
        let mut failed = client("beta", "nBBBB");
        failed.launch_error = true;
        let pending = client("gamma", "nCCCC");
        roster.push(ok);
        roster.push(failed);
        roster.push(pending);
        assert_eq!(roster.responsive_count(), 2);
    }

    #[test]
    fn test_triples_preserve_roster_order() {
        let mut roster = Roster::new();
        roster.push(client("zeta", "nZZZZ"));
        roster.push(client("alpha", "nAAAA"));
        let triples = roster.triples();
        assert_eq!(triples[0].name, "zeta");
        assert_eq!(triples[1].name, "alpha");
    }
}
