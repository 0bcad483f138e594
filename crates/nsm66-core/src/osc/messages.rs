//! The protocol message registry.
//!
//! Every message in the protocol is identified by a [`Tag`] that resolves
//! to a fixed path and type signature. The registry also records the
//! message direction and, for controller actions, whether the action
//! requires a subject argument. Reverse lookups exist by path (for
//! dispatch) and by action name (for `nsmctl --action`).

/// Direction a registry message travels in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by a peer (client, GUI or controller) to the daemon.
    ToDaemon,
    /// Sent by the daemon to a managed client.
    ToClient,
    /// Sent by the daemon to the attached GUI.
    ToGui,
    /// Carried in both directions (`/reply`, `/error`, ping).
    Both,
}

/// Symbolic tags for every protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `/reply`: generic acknowledgement, variadic payload.
    Reply,
    /// `/error`: echoed path, error code, message.
    Error,
    /// `/osc/ping`: liveness probe.
    Ping,

    /// `/nsm/server/announce`: a client registers itself.
    SrvAnnounce,
    /// `/nsm/server/save`: save the open session.
    SrvSave,
    /// `/nsm/server/open`: open a named session.
    SrvOpen,
    /// `/nsm/server/new`: create a named session.
    SrvNew,
    /// `/nsm/server/duplicate`: copy the open session under a new name.
    SrvDuplicate,
    /// `/nsm/server/close`: save and close the open session.
    SrvClose,
    /// `/nsm/server/abort`: close the open session without saving.
    SrvAbort,
    /// `/nsm/server/quit`: close and terminate the daemon.
    SrvQuit,
    /// `/nsm/server/list`: stream the available session names.
    SrvList,
    /// `/nsm/server/add`: launch an executable into the session.
    SrvAdd,
    /// `/nsm/server/broadcast`: relay a message to the other peers.
    SrvBroadcast,

    /// `/nsm/client/save`: directive to save.
    CliSave,
    /// `/nsm/client/open`: directive to open a project path.
    CliOpen,
    /// `/nsm/client/session_is_loaded`: the session finished loading.
    CliSessionLoaded,
    /// `/nsm/client/show_optional_gui`: directive to show the GUI.
    CliShowOptionalGui,
    /// `/nsm/client/hide_optional_gui`: directive to hide the GUI.
    CliHideOptionalGui,

    /// `/nsm/client/progress`: client-reported progress.
    CliProgress,
    /// `/nsm/client/is_dirty`: client has unsaved changes.
    CliIsDirty,
    /// `/nsm/client/is_clean`: client saved its changes.
    CliIsClean,
    /// `/nsm/client/gui_is_hidden`: client GUI went hidden.
    CliGuiHidden,
    /// `/nsm/client/gui_is_shown`: client GUI became visible.
    CliGuiShown,
    /// `/nsm/client/message`: human-readable client status line.
    CliMessage,
    /// `/nsm/client/label`: client label update.
    CliLabel,

    /// `/nsm/gui/gui_announce`: a GUI attaches to the daemon.
    GuiAnnounce,
    /// `/nsm/gui/server_announce`: the daemon attaches to a GUI.
    GuiServerAnnounce,
    /// `/nsm/gui/server/message`: human prose for the GUI log.
    GuiServerMessage,
    /// `/nsm/gui/session/root`: the configured session root.
    GuiSessionRoot,
    /// `/nsm/gui/session/name`: current session name + relative path.
    GuiSessionName,
    /// `/nsm/gui/session/session`: a session was created or copied.
    GuiSessionSession,

    /// `/nsm/gui/client/new`: a client slot appeared (or upgraded).
    GuiClientNew,
    /// `/nsm/gui/client/status`: a client changed state.
    GuiClientStatus,
    /// `/nsm/gui/client/label`: mirrored client label.
    GuiClientLabel,
    /// `/nsm/gui/client/progress`: mirrored client progress.
    GuiClientProgress,
    /// `/nsm/gui/client/dirty`: mirrored dirty flag.
    GuiClientDirty,
    /// `/nsm/gui/client/gui_visible`: mirrored GUI visibility.
    GuiClientGuiVisible,
    /// `/nsm/gui/client/has_optional_gui`: client advertises a GUI.
    GuiClientHasOptionalGui,
    /// `/nsm/gui/client/switch`: a client changed identifier in place.
    GuiClientSwitch,
    /// `/nsm/gui/client/message`: mirrored client status line.
    GuiClientMessage,

    /// `/nsm/gui/client/stop`: GUI asks to stop a client.
    GuiStop,
    /// `/nsm/gui/client/remove`: GUI asks to drop a stopped client.
    GuiRemove,
    /// `/nsm/gui/client/resume`: GUI asks to relaunch a stopped client.
    GuiResume,
    /// `/nsm/gui/client/save`: GUI asks to save one client.
    GuiClientSave,
    /// `/nsm/gui/client/show_optional_gui`: GUI asks to show a client GUI.
    GuiShowOptionalGui,
    /// `/nsm/gui/client/hide_optional_gui`: GUI asks to hide a client GUI.
    GuiHideOptionalGui,
}

/// One registry row.
struct Entry {
    tag: Tag,
    path: &'static str,
    typespec: &'static str,
    direction: Direction,
}

/// The static registry table.
///
/// `typespec` is the exact signature for fixed-arity messages; variadic
/// messages (`/reply`, broadcast) carry `"*"` and are not signature-checked.
const REGISTRY: &[Entry] = &[
    Entry { tag: Tag::Reply, path: "/reply", typespec: "*", direction: Direction::Both },
    Entry { tag: Tag::Error, path: "/error", typespec: "sis", direction: Direction::Both },
    Entry { tag: Tag::Ping, path: "/osc/ping", typespec: "", direction: Direction::Both },
    Entry { tag: Tag::SrvAnnounce, path: "/nsm/server/announce", typespec: "sssiii", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvSave, path: "/nsm/server/save", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvOpen, path: "/nsm/server/open", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvNew, path: "/nsm/server/new", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvDuplicate, path: "/nsm/server/duplicate", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvClose, path: "/nsm/server/close", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvAbort, path: "/nsm/server/abort", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvQuit, path: "/nsm/server/quit", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvList, path: "/nsm/server/list", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvAdd, path: "/nsm/server/add", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::SrvBroadcast, path: "/nsm/server/broadcast", typespec: "*", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliSave, path: "/nsm/client/save", typespec: "", direction: Direction::ToClient },
    Entry { tag: Tag::CliOpen, path: "/nsm/client/open", typespec: "sss", direction: Direction::ToClient },
    Entry { tag: Tag::CliSessionLoaded, path: "/nsm/client/session_is_loaded", typespec: "", direction: Direction::ToClient },
    Entry { tag: Tag::CliShowOptionalGui, path: "/nsm/client/show_optional_gui", typespec: "", direction: Direction::ToClient },
    Entry { tag: Tag::CliHideOptionalGui, path: "/nsm/client/hide_optional_gui", typespec: "", direction: Direction::ToClient },
    Entry { tag: Tag::CliProgress, path: "/nsm/client/progress", typespec: "f", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliIsDirty, path: "/nsm/client/is_dirty", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliIsClean, path: "/nsm/client/is_clean", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliGuiHidden, path: "/nsm/client/gui_is_hidden", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliGuiShown, path: "/nsm/client/gui_is_shown", typespec: "", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliMessage, path: "/nsm/client/message", typespec: "is", direction: Direction::ToDaemon },
    Entry { tag: Tag::CliLabel, path: "/nsm/client/label", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiAnnounce, path: "/nsm/gui/gui_announce", typespec: "*", direction: Direction::Both },
    Entry { tag: Tag::GuiServerAnnounce, path: "/nsm/gui/server_announce", typespec: "s", direction: Direction::ToGui },
    Entry { tag: Tag::GuiServerMessage, path: "/nsm/gui/server/message", typespec: "s", direction: Direction::ToGui },
    Entry { tag: Tag::GuiSessionRoot, path: "/nsm/gui/session/root", typespec: "s", direction: Direction::ToGui },
    Entry { tag: Tag::GuiSessionName, path: "/nsm/gui/session/name", typespec: "ss", direction: Direction::ToGui },
    Entry { tag: Tag::GuiSessionSession, path: "/nsm/gui/session/session", typespec: "s", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientNew, path: "/nsm/gui/client/new", typespec: "ss", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientStatus, path: "/nsm/gui/client/status", typespec: "ss", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientLabel, path: "/nsm/gui/client/label", typespec: "ss", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientProgress, path: "/nsm/gui/client/progress", typespec: "sf", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientDirty, path: "/nsm/gui/client/dirty", typespec: "si", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientGuiVisible, path: "/nsm/gui/client/gui_visible", typespec: "si", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientHasOptionalGui, path: "/nsm/gui/client/has_optional_gui", typespec: "s", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientSwitch, path: "/nsm/gui/client/switch", typespec: "ss", direction: Direction::ToGui },
    Entry { tag: Tag::GuiClientMessage, path: "/nsm/gui/client/message", typespec: "sis", direction: Direction::ToGui },
    Entry { tag: Tag::GuiStop, path: "/nsm/gui/client/stop", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiRemove, path: "/nsm/gui/client/remove", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiResume, path: "/nsm/gui/client/resume", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiClientSave, path: "/nsm/gui/client/save", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiShowOptionalGui, path: "/nsm/gui/client/show_optional_gui", typespec: "s", direction: Direction::ToDaemon },
    Entry { tag: Tag::GuiHideOptionalGui, path: "/nsm/gui/client/hide_optional_gui", typespec: "s", direction: Direction::ToDaemon },
];

impl Tag {
    fn entry(self) -> &'static Entry {
        REGISTRY
            .iter()
            .find(|e| e.tag == self)
            .expect("every tag has a registry entry")
    }

    /// The fixed OSC path for this message.
    #[must_use]
    pub fn path(self) -> &'static str {
        self.entry().path
    }

    /// The type signature for this message, or `"*"` for variadic ones.
    #[must_use]
    pub fn typespec(self) -> &'static str {
        self.entry().typespec
    }

    /// The direction this message travels in.
    #[must_use]
    pub fn direction(self) -> Direction {
        self.entry().direction
    }

    /// Look a tag up by its OSC path.
    #[must_use]
    pub fn from_path(path: &str) -> Option<Self> {
        REGISTRY.iter().find(|e| e.path == path).map(|e| e.tag)
    }

    /// Whether an incoming signature is acceptable for this tag.
    ///
    /// Fixed-arity messages require an exact signature match; variadic
    /// messages accept anything.
    #[must_use]
    pub fn accepts_typespec(self, types: &str) -> bool {
        let spec = self.typespec();
        spec == "*" || spec == types
    }
}

/// A controller action: the name accepted by `nsmctl --action`.
#[derive(Debug, Clone, Copy)]
pub struct Action {
    /// Action name on the command line.
    pub name: &'static str,
    /// Message the action sends.
    pub tag: Tag,
    /// Whether the action needs an `@subject` argument.
    pub needs_argument: bool,
    /// Whether this is a per-client action (subject is a client) rather
    /// than a server/session action.
    pub is_client_action: bool,
}

/// All controller actions, server actions first.
pub const ACTIONS: &[Action] = &[
    Action { name: "save", tag: Tag::SrvSave, needs_argument: false, is_client_action: false },
    Action { name: "open", tag: Tag::SrvOpen, needs_argument: true, is_client_action: false },
    Action { name: "new", tag: Tag::SrvNew, needs_argument: true, is_client_action: false },
    Action { name: "duplicate", tag: Tag::SrvDuplicate, needs_argument: true, is_client_action: false },
    Action { name: "close", tag: Tag::SrvClose, needs_argument: false, is_client_action: false },
    Action { name: "abort", tag: Tag::SrvAbort, needs_argument: false, is_client_action: false },
    Action { name: "quit", tag: Tag::SrvQuit, needs_argument: false, is_client_action: false },
    Action { name: "list", tag: Tag::SrvList, needs_argument: false, is_client_action: false },
    Action { name: "add", tag: Tag::SrvAdd, needs_argument: true, is_client_action: false },
    Action { name: "stop", tag: Tag::GuiStop, needs_argument: true, is_client_action: true },
    Action { name: "remove", tag: Tag::GuiRemove, needs_argument: true, is_client_action: true },
    Action { name: "resume", tag: Tag::GuiResume, needs_argument: true, is_client_action: true },
    Action { name: "client-save", tag: Tag::GuiClientSave, needs_argument: true, is_client_action: true },
    Action { name: "show-gui", tag: Tag::GuiShowOptionalGui, needs_argument: true, is_client_action: true },
    Action { name: "hide-gui", tag: Tag::GuiHideOptionalGui, needs_argument: true, is_client_action: true },
];

/// Look up a controller action by name.
#[must_use]
pub fn action_by_name(name: &str) -> Option<&'static Action> {
    ACTIONS.iter().find(|a| a.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_paths_are_unique() {
        for (idx, entry) in REGISTRY.iter().enumerate() {
            for other in &REGISTRY[idx + 1..] {
                assert_ne!(entry.path, other.path, "duplicate path in registry");
            }
        }
    }

    #[test]
    fn test_path_round_trip() {
        assert_eq!(Tag::from_path("/nsm/server/announce"), Some(Tag::SrvAnnounce));
        assert_eq!(Tag::from_path("/nsm/client/open"), Some(Tag::CliOpen));
        assert_eq!(Tag::from_path("/nsm/gui/client/status"), Some(Tag::GuiClientStatus));
        assert_eq!(Tag::from_path("/nope"), None);
        assert_eq!(Tag::SrvAnnounce.typespec(), "sssiii");
    }

    #[test]
    fn test_typespec_checking() {
        assert!(Tag::SrvOpen.accepts_typespec("s"));
        assert!(!Tag::SrvOpen.accepts_typespec("si"));
        assert!(Tag::Reply.accepts_typespec("ssss"));
        assert!(Tag::SrvBroadcast.accepts_typespec("sif"));
    }

    #[test]
    fn test_action_lookup() {
        let open = action_by_name("open").unwrap();
        assert_eq!(open.tag, Tag::SrvOpen);
        assert!(open.needs_argument);
        assert!(!open.is_client_action);

        let stop = action_by_name("stop").unwrap();
        assert!(stop.is_client_action);
        assert!(action_by_name("frobnicate").is_none());
    }
}
