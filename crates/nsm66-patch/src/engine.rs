//! Snapshot reconciliation.
//!
//! A [`PatchBay`] holds the intended edges (loaded from file plus any
//! observed live) and the set of endpoints known to have registered. On
//! every registration it attempts to activate edges whose endpoints are
//! both known; on deregistration it marks touching edges inactive but
//! keeps them; an edge is remembered until the user forgets it.
//!
//! ## Persistence format
//!
//! One edge per line, `source_client:source_port |> dest_client:dest_port`,
//! sorted lexicographically. Restoring accepts `|>` or `>` for
//! source→destination, `<` for right→left, and `|` for bidirectional
//! (which expands into two edges).

use std::fs;
use std::path::Path;

use tracing::{error, info, warn};

use crate::graph::{GraphError, PortEvent, PortGraph};

/// A graph endpoint: an ordered `(client, port)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRef {
    /// Owning client name.
    pub client: String,
    /// Port name within the client.
    pub port: String,
}

impl PortRef {
    /// Split a full `client:port` name at the first colon.
    ///
    /// Client names containing colons (as some MIDI bridges produce)
    /// cannot be represented; the first colon wins, as it always has.
    #[must_use]
    pub fn parse(full: &str) -> Option<Self> {
        let (client, port) = full.split_once(':')?;
        if client.is_empty() || port.is_empty() {
            return None;
        }
        Some(Self {
            client: client.trim_start().to_string(),
            port: port.trim_end().to_string(),
        })
    }

    /// The flattened `client:port` form.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}:{}", self.client, self.port)
    }
}

impl std::fmt::Display for PortRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.client, self.port)
    }
}

/// An intended edge between two endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    /// Source endpoint.
    pub src: PortRef,
    /// Destination endpoint.
    pub dst: PortRef,
    /// Whether the connection is currently present in the live graph.
    pub active: bool,
}

impl Patch {
    fn new(src: PortRef, dst: PortRef) -> Self {
        Self {
            src,
            dst,
            active: false,
        }
    }

    /// Whether either endpoint is the named port.
    #[must_use]
    pub fn touches(&self, client: &str, port: &str) -> bool {
        (self.src.client == client && self.src.port == port)
            || (self.dst.client == client && self.dst.port == port)
    }
}

/// Edge direction denoted by the separator token.
#[derive(Debug, Clone, Copy)]
enum Dir {
    Forward,
    Backward,
    Both,
}

/// Separator tokens, most specific first.
const SEPARATORS: &[(&str, Dir)] = &[
    (" |> ", Dir::Forward),
    (" |< ", Dir::Backward),
    (" || ", Dir::Both),
    (" > ", Dir::Forward),
    (" < ", Dir::Backward),
    (" | ", Dir::Both),
];

/// Parse one persisted line into its patches.
///
/// Returns `None` when the line has no recognizable separator or either
/// side is not a `client:port` pair.
#[must_use]
pub fn parse_patch_line(line: &str) -> Option<Vec<Patch>> {
    let mut best: Option<(usize, &str, Dir)> = None;
    for &(token, dir) in SEPARATORS {
        if let Some(idx) = line.find(token) {
            let replace = match best {
                None => true,
                Some((best_idx, best_token, _)) => {
                    idx < best_idx || (idx == best_idx && token.len() > best_token.len())
                },
            };
            if replace {
                best = Some((idx, token, dir));
            }
        }
    }
    let (idx, token, dir) = best?;
    let left = PortRef::parse(line[..idx].trim())?;
    let right = PortRef::parse(line[idx + token.len()..].trim())?;
    Some(match dir {
        Dir::Forward => vec![Patch::new(left, right)],
        Dir::Backward => vec![Patch::new(right, left)],
        Dir::Both => vec![
            Patch::new(right.clone(), left.clone()),
            Patch::new(left, right),
        ],
    })
}

/// The snapshot engine state: known endpoints and intended edges.
#[derive(Debug, Default)]
pub struct PatchBay {
    patches: Vec<Patch>,
    known_ports: Vec<String>,
}

impl PatchBay {
    /// Create an empty patch bay.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The intended edges.
    #[must_use]
    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    /// The endpoints observed to register so far.
    #[must_use]
    pub fn known_ports(&self) -> &[String] {
        &self.known_ports
    }

    /// Drop every intended edge (known endpoints are kept).
    pub fn clear_patches(&mut self) {
        self.patches.clear();
    }

    /// Replace the intended edges with those parsed from `text`.
    ///
    /// Bad lines are warned about and skipped. Returns the number of
    /// edges loaded.
    pub fn load(&mut self, text: &str) -> usize {
        self.patches.clear();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match parse_patch_line(line) {
                Some(patches) => self.patches.extend(patches),
                None => warn!("bad line {}: '{line}'", idx + 1),
            }
        }
        self.patches.len()
    }

    /// Load the intended edges from a snapshot file.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be read.
    pub fn read_config(&mut self, file: &Path) -> std::io::Result<usize> {
        info!("reading connections from {file:?}");
        let text = fs::read_to_string(file)?;
        Ok(self.load(&text))
    }

    /// Apply one queued port event.
    pub fn handle_event(&mut self, event: &PortEvent, graph: &mut dyn PortGraph) {
        if event.registered() {
            self.handle_port_registered(event.port(), graph);
        } else {
            self.handle_port_unregistered(event.port());
        }
    }

    /// A port registered: remember it and try to activate matching edges.
    pub fn handle_port_registered(&mut self, port: &str, graph: &mut dyn PortGraph) {
        if !self.known_ports.iter().any(|p| p == port) {
            self.known_ports.push(port.to_string());
        }
        self.activate_matching(port, graph);
        info!("new endpoint registered: {port}");
    }

    /// A port unregistered: forget it and deactivate touching edges.
    ///
    /// The edges themselves are remembered, not deleted.
    pub fn handle_port_unregistered(&mut self, port: &str) {
        self.known_ports.retain(|p| p != port);
        let Some(reference) = PortRef::parse(port) else {
            return;
        };
        for patch in &mut self.patches {
            if patch.touches(&reference.client, &reference.port) {
                patch.active = false;
            }
        }
    }

    /// Feed every port currently present in the graph through the
    /// registration path, as on startup and on project open.
    pub fn register_preexisting(&mut self, graph: &mut dyn PortGraph) {
        for port in graph.ports() {
            self.handle_port_registered(&port, graph);
        }
    }

    fn activate_matching(&mut self, port: &str, graph: &mut dyn PortGraph) {
        let Some(reference) = PortRef::parse(port) else {
            return;
        };
        for patch in &mut self.patches {
            if patch.touches(&reference.client, &reference.port) {
                Self::try_connect(patch, &self.known_ports, graph);
            }
        }
    }

    /// Attempt a connection if the edge is inactive and both endpoints
    /// are known. An already-existing connection counts as success.
    fn try_connect(patch: &mut Patch, known_ports: &[String], graph: &mut dyn PortGraph) {
        if patch.active {
            return;
        }
        let src = patch.src.full_name();
        let dst = patch.dst.full_name();
        let src_known = known_ports.iter().any(|p| *p == src);
        let dst_known = known_ports.iter().any(|p| *p == dst);
        if !src_known || !dst_known {
            return;
        }
        match graph.connect(&src, &dst) {
            Ok(()) | Err(GraphError::AlreadyConnected) => {
                info!("connected {src} |> {dst}");
                patch.active = true;
            },
            Err(e) => {
                patch.active = false;
                error!("connect error for {src} |> {dst}: {e}");
            },
        }
    }

    /// Render the canonical snapshot of the current state.
    ///
    /// Edges whose endpoints are missing from the live graph are retained
    /// verbatim; everything else is rebuilt from the graph's output-port
    /// connections. The result is sorted lexicographically.
    pub fn snapshot(&mut self, graph: &dyn PortGraph) -> String {
        let mut table: Vec<String> = Vec::new();

        // Remember edges that are temporarily gone before forgetting the
        // current list.
        for patch in &self.patches {
            let src = patch.src.full_name();
            let dst = patch.dst.full_name();
            let missing = if graph.port_exists(&src) {
                (!graph.port_exists(&dst)).then_some(("destination", dst.clone()))
            } else {
                Some(("source", src.clone()))
            };
            if let Some((end, name)) = missing {
                info!(
                    "we remember {end} {name}, but it does not exist anymore; \
                     making sure it will not be forgotten"
                );
                table.push(format!("{src} |> {dst}"));
            }
        }

        self.patches.clear();
        for line in &table {
            if let Some(patches) = parse_patch_line(line) {
                self.patches.extend(patches);
            }
        }

        for output in graph.output_ports() {
            for connection in graph.connections_of(&output) {
                let line = format!("{output} |> {connection}");
                if let Some(patches) = parse_patch_line(&line) {
                    self.patches.extend(patches);
                    table.push(line);
                } else {
                    warn!("could not process '{line}'");
                }
            }
        }

        table.sort();
        let mut text = table.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    /// Snapshot the state into `file`, atomically.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the file cannot be written or renamed.
    pub fn save(&mut self, file: &Path, graph: &dyn PortGraph) -> std::io::Result<()> {
        let text = self.snapshot(graph);
        let tmp = file.with_extension("jackpatch.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::MemoryGraph;

    fn bay_with(lines: &str) -> PatchBay {
        let mut bay = PatchBay::new();
        bay.load(lines);
        bay
    }

    #[test]
    fn test_parse_directions() {
        let forward = parse_patch_line("a:out |> b:in").unwrap();
        assert_eq!(forward.len(), 1);
        assert_eq!(forward[0].src.full_name(), "a:out");
        assert_eq!(forward[0].dst.full_name(), "b:in");

        let bare = parse_patch_line("a:out > b:in").unwrap();
        assert_eq!(bare, forward);

        let backward = parse_patch_line("a:in < b:out").unwrap();
        assert_eq!(backward[0].src.full_name(), "b:out");
        assert_eq!(backward[0].dst.full_name(), "a:in");

        let both = parse_patch_line("a:duplex | b:duplex").unwrap();
        assert_eq!(both.len(), 2);
        assert_eq!(both[0].src.full_name(), "b:duplex");
        assert_eq!(both[1].src.full_name(), "a:duplex");
    }

    #[test]
    fn test_parse_keeps_spaces_inside_names() {
        let patches =
            parse_patch_line("PulseAudio JACK Sink:front-left |> system:playback_1").unwrap();
        assert_eq!(patches[0].src.client, "PulseAudio JACK Sink");
        assert_eq!(patches[0].src.port, "front-left");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_patch_line("no separator here").is_none());
        assert!(parse_patch_line("a:out |> noport").is_none());
        assert!(parse_patch_line("").is_none());
    }

    #[test]
    fn test_activation_requires_both_endpoints_known() {
        let mut bay = bay_with("a:out |> b:in\n");
        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_input("b:in");

        bay.handle_port_registered("a:out", &mut graph);
        assert!(!bay.patches()[0].active, "half-known edge must stay inactive");
        assert!(!graph.connected("a:out", "b:in"));

        bay.handle_port_registered("b:in", &mut graph);
        assert!(bay.patches()[0].active);
        assert!(graph.connected("a:out", "b:in"));
    }

    #[test]
    fn test_existing_connection_counts_as_success() {
        let mut bay = bay_with("a:out |> b:in\n");
        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_input("b:in");
        graph.connect("a:out", "b:in").unwrap();

        bay.register_preexisting(&mut graph);
        assert!(bay.patches()[0].active);
    }

    #[test]
    fn test_unregister_remembers_edge() {
        let mut bay = bay_with("a:out |> b:in\n");
        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_input("b:in");
        bay.register_preexisting(&mut graph);
        assert!(bay.patches()[0].active);

        graph.remove_port("b:in");
        bay.handle_port_unregistered("b:in");
        assert_eq!(bay.patches().len(), 1, "edge must be remembered");
        assert!(!bay.patches()[0].active);
        assert_eq!(bay.known_ports(), ["a:out".to_string()]);
    }

    #[test]
    fn test_snapshot_preserves_absent_endpoints() {
        let mut bay = bay_with("ghost:out |> system:in\n");
        let mut graph = MemoryGraph::new();
        graph.add_input("system:in");
        bay.register_preexisting(&mut graph);

        let text = bay.snapshot(&graph);
        assert_eq!(text, "ghost:out |> system:in\n");
        // The remembered edge survives the snapshot as an intended edge.
        assert_eq!(bay.patches().len(), 1);
    }

    #[test]
    fn test_snapshot_rebuilds_from_live_graph_sorted() {
        let mut bay = PatchBay::new();
        let mut graph = MemoryGraph::new();
        graph.add_output("z:out");
        graph.add_output("a:out");
        graph.add_input("m:in");
        graph.connect("z:out", "m:in").unwrap();
        graph.connect("a:out", "m:in").unwrap();

        let text = bay.snapshot(&graph);
        assert_eq!(text, "a:out |> m:in\nz:out |> m:in\n");
    }

    #[test]
    fn test_snapshot_round_trip_on_fixed_graph() {
        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_output("b:out");
        graph.add_input("sink:in_1");
        graph.add_input("sink:in_2");
        graph.connect("a:out", "sink:in_1").unwrap();
        graph.connect("b:out", "sink:in_2").unwrap();

        let mut bay = PatchBay::new();
        let first = bay.snapshot(&graph);

        let mut restored = PatchBay::new();
        restored.load(&first);
        let second = restored.snapshot(&graph);
        assert_eq!(first, second);
    }

    #[test]
    fn test_save_and_read_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("project.jackpatch");

        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_input("b:in");
        graph.connect("a:out", "b:in").unwrap();

        let mut bay = PatchBay::new();
        bay.save(&file, &graph).unwrap();

        let mut restored = PatchBay::new();
        assert_eq!(restored.read_config(&file).unwrap(), 1);
        assert_eq!(restored.patches()[0].src.full_name(), "a:out");
    }
}
