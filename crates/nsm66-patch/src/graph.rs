//! The live-graph seam and the port-event queue.
//!
//! [`PortGraph`] abstracts the audio server's connection graph: the
//! engine only needs to enumerate ports, test existence, list a port's
//! connections and connect two ports. [`MemoryGraph`] is the in-process
//! implementation used by tests and the default build.
//!
//! Port registration events are produced by a callback running under the
//! audio server's real-time constraint: it must not allocate or block.
//! [`PortEvent`] is therefore a fixed-size record, and [`event_queue`]
//! is a bounded channel whose capacity is fixed at creation; the
//! producer side uses a non-blocking `try_send`, so an overrun drops
//! the event instead of blocking the audio thread.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender};

/// Longest port name carried in an event record; longer names truncate.
pub const PORT_NAME_MAX: usize = 256;

/// Total budget for queued events, matching the original 8 KiB ring.
const EVENT_QUEUE_BYTES: usize = 8 * 1024;

/// Queue capacity in records.
const EVENT_QUEUE_CAPACITY: usize = EVENT_QUEUE_BYTES / PORT_NAME_MAX;

/// A port registration or deregistration, marshalled out of the
/// real-time callback as a fixed-size record.
#[derive(Clone, Copy)]
pub struct PortEvent {
    name: [u8; PORT_NAME_MAX],
    len: u16,
    registered: bool,
}

impl PortEvent {
    /// Build an event record, truncating over-long port names.
    #[must_use]
    pub fn new(port: &str, registered: bool) -> Self {
        let mut name = [0_u8; PORT_NAME_MAX];
        let bytes = port.as_bytes();
        let mut len = bytes.len().min(PORT_NAME_MAX);
        // Avoid splitting a UTF-8 sequence at the truncation point.
        while len > 0 && !port.is_char_boundary(len) {
            len -= 1;
        }
        name[..len].copy_from_slice(&bytes[..len]);
        Self {
            name,
            len: u16::try_from(len).unwrap_or(0),
            registered,
        }
    }

    /// The full `client:port` name.
    #[must_use]
    pub fn port(&self) -> &str {
        std::str::from_utf8(&self.name[..usize::from(self.len)]).unwrap_or("")
    }

    /// True for registration, false for deregistration.
    #[must_use]
    pub const fn registered(&self) -> bool {
        self.registered
    }
}

impl std::fmt::Debug for PortEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortEvent")
            .field("port", &self.port())
            .field("registered", &self.registered)
            .finish()
    }
}

/// Create the bounded single-producer single-consumer event queue.
#[must_use]
pub fn event_queue() -> (Sender<PortEvent>, Receiver<PortEvent>) {
    crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY)
}

/// Failure connecting two ports in the live graph.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// The connection already exists; callers treat this as success.
    #[error("ports are already connected")]
    AlreadyConnected,

    /// One of the ports is unknown to the graph.
    #[error("no such port: {0}")]
    NoSuchPort(String),

    /// The graph backend refused the connection.
    #[error("connect failed: {0}")]
    ConnectFailed(String),
}

/// Access to the live connection graph.
pub trait PortGraph {
    /// All full `client:port` names currently present.
    fn ports(&self) -> Vec<String>;

    /// The subset of [`Self::ports`] that are output (source) ports.
    fn output_ports(&self) -> Vec<String>;

    /// Whether a port is currently present.
    fn port_exists(&self, port: &str) -> bool;

    /// The full names connected to `port`.
    fn connections_of(&self, port: &str) -> Vec<String>;

    /// Connect a source port to a destination port.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::AlreadyConnected`] when the edge is already
    /// present (callers treat that as success), or another variant when
    /// the backend refuses.
    fn connect(&mut self, src: &str, dst: &str) -> Result<(), GraphError>;
}

/// An in-memory graph for tests and the default build.
///
/// Ports are added and removed by the test driver; connections recorded
/// through [`PortGraph::connect`] are observable for assertions.
#[derive(Debug, Default)]
pub struct MemoryGraph {
    /// Port name -> is-output flag; ordered for deterministic listings.
    ports: BTreeMap<String, bool>,
    /// Directed edges, source -> destinations.
    edges: BTreeMap<String, Vec<String>>,
}

impl MemoryGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an output (source) port.
    pub fn add_output(&mut self, port: &str) {
        self.ports.insert(port.to_string(), true);
    }

    /// Add an input (destination) port.
    pub fn add_input(&mut self, port: &str) {
        self.ports.insert(port.to_string(), false);
    }

    /// Remove a port and every edge touching it.
    pub fn remove_port(&mut self, port: &str) {
        self.ports.remove(port);
        self.edges.remove(port);
        for dsts in self.edges.values_mut() {
            dsts.retain(|d| d != port);
        }
    }

    /// Whether the graph holds a directed edge.
    #[must_use]
    pub fn connected(&self, src: &str, dst: &str) -> bool {
        self.edges
            .get(src)
            .is_some_and(|dsts| dsts.iter().any(|d| d == dst))
    }
}

impl PortGraph for MemoryGraph {
    fn ports(&self) -> Vec<String> {
        self.ports.keys().cloned().collect()
    }

    fn output_ports(&self) -> Vec<String> {
        self.ports
            .iter()
            .filter(|(_, is_output)| **is_output)
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn port_exists(&self, port: &str) -> bool {
        self.ports.contains_key(port)
    }

    fn connections_of(&self, port: &str) -> Vec<String> {
        self.edges.get(port).cloned().unwrap_or_default()
    }

    fn connect(&mut self, src: &str, dst: &str) -> Result<(), GraphError> {
        if !self.ports.contains_key(src) {
            return Err(GraphError::NoSuchPort(src.to_string()));
        }
        if !self.ports.contains_key(dst) {
            return Err(GraphError::NoSuchPort(dst.to_string()));
        }
        if self.connected(src, dst) {
            return Err(GraphError::AlreadyConnected);
        }
        self.edges.entry(src.to_string()).or_default().push(dst.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_event_round_trip() {
        let event = PortEvent::new("system:playback_1", true);
        assert_eq!(event.port(), "system:playback_1");
        assert!(event.registered());
    }

    #[test]
    fn test_port_event_truncates_long_names() {
        let long = "c".repeat(PORT_NAME_MAX + 50);
        let event = PortEvent::new(&long, false);
        assert_eq!(event.port().len(), PORT_NAME_MAX);
        assert!(!event.registered());
    }

    #[test]
    fn test_event_queue_is_bounded() {
        let (tx, rx) = event_queue();
        let mut sent = 0;
        while tx.try_send(PortEvent::new("a:b", true)).is_ok() {
            sent += 1;
            assert!(sent <= 1024, "queue is unexpectedly unbounded");
        }
        assert_eq!(sent, rx.len());
    }

    #[test]
    fn test_memory_graph_connect_and_remove() {
        let mut graph = MemoryGraph::new();
        graph.add_output("a:out");
        graph.add_input("b:in");

        graph.connect("a:out", "b:in").unwrap();
        assert!(graph.connected("a:out", "b:in"));
        assert!(matches!(
            graph.connect("a:out", "b:in"),
            Err(GraphError::AlreadyConnected)
        ));
        assert!(matches!(
            graph.connect("a:out", "ghost:in"),
            Err(GraphError::NoSuchPort(_))
        ));

        graph.remove_port("b:in");
        assert!(!graph.connected("a:out", "b:in"));
        assert_eq!(graph.output_ports(), vec!["a:out".to_string()]);
    }
}
