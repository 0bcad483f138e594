//! JACK backend for the snapshot engine.
//!
//! The port-registration callback runs on a JACK-owned thread under the
//! real-time constraint: it only copies the port name into a fixed-size
//! [`PortEvent`] and `try_send`s it into the bounded queue. All graph
//! mutation happens on the main loop, which drains the queue.

use crossbeam_channel::{Receiver, Sender};
use jack::{Client, ClientOptions, Control, PortFlags, PortId, ProcessScope};
use tracing::{error, info};

use crate::graph::{GraphError, PortEvent, PortGraph, event_queue};

/// Notification handler feeding the event queue.
struct Notifier {
    tx: Sender<PortEvent>,
}

impl jack::NotificationHandler for Notifier {
    fn port_registration(&mut self, client: &Client, port_id: PortId, is_registered: bool) {
        if let Some(port) = client.port_by_id(port_id) {
            if let Ok(name) = port.name() {
                if self.tx.try_send(PortEvent::new(&name, is_registered)).is_err() {
                    // Queue overrun; the event is dropped. No allocation
                    // or blocking is permitted on this thread.
                }
            }
        }
    }
}

/// No-op audio processing; this client only watches the graph.
struct NoProcess;

impl jack::ProcessHandler for NoProcess {
    fn process(&mut self, _client: &Client, _scope: &ProcessScope) -> Control {
        Control::Continue
    }
}

/// The live JACK graph.
pub struct JackGraph {
    client: jack::AsyncClient<Notifier, NoProcess>,
}

impl JackGraph {
    /// Open a JACK client and activate the registration callback.
    ///
    /// Returns the graph handle and the consumer side of the event queue.
    ///
    /// # Errors
    ///
    /// Returns the JACK error if the server is unreachable or activation
    /// fails.
    pub fn open(name: &str) -> Result<(Self, Receiver<PortEvent>), jack::Error> {
        let (client, _status) = Client::new(name, ClientOptions::NO_START_SERVER)?;
        let (tx, rx) = event_queue();
        let client = client.activate_async(Notifier { tx }, NoProcess)?;
        info!("JACK client created");
        Ok((Self { client }, rx))
    }

    fn inner(&self) -> &Client {
        self.client.as_client()
    }
}

impl PortGraph for JackGraph {
    fn ports(&self) -> Vec<String> {
        self.inner().ports(None, None, PortFlags::empty())
    }

    fn output_ports(&self) -> Vec<String> {
        self.inner().ports(None, None, PortFlags::IS_OUTPUT)
    }

    fn port_exists(&self, port: &str) -> bool {
        self.inner().port_by_name(port).is_some()
    }

    fn connections_of(&self, port: &str) -> Vec<String> {
        let Some(handle) = self.inner().port_by_name(port) else {
            return Vec::new();
        };
        self.inner()
            .ports(None, None, PortFlags::empty())
            .into_iter()
            .filter(|other| handle.is_connected_to(other).unwrap_or(false))
            .collect()
    }

    fn connect(&mut self, src: &str, dst: &str) -> Result<(), GraphError> {
        if let Some(handle) = self.inner().port_by_name(src) {
            if handle.is_connected_to(dst).unwrap_or(false) {
                return Err(GraphError::AlreadyConnected);
            }
        } else {
            return Err(GraphError::NoSuchPort(src.to_string()));
        }
        self.inner().connect_ports_by_name(src, dst).map_err(|e| {
            error!("JACK connect error: {e}");
            GraphError::ConnectFailed(e.to_string())
        })
    }
}
