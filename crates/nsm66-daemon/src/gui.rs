//! The GUI relay.
//!
//! The GUI is just another transport peer. When one attaches (or when
//! the daemon is started with `--gui-url`), every client state
//! transition is mirrored to it, and human-readable progress strings are
//! sent over `/nsm/gui/server/message`. All sends are no-ops while no
//! GUI is attached.

use nsm66_core::osc::{self, Endpoint, OscAddr, OscType, Tag};
use nsm66_core::session::ClientId;
use tracing::warn;

use crate::client::ClientStatus;

/// The optional controller peer.
#[derive(Debug, Default)]
pub struct GuiLink {
    address: Option<OscAddr>,
}

impl GuiLink {
    /// Create a detached link.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a GUI is attached.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.address.is_some()
    }

    /// The attached GUI address, if any.
    #[must_use]
    pub const fn address(&self) -> Option<OscAddr> {
        self.address
    }

    /// Attach a GUI peer.
    pub fn attach(&mut self, address: OscAddr) {
        self.address = Some(address);
    }

    /// Send a registry message to the GUI, if one is attached.
    pub fn send(&self, endpoint: &Endpoint, tag: Tag, args: Vec<OscType>) {
        if let Some(address) = self.address {
            if let Err(e) = endpoint.send(address, osc::message(tag, args)) {
                warn!("GUI send failed: {e}");
            }
        }
    }

    /// Human prose for the GUI log.
    pub fn msg(&self, endpoint: &Endpoint, text: impl Into<String>) {
        self.send(endpoint, Tag::GuiServerMessage, vec![osc::s(text.into())]);
    }

    /// Mirror a client state transition.
    pub fn client_status(&self, endpoint: &Endpoint, id: &ClientId, status: ClientStatus) {
        self.send(
            endpoint,
            Tag::GuiClientStatus,
            vec![osc::s(id.as_str()), osc::s(status.as_str())],
        );
    }

    /// Mirror a client label.
    pub fn client_label(&self, endpoint: &Endpoint, id: &ClientId, label: &str) {
        self.send(
            endpoint,
            Tag::GuiClientLabel,
            vec![osc::s(id.as_str()), osc::s(label)],
        );
    }

    /// Announce a client slot (with the executable first, later again
    /// with the pretty name once the client announces).
    pub fn client_new(&self, endpoint: &Endpoint, id: &ClientId, name: &str) {
        self.send(
            endpoint,
            Tag::GuiClientNew,
            vec![osc::s(id.as_str()), osc::s(name)],
        );
    }
}
