//! UDP endpoint for OSC messages.
//!
//! The endpoint is a datagram socket with two receive modes: a blocking
//! wait bounded by a timeout (the daemon's steady-state and orchestration
//! pump) and a non-blocking poll. Dispatch is cooperative: the caller
//! drains messages one at a time and runs each handler to completion
//! before the next message is taken.
//!
//! Packets that fail to decode are logged at warn level and dropped.

use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use rosc::{OscMessage, OscPacket};
use tracing::warn;

use crate::error::Error;

/// Receive buffer size; comfortably above the largest protocol message.
const RECV_BUF_SIZE: usize = 64 * 1024;

/// The transport address of a peer, printable as an `osc.udp://` URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OscAddr(SocketAddr);

impl OscAddr {
    /// Parse an `osc.udp://host:port/` URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUrl`] if the URL has the wrong scheme or the
    /// host/port cannot be resolved.
    pub fn parse_url(url: &str) -> Result<Self, Error> {
        let rest = url
            .strip_prefix("osc.udp://")
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))?;
        let hostport = rest.trim_end_matches('/');
        hostport
            .to_socket_addrs()
            .map_err(|_| Error::InvalidUrl(url.to_string()))?
            .next()
            .map(Self)
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))
    }

    /// The underlying socket address.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        self.0
    }

    /// Render this address as an `osc.udp://` URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("osc.udp://{}:{}/", self.0.ip(), self.0.port())
    }
}

impl From<SocketAddr> for OscAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl std::fmt::Display for OscAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// A UDP OSC endpoint.
#[derive(Debug)]
pub struct Endpoint {
    socket: UdpSocket,
    url: String,
}

impl Endpoint {
    /// Bind the endpoint on the loopback interface.
    ///
    /// Port 0 asks the system for an ephemeral port, which is the default
    /// daemon behavior.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket cannot be bound.
    pub fn bind(port: u16) -> Result<Self, Error> {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, port))?;
        let local = socket.local_addr()?;
        let url = format!("osc.udp://{}:{}/", local.ip(), local.port());
        Ok(Self { socket, url })
    }

    /// The URL peers use to reach this endpoint.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The local address this endpoint is bound to.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<OscAddr, Error> {
        Ok(OscAddr(self.socket.local_addr()?))
    }

    /// Send one message to a peer.
    ///
    /// # Errors
    ///
    /// Returns an encode error for unencodable messages or a transport
    /// error if the datagram cannot be sent.
    pub fn send(&self, to: OscAddr, msg: OscMessage) -> Result<(), Error> {
        let bytes = rosc::encoder::encode(&OscPacket::Message(msg))
            .map_err(|e| Error::OscEncode(e.to_string()))?;
        self.socket.send_to(&bytes, to.socket_addr())?;
        Ok(())
    }

    /// Wait up to `timeout` for traffic, then drain everything ready.
    ///
    /// Returns every decodable message received, oldest first. An empty
    /// vector means the timeout elapsed with no traffic.
    #[must_use]
    pub fn wait(&self, timeout: Duration) -> Vec<(OscMessage, OscAddr)> {
        let mut out = Vec::new();
        let mut buf = [0_u8; RECV_BUF_SIZE];

        // A zero read timeout is invalid on Unix sockets.
        let timeout = timeout.max(Duration::from_millis(1));
        if let Err(e) = self.socket.set_read_timeout(Some(timeout)) {
            warn!("failed to arm receive timeout: {e}");
            return out;
        }
        match self.socket.recv_from(&mut buf) {
            Ok((len, from)) => decode_into(&buf[..len], from, &mut out),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {},
            Err(e) => warn!("receive error: {e}"),
        }

        // Whatever arrived while we were blocked is drained without waiting.
        out.extend(self.poll());
        out
    }

    /// Drain everything currently ready without blocking.
    #[must_use]
    pub fn poll(&self) -> Vec<(OscMessage, OscAddr)> {
        let mut out = Vec::new();
        let mut buf = [0_u8; RECV_BUF_SIZE];

        if let Err(e) = self.socket.set_nonblocking(true) {
            warn!("failed to enter non-blocking mode: {e}");
            return out;
        }
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => decode_into(&buf[..len], from, &mut out),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("receive error: {e}");
                    break;
                },
            }
        }
        if let Err(e) = self.socket.set_nonblocking(false) {
            warn!("failed to leave non-blocking mode: {e}");
        }
        out
    }
}

/// Decode one datagram, flattening bundles, appending to `out`.
fn decode_into(bytes: &[u8], from: SocketAddr, out: &mut Vec<(OscMessage, OscAddr)>) {
    match rosc::decoder::decode_udp(bytes) {
        Ok((_rest, packet)) => flatten(packet, OscAddr(from), out),
        Err(e) => warn!("dropping undecodable packet from {from}: {e:?}"),
    }
}

fn flatten(packet: OscPacket, from: OscAddr, out: &mut Vec<(OscMessage, OscAddr)>) {
    match packet {
        OscPacket::Message(msg) => out.push((msg, from)),
        OscPacket::Bundle(bundle) => {
            for inner in bundle.content {
                flatten(inner, from, out);
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::osc::{self, Tag};

    #[test]
    fn test_url_parse_round_trip() {
        let addr = OscAddr::parse_url("osc.udp://127.0.0.1:18000/").unwrap();
        assert_eq!(addr.url(), "osc.udp://127.0.0.1:18000/");
        assert!(OscAddr::parse_url("http://127.0.0.1:18000/").is_err());
        assert!(OscAddr::parse_url("osc.udp://127.0.0.1/").is_err());
    }

    #[test]
    fn test_send_and_wait() {
        let a = Endpoint::bind(0).unwrap();
        let b = Endpoint::bind(0).unwrap();

        let msg = osc::message(Tag::SrvOpen, vec![osc::s("alpha")]);
        a.send(b.local_addr().unwrap(), msg).unwrap();

        let received = b.wait(Duration::from_secs(2));
        assert_eq!(received.len(), 1);
        let (msg, from) = &received[0];
        assert_eq!(msg.addr, "/nsm/server/open");
        assert_eq!(osc::str_arg(msg, 0), Some("alpha"));
        assert_eq!(from.socket_addr().port(), a.local_addr().unwrap().socket_addr().port());
    }

    #[test]
    fn test_poll_is_non_blocking() {
        let endpoint = Endpoint::bind(0).unwrap();
        assert!(endpoint.poll().is_empty());
    }

    #[test]
    fn test_wait_times_out_empty() {
        let endpoint = Endpoint::bind(0).unwrap();
        let received = endpoint.wait(Duration::from_millis(20));
        assert!(received.is_empty());
    }
}
