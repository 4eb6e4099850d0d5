pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use siptx_sip_core::Message;

use crate::error::Result;

/// Protocols a transport can carry SIP over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportProtocol {
    Udp,
    Tcp,
    Tls,
    Ws,
}

impl TransportProtocol {
    /// Connection-oriented protocols deliver reliably; UDP does not.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, TransportProtocol::Udp)
    }

    /// The token used in Via headers.
    pub fn via_token(&self) -> &'static str {
        match self {
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Tls => "TLS",
            TransportProtocol::Ws => "WS",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.via_token())
    }
}

/// Identifies the connection a message went out on or arrived over.
///
/// Only reliable transports produce one; for UDP there is no connection and
/// retransmission is the sender's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId {
    pub protocol: TransportProtocol,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}->{}", self.protocol, self.local, self.remote)
    }
}

/// Events emitted by a transport
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A SIP message was received
    MessageReceived {
        message: Message,
        source: SocketAddr,
        destination: SocketAddr,
        /// Present when the message arrived over a reliable connection
        connection: Option<ConnectionId>,
    },

    /// Non-fatal error, e.g. an unparseable datagram
    Error { error: String },

    /// The transport has been closed
    Closed,
}

/// A SIP transport.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    fn local_addr(&self) -> Result<SocketAddr>;

    fn protocol(&self) -> TransportProtocol;

    /// Sends a message to `destination`.
    ///
    /// Returns the connection used when the protocol is reliable, `None`
    /// for datagram transports.
    async fn send_message(&self, message: Message, destination: SocketAddr) -> Result<Option<ConnectionId>>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reliability_by_protocol() {
        assert!(!TransportProtocol::Udp.is_reliable());
        assert!(TransportProtocol::Tcp.is_reliable());
        assert!(TransportProtocol::Tls.is_reliable());
        assert_eq!(TransportProtocol::Ws.to_string(), "WS");
    }
}
