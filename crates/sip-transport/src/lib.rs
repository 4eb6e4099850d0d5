//! SIP transport layer for the siptx stack.
//!
//! A [`Transport`] sends serialized SIP messages and reports received ones
//! as [`TransportEvent`]s on an mpsc channel. Only UDP is provided here;
//! reliable transports plug in through the same trait and report the
//! [`ConnectionId`] they used.

pub mod error;
pub mod transport;


pub use error::{Error, Result};
pub use transport::udp::UdpTransport;
pub use transport::{ConnectionId, Transport, TransportEvent, TransportProtocol};

/// Bind a UDP transport to the specified address
pub async fn bind_udp(addr: std::net::SocketAddr) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr, None).await
}

/// Re-export of common types for easier use
pub mod prelude {
    pub use crate::{bind_udp, ConnectionId, Error, Result, Transport, TransportEvent, TransportProtocol, UdpTransport};
}
