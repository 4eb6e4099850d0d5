use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the SIP transport layer
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to bind to the requested address
    #[error("Failed to bind to {0}: {1}")]
    BindFailed(SocketAddr, #[source] io::Error),

    /// Failed to send a message
    #[error("Failed to send message to {0}: {1}")]
    SendFailed(SocketAddr, #[source] io::Error),

    /// Serialized message does not fit in a datagram
    #[error("Message too large for UDP ({0} bytes)")]
    PacketTooLarge(usize),

    /// The transport has been closed
    #[error("Transport is closed")]
    TransportClosed,

    /// Other I/O failures
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
