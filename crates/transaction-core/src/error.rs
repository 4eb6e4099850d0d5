use thiserror::Error;

use crate::transaction::{TransactionKey, TransactionState};

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in SIP transaction handling
#[derive(Error, Debug)]
pub enum Error {
    /// Another live transaction already owns this identity.
    #[error("Transaction already registered: {0}")]
    DuplicateRegistration(TransactionKey),

    /// The transport could not deliver a message.
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// No live transaction has this identity.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionKey),

    /// The requested operation is not allowed in the current state.
    #[error("Invalid transaction state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        from: TransactionState,
        to: TransactionState,
    },

    /// The message lacks the headers needed to compute a transaction identity.
    #[error("Cannot derive transaction identity: {0}")]
    MissingIdentity(String),

    /// The request cannot seed a transaction of the requested kind.
    #[error("Invalid request for transaction: {0}")]
    InvalidRequest(String),

    /// Error originating from the sip-core crate
    #[error("SIP core error: {0}")]
    SipCore(#[from] siptx_sip_core::Error),

    /// Invalid timer or dispatcher configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal channel error (e.g., the transaction task has stopped)
    #[error("Internal channel closed")]
    ChannelClosed,
}

impl From<siptx_sip_transport::Error> for Error {
    fn from(e: siptx_sip_transport::Error) -> Self {
        Error::TransportFailure(e.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for Error {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        Error::ChannelClosed
    }
}
