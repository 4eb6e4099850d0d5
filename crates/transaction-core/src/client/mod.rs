//! Client transactions: send a request, retransmit it over unreliable
//! transports and report the responses to the owner.

mod invite;
mod non_invite;

use std::net::SocketAddr;
use std::sync::Arc;

use siptx_sip_core::{Method, Request, Response};

pub use invite::ClientInviteTransaction;
pub use non_invite::ClientNonInviteTransaction;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionData, TransactionParams};
use crate::transaction::{InternalTransactionCommand, TransactionKey, TransactionKind, TransactionListener, TransactionState};

/// Either kind of client transaction.
#[derive(Debug)]
pub enum ClientTransaction {
    Invite(ClientInviteTransaction),
    NonInvite(ClientNonInviteTransaction),
}

impl ClientTransaction {
    /// Creates the transaction matching the request's method. ACK is refused:
    /// it never has a transaction of its own.
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        destination: SocketAddr,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        match request.method {
            Method::Invite => Ok(Self::Invite(ClientInviteTransaction::new(dispatcher, request, destination, listener)?)),
            _ => Ok(Self::NonInvite(ClientNonInviteTransaction::new(
                dispatcher,
                request,
                destination,
                listener,
            )?)),
        }
    }

    /// Registers the transaction and sends the request.
    pub fn start(&self) -> Result<()> {
        match self {
            Self::Invite(tx) => tx.start(),
            Self::NonInvite(tx) => tx.start(),
        }
    }

    pub fn terminate(&self) {
        match self {
            Self::Invite(tx) => tx.terminate(),
            Self::NonInvite(tx) => tx.terminate(),
        }
    }

    pub fn key(&self) -> &TransactionKey {
        match self {
            Self::Invite(tx) => tx.key(),
            Self::NonInvite(tx) => tx.key(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            Self::Invite(tx) => tx.kind(),
            Self::NonInvite(tx) => tx.kind(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            Self::Invite(tx) => tx.state(),
            Self::NonInvite(tx) => tx.state(),
        }
    }

    pub fn original_request(&self) -> &Request {
        match self {
            Self::Invite(tx) => tx.original_request(),
            Self::NonInvite(tx) => tx.original_request(),
        }
    }

    pub fn last_response(&self) -> Option<Response> {
        match self {
            Self::Invite(tx) => tx.last_response(),
            Self::NonInvite(tx) => tx.last_response(),
        }
    }
}

impl From<ClientInviteTransaction> for ClientTransaction {
    fn from(tx: ClientInviteTransaction) -> Self {
        Self::Invite(tx)
    }
}

impl From<ClientNonInviteTransaction> for ClientTransaction {
    fn from(tx: ClientNonInviteTransaction) -> Self {
        Self::NonInvite(tx)
    }
}

fn spawn_client<L: TransactionLogic>(
    dispatcher: &Dispatcher,
    request: Request,
    destination: SocketAddr,
    listener: Option<Arc<dyn TransactionListener>>,
    logic: L,
) -> Result<Arc<TransactionData>> {
    if request.method == Method::Ack {
        return Err(Error::InvalidRequest("ACK does not start a client transaction".into()));
    }
    let id = TransactionKey::for_client_request(&request)
        .ok_or_else(|| Error::MissingIdentity(format!("{} request has no Via branch", request.method)))?;
    let params = TransactionParams {
        id,
        request,
        remote_addr: destination,
        connection: None,
        listener,
    };
    Ok(TransactionData::spawn(dispatcher, params, logic))
}

fn start_client(data: &Arc<TransactionData>) -> Result<()> {
    let state = data.state.get();
    if state != TransactionState::Initial || data.is_cancelled() {
        return Err(Error::InvalidStateTransition {
            from: state,
            to: TransactionState::Trying,
        });
    }
    data.register()?;
    data.mark_started();
    data.send_command(InternalTransactionCommand::Start)
}
