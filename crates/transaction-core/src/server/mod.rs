//! Server transactions: absorb retransmitted requests, send the owner's
//! responses and retransmit them where the protocol requires it.

mod invite;
mod non_invite;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::debug;

use siptx_sip_core::{Method, Request, Response};
use siptx_sip_transport::ConnectionId;

pub use invite::ServerInviteTransaction;
pub use non_invite::ServerNonInviteTransaction;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionData, TransactionParams};
use crate::transaction::{
    InternalTransactionCommand, Transaction, TransactionKey, TransactionKind, TransactionListener, TransactionState,
};

/// Either kind of server transaction.
#[derive(Debug)]
pub enum ServerTransaction {
    Invite(ServerInviteTransaction),
    NonInvite(ServerNonInviteTransaction),
}

impl ServerTransaction {
    /// Creates, registers and starts the transaction matching the request's
    /// method. ACK is refused.
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        source: SocketAddr,
        connection: Option<ConnectionId>,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        match request.method {
            Method::Invite => Ok(Self::Invite(ServerInviteTransaction::new(
                dispatcher, request, source, connection, listener,
            )?)),
            _ => Ok(Self::NonInvite(ServerNonInviteTransaction::new(
                dispatcher, request, source, connection, listener,
            )?)),
        }
    }

    /// Queues `response` to be sent to the request's source.
    pub fn respond_with(&self, response: Response) -> Result<()> {
        match self {
            Self::Invite(tx) => tx.respond_with(response),
            Self::NonInvite(tx) => tx.respond_with(response),
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

impl From<ServerInviteTransaction> for ServerTransaction {
    fn from(tx: ServerInviteTransaction) -> Self {
        Self::Invite(tx)
    }
}

impl From<ServerNonInviteTransaction> for ServerTransaction {
    fn from(tx: ServerNonInviteTransaction) -> Self {
        Self::NonInvite(tx)
    }
}

fn spawn_server<L: TransactionLogic>(
    dispatcher: &Dispatcher,
    request: Request,
    source: SocketAddr,
    connection: Option<ConnectionId>,
    listener: Option<Arc<dyn TransactionListener>>,
    logic: L,
) -> Result<Arc<TransactionData>> {
    if request.method == Method::Ack {
        return Err(Error::InvalidRequest("ACK does not create a server transaction".into()));
    }
    let id = TransactionKey::from_request(&request)
        .ok_or_else(|| Error::MissingIdentity(format!("{} request lacks Via, Call-ID or CSeq", request.method)))?;
    if dispatcher.is_registered(&id) {
        return Err(Error::DuplicateRegistration(id));
    }

    let params = TransactionParams {
        id,
        request,
        remote_addr: source,
        connection,
        listener,
    };
    let data = TransactionData::spawn(dispatcher, params, logic);
    if let Err(e) = data.register() {
        debug!(id = %data.id, error = %e, "Server transaction lost registration race");
        data.terminate();
        return Err(e);
    }
    data.send_command(InternalTransactionCommand::Start)?;
    Ok(data)
}

fn respond(data: &TransactionData, response: Response) -> Result<()> {
    let state = data.state.get();
    if data.is_cancelled() || matches!(state, TransactionState::Completed | TransactionState::Terminated) {
        return Err(Error::InvalidStateTransition {
            from: state,
            to: TransactionState::Completed,
        });
    }
    data.send_command(InternalTransactionCommand::Respond(response))
}
