//! Listeners for messages that match no live transaction.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

use siptx_sip_core::prelude::*;
use siptx_sip_transport::ConnectionId;

use crate::dispatcher::{Dispatcher, IncomingMessage, WeakDispatcher};
use crate::error::Result;
use crate::server::ServerTransaction;

/// Selects which unmatched messages a fallback listener receives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FallbackKey {
    /// Requests with this method, or responses whose CSeq carries it
    Method(Method),
    /// Anything not claimed by a method-specific listener
    Any,
}

impl fmt::Display for FallbackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackKey::Method(m) => write!(f, "{}", m),
            FallbackKey::Any => f.write_str("*"),
        }
    }
}

/// Receives inbound messages that no transaction owns, such as new requests
/// or retransmitted 2xx responses to an INVITE.
///
/// A listener that wants to handle a new request creates a server
/// transaction for it. Retransmissions arriving before that transaction is
/// registered are offered again; creating a second transaction for them
/// fails with `DuplicateRegistration`, which listeners should ignore.
pub trait FallbackListener: Send + Sync {
    fn on_unmatched_message(&self, dispatcher: &Dispatcher, incoming: IncomingMessage);
}

/// Answers requests for methods the application does not implement with
/// `501 Not Implemented`. ACK and CANCEL are never answered.
pub struct NotImplementedServer {
    implemented: Vec<Method>,
    dispatcher: WeakDispatcher,
}

impl NotImplementedServer {
    /// Creates the server and installs it as the catch-all fallback listener.
    pub fn register(dispatcher: &Dispatcher, implemented: Vec<Method>) -> Arc<Self> {
        let server = Arc::new(Self { implemented, dispatcher: dispatcher.downgrade() });
        dispatcher.set_fallback_listener(FallbackKey::Any, server.clone());
        server
    }

    /// Removes this server from the catch-all slot.
    pub fn halt(self: &Arc<Self>) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove_fallback_listener_if(&FallbackKey::Any, |l| {
                std::ptr::eq(Arc::as_ptr(l) as *const (), Arc::as_ptr(self) as *const ())
            });
        }
    }

    pub fn implemented_methods(&self) -> &[Method] {
        &self.implemented
    }

    fn is_implemented(&self, method: &Method) -> bool {
        self.implemented.iter().any(|m| m == method)
    }

    /// Replies `501 Not Implemented` to `request` through a fresh server
    /// transaction so retransmissions of the request are absorbed.
    pub fn reject(
        dispatcher: &Dispatcher,
        request: Request,
        source: SocketAddr,
        connection: Option<ConnectionId>,
    ) -> Result<()> {
        let response = Response::for_request(&request, StatusCode::NOT_IMPLEMENTED);
        let transaction = ServerTransaction::new(dispatcher, request, source, connection, None)?;
        transaction.respond_with(response)
    }
}

impl FallbackListener for NotImplementedServer {
    fn on_unmatched_message(&self, dispatcher: &Dispatcher, incoming: IncomingMessage) {
        let request = match incoming.message {
            Message::Request(request) => request,
            Message::Response(_) => return,
        };
        if matches!(request.method, Method::Ack | Method::Cancel) || self.is_implemented(&request.method) {
            return;
        }

        info!("NotImplementedServer: responding to a new {} request", request.method);
        if let Err(e) = Self::reject(dispatcher, request, incoming.source, incoming.connection) {
            debug!(error = %e, "NotImplementedServer could not respond");
        }
    }
}

impl fmt::Debug for NotImplementedServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotImplementedServer")
            .field("implemented", &self.implemented)
            .finish()
    }
}
