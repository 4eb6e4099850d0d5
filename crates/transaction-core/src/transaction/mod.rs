//! Transaction identity, state, notifications and the per-transaction task.

pub mod key;
pub mod listener;
pub(crate) mod logic;
pub(crate) mod runner;
pub mod state;

use std::fmt;

use uuid::Uuid;

use siptx_sip_core::{Message, Response};
use siptx_sip_transport::ConnectionId;

pub use key::TransactionKey;
pub use listener::{TransactionEvent, TransactionListener};
pub use state::{AtomicTransactionState, TransactionKind, TransactionState};

use crate::timer::TimerType;

/// The view of a transaction the dispatcher works with.
///
/// Entry points only enqueue work for the transaction's own task, so they
/// never block and are safe to call from any thread.
pub trait Transaction: Send + Sync + fmt::Debug {
    fn key(&self) -> &TransactionKey;

    fn kind(&self) -> TransactionKind;

    fn state(&self) -> TransactionState;

    /// Distinguishes this instance from a later transaction reusing its key.
    fn instance_id(&self) -> Uuid;

    /// Hands an inbound message matched to this transaction.
    fn on_message(&self, message: Message, connection: Option<ConnectionId>);

    /// Stops the transaction without notifying its listener. Idempotent.
    fn terminate(&self);
}

/// Work items processed one at a time by a transaction's task.
#[derive(Debug)]
pub(crate) enum InternalTransactionCommand {
    Start,
    ProcessMessage {
        message: Message,
        connection: Option<ConnectionId>,
    },
    /// A timer fired; `id` identifies the arming it came from
    Timer { timer: TimerType, id: u64 },
    /// Server transactions: send a response on behalf of the owner
    Respond(Response),
    Terminate,
}

/// Accessors shared by the public transaction handles, which all wrap an
/// `Arc<TransactionData>` in a field named `data`.
macro_rules! transaction_handle {
    ($name:ident) => {
        impl $name {
            pub fn key(&self) -> &$crate::transaction::TransactionKey {
                &self.data.id
            }

            pub fn kind(&self) -> $crate::transaction::TransactionKind {
                self.data.kind
            }

            pub fn state(&self) -> $crate::transaction::TransactionState {
                self.data.state.get()
            }

            /// The request that created this transaction.
            pub fn original_request(&self) -> &siptx_sip_core::Request {
                &self.data.request
            }

            /// The most recent response received (client) or sent (server).
            pub fn last_response(&self) -> Option<siptx_sip_core::Response> {
                self.data.last_response()
            }

            pub fn remote_addr(&self) -> std::net::SocketAddr {
                self.data.remote_addr
            }

            /// Stops the transaction without notifying its listener. Idempotent.
            pub fn terminate(&self) {
                $crate::transaction::Transaction::terminate(&*self.data)
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(&*self.data, f)
            }
        }
    };
}

pub(crate) use transaction_handle;
