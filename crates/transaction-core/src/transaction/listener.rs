//! Notifications from a transaction to its owner.

use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::warn;

use siptx_sip_core::{Request, Response};

use crate::transaction::TransactionKey;

/// Events a transaction delivers to its listener.
///
/// A transaction delivers at most one terminal event (a final response or a
/// timeout), preceded by any number of provisional ones.
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// 1xx received by a client transaction
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 2xx received by a client transaction
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 3xx-6xx received by a client transaction
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// The transaction timer expired, or the transport failed
    Timeout { transaction_id: TransactionKey },
    /// A server transaction was created for an inbound request
    RequestReceived {
        transaction_id: TransactionKey,
        request: Request,
        source: SocketAddr,
    },
}

impl TransactionEvent {
    pub fn transaction_id(&self) -> &TransactionKey {
        match self {
            TransactionEvent::ProvisionalResponse { transaction_id, .. }
            | TransactionEvent::SuccessResponse { transaction_id, .. }
            | TransactionEvent::FailureResponse { transaction_id, .. }
            | TransactionEvent::Timeout { transaction_id }
            | TransactionEvent::RequestReceived { transaction_id, .. } => transaction_id,
        }
    }

    /// Final responses and timeouts end the listener relationship.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionEvent::SuccessResponse { .. }
                | TransactionEvent::FailureResponse { .. }
                | TransactionEvent::Timeout { .. }
        )
    }
}

/// Receives transaction notifications.
///
/// Called from the transaction's task; implementations must not block.
pub trait TransactionListener: Send + Sync {
    fn on_transaction_event(&self, event: TransactionEvent);
}

impl TransactionListener for mpsc::UnboundedSender<TransactionEvent> {
    fn on_transaction_event(&self, event: TransactionEvent) {
        if self.send(event).is_err() {
            warn!("Transaction listener channel closed, dropping event");
        }
    }
}

/// Delivery never waits for capacity. When the channel is full the event is
/// dropped and logged, a terminal one included, so the owner may never learn
/// how the transaction ended. Size the channel for the expected burst, or use
/// an [`mpsc::UnboundedSender`] when every terminal event must arrive.
impl TransactionListener for mpsc::Sender<TransactionEvent> {
    fn on_transaction_event(&self, event: TransactionEvent) {
        if let Err(e) = self.try_send(event) {
            if e.into_inner().is_terminal() {
                warn!("Transaction listener channel full or closed, dropping terminal event");
            } else {
                warn!("Transaction listener channel full or closed, dropping event");
            }
        }
    }
}
