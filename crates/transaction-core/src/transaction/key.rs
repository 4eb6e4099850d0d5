use std::fmt;

use siptx_sip_core::prelude::*;

/// Uniquely identifies a SIP transaction within one dispatcher.
///
/// RFC 3261 Section 17 keys a transaction by the top Via `branch` and the
/// request method. Client and server transactions live in separate
/// namespaces, hence `is_server`.
///
/// ACK is keyed under INVITE so that the ACK for a non-2xx final response
/// reaches the INVITE server transaction it belongs to. Requests from pre-RFC
/// 3261 peers (no `z9hG4bK` branch) get a composite branch built from
/// Call-ID, CSeq number and the top Via sent-by.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self { branch: branch.into(), method, is_server }
    }

    /// Key of the server transaction an inbound request belongs to.
    ///
    /// Returns `None` when the request has no usable Via, or no branch and
    /// not enough headers for the legacy composite.
    pub fn from_request(request: &Request) -> Option<Self> {
        let via = request.top_via()?;
        let method = match request.method {
            Method::Ack => Method::Invite,
            ref m => m.clone(),
        };

        let branch = match via.branch() {
            Some(b) if via.has_rfc3261_branch() => b.to_string(),
            _ => {
                let call_id = request.call_id()?;
                let cseq = request.cseq()?;
                format!("{}:{}:{}", call_id, cseq.seq, via.sent_by)
            }
        };
        Some(Self::new(branch, method, true))
    }

    /// Key of the client transaction that sent `request`.
    ///
    /// Client transactions always use the branch they generated, so a
    /// missing branch means the request cannot start a transaction.
    pub fn for_client_request(request: &Request) -> Option<Self> {
        let via = request.top_via()?;
        let branch = via.branch()?;
        Some(Self::new(branch, request.method.clone(), false))
    }

    /// Key of the client transaction an inbound response belongs to: the top
    /// Via branch and the CSeq method.
    pub fn from_response(response: &Response) -> Option<Self> {
        let via = response.top_via()?;
        let branch = via.branch()?;
        let cseq = response.cseq()?;
        Some(Self::new(branch, cseq.method, false))
    }

    /// Key for any inbound message.
    pub fn from_message(message: &Message) -> Option<Self> {
        match message {
            Message::Request(r) => Self::from_request(r),
            Message::Response(r) => Self::from_response(r),
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }
}

/// Format: "branch:METHOD:side"
impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = if self.is_server { "server" } else { "client" };
        write!(f, "{}:{}:{}", self.branch, self.method, side)
    }
}

impl fmt::Debug for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransactionKey({})", self)
    }
}
