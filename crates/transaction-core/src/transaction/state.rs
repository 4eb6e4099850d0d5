use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// State of a SIP transaction.
///
/// All four machines share this state set and only ever move forward:
///
/// - client non-INVITE: `Trying -> Proceeding -> Completed -> Terminated`
/// - client INVITE: as above, but a 2xx goes straight to `Terminated`
/// - server non-INVITE: `Trying -> Proceeding -> Completed -> Terminated`
/// - server INVITE: as above; an ACK in `Completed` terminates it
///
/// Any state may jump to `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionState {
    /// Created but not started
    Initial,
    /// Request sent (client) or received (server), no response yet
    Trying,
    /// A provisional response was received (client) or sent (server)
    Proceeding,
    /// Final response received or sent; absorbing retransmissions
    Completed,
    /// Finished, no further processing
    Terminated,
}

impl TransactionState {
    pub fn is_terminated(&self) -> bool {
        *self == TransactionState::Terminated
    }

    /// `Trying` or `Proceeding`
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionState::Trying | TransactionState::Proceeding)
    }

    fn as_u8(self) -> u8 {
        match self {
            TransactionState::Initial => 0,
            TransactionState::Trying => 1,
            TransactionState::Proceeding => 2,
            TransactionState::Completed => 3,
            TransactionState::Terminated => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => TransactionState::Initial,
            1 => TransactionState::Trying,
            2 => TransactionState::Proceeding,
            3 => TransactionState::Completed,
            _ => TransactionState::Terminated,
        }
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The four transaction state machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl TransactionKind {
    pub fn is_server(&self) -> bool {
        matches!(self, TransactionKind::InviteServer | TransactionKind::NonInviteServer)
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, TransactionKind::InviteClient | TransactionKind::InviteServer)
    }
}

/// Transaction state readable from any thread.
///
/// Only the owning transaction task writes it, apart from the owner's
/// `terminate()` which forces `Terminated`.
#[derive(Debug)]
pub struct AtomicTransactionState {
    value: AtomicU8,
}

impl AtomicTransactionState {
    pub fn new(state: TransactionState) -> Self {
        Self { value: AtomicU8::new(state.as_u8()) }
    }

    pub fn get(&self) -> TransactionState {
        TransactionState::from_u8(self.value.load(Ordering::Acquire))
    }

    /// Stores `state` and returns the previous one.
    pub fn set(&self, state: TransactionState) -> TransactionState {
        TransactionState::from_u8(self.value.swap(state.as_u8(), Ordering::AcqRel))
    }

    /// Checks that `from -> to` moves forward.
    pub fn validate_transition(from: TransactionState, to: TransactionState) -> Result<()> {
        if to > from {
            Ok(())
        } else {
            Err(Error::InvalidStateTransition { from, to })
        }
    }

    /// Validates and applies a forward transition.
    ///
    /// Uses compare-and-swap so a concurrent forced termination is never
    /// overwritten by an older transition.
    pub fn transition(&self, to: TransactionState) -> Result<TransactionState> {
        let mut current = self.value.load(Ordering::Acquire);
        loop {
            let from = TransactionState::from_u8(current);
            Self::validate_transition(from, to)?;
            match self
                .value
                .compare_exchange(current, to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(from),
                Err(actual) => current = actual,
            }
        }
    }
}
