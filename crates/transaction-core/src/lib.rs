//! SIP transaction layer for the siptx stack
//!
//! This crate implements the four transaction state machines of RFC 3261
//! section 17 on top of an asynchronous transport:
//!
//! - [`ClientNonInviteTransaction`] and [`ClientInviteTransaction`] send a
//!   request, retransmit it over unreliable transports and report responses.
//! - [`ServerNonInviteTransaction`] and [`ServerInviteTransaction`] absorb
//!   retransmitted requests and send the owner's responses.
//!
//! A [`Dispatcher`] sits between the transport and the transactions. It
//! keeps the registry of live transactions, routes each inbound message to
//! the transaction that owns it and hands everything else to fallback
//! listeners.
//!
//! Each transaction runs as its own tokio task and reports to its owner
//! through a [`TransactionListener`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use siptx_sip_core::prelude::*;
//! use siptx_transaction_core::prelude::*;
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> siptx_transaction_core::Result<()> {
//! let dispatcher = Dispatcher::bind_udp("127.0.0.1:5060".parse().unwrap(), DispatcherConfig::default()).await?;
//!
//! let request = Request::builder(Method::Options, "sip:bob@127.0.0.1:5070")
//!     .via("UDP", "127.0.0.1:5060", &generate_branch())
//!     .from("sip:alice@127.0.0.1", Some(&generate_tag()))
//!     .to("sip:bob@127.0.0.1", None)
//!     .call_id(&generate_call_id(None))
//!     .cseq(1)
//!     .build();
//!
//! let (events_tx, mut events_rx) = mpsc::unbounded_channel();
//! let transaction = dispatcher.create_client_transaction(
//!     request,
//!     "127.0.0.1:5070".parse().unwrap(),
//!     Some(Arc::new(events_tx)),
//! )?;
//! transaction.start()?;
//!
//! while let Some(event) = events_rx.recv().await {
//!     if event.is_terminal() {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod server;
pub mod timer;
pub mod transaction;

pub use client::{ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction};
pub use dispatcher::{
    Dispatcher, DispatcherConfig, FallbackKey, FallbackListener, IncomingMessage, NotImplementedServer,
    WeakDispatcher,
};
pub use error::{Error, Result};
pub use server::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction};
pub use timer::{Timer, TimerSettings, TimerType};
pub use transaction::{
    Transaction, TransactionEvent, TransactionKey, TransactionKind, TransactionListener, TransactionState,
};

/// Re-exports of the types most applications need.
pub mod prelude {
    pub use crate::client::ClientTransaction;
    pub use crate::dispatcher::{Dispatcher, DispatcherConfig, FallbackKey, FallbackListener, IncomingMessage};
    pub use crate::error::{Error, Result};
    pub use crate::server::ServerTransaction;
    pub use crate::timer::TimerSettings;
    pub use crate::transaction::{
        TransactionEvent, TransactionKey, TransactionKind, TransactionListener, TransactionState,
    };
}
