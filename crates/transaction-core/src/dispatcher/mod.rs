//! Transport-facing message router.
//!
//! The [`Dispatcher`] owns the registry mapping each [`TransactionKey`] to the
//! one live transaction that owns it, sends messages on behalf of
//! transactions and routes every inbound message:
//!
//! 1. to the transaction registered under the message's identity, if any;
//! 2. otherwise to the fallback listener for the message's method;
//! 3. otherwise to the catch-all fallback listener;
//! 4. otherwise requests other than ACK and CANCEL get `501 Not Implemented`
//!    and everything else is dropped.
//!
//! At most one of these receives a given message.

pub mod config;
pub mod fallback;

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use siptx_sip_core::prelude::*;
use siptx_sip_transport::{ConnectionId, Transport, TransportEvent, UdpTransport};

pub use config::DispatcherConfig;
pub use fallback::{FallbackKey, FallbackListener, NotImplementedServer};

use crate::client::ClientTransaction;
use crate::error::{Error, Result};
use crate::server::ServerTransaction;
use crate::transaction::{Transaction, TransactionKey, TransactionListener, TransactionState};

/// A message received from the transport.
#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub message: Message,
    pub source: SocketAddr,
    /// Set when the message arrived over a reliable connection
    pub connection: Option<ConnectionId>,
}

impl IncomingMessage {
    pub fn new(message: Message, source: SocketAddr, connection: Option<ConnectionId>) -> Self {
        Self { message, source, connection }
    }
}

struct DispatcherInner {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    transactions: DashMap<TransactionKey, Arc<dyn Transaction>>,
    fallbacks: DashMap<FallbackKey, Arc<dyn FallbackListener>>,
    receive_loop: Mutex<Option<JoinHandle<()>>>,
}

/// Routes messages between a transport and the transactions using it.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

/// A non-owning dispatcher reference held by transactions.
#[derive(Clone)]
pub struct WeakDispatcher {
    inner: Weak<DispatcherInner>,
}

impl WeakDispatcher {
    pub fn upgrade(&self) -> Option<Dispatcher> {
        self.inner.upgrade().map(|inner| Dispatcher { inner })
    }
}

impl fmt::Debug for WeakDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakDispatcher")
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(DispatcherInner {
                transport,
                config,
                transactions: DashMap::new(),
                fallbacks: DashMap::new(),
                receive_loop: Mutex::new(None),
            }),
        })
    }

    /// Binds a UDP transport and starts dispatching what it receives.
    pub async fn bind_udp(addr: SocketAddr, config: DispatcherConfig) -> Result<Self> {
        config.validate()?;
        let (transport, transport_rx) = UdpTransport::bind(addr, Some(config.event_capacity)).await?;
        let dispatcher = Self::new(Arc::new(transport), config)?;
        dispatcher.start(transport_rx);
        Ok(dispatcher)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.inner.transport.local_addr().map_err(Error::from)
    }

    pub fn downgrade(&self) -> WeakDispatcher {
        WeakDispatcher { inner: Arc::downgrade(&self.inner) }
    }

    /// Spawns the task that feeds transport events into [`Dispatcher::dispatch`].
    ///
    /// Replaces a previously started loop. The task holds only a weak
    /// reference, so it stops once every dispatcher handle is dropped.
    pub fn start(&self, mut transport_rx: mpsc::Receiver<TransportEvent>) {
        let weak = self.downgrade();
        let task = tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                let dispatcher = match weak.upgrade() {
                    Some(d) => d,
                    None => break,
                };
                match event {
                    TransportEvent::MessageReceived { message, source, connection, .. } => {
                        dispatcher.dispatch(IncomingMessage::new(message, source, connection));
                    }
                    TransportEvent::Error { error } => {
                        warn!(error = %error, "Transport error");
                    }
                    TransportEvent::Closed => {
                        info!("Transport closed, stopping dispatcher receive loop");
                        break;
                    }
                }
            }
            debug!("Dispatcher receive loop ended");
        });

        if let Some(previous) = self.inner.receive_loop.lock().replace(task) {
            previous.abort();
        }
    }

    /// Stops the receive loop and terminates every live transaction.
    pub fn shutdown(&self) {
        if let Some(task) = self.inner.receive_loop.lock().take() {
            task.abort();
        }
        let live: Vec<Arc<dyn Transaction>> =
            self.inner.transactions.iter().map(|entry| entry.value().clone()).collect();
        info!("Dispatcher shutting down, terminating {} transactions", live.len());
        for transaction in live {
            transaction.terminate();
        }
        self.inner.transactions.clear();
    }

    /// Binds `key` to `transaction`.
    ///
    /// Fails with [`Error::DuplicateRegistration`] if another transaction owns
    /// the key; the existing registration is left untouched.
    pub fn register(&self, key: TransactionKey, transaction: Arc<dyn Transaction>) -> Result<()> {
        match self.inner.transactions.entry(key) {
            Entry::Occupied(entry) => Err(Error::DuplicateRegistration(entry.key().clone())),
            Entry::Vacant(entry) => {
                debug!(id = %entry.key(), "Transaction registered");
                entry.insert(transaction);
                Ok(())
            }
        }
    }

    /// Removes whatever is bound to `key`. Returns whether anything was removed.
    pub fn unregister(&self, key: &TransactionKey) -> bool {
        let removed = self.inner.transactions.remove(key).is_some();
        if removed {
            debug!(id = %key, "Transaction unregistered");
        }
        removed
    }

    /// Removes the binding for `key` only if it still belongs to `instance`.
    pub(crate) fn unregister_instance(&self, key: &TransactionKey, instance: Uuid) {
        if self
            .inner
            .transactions
            .remove_if(key, |_, t| t.instance_id() == instance)
            .is_some()
        {
            debug!(id = %key, "Transaction unregistered");
        }
    }

    pub fn lookup(&self, key: &TransactionKey) -> Option<Arc<dyn Transaction>> {
        self.inner.transactions.get(key).map(|entry| entry.value().clone())
    }

    /// State of the live transaction registered under `key`.
    pub fn transaction_state(&self, key: &TransactionKey) -> Result<TransactionState> {
        self.lookup(key)
            .map(|t| t.state())
            .ok_or_else(|| Error::TransactionNotFound(key.clone()))
    }

    /// Terminates the live transaction registered under `key` without
    /// notifying its listener.
    pub fn terminate_transaction(&self, key: &TransactionKey) -> Result<()> {
        let transaction = self.lookup(key).ok_or_else(|| Error::TransactionNotFound(key.clone()))?;
        transaction.terminate();
        Ok(())
    }

    pub fn is_registered(&self, key: &TransactionKey) -> bool {
        self.inner.transactions.contains_key(key)
    }

    pub fn transaction_count(&self) -> usize {
        self.inner.transactions.len()
    }

    /// Installs a fallback listener, returning the one it replaces.
    pub fn set_fallback_listener(
        &self,
        key: FallbackKey,
        listener: Arc<dyn FallbackListener>,
    ) -> Option<Arc<dyn FallbackListener>> {
        debug!(key = %key, "Fallback listener installed");
        self.inner.fallbacks.insert(key, listener)
    }

    pub fn remove_fallback_listener(&self, key: &FallbackKey) -> Option<Arc<dyn FallbackListener>> {
        self.inner.fallbacks.remove(key).map(|(_, listener)| listener)
    }

    pub(crate) fn remove_fallback_listener_if<F>(&self, key: &FallbackKey, predicate: F)
    where
        F: FnOnce(&Arc<dyn FallbackListener>) -> bool,
    {
        self.inner.fallbacks.remove_if(key, |_, listener| predicate(listener));
    }

    fn fallback_for(&self, method: Option<Method>) -> Option<Arc<dyn FallbackListener>> {
        method
            .and_then(|m| self.inner.fallbacks.get(&FallbackKey::Method(m)).map(|e| e.value().clone()))
            .or_else(|| self.inner.fallbacks.get(&FallbackKey::Any).map(|e| e.value().clone()))
    }

    /// Sends `message` to `destination`.
    ///
    /// Returns the connection used when the transport is reliable, `None`
    /// for datagram transports.
    pub async fn send(&self, message: Message, destination: SocketAddr) -> Result<Option<ConnectionId>> {
        trace!(%destination, "Sending {}", describe(&message));
        Ok(self.inner.transport.send_message(message, destination).await?)
    }

    /// Routes one inbound message.
    pub fn dispatch(&self, incoming: IncomingMessage) {
        let key = match TransactionKey::from_message(&incoming.message) {
            Some(key) => key,
            None => {
                warn!(source = %incoming.source, "Dropping {} without transaction identity", describe(&incoming.message));
                return;
            }
        };

        if let Some(transaction) = self.lookup(&key) {
            trace!(id = %key, "Routing {} to transaction", describe(&incoming.message));
            transaction.on_message(incoming.message, incoming.connection);
            return;
        }

        if let Some(listener) = self.fallback_for(incoming.message.method()) {
            trace!(id = %key, "Routing unmatched {} to fallback listener", describe(&incoming.message));
            listener.on_unmatched_message(self, incoming);
            return;
        }

        match incoming.message {
            Message::Request(request) if !matches!(request.method, Method::Ack | Method::Cancel) => {
                debug!(id = %key, "No handler for {}, answering 501", request.method);
                if let Err(e) = NotImplementedServer::reject(self, request, incoming.source, incoming.connection) {
                    debug!(id = %key, error = %e, "Could not answer unmatched request");
                }
            }
            other => {
                debug!(id = %key, "Dropping unmatched {}", describe(&other));
            }
        }
    }

    /// Creates an INVITE or non-INVITE client transaction for `request`.
    /// Call `start()` on the result to send it.
    pub fn create_client_transaction(
        &self,
        request: Request,
        destination: SocketAddr,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<ClientTransaction> {
        ClientTransaction::new(self, request, destination, listener)
    }

    /// Creates and registers an INVITE or non-INVITE server transaction for
    /// an inbound `request`.
    pub fn create_server_transaction(
        &self,
        request: Request,
        source: SocketAddr,
        connection: Option<ConnectionId>,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<ServerTransaction> {
        ServerTransaction::new(self, request, source, connection, listener)
    }
}

fn describe(message: &Message) -> String {
    match message {
        Message::Request(r) => r.method.to_string(),
        Message::Response(r) => format!("{} response", r.status),
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("transport", &self.inner.transport)
            .field("transactions", &self.inner.transactions.len())
            .finish()
    }
}
