use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use siptx_sip_core::{Message, Request, Response};
use siptx_sip_transport::ConnectionId;

use crate::dispatcher::{Dispatcher, WeakDispatcher};
use crate::error::{Error, Result};
use crate::timer::{Timer, TimerSettings, TimerType};
use crate::transaction::logic::TransactionLogic;
use crate::transaction::{
    AtomicTransactionState, InternalTransactionCommand, Transaction, TransactionEvent, TransactionKey,
    TransactionKind, TransactionListener, TransactionState,
};

/// State shared between a transaction's handle, the dispatcher registry and
/// the transaction's task.
pub(crate) struct TransactionData {
    pub id: TransactionKey,
    pub instance: Uuid,
    pub kind: TransactionKind,
    pub state: AtomicTransactionState,
    pub request: Request,
    /// Where requests (client) or responses (server) are sent
    pub remote_addr: SocketAddr,
    pub timer_config: TimerSettings,
    last_response: Mutex<Option<Response>>,
    /// Held for the whole of a delivery. Reentrant so the owner can call
    /// `terminate()` from inside its own callback.
    listener: ReentrantMutex<RefCell<Option<Arc<dyn TransactionListener>>>>,
    cancelled: AtomicBool,
    started: AtomicBool,
    cmd_tx: mpsc::UnboundedSender<InternalTransactionCommand>,
    dispatcher: WeakDispatcher,
}

pub(crate) struct TransactionParams {
    pub id: TransactionKey,
    pub request: Request,
    pub remote_addr: SocketAddr,
    pub connection: Option<ConnectionId>,
    pub listener: Option<Arc<dyn TransactionListener>>,
}

impl TransactionData {
    /// Creates the shared data and spawns the transaction task.
    ///
    /// The task idles until it receives `Start`.
    pub fn spawn<L: TransactionLogic>(dispatcher: &Dispatcher, params: TransactionParams, logic: L) -> Arc<Self> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let data = Arc::new(TransactionData {
            id: params.id,
            instance: Uuid::new_v4(),
            kind: logic.kind(),
            state: AtomicTransactionState::new(TransactionState::Initial),
            request: params.request,
            remote_addr: params.remote_addr,
            timer_config: dispatcher.config().timers,
            last_response: Mutex::new(None),
            listener: ReentrantMutex::new(RefCell::new(params.listener)),
            cancelled: AtomicBool::new(false),
            started: AtomicBool::new(false),
            cmd_tx,
            dispatcher: dispatcher.downgrade(),
        });

        let ctx = TransactionContext {
            data: data.clone(),
            timers: HashMap::new(),
            next_timer_id: 0,
            reliable: params.connection.is_some(),
        };
        tokio::spawn(run_transaction_loop(ctx, logic, cmd_rx));
        data
    }

    /// Registers this transaction with its dispatcher.
    pub fn register(self: &Arc<Self>) -> Result<()> {
        let dispatcher = self.dispatcher.upgrade().ok_or(Error::ChannelClosed)?;
        dispatcher.register(self.id.clone(), self.clone())
    }

    /// Records that `Start` was queued; the task then ends by itself.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Stops a transaction whose handle is going away before it was started.
    /// Nothing else can reach such a transaction, so its task would idle forever.
    pub fn release_unstarted(&self) {
        if !self.started.load(Ordering::SeqCst) {
            trace!(id = %self.id, "Releasing transaction that was never started");
            Transaction::terminate(self);
        }
    }

    pub fn send_command(&self, cmd: InternalTransactionCommand) -> Result<()> {
        self.cmd_tx.send(cmd).map_err(Error::from)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn last_response(&self) -> Option<Response> {
        self.last_response.lock().clone()
    }

    /// Delivers `event` unless the owner has terminated the transaction.
    ///
    /// A terminal event takes the listener out of its slot, so nothing can
    /// be delivered afterwards.
    fn deliver(&self, event: TransactionEvent) {
        let guard = self.listener.lock();
        if self.is_cancelled() {
            trace!(id = %self.id, "Transaction cancelled, suppressing {:?}", event);
            return;
        }
        let listener = if event.is_terminal() {
            guard.borrow_mut().take()
        } else {
            guard.borrow().clone()
        };
        if let Some(listener) = listener {
            listener.on_transaction_event(event);
        }
    }

    fn drop_listener(&self) {
        self.listener.lock().borrow_mut().take();
    }
}

impl Transaction for TransactionData {
    fn key(&self) -> &TransactionKey {
        &self.id
    }

    fn kind(&self) -> TransactionKind {
        self.kind
    }

    fn state(&self) -> TransactionState {
        self.state.get()
    }

    fn instance_id(&self) -> Uuid {
        self.instance
    }

    fn on_message(&self, message: Message, connection: Option<ConnectionId>) {
        if self.is_cancelled() || self.state.get().is_terminated() {
            trace!(id = %self.id, "Dropping message for terminated transaction");
            return;
        }
        if self
            .send_command(InternalTransactionCommand::ProcessMessage { message, connection })
            .is_err()
        {
            trace!(id = %self.id, "Transaction task gone, dropping message");
        }
    }

    fn terminate(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let previous = self.state.set(TransactionState::Terminated);
        // Waits for a delivery running on another thread to finish
        self.drop_listener();
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.unregister_instance(&self.id, self.instance);
        }
        let _ = self.cmd_tx.send(InternalTransactionCommand::Terminate);
        if !previous.is_terminated() {
            info!(id = %self.id, "Transaction terminated by owner in state {:?}", previous);
        }
    }
}

impl fmt::Debug for TransactionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state.get())
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

struct ArmedTimer {
    id: u64,
    interval: Duration,
    _timer: Timer,
}

/// Everything a [`TransactionLogic`] may touch while handling one command.
pub(crate) struct TransactionContext {
    data: Arc<TransactionData>,
    timers: HashMap<TimerType, ArmedTimer>,
    next_timer_id: u64,
    reliable: bool,
}

impl TransactionContext {
    pub fn data(&self) -> &Arc<TransactionData> {
        &self.data
    }

    pub fn key(&self) -> &TransactionKey {
        &self.data.id
    }

    pub fn request(&self) -> &Request {
        &self.data.request
    }

    pub fn timer_config(&self) -> &TimerSettings {
        &self.data.timer_config
    }

    pub fn state(&self) -> TransactionState {
        self.data.state.get()
    }

    /// True once a send went out over a connection-oriented leg, or the
    /// seeding request arrived over one.
    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn auto_trying(&self) -> bool {
        self.data.dispatcher.upgrade().map_or(false, |d| d.config().auto_trying)
    }

    pub fn transition(&mut self, to: TransactionState) -> Result<()> {
        let from = self.data.state.transition(to)?;
        debug!(id = %self.data.id, "State transition: {:?} -> {:?}", from, to);
        Ok(())
    }

    /// Arms `timer`, replacing any earlier arming of the same timer.
    pub fn arm(&mut self, timer: TimerType, duration: Duration) {
        self.next_timer_id += 1;
        let id = self.next_timer_id;
        let cmd_tx = self.data.cmd_tx.clone();
        let handle = Timer::schedule(format!("{}/{}", self.data.id, timer), duration, move || {
            let _ = cmd_tx.send(InternalTransactionCommand::Timer { timer, id });
        });
        trace!(id = %self.data.id, timer = %timer, ?duration, "Timer armed");
        self.timers.insert(timer, ArmedTimer { id, interval: duration, _timer: handle });
    }

    pub fn cancel_timer(&mut self, timer: TimerType) {
        if self.timers.remove(&timer).is_some() {
            trace!(id = %self.data.id, timer = %timer, "Timer cancelled");
        }
    }

    pub fn cancel_all_timers(&mut self) {
        self.timers.clear();
    }

    /// Claims a fired timer. Returns its interval, or `None` if the firing
    /// belongs to an arming that was cancelled or replaced since.
    fn claim_fired(&mut self, timer: TimerType, id: u64) -> Option<Duration> {
        match self.timers.get(&timer) {
            Some(armed) if armed.id == id => self.timers.remove(&timer).map(|t| t.interval),
            _ => None,
        }
    }

    /// Sends a message to the remote side through the dispatcher.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let dispatcher = self
            .data
            .dispatcher
            .upgrade()
            .ok_or_else(|| Error::TransportFailure("dispatcher has shut down".into()))?;
        let connection = dispatcher.send(message, self.data.remote_addr).await?;
        self.reliable = connection.is_some();
        Ok(())
    }

    pub fn record_response(&self, response: &Response) {
        *self.data.last_response.lock() = Some(response.clone());
    }

    pub fn last_response(&self) -> Option<Response> {
        self.data.last_response()
    }

    pub fn notify(&self, event: TransactionEvent) {
        self.data.deliver(event);
    }

    /// Moves to `Terminated`, dropping timers, the registration and the
    /// listener.
    pub fn terminate(&mut self) {
        self.cancel_all_timers();
        let previous = self.data.state.set(TransactionState::Terminated);
        self.data.drop_listener();
        if let Some(dispatcher) = self.data.dispatcher.upgrade() {
            dispatcher.unregister_instance(&self.data.id, self.data.instance);
        }
        if !previous.is_terminated() {
            info!(id = %self.data.id, "Transaction terminated from {:?}", previous);
        }
    }

    /// Transport failures surface to the owner as a timeout.
    pub fn fail(&mut self, error: Error) {
        error!(id = %self.data.id, error = %error, "Transport failure, terminating transaction");
        self.notify(TransactionEvent::Timeout { transaction_id: self.data.id.clone() });
        self.terminate();
    }
}

/// Processes commands for one transaction until it terminates.
pub(crate) async fn run_transaction_loop<L: TransactionLogic>(
    mut ctx: TransactionContext,
    mut logic: L,
    mut cmd_rx: mpsc::UnboundedReceiver<InternalTransactionCommand>,
) {
    debug!(id = %ctx.key(), kind = ?logic.kind(), "Transaction loop starting");

    while let Some(command) = cmd_rx.recv().await {
        if ctx.data.is_cancelled() {
            ctx.terminate();
            break;
        }

        let result = match command {
            InternalTransactionCommand::Start => logic.on_start(&mut ctx).await,
            InternalTransactionCommand::ProcessMessage { message, connection } => {
                logic.on_message(&mut ctx, message, connection).await
            }
            InternalTransactionCommand::Timer { timer, id } => match ctx.claim_fired(timer, id) {
                Some(interval) => {
                    debug!(id = %ctx.key(), timer = %timer, "Timer fired in state {:?}", ctx.state());
                    logic.on_timer(&mut ctx, timer, interval).await
                }
                None => {
                    trace!(id = %ctx.key(), timer = %timer, "Ignoring stale timer");
                    Ok(())
                }
            },
            InternalTransactionCommand::Respond(response) => logic.on_respond(&mut ctx, response).await,
            InternalTransactionCommand::Terminate => {
                ctx.terminate();
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!(id = %ctx.key(), error = %e, "Transaction command failed in state {:?}", ctx.state());
        }

        if ctx.state().is_terminated() {
            break;
        }
    }

    ctx.cancel_all_timers();
    debug!(id = %ctx.key(), "Transaction loop ended");
}
