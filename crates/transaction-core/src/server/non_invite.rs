use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace, warn};

use siptx_sip_core::{Message, Method, Request, Response};
use siptx_sip_transport::ConnectionId;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::server::{respond, spawn_server};
use crate::timer::TimerType;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionContext, TransactionData};
use crate::transaction::{transaction_handle, TransactionEvent, TransactionKind, TransactionListener, TransactionState};

/// Server transaction for any method other than INVITE and ACK
/// (RFC 3261 section 17.2.2).
pub struct ServerNonInviteTransaction {
    data: Arc<TransactionData>,
}

transaction_handle!(ServerNonInviteTransaction);

impl ServerNonInviteTransaction {
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        source: SocketAddr,
        connection: Option<ConnectionId>,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        if request.method == Method::Invite {
            return Err(Error::InvalidRequest("INVITE needs an INVITE server transaction".into()));
        }
        let data = spawn_server(dispatcher, request, source, connection, listener, ServerNonInviteLogic)?;
        Ok(Self { data })
    }

    /// Queues `response` for sending. Fails once a final response was sent.
    pub fn respond_with(&self, response: Response) -> Result<()> {
        respond(&self.data, response)
    }
}

struct ServerNonInviteLogic;

#[async_trait]
impl TransactionLogic for ServerNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteServer
    }

    async fn on_start(&mut self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.transition(TransactionState::Trying)?;
        ctx.notify(TransactionEvent::RequestReceived {
            transaction_id: ctx.key().clone(),
            request: ctx.request().clone(),
            source: ctx.data().remote_addr,
        });
        Ok(())
    }

    async fn on_message(
        &mut self,
        ctx: &mut TransactionContext,
        message: Message,
        _connection: Option<ConnectionId>,
    ) -> Result<()> {
        if let Message::Response(response) = message {
            warn!(id = %ctx.key(), "Server transaction ignoring {} response", response.status);
            return Ok(());
        }

        match (ctx.state(), ctx.last_response()) {
            (TransactionState::Proceeding | TransactionState::Completed, Some(last)) => {
                trace!(id = %ctx.key(), "Request retransmitted, resending {} response", last.status);
                if let Err(e) = ctx.send(Message::Response(last)).await {
                    ctx.fail(e);
                }
            }
            (state, _) => trace!(id = %ctx.key(), "Absorbing retransmitted request in state {:?}", state),
        }
        Ok(())
    }

    async fn on_timer(&mut self, ctx: &mut TransactionContext, timer: TimerType, _interval: Duration) -> Result<()> {
        if timer == TimerType::J {
            ctx.terminate();
        }
        Ok(())
    }

    async fn on_respond(&mut self, ctx: &mut TransactionContext, response: Response) -> Result<()> {
        let state = ctx.state();
        if !state.is_pending() {
            return Err(Error::InvalidStateTransition {
                from: state,
                to: TransactionState::Completed,
            });
        }

        let is_final = response.status.is_final();
        if is_final {
            ctx.transition(TransactionState::Completed)?;
        } else if state == TransactionState::Trying {
            ctx.transition(TransactionState::Proceeding)?;
        }

        debug!(id = %ctx.key(), "Sending {} response", response.status);
        ctx.record_response(&response);
        if let Err(e) = ctx.send(Message::Response(response)).await {
            ctx.fail(e);
            return Ok(());
        }

        if is_final {
            let wait = ctx.timer_config().duration(TimerType::J, ctx.is_reliable());
            if wait.is_zero() {
                ctx.terminate();
            } else {
                ctx.arm(TimerType::J, wait);
            }
        }
        Ok(())
    }
}
