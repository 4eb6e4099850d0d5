use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use siptx_sip_core::{Message, Method, Request, Response, StatusCode};
use siptx_sip_transport::ConnectionId;

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::server::{respond, spawn_server};
use crate::timer::TimerType;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionContext, TransactionData};
use crate::transaction::{transaction_handle, TransactionEvent, TransactionKind, TransactionListener, TransactionState};

/// INVITE server transaction (RFC 3261 section 17.2.1).
///
/// Sending a 2xx terminates the transaction; retransmitting it until the ACK
/// arrives is left to the owner. A 3xx-6xx is retransmitted on Timer G until
/// the ACK arrives or Timer H gives up.
pub struct ServerInviteTransaction {
    data: Arc<TransactionData>,
}

transaction_handle!(ServerInviteTransaction);

impl ServerInviteTransaction {
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        source: SocketAddr,
        connection: Option<ConnectionId>,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        if request.method != Method::Invite {
            return Err(Error::InvalidRequest(format!(
                "{} needs a non-INVITE server transaction",
                request.method
            )));
        }
        let data = spawn_server(dispatcher, request, source, connection, listener, ServerInviteLogic)?;
        Ok(Self { data })
    }

    /// Queues `response` for sending. Fails once a final response was sent.
    pub fn respond_with(&self, response: Response) -> Result<()> {
        respond(&self.data, response)
    }
}

struct ServerInviteLogic;

impl ServerInviteLogic {
    async fn resend_last(ctx: &mut TransactionContext) -> Result<()> {
        match ctx.last_response() {
            Some(last) => ctx.send(Message::Response(last)).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TransactionLogic for ServerInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteServer
    }

    async fn on_start(&mut self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.transition(TransactionState::Trying)?;
        ctx.notify(TransactionEvent::RequestReceived {
            transaction_id: ctx.key().clone(),
            request: ctx.request().clone(),
            source: ctx.data().remote_addr,
        });

        if ctx.auto_trying() && ctx.state() == TransactionState::Trying {
            let trying = Response::for_request(ctx.request(), StatusCode::TRYING);
            ctx.transition(TransactionState::Proceeding)?;
            ctx.record_response(&trying);
            debug!(id = %ctx.key(), "Sending automatic 100 Trying");
            if let Err(e) = ctx.send(Message::Response(trying)).await {
                ctx.fail(e);
            }
        }
        Ok(())
    }

    async fn on_message(
        &mut self,
        ctx: &mut TransactionContext,
        message: Message,
        _connection: Option<ConnectionId>,
    ) -> Result<()> {
        let request = match message {
            Message::Request(request) => request,
            Message::Response(response) => {
                warn!(id = %ctx.key(), "Server transaction ignoring {} response", response.status);
                return Ok(());
            }
        };

        match (request.method, ctx.state()) {
            (Method::Ack, TransactionState::Completed) => {
                info!(id = %ctx.key(), "ACK received for final response");
                ctx.terminate();
            }
            (Method::Ack, state) => {
                trace!(id = %ctx.key(), "Ignoring ACK in state {:?}", state);
            }
            (Method::Invite, TransactionState::Proceeding | TransactionState::Completed) => {
                trace!(id = %ctx.key(), "INVITE retransmitted, resending last response");
                if let Err(e) = Self::resend_last(ctx).await {
                    ctx.fail(e);
                }
            }
            (method, state) => {
                trace!(id = %ctx.key(), "Absorbing {} in state {:?}", method, state);
            }
        }
        Ok(())
    }

    async fn on_timer(&mut self, ctx: &mut TransactionContext, timer: TimerType, interval: Duration) -> Result<()> {
        match timer {
            TimerType::G if ctx.state() == TransactionState::Completed && !ctx.is_reliable() => {
                trace!(id = %ctx.key(), "Timer G: retransmitting final response");
                if let Err(e) = Self::resend_last(ctx).await {
                    ctx.fail(e);
                    return Ok(());
                }
                let next = ctx.timer_config().next_retransmit_interval(interval);
                ctx.arm(TimerType::G, next);
            }
            TimerType::H if ctx.state() == TransactionState::Completed => {
                info!(id = %ctx.key(), "Timer H expired before ACK arrived");
                ctx.terminate();
            }
            other => trace!(id = %ctx.key(), "Timer {} has nothing to do in state {:?}", other, ctx.state()),
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

        debug!(id = %ctx.key(), "Sending {} response", response.status);
        if response.status.is_provisional() {
            if state == TransactionState::Trying {
                ctx.transition(TransactionState::Proceeding)?;
            }
            ctx.record_response(&response);
            if let Err(e) = ctx.send(Message::Response(response)).await {
                ctx.fail(e);
            }
        } else if response.status.is_success() {
            ctx.record_response(&response);
            match ctx.send(Message::Response(response)).await {
                Ok(()) => ctx.terminate(),
                Err(e) => ctx.fail(e),
            }
        } else {
            ctx.transition(TransactionState::Completed)?;
            ctx.record_response(&response);
            if let Err(e) = ctx.send(Message::Response(response)).await {
                ctx.fail(e);
                return Ok(());
            }
            let settings = *ctx.timer_config();
            if !ctx.is_reliable() {
                ctx.arm(TimerType::G, settings.duration(TimerType::G, false));
            }
            ctx.arm(TimerType::H, settings.duration(TimerType::H, ctx.is_reliable()));
        }
        Ok(())
    }
}
