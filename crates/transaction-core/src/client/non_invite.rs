use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use siptx_sip_core::{Message, Method, Request};
use siptx_sip_transport::ConnectionId;

use crate::client::{spawn_client, start_client};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionContext, TransactionData};
use crate::transaction::{transaction_handle, TransactionEvent, TransactionKind, TransactionListener, TransactionState};

/// Client transaction for any method other than INVITE and ACK
/// (RFC 3261 section 17.1.2).
pub struct ClientNonInviteTransaction {
    data: Arc<TransactionData>,
}

transaction_handle!(ClientNonInviteTransaction);

impl Drop for ClientNonInviteTransaction {
    fn drop(&mut self) {
        self.data.release_unstarted();
    }
}

impl ClientNonInviteTransaction {
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        destination: SocketAddr,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        if request.method == Method::Invite {
            return Err(Error::InvalidRequest("INVITE needs an INVITE client transaction".into()));
        }
        let data = spawn_client(dispatcher, request, destination, listener, ClientNonInviteLogic)?;
        Ok(Self { data })
    }

    /// Registers the transaction and sends the request.
    pub fn start(&self) -> Result<()> {
        start_client(&self.data)
    }
}

struct ClientNonInviteLogic;

impl ClientNonInviteLogic {
    async fn send_request(ctx: &mut TransactionContext) -> Result<()> {
        let request = ctx.request().clone();
        ctx.send(Message::Request(request)).await
    }
}

#[async_trait]
impl TransactionLogic for ClientNonInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::NonInviteClient
    }

    async fn on_start(&mut self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.transition(TransactionState::Trying)?;
        debug!(id = %ctx.key(), "Sending {} request", ctx.request().method);
        if let Err(e) = Self::send_request(ctx).await {
            ctx.fail(e);
            return Ok(());
        }

        let settings = *ctx.timer_config();
        if !ctx.is_reliable() {
            ctx.arm(TimerType::E, settings.duration(TimerType::E, false));
        }
        ctx.arm(TimerType::F, settings.duration(TimerType::F, ctx.is_reliable()));
        Ok(())
    }

    async fn on_message(
        &mut self,
        ctx: &mut TransactionContext,
        message: Message,
        _connection: Option<ConnectionId>,
    ) -> Result<()> {
        let response = match message {
            Message::Response(response) => response,
            Message::Request(request) => {
                warn!(id = %ctx.key(), "Client transaction ignoring {} request", request.method);
                return Ok(());
            }
        };

        match ctx.state() {
            TransactionState::Trying | TransactionState::Proceeding => {}
            TransactionState::Completed => {
                trace!(id = %ctx.key(), "Absorbing retransmitted {} response", response.status);
                return Ok(());
            }
            state => {
                trace!(id = %ctx.key(), "Ignoring {} response in state {:?}", response.status, state);
                return Ok(());
            }
        }

        let transaction_id = ctx.key().clone();
        if response.status.is_provisional() {
            if ctx.state() == TransactionState::Trying {
                ctx.cancel_timer(TimerType::E);
                ctx.transition(TransactionState::Proceeding)?;
            }
            ctx.record_response(&response);
            ctx.notify(TransactionEvent::ProvisionalResponse { transaction_id, response });
            return Ok(());
        }

        ctx.cancel_timer(TimerType::E);
        ctx.cancel_timer(TimerType::F);
        ctx.transition(TransactionState::Completed)?;
        ctx.record_response(&response);
        debug!(id = %transaction_id, "Received final {} response", response.status);

        let event = if response.status.is_success() {
            TransactionEvent::SuccessResponse { transaction_id, response }
        } else {
            TransactionEvent::FailureResponse { transaction_id, response }
        };
        ctx.notify(event);

        let wait = ctx.timer_config().duration(TimerType::K, ctx.is_reliable());
        if wait.is_zero() {
            ctx.terminate();
        } else {
            ctx.arm(TimerType::K, wait);
        }
        Ok(())
    }

    async fn on_timer(&mut self, ctx: &mut TransactionContext, timer: TimerType, interval: Duration) -> Result<()> {
        match timer {
            TimerType::E if ctx.state() == TransactionState::Trying => {
                trace!(id = %ctx.key(), "Timer E: retransmitting request");
                if let Err(e) = Self::send_request(ctx).await {
                    ctx.fail(e);
                    return Ok(());
                }
                let next = ctx.timer_config().next_retransmit_interval(interval);
                ctx.arm(TimerType::E, next);
            }
            TimerType::F if ctx.state().is_pending() => {
                info!(id = %ctx.key(), "Timer F expired without a final response");
                ctx.notify(TransactionEvent::Timeout {
                    transaction_id: ctx.key().clone(),
                });
                ctx.terminate();
            }
            TimerType::K => ctx.terminate(),
            other => trace!(id = %ctx.key(), "Timer {} has nothing to do in state {:?}", other, ctx.state()),
        }
        Ok(())
    }
}
