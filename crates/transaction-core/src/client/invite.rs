use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};

use siptx_sip_core::{Message, Method, Request, Response};
use siptx_sip_transport::ConnectionId;

use crate::client::{spawn_client, start_client};
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::logic::TransactionLogic;
use crate::transaction::runner::{TransactionContext, TransactionData};
use crate::transaction::{transaction_handle, TransactionEvent, TransactionKind, TransactionListener, TransactionState};

/// INVITE client transaction (RFC 3261 section 17.1.1).
///
/// A 2xx ends the transaction at once; acknowledging it is the owner's job.
/// Non-2xx final responses are acknowledged here.
pub struct ClientInviteTransaction {
    data: Arc<TransactionData>,
}

transaction_handle!(ClientInviteTransaction);

impl Drop for ClientInviteTransaction {
    fn drop(&mut self) {
        self.data.release_unstarted();
    }
}

impl ClientInviteTransaction {
    pub fn new(
        dispatcher: &Dispatcher,
        request: Request,
        destination: SocketAddr,
        listener: Option<Arc<dyn TransactionListener>>,
    ) -> Result<Self> {
        if request.method != Method::Invite {
            return Err(Error::InvalidRequest(format!(
                "{} needs a non-INVITE client transaction",
                request.method
            )));
        }
        let data = spawn_client(dispatcher, request, destination, listener, ClientInviteLogic::default())?;
        Ok(Self { data })
    }

    /// Registers the transaction and sends the INVITE.
    pub fn start(&self) -> Result<()> {
        start_client(&self.data)
    }
}

#[derive(Default)]
struct ClientInviteLogic {
    /// ACK for the non-2xx final response, kept for retransmission
    ack: Option<Request>,
}

impl ClientInviteLogic {
    async fn send_request(ctx: &mut TransactionContext) -> Result<()> {
        let request = ctx.request().clone();
        ctx.send(Message::Request(request)).await
    }

    async fn on_final_failure(&mut self, ctx: &mut TransactionContext, response: Response) -> Result<()> {
        ctx.cancel_timer(TimerType::A);
        ctx.cancel_timer(TimerType::B);

        let ack = match Request::non_2xx_ack(ctx.request(), &response) {
            Ok(ack) => Some(ack),
            Err(e) => {
                warn!(id = %ctx.key(), error = %e, "Cannot build ACK for {} response", response.status);
                None
            }
        };

        ctx.transition(TransactionState::Completed)?;
        ctx.record_response(&response);

        let ack_result = match &ack {
            Some(ack) => ctx.send(Message::Request(ack.clone())).await,
            None => Ok(()),
        };
        self.ack = ack;

        ctx.notify(TransactionEvent::FailureResponse {
            transaction_id: ctx.key().clone(),
            response,
        });

        if let Err(e) = ack_result {
            error!(id = %ctx.key(), error = %e, "Failed to send ACK, terminating transaction");
            ctx.terminate();
        } else if ctx.is_reliable() {
            ctx.terminate();
        } else {
            let wait = ctx.timer_config().duration(TimerType::D, false);
            ctx.arm(TimerType::D, wait);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLogic for ClientInviteLogic {
    fn kind(&self) -> TransactionKind {
        TransactionKind::InviteClient
    }

    async fn on_start(&mut self, ctx: &mut TransactionContext) -> Result<()> {
        ctx.transition(TransactionState::Trying)?;
        debug!(id = %ctx.key(), "Sending INVITE request");
        if let Err(e) = Self::send_request(ctx).await {
            ctx.fail(e);
            return Ok(());
        }

        let settings = *ctx.timer_config();
        if !ctx.is_reliable() {
            ctx.arm(TimerType::A, settings.duration(TimerType::A, false));
        }
        ctx.arm(TimerType::B, settings.duration(TimerType::B, ctx.is_reliable()));
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
            TransactionState::Completed if response.status.is_failure() => {
                // The server missed our ACK
                if ctx.is_reliable() {
                    return Ok(());
                }
                if let Some(ack) = self.ack.clone() {
                    trace!(id = %ctx.key(), "Retransmitting ACK for repeated {} response", response.status);
                    if let Err(e) = ctx.send(Message::Request(ack)).await {
                        error!(id = %ctx.key(), error = %e, "Failed to resend ACK, terminating transaction");
                        ctx.terminate();
                    }
                }
                return Ok(());
            }
            state => {
                trace!(id = %ctx.key(), "Ignoring {} response in state {:?}", response.status, state);
                return Ok(());
            }
        }

        if response.status.is_provisional() {
            // Retransmission stops; Timer B still bounds the wait for a final response
            ctx.cancel_timer(TimerType::A);
            if ctx.state() == TransactionState::Trying {
                ctx.transition(TransactionState::Proceeding)?;
            }
            ctx.record_response(&response);
            ctx.notify(TransactionEvent::ProvisionalResponse {
                transaction_id: ctx.key().clone(),
                response,
            });
        } else if response.status.is_success() {
            ctx.cancel_all_timers();
            ctx.record_response(&response);
            info!(id = %ctx.key(), "INVITE accepted with {}", response.status);
            ctx.notify(TransactionEvent::SuccessResponse {
                transaction_id: ctx.key().clone(),
                response,
            });
            ctx.terminate();
        } else {
            self.on_final_failure(ctx, response).await?;
        }
        Ok(())
    }

    async fn on_timer(&mut self, ctx: &mut TransactionContext, timer: TimerType, interval: Duration) -> Result<()> {
        match timer {
            TimerType::A if ctx.state() == TransactionState::Trying => {
                trace!(id = %ctx.key(), "Timer A: retransmitting INVITE");
                if let Err(e) = Self::send_request(ctx).await {
                    ctx.fail(e);
                    return Ok(());
                }
                let next = ctx.timer_config().next_retransmit_interval(interval);
                ctx.arm(TimerType::A, next);
            }
            TimerType::B if ctx.state().is_pending() => {
                info!(id = %ctx.key(), "Timer B expired without a final response");
                ctx.notify(TransactionEvent::Timeout {
                    transaction_id: ctx.key().clone(),
                });
                ctx.terminate();
            }
            TimerType::D => ctx.terminate(),
            other => trace!(id = %ctx.key(), "Timer {} has nothing to do in state {:?}", other, ctx.state()),
        }
        Ok(())
    }
}
