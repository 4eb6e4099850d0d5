use std::time::Duration;

use async_trait::async_trait;

use siptx_sip_core::{Message, Response};
use siptx_sip_transport::ConnectionId;

use crate::error::{Error, Result};
use crate::timer::TimerType;
use crate::transaction::runner::TransactionContext;
use crate::transaction::{TransactionKind, TransactionState};

/// The behaviour that distinguishes the four state machines.
///
/// The runner serializes every call, so implementations may mutate state
/// freely without further locking.
#[async_trait]
pub(crate) trait TransactionLogic: Send + 'static {
    fn kind(&self) -> TransactionKind;

    async fn on_start(&mut self, ctx: &mut TransactionContext) -> Result<()>;

    async fn on_message(
        &mut self,
        ctx: &mut TransactionContext,
        message: Message,
        connection: Option<ConnectionId>,
    ) -> Result<()>;

    /// `interval` is the duration the fired timer was armed with.
    async fn on_timer(&mut self, ctx: &mut TransactionContext, timer: TimerType, interval: Duration) -> Result<()>;

    async fn on_respond(&mut self, ctx: &mut TransactionContext, _response: Response) -> Result<()> {
        Err(Error::InvalidStateTransition {
            from: ctx.state(),
            to: TransactionState::Completed,
        })
    }
}
