//! Prioritized risk-handler pipeline.
//!
//! Handlers are evaluated in descending priority on every control cycle.
//! Each handler answers three questions: does it need to act, what does it
//! do, and does it allow a prospective new order. Any handler refusing an
//! open blocks the submission. Handlers re-read account and store state
//! between invocations, so an acting handler that removed a lower-priority
//! handler's precondition suppresses that handler in the same cycle.

pub mod margin;
pub mod profit_target;
pub mod stagnant;

pub use margin::MarginProtector;
pub use profit_target::ProfitTargetHandler;
pub use stagnant::StagnantPositionHandler;

use async_trait::async_trait;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{BrokerGateway, OrderRequest};
use crate::error::BrokerError;
use crate::events::{EventBus, TradingEvent};
use crate::models::{AccountSnapshot, Position};
use crate::positions::PositionStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Lowest,
    Low,
    Medium,
    High,
    Highest,
}

pub struct RiskContext<'a> {
    pub gateway: &'a BrokerGateway,
    pub store: &'a PositionStore,
    pub bus: &'a EventBus,
}

#[async_trait]
pub trait RiskHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> Priority;

    /// Per-cycle bookkeeping that runs whether or not the handler acts
    /// (e.g. clearing a latched state once conditions recover).
    fn observe(&self, _account: &AccountSnapshot, _positions: &[Position], _bus: &EventBus) {}

    fn should_act(&self, account: &AccountSnapshot, positions: &[Position]) -> bool;

    /// Performs the handler's mandatory action. Returns whether anything
    /// changed (positions closed, orders modified).
    async fn act(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        ctx: &RiskContext<'_>,
    ) -> Result<bool, BrokerError>;

    /// Consulted before every new order; returning false blocks it.
    fn allows_open(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        order: &OrderRequest,
    ) -> bool;
}

#[derive(Default)]
pub struct RiskPipeline {
    handlers: Vec<Arc<dyn RiskHandler>>,
}

impl RiskPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn RiskHandler>) {
        self.handlers.push(handler);
        // Stable: same-priority handlers keep registration order.
        self.handlers.sort_by_key(|h| Reverse(h.priority()));
    }

    /// Runs every handler in priority order. Account and position snapshots
    /// are refreshed after each acting handler.
    pub async fn evaluate(
        &self,
        mut account: AccountSnapshot,
        ctx: &RiskContext<'_>,
    ) -> Result<(), BrokerError> {
        let mut positions = ctx.store.positions();

        for handler in &self.handlers {
            handler.observe(&account, &positions, ctx.bus);

            if !handler.should_act(&account, &positions) {
                continue;
            }

            info!(handler = handler.name(), "risk handler acting");
            match handler.act(&account, &positions, ctx).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    // The pending action is abandoned for this cycle and
                    // retried on the next one if still applicable.
                    warn!(handler = handler.name(), error = %e, "risk action failed");
                    ctx.bus.publish(TradingEvent::Error {
                        source: handler.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }

            account = ctx.gateway.get_account_info().await?;
            positions = ctx.store.positions();
        }

        Ok(())
    }

    /// Returns the first handler that refuses the order, if any.
    pub fn first_denier(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        order: &OrderRequest,
    ) -> Option<&'static str> {
        self.handlers
            .iter()
            .find(|h| !h.allows_open(account, positions, order))
            .map(|h| h.name())
    }
}
