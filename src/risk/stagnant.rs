//! Closes positions that have sat past their allowed age without reaching a
//! minimum favorable distance. Both bounds are strict: a position exactly at
//! the age limit or exactly at the distance floor is left alone.

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::broker::OrderRequest;
use crate::config::StagnantConfig;
use crate::error::BrokerError;
use crate::events::TradingEvent;
use crate::models::{AccountSnapshot, Position, SymbolTable};
use crate::risk::{Priority, RiskContext, RiskHandler};

pub struct StagnantPositionHandler {
    cfg: StagnantConfig,
    symbols: SymbolTable,
}

impl StagnantPositionHandler {
    pub fn new(cfg: StagnantConfig, symbols: SymbolTable) -> Self {
        Self { cfg, symbols }
    }

    fn stagnant<'a>(&self, positions: &'a [Position]) -> Vec<&'a Position> {
        self.stagnant_at(positions, Utc::now())
    }

    fn stagnant_at<'a>(
        &self,
        positions: &'a [Position],
        now: chrono::DateTime<Utc>,
    ) -> Vec<&'a Position> {
        positions
            .iter()
            .filter(|p| {
                let pip_scale = self.symbols.spec(&p.symbol).pip_scale;
                p.age_minutes(now) > self.cfg.max_inactive_minutes
                    && p.distance_pips(pip_scale) < self.cfg.min_profit_pips
            })
            .collect()
    }
}

#[async_trait]
impl RiskHandler for StagnantPositionHandler {
    fn name(&self) -> &'static str {
        "stagnant_positions"
    }

    fn priority(&self) -> Priority {
        Priority::Medium
    }

    fn should_act(&self, _account: &AccountSnapshot, positions: &[Position]) -> bool {
        !self.stagnant(positions).is_empty()
    }

    async fn act(
        &self,
        _account: &AccountSnapshot,
        positions: &[Position],
        ctx: &RiskContext<'_>,
    ) -> Result<bool, BrokerError> {
        let stagnant = self.stagnant(positions);
        if stagnant.is_empty() {
            return Ok(false);
        }

        info!(count = stagnant.len(), "closing stagnant positions");
        let now = Utc::now();
        let mut closed_any = false;

        for position in stagnant {
            match ctx.gateway.close_position(position.ticket, None).await {
                Ok(profit) => {
                    info!(
                        ticket = position.ticket,
                        profit,
                        age_minutes = position.age_minutes(now),
                        "stagnant position closed"
                    );
                    ctx.bus.publish(TradingEvent::StagnantClosed {
                        ticket: position.ticket,
                        age_minutes: position.age_minutes(now),
                    });
                    closed_any = true;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(ticket = position.ticket, error = %e, "stagnant close failed");
                }
            }
        }

        Ok(closed_any)
    }

    fn allows_open(
        &self,
        _account: &AccountSnapshot,
        _positions: &[Position],
        _order: &OrderRequest,
    ) -> bool {
        true
    }
}
