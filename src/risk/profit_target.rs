//! Account-wide profit target: banks the gain once aggregate open profit
//! reaches the configured share of the balance.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::broker::OrderRequest;
use crate::config::ProfitTargetConfig;
use crate::error::BrokerError;
use crate::events::TradingEvent;
use crate::models::{AccountSnapshot, Position};
use crate::risk::{Priority, RiskContext, RiskHandler};

pub struct ProfitTargetHandler {
    cfg: ProfitTargetConfig,
    magic: i64,
}

impl ProfitTargetHandler {
    pub fn new(cfg: ProfitTargetConfig, magic: i64) -> Self {
        Self { cfg, magic }
    }

    fn target(&self, account: &AccountSnapshot) -> f64 {
        account.balance * self.cfg.profit_target_percent / 100.0
    }

    fn total_profit(positions: &[Position]) -> f64 {
        positions.iter().map(|p| p.profit).sum()
    }

    fn target_met(&self, account: &AccountSnapshot, positions: &[Position]) -> bool {
        !positions.is_empty() && Self::total_profit(positions) >= self.target(account)
    }
}

#[async_trait]
impl RiskHandler for ProfitTargetHandler {
    fn name(&self) -> &'static str {
        "profit_target"
    }

    fn priority(&self) -> Priority {
        Priority::High
    }

    fn should_act(&self, account: &AccountSnapshot, positions: &[Position]) -> bool {
        self.target_met(account, positions)
    }

    async fn act(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        ctx: &RiskContext<'_>,
    ) -> Result<bool, BrokerError> {
        let total_profit = Self::total_profit(positions);
        let target = self.target(account);
        info!(total_profit, target, "profit target reached, closing all positions");
        ctx.bus.publish(TradingEvent::ProfitTargetReached {
            total_profit,
            target,
        });

        // Best performers bank first.
        let mut by_profit: Vec<&Position> = positions.iter().collect();
        by_profit.sort_by(|a, b| b.profit.total_cmp(&a.profit));

        let mut closed_any = false;
        let mut failed = 0u32;
        for position in by_profit {
            match ctx.gateway.close_position(position.ticket, None).await {
                Ok(profit) => {
                    info!(ticket = position.ticket, profit, "position closed at target");
                    closed_any = true;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(ticket = position.ticket, error = %e, "target close failed");
                    failed += 1;
                }
            }
        }

        // Sweep whatever the individual closes left behind, filtered to this
        // engine's own positions.
        if failed > 0 {
            match ctx
                .gateway
                .close_all_positions(None, Some(self.magic))
                .await
            {
                Ok(report) => {
                    info!(
                        closed = report.closed_positions,
                        total_profit = report.total_profit,
                        "remaining positions swept"
                    );
                    closed_any = closed_any || report.closed_positions > 0;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "close-all sweep failed"),
            }
        }

        Ok(closed_any)
    }

    /// No new opens while the close-out wave is due.
    fn allows_open(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        _order: &OrderRequest,
    ) -> bool {
        !self.target_met(account, positions)
    }
}
