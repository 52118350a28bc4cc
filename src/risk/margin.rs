//! Margin protection: the highest-priority risk handler.
//!
//! When free margin or the margin level falls below its floor, the handler
//! enters a sticky safe state, vetoes all new opens and sheds the most
//! losing positions one by one until the margin level climbs back above the
//! warning threshold. The safe state clears automatically once a later
//! cycle finds the margin level recovered.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use crate::broker::OrderRequest;
use crate::config::MarginConfig;
use crate::error::BrokerError;
use crate::events::{EventBus, TradingEvent};
use crate::models::{AccountSnapshot, Position};
use crate::risk::{Priority, RiskContext, RiskHandler};

pub struct MarginProtector {
    cfg: MarginConfig,
    safe_state: AtomicBool,
    warned: AtomicBool,
}

impl MarginProtector {
    pub fn new(cfg: MarginConfig) -> Self {
        Self {
            cfg,
            safe_state: AtomicBool::new(false),
            warned: AtomicBool::new(false),
        }
    }

    pub fn safe_state_active(&self) -> bool {
        self.safe_state.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskHandler for MarginProtector {
    fn name(&self) -> &'static str {
        "margin_protector"
    }

    fn priority(&self) -> Priority {
        Priority::Highest
    }

    fn observe(&self, account: &AccountSnapshot, _positions: &[Position], bus: &EventBus) {
        let level = account.margin_level;

        if level > self.cfg.warning_margin_level {
            self.warned.store(false, Ordering::SeqCst);
            if self.safe_state.swap(false, Ordering::SeqCst) {
                info!(margin_level = level, "margin recovered, safe state cleared");
                bus.publish(TradingEvent::MarginSafe {
                    margin_level: level,
                });
            }
        } else if level >= self.cfg.critical_margin_level
            && !self.warned.swap(true, Ordering::SeqCst)
        {
            bus.publish(TradingEvent::MarginWarning {
                margin_level: level,
            });
        }
    }

    fn should_act(&self, account: &AccountSnapshot, _positions: &[Position]) -> bool {
        account.free_margin < self.cfg.min_free_margin
            || account.margin_level < self.cfg.critical_margin_level
    }

    async fn act(
        &self,
        account: &AccountSnapshot,
        positions: &[Position],
        ctx: &RiskContext<'_>,
    ) -> Result<bool, BrokerError> {
        if positions.is_empty() {
            return Ok(false);
        }

        self.safe_state.store(true, Ordering::SeqCst);
        warn!(
            free_margin = account.free_margin,
            margin_level = account.margin_level,
            "margin protection engaged, shedding losing positions"
        );
        ctx.bus.publish(TradingEvent::MarginCritical {
            free_margin: account.free_margin,
            margin_level: account.margin_level,
        });

        // Most losing first.
        let mut by_profit: Vec<&Position> = positions.iter().collect();
        by_profit.sort_by(|a, b| a.profit.total_cmp(&b.profit));

        for position in by_profit {
            match ctx.gateway.close_position(position.ticket, None).await {
                Ok(profit) => {
                    info!(
                        ticket = position.ticket,
                        profit, "position closed for margin protection"
                    );
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(ticket = position.ticket, error = %e, "margin close failed");
                    continue;
                }
            }

            let refreshed = ctx.gateway.get_account_info().await?;
            if refreshed.margin_level > self.cfg.warning_margin_level {
                info!(
                    margin_level = refreshed.margin_level,
                    "margin level back above warning threshold"
                );
                break;
            }
        }

        Ok(true)
    }

    fn allows_open(
        &self,
        account: &AccountSnapshot,
        _positions: &[Position],
        _order: &OrderRequest,
    ) -> bool {
        if self.safe_state_active() {
            return false;
        }
        if account.free_margin < self.cfg.min_free_margin {
            return false;
        }
        if account.margin_level < self.cfg.warning_margin_level {
            return false;
        }
        true
    }
}
