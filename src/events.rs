//! Typed trading events fanned out to registered observers.
//!
//! Delivery is synchronous on the publisher's task, in registration order.
//! A panicking listener is isolated: the failure is logged and the remaining
//! listeners still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

use crate::models::Position;
use crate::volatility::VolatilityClass;

#[derive(Debug, Clone, PartialEq)]
pub enum TradingEvent {
    PositionOpened(Position),
    PositionClosed {
        position: Position,
        profit: f64,
    },
    PositionModified(Position),
    PositionGrouped {
        ticket: u64,
        group_id: String,
    },
    TrailingUpdated {
        ticket: u64,
        stop_loss: f64,
    },
    ScalingTriggered {
        group_id: String,
        level: u32,
        opened: u32,
    },
    ScalingCompleted {
        group_id: String,
    },
    VolatilityChanged {
        symbol: String,
        from: VolatilityClass,
        to: VolatilityClass,
        atr_pips: f64,
    },
    MarginWarning {
        margin_level: f64,
    },
    MarginCritical {
        free_margin: f64,
        margin_level: f64,
    },
    MarginSafe {
        margin_level: f64,
    },
    ProfitTargetReached {
        total_profit: f64,
        target: f64,
    },
    StagnantClosed {
        ticket: u64,
        age_minutes: f64,
    },
    Error {
        source: String,
        message: String,
    },
}

impl TradingEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            TradingEvent::PositionOpened(_) => "position_opened",
            TradingEvent::PositionClosed { .. } => "position_closed",
            TradingEvent::PositionModified(_) => "position_modified",
            TradingEvent::PositionGrouped { .. } => "position_grouped",
            TradingEvent::TrailingUpdated { .. } => "trailing_updated",
            TradingEvent::ScalingTriggered { .. } => "scaling_triggered",
            TradingEvent::ScalingCompleted { .. } => "scaling_completed",
            TradingEvent::VolatilityChanged { .. } => "volatility_changed",
            TradingEvent::MarginWarning { .. } => "margin_warning",
            TradingEvent::MarginCritical { .. } => "margin_critical",
            TradingEvent::MarginSafe { .. } => "margin_safe",
            TradingEvent::ProfitTargetReached { .. } => "profit_target_reached",
            TradingEvent::StagnantClosed { .. } => "stagnant_closed",
            TradingEvent::Error { .. } => "error",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &TradingEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Observer registry with copy-on-read snapshots, so listeners can be
/// registered or removed while a publish is in flight.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<(u64, Arc<dyn EventListener>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EventListener>) -> ListenerId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .push((id, listener));
        ListenerId(id)
    }

    pub fn unsubscribe(&self, id: ListenerId) {
        self.listeners
            .write()
            .expect("listener registry poisoned")
            .retain(|(lid, _)| *lid != id.0);
    }

    pub fn publish(&self, event: TradingEvent) {
        let snapshot: Vec<(u64, Arc<dyn EventListener>)> = self
            .listeners
            .read()
            .expect("listener registry poisoned")
            .clone();

        for (id, listener) in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if outcome.is_err() {
                warn!(
                    listener = id,
                    event = event.kind(),
                    "event listener panicked; continuing delivery"
                );
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .expect("listener registry poisoned")
            .len()
    }
}

/// Default sink that renders every event to the log.
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&self, event: &TradingEvent) {
        match event {
            TradingEvent::PositionOpened(p) => {
                info!(
                    ticket = p.ticket,
                    symbol = %p.symbol,
                    side = %p.side,
                    volume = p.volume,
                    price = p.open_price,
                    "position opened"
                );
            }
            TradingEvent::PositionClosed { position, profit } => {
                info!(
                    ticket = position.ticket,
                    symbol = %position.symbol,
                    profit,
                    "position closed"
                );
            }
            TradingEvent::PositionModified(p) => {
                info!(
                    ticket = p.ticket,
                    sl = ?p.stop_loss,
                    tp = ?p.take_profit,
                    "position levels modified"
                );
            }
            TradingEvent::PositionGrouped { ticket, group_id } => {
                info!(ticket, group = %group_id, "position grouped");
            }
            TradingEvent::TrailingUpdated { ticket, stop_loss } => {
                info!(ticket, stop_loss, "trailing stop advanced");
            }
            TradingEvent::ScalingTriggered {
                group_id,
                level,
                opened,
            } => {
                info!(group = %group_id, level, opened, "scaling step executed");
            }
            TradingEvent::ScalingCompleted { group_id } => {
                info!(group = %group_id, "scaling plan completed");
            }
            TradingEvent::VolatilityChanged {
                symbol,
                from,
                to,
                atr_pips,
            } => {
                info!(%symbol, %from, %to, atr_pips, "volatility class changed");
            }
            TradingEvent::MarginWarning { margin_level } => {
                warn!(margin_level, "margin level below warning threshold");
            }
            TradingEvent::MarginCritical {
                free_margin,
                margin_level,
            } => {
                warn!(free_margin, margin_level, "margin protection engaged");
            }
            TradingEvent::MarginSafe { margin_level } => {
                info!(margin_level, "margin level recovered");
            }
            TradingEvent::ProfitTargetReached {
                total_profit,
                target,
            } => {
                info!(total_profit, target, "profit target reached");
            }
            TradingEvent::StagnantClosed {
                ticket,
                age_minutes,
            } => {
                info!(ticket, age_minutes, "stagnant position closed");
            }
            TradingEvent::Error { source, message } => {
                warn!(%source, %message, "component error");
            }
        }
    }
}
