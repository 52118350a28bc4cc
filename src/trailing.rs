//! Per-position trailing-stop state machine.
//!
//! A position starts `Inactive`, arms once its favorable distance reaches
//! the activation threshold, and from then on ratchets its stop loss behind
//! the current price. The anchor records the last stop loss the broker
//! acknowledged; a failed modify leaves the anchor untouched so the update
//! is retried on the next cycle. Trailing never widens a stop.

use std::collections::HashMap;
use tracing::{debug, warn};

use crate::broker::BrokerGateway;
use crate::config::TrailingConfig;
use crate::events::{EventBus, TradingEvent};
use crate::models::{Position, Side, SymbolTable};
use crate::positions::PositionStore;

#[derive(Debug, Clone, Copy, PartialEq)]
enum TrailingState {
    Inactive,
    Armed { anchor: Option<f64> },
}

pub struct TrailingManager {
    cfg: TrailingConfig,
    states: HashMap<u64, TrailingState>,
}

impl TrailingManager {
    pub fn new(cfg: TrailingConfig) -> Self {
        Self {
            cfg,
            states: HashMap::new(),
        }
    }

    /// Recomputes trailing stops for every live position. Positions that
    /// disappeared since the last cycle have their state discarded.
    pub async fn update(
        &mut self,
        symbols: &SymbolTable,
        positions: &[Position],
        gateway: &BrokerGateway,
        store: &PositionStore,
        bus: &EventBus,
    ) {
        let live: std::collections::HashSet<u64> = positions.iter().map(|p| p.ticket).collect();
        self.states.retain(|ticket, _| live.contains(ticket));

        for position in positions {
            self.update_position(symbols, position, gateway, store, bus)
                .await;
        }
    }

    async fn update_position(
        &mut self,
        symbols: &SymbolTable,
        position: &Position,
        gateway: &BrokerGateway,
        store: &PositionStore,
        bus: &EventBus,
    ) {
        let spec = symbols.spec(&position.symbol);
        let distance_pips = position.distance_pips(spec.pip_scale);

        let state = self
            .states
            .entry(position.ticket)
            .or_insert(TrailingState::Inactive);

        if matches!(state, TrailingState::Inactive) {
            if distance_pips < self.cfg.activation_distance_pips {
                return;
            }
            *state = TrailingState::Armed { anchor: None };
            debug!(
                ticket = position.ticket,
                distance_pips, "trailing armed"
            );
        }

        let anchor = match state {
            TrailingState::Armed { anchor } => *anchor,
            TrailingState::Inactive => unreachable!("armed above"),
        };

        let trail = spec.pips_to_price(self.cfg.distance_pips);
        let candidate = spec.round_price(match position.side {
            Side::Buy => position.current_price - trail,
            Side::Sell => position.current_price + trail,
        });

        // Only a strict improvement moves the stop; it never widens.
        let improves = match position.stop_loss {
            Some(sl) => match position.side {
                Side::Buy => candidate > sl,
                Side::Sell => candidate < sl,
            },
            None => true,
        };
        if !improves {
            return;
        }

        // The broker already holds this level from a previous cycle.
        if let Some(anchor) = anchor {
            if (anchor - candidate).abs() < spec.pip_scale / 10.0 {
                return;
            }
        }

        match gateway
            .modify_position(position.ticket, Some(candidate), position.take_profit)
            .await
        {
            Ok(()) => {
                self.states.insert(
                    position.ticket,
                    TrailingState::Armed {
                        anchor: Some(candidate),
                    },
                );
                store.record_stop_loss(position.ticket, candidate);
                bus.publish(TradingEvent::TrailingUpdated {
                    ticket: position.ticket,
                    stop_loss: candidate,
                });
            }
            Err(e) => {
                // Anchor stays at the last acknowledged level; retried on
                // the next cycle if still applicable.
                warn!(
                    ticket = position.ticket,
                    candidate,
                    error = %e,
                    "trailing modify failed"
                );
            }
        }
    }

    #[cfg(test)]
    fn tracked_count(&self) -> usize {
        self.states.len()
    }
}
