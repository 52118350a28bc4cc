//! Authoritative local view of open positions and scaling groups.
//!
//! The store exclusively owns every `Position` and `Group` record behind one
//! reader-writer lock; other components get cloned snapshots or ticket
//! handles. Reconciliation against the broker position list is the only
//! source of truth for position existence.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PositionLimitsConfig;
use crate::error::BrokerError;
use crate::events::{EventBus, TradingEvent};
use crate::models::{Position, Side};

/// A set of positions opened by one scaling plan on one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub base_volume: f64,
    pub tickets: BTreeSet<u64>,
}

/// Why a new position may not be opened right now.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenDenied {
    TotalLimit { open: usize, max: usize },
    SymbolLimit { symbol: String, open: usize, max: usize },
    GroupLimit { group_id: String, open: usize, max: usize },
}

impl fmt::Display for OpenDenied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenDenied::TotalLimit { open, max } => {
                write!(f, "total open positions at limit ({open}/{max})")
            }
            OpenDenied::SymbolLimit { symbol, open, max } => {
                write!(f, "open positions for {symbol} at limit ({open}/{max})")
            }
            OpenDenied::GroupLimit { group_id, open, max } => {
                write!(f, "group {group_id} at limit ({open}/{max})")
            }
        }
    }
}

#[derive(Default)]
struct Inner {
    positions: HashMap<u64, Position>,
    groups: HashMap<String, Group>,
}

pub struct PositionStore {
    inner: RwLock<Inner>,
    limits: PositionLimitsConfig,
    bus: Arc<EventBus>,
}

impl PositionStore {
    pub fn new(limits: PositionLimitsConfig, bus: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            limits,
            bus,
        }
    }

    /// Applies the broker's current position list. Classifies every row by
    /// ticket: unknown rows are inserted, known rows have their mutable
    /// fields updated, and previously known tickets that are now absent are
    /// removed (and detached from their group). Events are published after
    /// the write lock is released, in classification order.
    pub fn reconcile(&self, rows: Vec<Position>) -> Result<(), BrokerError> {
        let mut seen = HashSet::with_capacity(rows.len());
        for row in &rows {
            if !seen.insert(row.ticket) {
                return Err(BrokerError::Invariant(format!(
                    "broker reported ticket {} twice in one snapshot",
                    row.ticket
                )));
            }
        }

        let mut events = Vec::new();
        {
            let mut inner = self.inner.write().expect("position store poisoned");

            let mut vanished: HashSet<u64> = inner.positions.keys().copied().collect();

            for mut row in rows {
                vanished.remove(&row.ticket);

                if let Some(existing) = inner.positions.get_mut(&row.ticket) {
                    let levels_changed = existing.stop_loss != row.stop_loss
                        || existing.take_profit != row.take_profit;

                    existing.stop_loss = row.stop_loss;
                    existing.take_profit = row.take_profit;
                    existing.current_price = row.current_price;
                    existing.profit = row.profit;
                    existing.volume = row.volume;

                    if levels_changed {
                        events.push(TradingEvent::PositionModified(existing.clone()));
                    }
                    if !existing.levels_consistent() {
                        warn!(
                            ticket = existing.ticket,
                            sl = ?existing.stop_loss,
                            tp = ?existing.take_profit,
                            price = existing.current_price,
                            "position levels inconsistent with current price"
                        );
                    }
                } else {
                    row.group_id = None;
                    events.push(TradingEvent::PositionOpened(row.clone()));
                    inner.positions.insert(row.ticket, row);
                }
            }

            for ticket in vanished {
                if let Some(closed) = inner.positions.remove(&ticket) {
                    if let Some(group_id) = closed.group_id.clone() {
                        Self::remove_from_group(&mut inner, ticket, &group_id);
                    }
                    let profit = closed.profit;
                    events.push(TradingEvent::PositionClosed {
                        position: closed,
                        profit,
                    });
                }
            }
        }

        for event in events {
            self.bus.publish(event);
        }
        Ok(())
    }

    fn remove_from_group(inner: &mut Inner, ticket: u64, group_id: &str) {
        let mut destroy = false;
        if let Some(group) = inner.groups.get_mut(group_id) {
            group.tickets.remove(&ticket);
            destroy = group.tickets.is_empty();
        }
        if destroy {
            inner.groups.remove(group_id);
            info!(group = group_id, "group destroyed (last member closed)");
        }
    }

    /// Creates an empty group and returns its collision-free id.
    pub fn create_group(&self, symbol: &str, side: Side, base_volume: f64) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}_{}", symbol, &suffix[..8]);

        let mut inner = self.inner.write().expect("position store poisoned");
        inner.groups.insert(
            id.clone(),
            Group {
                id: id.clone(),
                symbol: symbol.to_string(),
                side,
                base_volume,
                tickets: BTreeSet::new(),
            },
        );
        info!(group = %id, symbol, %side, base_volume, "group created");
        id
    }

    /// Attaches a position to a group. Returns false when the ticket does
    /// not exist, is already grouped, or the group is unknown.
    pub fn attach(&self, ticket: u64, group_id: &str) -> bool {
        let attached = {
            let mut inner = self.inner.write().expect("position store poisoned");

            if !inner.groups.contains_key(group_id) {
                return false;
            }
            match inner.positions.get(&ticket) {
                Some(p) if p.group_id.is_none() => {}
                _ => return false,
            }

            inner
                .groups
                .get_mut(group_id)
                .expect("checked above")
                .tickets
                .insert(ticket);
            inner
                .positions
                .get_mut(&ticket)
                .expect("checked above")
                .group_id = Some(group_id.to_string());
            true
        };

        if attached {
            self.bus.publish(TradingEvent::PositionGrouped {
                ticket,
                group_id: group_id.to_string(),
            });
        }
        attached
    }

    /// Removes a position from its group. A ticket that is unknown or not
    /// grouped is a no-op.
    pub fn detach(&self, ticket: u64) {
        let mut inner = self.inner.write().expect("position store poisoned");
        let group_id = match inner.positions.get_mut(&ticket) {
            Some(p) => p.group_id.take(),
            None => None,
        };
        if let Some(group_id) = group_id {
            Self::remove_from_group(&mut inner, ticket, &group_id);
        }
    }

    /// Enforces the three concurrency caps for a prospective new position.
    pub fn can_open(&self, symbol: &str, group_id: Option<&str>) -> Result<(), OpenDenied> {
        let inner = self.inner.read().expect("position store poisoned");

        let open = inner.positions.len();
        if open >= self.limits.max_total {
            return Err(OpenDenied::TotalLimit {
                open,
                max: self.limits.max_total,
            });
        }

        let symbol_open = inner
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .count();
        if symbol_open >= self.limits.max_per_symbol {
            return Err(OpenDenied::SymbolLimit {
                symbol: symbol.to_string(),
                open: symbol_open,
                max: self.limits.max_per_symbol,
            });
        }

        if let Some(group_id) = group_id {
            let group_open = inner
                .groups
                .get(group_id)
                .map(|g| g.tickets.len())
                .unwrap_or(0);
            if group_open >= self.limits.max_per_group {
                return Err(OpenDenied::GroupLimit {
                    group_id: group_id.to_string(),
                    open: group_open,
                    max: self.limits.max_per_group,
                });
            }
        }

        Ok(())
    }

    /// Records a broker-acknowledged stop-loss modification.
    pub fn record_stop_loss(&self, ticket: u64, stop_loss: f64) -> bool {
        let mut inner = self.inner.write().expect("position store poisoned");
        match inner.positions.get_mut(&ticket) {
            Some(p) => {
                p.stop_loss = Some(stop_loss);
                true
            }
            None => false,
        }
    }

    pub fn position(&self, ticket: u64) -> Option<Position> {
        self.inner
            .read()
            .expect("position store poisoned")
            .positions
            .get(&ticket)
            .cloned()
    }

    /// Consistent snapshot of all open positions, ordered by ticket.
    pub fn positions(&self) -> Vec<Position> {
        let inner = self.inner.read().expect("position store poisoned");
        let mut list: Vec<Position> = inner.positions.values().cloned().collect();
        list.sort_by_key(|p| p.ticket);
        list
    }

    pub fn positions_in_group(&self, group_id: &str) -> Vec<Position> {
        let inner = self.inner.read().expect("position store poisoned");
        match inner.groups.get(group_id) {
            Some(group) => group
                .tickets
                .iter()
                .filter_map(|t| inner.positions.get(t))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn group(&self, group_id: &str) -> Option<Group> {
        self.inner
            .read()
            .expect("position store poisoned")
            .groups
            .get(group_id)
            .cloned()
    }

    pub fn total_profit(&self) -> f64 {
        let inner = self.inner.read().expect("position store poisoned");
        inner.positions.values().map(|p| p.profit).sum()
    }

    pub fn profit_by_symbol(&self, symbol: &str) -> f64 {
        let inner = self.inner.read().expect("position store poisoned");
        inner
            .positions
            .values()
            .filter(|p| p.symbol == symbol)
            .map(|p| p.profit)
            .sum()
    }

    pub fn profit_by_group(&self, group_id: &str) -> f64 {
        let inner = self.inner.read().expect("position store poisoned");
        match inner.groups.get(group_id) {
            Some(group) => group
                .tickets
                .iter()
                .filter_map(|t| inner.positions.get(t))
                .map(|p| p.profit)
                .sum(),
            None => 0.0,
        }
    }

    pub fn position_count(&self) -> usize {
        self.inner
            .read()
            .expect("position store poisoned")
            .positions
            .len()
    }

    pub fn group_size(&self, group_id: &str) -> usize {
        self.inner
            .read()
            .expect("position store poisoned")
            .groups
            .get(group_id)
            .map(|g| g.tickets.len())
            .unwrap_or(0)
    }
}
