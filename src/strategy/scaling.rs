//! Scaling-entry state machine.
//!
//! Each plan owns one group: an initial batch of market orders, then up to
//! `additional_positions` more per favorable-movement trigger. The trigger
//! compares the single best-performing position's distance against
//! `trigger_pips * (level + 1)`, so only confirmed favorable movement
//! advances a level; an underwater group is never scaled. A plan advances at
//! most one level per control cycle.

use crate::config::ScalingConfig;
use crate::models::{Position, Side};

/// What the plan wants the control loop to do this cycle. Order submission
/// stays outside the plan: every new order passes through the engine's
/// submission choke point.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingAction {
    OpenInitial {
        count: u32,
        volume: f64,
    },
    AddLevel {
        next_level: u32,
        count: u32,
        volume: f64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    },
    Complete,
    Hold,
}

#[derive(Debug, Clone)]
pub struct ScalingPlan {
    pub group_id: String,
    pub symbol: String,
    pub side: Side,
    pub anchor_price: f64,
    pub base_volume: f64,
    pub level: u32,
    pub completed: bool,
    cfg: ScalingConfig,
}

impl ScalingPlan {
    pub fn new(
        group_id: String,
        symbol: String,
        side: Side,
        anchor_price: f64,
        cfg: ScalingConfig,
    ) -> Self {
        Self {
            group_id,
            symbol,
            side,
            anchor_price,
            base_volume: cfg.base_volume,
            level: 0,
            completed: false,
            cfg,
        }
    }

    /// Evaluates the plan against the group's current members. Pure: the
    /// engine executes the returned action and commits the level on success.
    pub fn evaluate(&self, group_positions: &[Position], pip_scale: f64) -> ScalingAction {
        if self.completed {
            return ScalingAction::Hold;
        }

        if group_positions.is_empty() {
            if self.level == 0 {
                return ScalingAction::OpenInitial {
                    count: self.cfg.initial_positions,
                    volume: self.base_volume,
                };
            }
            return ScalingAction::Hold;
        }

        if group_positions.len() >= self.cfg.max_positions || self.level >= self.cfg.max_level {
            return ScalingAction::Complete;
        }

        let best_distance = group_positions
            .iter()
            .map(|p| p.distance_pips(pip_scale))
            .fold(f64::NEG_INFINITY, f64::max);

        let trigger = self.cfg.trigger_pips * (self.level + 1) as f64;
        if best_distance < trigger {
            return ScalingAction::Hold;
        }

        let next_level = self.level + 1;
        let volume = self.base_volume
            + self.cfg.lot_increment * (next_level / self.cfg.lot_increment_step) as f64;
        let first = &group_positions[0];

        ScalingAction::AddLevel {
            next_level,
            count: self.cfg.additional_positions,
            volume: round_lot(volume),
            stop_loss: first.stop_loss,
            take_profit: first.take_profit,
        }
    }

    /// Called by the engine once at least one order of the step filled.
    pub fn commit_level(&mut self, level: u32) {
        self.level = level;
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
    }
}

fn round_lot(volume: f64) -> f64 {
    (volume * 100.0).round() / 100.0
}
