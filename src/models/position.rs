use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One open trade as reported by the broker. `ticket` is the broker-assigned
/// identity; `stop_loss`/`take_profit` are `None` when the broker reports no
/// level (wire value 0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub ticket: u64,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub open_price: f64,
    pub open_time: DateTime<Utc>,
    pub magic: i64,
    pub comment: String,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub current_price: f64,
    pub profit: f64,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl Position {
    /// Favorable movement since open, in pips. Positive means the position
    /// has moved in its own direction.
    pub fn distance_pips(&self, pip_scale: f64) -> f64 {
        let delta = match self.side {
            Side::Buy => self.current_price - self.open_price,
            Side::Sell => self.open_price - self.current_price,
        };
        delta / pip_scale
    }

    pub fn is_in_profit(&self) -> bool {
        self.profit > 0.0
    }

    pub fn has_profit_pips(&self, pips: f64, pip_scale: f64) -> bool {
        self.distance_pips(pip_scale) >= pips
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> f64 {
        (now - self.open_time).num_seconds() as f64 / 60.0
    }

    /// SL < price < TP for a buy (mirrored for a sell), checked only when
    /// both levels are set.
    pub fn levels_consistent(&self) -> bool {
        match (self.stop_loss, self.take_profit) {
            (Some(sl), Some(tp)) => match self.side {
                Side::Buy => sl < self.current_price && self.current_price < tp,
                Side::Sell => tp < self.current_price && self.current_price < sl,
            },
            _ => true,
        }
    }
}
