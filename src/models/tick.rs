use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl Tick {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    /// Ask-bid distance in broker points (tenths of a pip).
    pub fn spread_points(&self, pip_scale: f64) -> i64 {
        ((self.ask - self.bid) / pip_scale * 10.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spread_points_rounds_to_tenths_of_a_pip() {
        let tick = Tick {
            bid: 1.2000,
            ask: 1.20013,
            timestamp: Utc::now(),
        };
        assert_eq!(tick.spread_points(0.0001), 13);
    }
}
