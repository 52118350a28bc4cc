use serde::{Deserialize, Serialize};

/// Account state as last reported by the broker. Re-read on every control
/// cycle; never derived locally.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub balance: f64,
    pub equity: f64,
    pub margin: f64,
    pub free_margin: f64,
    pub margin_level: f64,
}

impl AccountSnapshot {
    pub fn flat(balance: f64) -> Self {
        Self {
            balance,
            equity: balance,
            margin: 0.0,
            free_margin: balance,
            margin_level: 0.0,
        }
    }
}
