use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price geometry of a tradable symbol: the price delta of one pip and the
/// quote precision. Five-decimal FX pairs quote pips at the fourth decimal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpec {
    pub name: String,
    pub pip_scale: f64,
    pub digits: u32,
}

impl SymbolSpec {
    pub fn new(name: impl Into<String>, pip_scale: f64, digits: u32) -> Self {
        Self {
            name: name.into(),
            pip_scale,
            digits,
        }
    }

    /// Standard five-decimal FX pair (pip at the fourth decimal).
    pub fn forex(name: impl Into<String>) -> Self {
        Self::new(name, 0.0001, 5)
    }

    /// Three-decimal JPY-quoted pair (pip at the second decimal).
    pub fn forex_jpy(name: impl Into<String>) -> Self {
        Self::new(name, 0.01, 3)
    }

    pub fn pips_to_price(&self, pips: f64) -> f64 {
        pips * self.pip_scale
    }

    pub fn price_to_pips(&self, delta: f64) -> f64 {
        delta / self.pip_scale
    }

    pub fn round_price(&self, price: f64) -> f64 {
        let factor = 10f64.powi(self.digits as i32);
        (price * factor).round() / factor
    }
}

/// Symbol registry keyed by name. Unknown symbols fall back to the
/// standard FX geometry so a new pair never stalls the engine.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    specs: HashMap<String, SymbolSpec>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: SymbolSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    pub fn spec(&self, name: &str) -> SymbolSpec {
        self.specs
            .get(name)
            .cloned()
            .unwrap_or_else(|| default_spec(name))
    }
}

fn default_spec(name: &str) -> SymbolSpec {
    if name.len() >= 6 && name[3..6].eq_ignore_ascii_case("JPY") {
        SymbolSpec::forex_jpy(name)
    } else {
        SymbolSpec::forex(name)
    }
}
