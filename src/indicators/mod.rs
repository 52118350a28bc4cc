//! Indicator snapshots derived from cached OHLC windows.
//!
//! All formulas are deterministic pure functions of the input series and the
//! configured periods. Snapshots are cached per (symbol, timeframe) and
//! recomputed only when the OHLC window advances.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod macd;
pub mod rsi;
pub mod stochastic;

pub use adx::adx;
pub use atr::atr;
pub use bollinger::bollinger;
pub use ema::ema;
pub use macd::macd;
pub use rsi::rsi;
pub use stochastic::stochastic;

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::IndicatorConfig;
use crate::models::{CandleSeries, Timeframe};

/// Named indicator values for one symbol at one instant. Valid for a single
/// computation cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub price: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub boll_upper: f64,
    pub boll_middle: f64,
    pub boll_lower: f64,
    pub adx: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub atr: f64,
}

/// Computes one snapshot from an OHLC window. Returns `None` on an empty
/// window.
pub fn compute_snapshot(series: &CandleSeries, cfg: &IndicatorConfig) -> Option<IndicatorSnapshot> {
    if series.is_empty() {
        return None;
    }

    let highs = series.highs();
    let lows = series.lows();
    let closes = series.closes();

    let (macd_value, macd_signal, macd_histogram) =
        macd(&closes, cfg.macd_fast, cfg.macd_slow, cfg.macd_signal);
    let (boll_upper, boll_middle, boll_lower) =
        bollinger(&closes, cfg.bollinger_period, cfg.bollinger_deviations);
    let (stoch_k, stoch_d) = stochastic(
        &highs,
        &lows,
        &closes,
        cfg.stochastic_k,
        cfg.stochastic_d,
        cfg.stochastic_slowing,
    );

    Some(IndicatorSnapshot {
        price: *closes.last()?,
        rsi: rsi(&closes, cfg.rsi_period),
        macd: macd_value,
        macd_signal,
        macd_histogram,
        boll_upper,
        boll_middle,
        boll_lower,
        adx: adx(&highs, &lows, &closes, cfg.adx_period),
        stoch_k,
        stoch_d,
        atr: atr(&highs, &lows, &closes, cfg.atr_period),
    })
}

struct CachedSnapshot {
    window_end: DateTime<Utc>,
    snapshot: IndicatorSnapshot,
}

/// Per-(symbol, timeframe) snapshot cache keyed on the window's last open
/// time.
#[derive(Default)]
pub struct IndicatorEngine {
    cache: Mutex<HashMap<(String, Timeframe), CachedSnapshot>>,
}

impl IndicatorEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        series: &CandleSeries,
        cfg: &IndicatorConfig,
    ) -> Option<IndicatorSnapshot> {
        let window_end = series.last_open_time()?;
        let key = (symbol.to_string(), timeframe);

        let mut cache = self.cache.lock().expect("indicator cache poisoned");
        if let Some(cached) = cache.get(&key) {
            if cached.window_end == window_end {
                return Some(cached.snapshot);
            }
        }

        let snapshot = compute_snapshot(series, cfg)?;
        cache.insert(
            key,
            CachedSnapshot {
                window_end,
                snapshot,
            },
        );
        Some(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{make_candles, test_indicator_config};

    #[test]
    fn snapshot_covers_every_indicator() {
        let series = make_candles(&[
            (1.10, 1.11, 1.09, 1.105),
            (1.105, 1.12, 1.10, 1.115),
            (1.115, 1.13, 1.11, 1.125),
            (1.125, 1.14, 1.12, 1.135),
            (1.135, 1.15, 1.13, 1.145),
            (1.145, 1.16, 1.14, 1.155),
        ]);
        let snap = compute_snapshot(&series, &test_indicator_config()).unwrap();

        assert_eq!(snap.price, 1.155);
        assert!(snap.rsi > 50.0);
        assert!(snap.boll_upper >= snap.boll_middle);
        assert!(snap.boll_middle >= snap.boll_lower);
        assert!((0.0..=100.0).contains(&snap.stoch_k));
        assert!(snap.atr >= 0.0);
    }

    #[test]
    fn empty_window_yields_nothing() {
        let series = CandleSeries::default();
        assert!(compute_snapshot(&series, &test_indicator_config()).is_none());
    }

    #[test]
    fn cache_is_invalidated_when_window_advances() {
        let engine = IndicatorEngine::new();
        let cfg = test_indicator_config();

        let first = make_candles(&[
            (1.10, 1.11, 1.09, 1.105),
            (1.105, 1.12, 1.10, 1.115),
            (1.115, 1.13, 1.11, 1.125),
            (1.125, 1.14, 1.12, 1.135),
        ]);
        let a = engine
            .snapshot("EURUSD", Timeframe::M5, &first, &cfg)
            .unwrap();
        let b = engine
            .snapshot("EURUSD", Timeframe::M5, &first, &cfg)
            .unwrap();
        assert_eq!(a, b);

        // One more candle: the window end moves, so the cache recomputes.
        let advanced = make_candles(&[
            (1.10, 1.11, 1.09, 1.105),
            (1.105, 1.12, 1.10, 1.115),
            (1.115, 1.13, 1.11, 1.125),
            (1.125, 1.14, 1.12, 1.135),
            (1.135, 1.15, 1.13, 1.090),
        ]);
        let c = engine
            .snapshot("EURUSD", Timeframe::M5, &advanced, &cfg)
            .unwrap();
        assert_ne!(a.price, c.price);
    }
}
