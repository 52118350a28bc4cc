//! ATR-driven volatility classification and SL/TP distance derivation.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::broker::BrokerGateway;
use crate::config::{IndicatorConfig, VolatilityConfig};
use crate::error::BrokerError;
use crate::events::{EventBus, TradingEvent};
use crate::indicators;
use crate::market::MarketDataCache;
use crate::models::{Side, SymbolSpec, Timeframe};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityClass {
    Low,
    Medium,
    High,
}

impl fmt::Display for VolatilityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityClass::Low => write!(f, "low"),
            VolatilityClass::Medium => write!(f, "medium"),
            VolatilityClass::High => write!(f, "high"),
        }
    }
}

/// Fallback pip distances used when no live ATR is available.
fn default_sl_pips(class: VolatilityClass) -> f64 {
    match class {
        VolatilityClass::Low => 30.0,
        VolatilityClass::Medium => 45.0,
        VolatilityClass::High => 75.0,
    }
}

fn default_tp_pips(class: VolatilityClass) -> f64 {
    match class {
        VolatilityClass::Low => 40.0,
        VolatilityClass::Medium => 60.0,
        VolatilityClass::High => 100.0,
    }
}

#[derive(Debug, Clone, Copy)]
struct VolState {
    atr_pips: f64,
    class: VolatilityClass,
}

pub struct VolatilityManager {
    gateway: Arc<BrokerGateway>,
    bus: Arc<EventBus>,
    cfg: VolatilityConfig,
    atr_period: usize,
    atr_timeframe: Timeframe,
    state: Mutex<HashMap<String, VolState>>,
}

impl VolatilityManager {
    pub fn new(
        gateway: Arc<BrokerGateway>,
        bus: Arc<EventBus>,
        cfg: VolatilityConfig,
        indicators_cfg: &IndicatorConfig,
    ) -> Self {
        Self {
            gateway,
            bus,
            cfg,
            atr_period: indicators_cfg.atr_period,
            atr_timeframe: indicators_cfg.atr_timeframe,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn classify(&self, atr_pips: f64) -> VolatilityClass {
        if atr_pips < self.cfg.low_threshold_pips {
            VolatilityClass::Low
        } else if atr_pips < self.cfg.high_threshold_pips {
            VolatilityClass::Medium
        } else {
            VolatilityClass::High
        }
    }

    /// Refreshes the ATR for a symbol: asks the broker first, falls back to
    /// the local ATR over the cached OHLC window when the broker value is
    /// unavailable. Publishes `VolatilityChanged` on a class transition.
    pub async fn refresh(
        &self,
        spec: &SymbolSpec,
        cache: &MarketDataCache,
    ) -> Result<f64, BrokerError> {
        let atr_price = match self
            .gateway
            .calculate_volatility(&spec.name, self.atr_timeframe, self.atr_period)
            .await
        {
            Ok(value) => value,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                debug!(symbol = %spec.name, error = %e, "broker ATR unavailable, computing locally");
                let series = cache.ohlc(&spec.name, self.atr_timeframe).await?;
                indicators::atr(
                    &series.highs(),
                    &series.lows(),
                    &series.closes(),
                    self.atr_period,
                )
            }
        };

        let atr_pips = spec.price_to_pips(atr_price);
        let new_class = self.classify(atr_pips);

        let previous = {
            let mut state = self.state.lock().expect("volatility state poisoned");
            state.insert(
                spec.name.clone(),
                VolState {
                    atr_pips,
                    class: new_class,
                },
            )
        };

        let old_class = previous.map(|s| s.class).unwrap_or(VolatilityClass::Medium);
        if old_class != new_class {
            info!(symbol = %spec.name, from = %old_class, to = %new_class, atr_pips, "volatility class transition");
            self.bus.publish(TradingEvent::VolatilityChanged {
                symbol: spec.name.clone(),
                from: old_class,
                to: new_class,
                atr_pips,
            });
        }

        Ok(atr_pips)
    }

    pub fn class_of(&self, symbol: &str) -> VolatilityClass {
        self.state
            .lock()
            .expect("volatility state poisoned")
            .get(symbol)
            .map(|s| s.class)
            .unwrap_or(VolatilityClass::Medium)
    }

    pub fn atr_pips(&self, symbol: &str) -> f64 {
        self.state
            .lock()
            .expect("volatility state poisoned")
            .get(symbol)
            .map(|s| s.atr_pips)
            .unwrap_or(0.0)
    }

    fn sl_distance_pips(&self, symbol: &str) -> f64 {
        let atr_pips = self.atr_pips(symbol);
        if atr_pips > 0.0 {
            atr_pips * self.cfg.sl_atr_multiplier
        } else {
            default_sl_pips(self.class_of(symbol))
        }
    }

    fn tp_distance_pips(&self, symbol: &str) -> f64 {
        let atr_pips = self.atr_pips(symbol);
        if atr_pips > 0.0 {
            atr_pips * self.cfg.tp_atr_multiplier
        } else {
            default_tp_pips(self.class_of(symbol))
        }
    }

    pub fn stop_loss_for(&self, spec: &SymbolSpec, entry_price: f64, side: Side) -> f64 {
        let distance = spec.pips_to_price(self.sl_distance_pips(&spec.name));
        let level = match side {
            Side::Buy => entry_price - distance,
            Side::Sell => entry_price + distance,
        };
        spec.round_price(level)
    }

    pub fn take_profit_for(&self, spec: &SymbolSpec, entry_price: f64, side: Side) -> f64 {
        let distance = spec.pips_to_price(self.tp_distance_pips(&spec.name));
        let level = match side {
            Side::Buy => entry_price + distance,
            Side::Sell => entry_price - distance,
        };
        spec.round_price(level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketDataConfig;
    use crate::test_helpers::{stub_gateway, test_indicator_config, CapturingListener};
    use serde_json::json;

    fn volatility_config() -> VolatilityConfig {
        VolatilityConfig {
            low_threshold_pips: 30.0,
            high_threshold_pips: 60.0,
            sl_atr_multiplier: 1.5,
            tp_atr_multiplier: 2.0,
        }
    }

    fn manager_with_atr(
        atr_values: Vec<f64>,
    ) -> (VolatilityManager, Arc<CapturingListener>, Arc<MarketDataCache>) {
        let values = std::sync::Mutex::new(atr_values);
        let gateway = Arc::new(stub_gateway(move |op, _params| {
            if op == "calculate_volatility" {
                let mut values = values.lock().unwrap();
                if values.is_empty() {
                    return Err(BrokerError::Transport("no more scripted values".into()));
                }
                Ok(json!({ "success": true, "volatility": values.remove(0) }))
            } else {
                Err(BrokerError::Transport("unexpected operation".into()))
            }
        }));

        let bus = Arc::new(EventBus::new());
        let listener = CapturingListener::new();
        bus.subscribe(listener.clone());

        let md_cfg = MarketDataConfig {
            symbols: vec!["EURUSD".into()],
            timeframes: vec![Timeframe::H1],
            update_interval_ms: 1000,
            ohlc_update_interval_ms: 1000,
            ohlc_count: 50,
            max_age_ms: 60_000,
        };
        let cache = Arc::new(MarketDataCache::new(gateway.clone(), &md_cfg));

        let manager = VolatilityManager::new(
            gateway,
            bus,
            volatility_config(),
            &test_indicator_config(),
        );
        (manager, listener, cache)
    }

    #[tokio::test]
    async fn classifies_by_thresholds() {
        // 0.0029 price units = 29 pips -> low; 45 -> medium; 80 -> high.
        let (manager, _, cache) = manager_with_atr(vec![0.0029, 0.0045, 0.0080]);
        let spec = SymbolSpec::forex("EURUSD");

        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(manager.class_of("EURUSD"), VolatilityClass::Low);

        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(manager.class_of("EURUSD"), VolatilityClass::Medium);

        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(manager.class_of("EURUSD"), VolatilityClass::High);
    }

    #[tokio::test]
    async fn transition_emits_exactly_one_event() {
        let (manager, listener, cache) = manager_with_atr(vec![0.0045, 0.0080, 0.0081]);
        let spec = SymbolSpec::forex("EURUSD");

        // Medium (default) -> medium: no event.
        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(listener.count_of("volatility_changed"), 0);

        // Medium -> high: one event.
        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(listener.count_of("volatility_changed"), 1);

        // High -> high: still one.
        manager.refresh(&spec, &cache).await.unwrap();
        assert_eq!(listener.count_of("volatility_changed"), 1);
    }

    #[tokio::test]
    async fn live_atr_scales_sl_and_tp() {
        let (manager, _, cache) = manager_with_atr(vec![0.0040]);
        let spec = SymbolSpec::forex("EURUSD");
        manager.refresh(&spec, &cache).await.unwrap();

        // 40 pips ATR: SL distance 60 pips, TP distance 80 pips.
        let sl = manager.stop_loss_for(&spec, 1.2000, Side::Buy);
        let tp = manager.take_profit_for(&spec, 1.2000, Side::Buy);
        assert!((sl - 1.1940).abs() < 1e-9, "sl = {sl}");
        assert!((tp - 1.2080).abs() < 1e-9, "tp = {tp}");

        // Mirrored for sells.
        let sl = manager.stop_loss_for(&spec, 1.2000, Side::Sell);
        let tp = manager.take_profit_for(&spec, 1.2000, Side::Sell);
        assert!((sl - 1.2060).abs() < 1e-9);
        assert!((tp - 1.1920).abs() < 1e-9);
    }

    #[tokio::test]
    async fn falls_back_to_local_atr_over_cached_ohlc() {
        // The broker ATR op is down; candles with a constant 50 pip true
        // range are served instead.
        let gateway = Arc::new(stub_gateway(|op, _params| match op {
            "calculate_volatility" => Err(BrokerError::Transport("offline".into())),
            "get_market_data" => Ok(json!({
                "success": true,
                "data": [
                    { "time": 1709553600, "open": 1.2000, "high": 1.2050, "low": 1.2000, "close": 1.2025, "volume": 100.0 },
                    { "time": 1709553900, "open": 1.2025, "high": 1.2060, "low": 1.2010, "close": 1.2040, "volume": 100.0 },
                    { "time": 1709554200, "open": 1.2040, "high": 1.2070, "low": 1.2020, "close": 1.2050, "volume": 100.0 },
                ]
            })),
            other => Err(BrokerError::Transport(format!("unexpected {other}"))),
        }));

        let bus = Arc::new(EventBus::new());
        let md_cfg = MarketDataConfig {
            symbols: vec!["EURUSD".into()],
            timeframes: vec![Timeframe::H1],
            update_interval_ms: 1000,
            ohlc_update_interval_ms: 1000,
            ohlc_count: 50,
            max_age_ms: 60_000,
        };
        let cache = MarketDataCache::new(gateway.clone(), &md_cfg);
        let manager = VolatilityManager::new(
            gateway,
            bus,
            volatility_config(),
            &test_indicator_config(),
        );

        let spec = SymbolSpec::forex("EURUSD");
        let atr_pips = manager.refresh(&spec, &cache).await.unwrap();
        assert!(atr_pips > 0.0, "atr_pips = {atr_pips}");
        assert!((manager.atr_pips("EURUSD") - atr_pips).abs() < 1e-9);
    }

    #[test]
    fn defaults_apply_without_live_atr() {
        let gateway = Arc::new(stub_gateway(|_, _| {
            Err(BrokerError::Transport("offline".into()))
        }));
        let bus = Arc::new(EventBus::new());
        let manager = VolatilityManager::new(
            gateway,
            bus,
            volatility_config(),
            &test_indicator_config(),
        );
        let spec = SymbolSpec::forex("EURUSD");

        // No state: medium defaults of 45/60 pips.
        let sl = manager.stop_loss_for(&spec, 1.2000, Side::Buy);
        let tp = manager.take_profit_for(&spec, 1.2000, Side::Buy);
        assert!((sl - 1.1955).abs() < 1e-9);
        assert!((tp - 1.2060).abs() < 1e-9);
    }
}
