use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::broker::{BrokerGateway, BrokerTransport};
use crate::config::{BrokerConfig, IndicatorConfig};
use crate::error::BrokerError;
use crate::models::{Candle, CandleSeries, Position, Side, Timeframe};

type StubHandler = dyn Fn(&str, &Value) -> Result<Value, BrokerError> + Send + Sync;

/// Transport stub driven by a closure, for unit-testing components that sit
/// on top of the gateway.
pub struct StubTransport {
    handler: Box<StubHandler>,
}

impl StubTransport {
    pub fn new(
        handler: impl Fn(&str, &Value) -> Result<Value, BrokerError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
        }
    }
}

#[async_trait]
impl BrokerTransport for StubTransport {
    async fn execute(&self, operation: &str, params: Value) -> Result<Value, BrokerError> {
        (self.handler)(operation, &params)
    }
}

pub fn stub_gateway(
    handler: impl Fn(&str, &Value) -> Result<Value, BrokerError> + Send + Sync + 'static,
) -> BrokerGateway {
    let cfg = BrokerConfig {
        bridge_url: String::new(),
        command_timeout_ms: 1000,
        read_retries: 0,
        retry_backoff_ms: 1,
        shutdown_grace_ms: 100,
    };
    BrokerGateway::new(Box::new(StubTransport::new(handler)), &cfg)
}

pub fn base_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-03-04T12:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Create candles from (open, high, low, close) tuples with auto-incrementing
/// 1m open times.
pub fn make_candles(data: &[(f64, f64, f64, f64)]) -> CandleSeries {
    let base = base_time();
    let candles: Vec<Candle> = data
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| Candle {
            open_time: base + Duration::minutes(i as i64),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 100.0,
        })
        .collect();
    CandleSeries::new(candles)
}

/// Create n candles stepping `step` per bar from `start` (negative step for
/// a falling series).
pub fn make_trend(n: usize, start: f64, step: f64) -> CandleSeries {
    let base = base_time();
    let candles: Vec<Candle> = (0..n)
        .map(|i| {
            let open = start + i as f64 * step;
            let close = open + step * 0.8;
            Candle {
                open_time: base + Duration::minutes(i as i64),
                open,
                high: open.max(close) + step.abs() * 0.2,
                low: open.min(close) - step.abs() * 0.2,
                close,
                volume: 100.0,
            }
        })
        .collect();
    CandleSeries::new(candles)
}

pub fn test_indicator_config() -> IndicatorConfig {
    IndicatorConfig {
        timeframe: Timeframe::M5,
        rsi_period: 2,
        macd_fast: 2,
        macd_slow: 4,
        macd_signal: 2,
        bollinger_period: 3,
        bollinger_deviations: 2.0,
        adx_period: 2,
        stochastic_k: 2,
        stochastic_d: 2,
        stochastic_slowing: 2,
        atr_period: 2,
        atr_timeframe: Timeframe::H1,
    }
}

/// Listener that records every delivered event for assertions.
#[derive(Default)]
pub struct CapturingListener {
    events: std::sync::Mutex<Vec<crate::events::TradingEvent>>,
}

impl CapturingListener {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<crate::events::TradingEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.kind()).collect()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }
}

impl crate::events::EventListener for CapturingListener {
    fn on_event(&self, event: &crate::events::TradingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn make_position(ticket: u64, side: Side, open_price: f64, current_price: f64) -> Position {
    Position {
        ticket,
        symbol: "EURUSD".to_string(),
        side,
        volume: 0.10,
        open_price,
        open_time: base_time(),
        magic: 12345,
        comment: "test".to_string(),
        stop_loss: None,
        take_profit: None,
        current_price,
        profit: 0.0,
        group_id: None,
    }
}
