use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use fx_scaling_bot::broker::BrokerTransport;
use fx_scaling_bot::config::{
    BrokerConfig, Config, ExecutionConfig, IndicatorConfig, MarginConfig, MarketDataConfig,
    PositionLimitsConfig, ProfitTargetConfig, ScalingConfig, StagnantConfig, TrailingConfig,
    VolatilityConfig,
};
use fx_scaling_bot::error::BrokerError;
use fx_scaling_bot::models::Timeframe;

pub const MAGIC: i64 = 12345;
const PIP: f64 = 0.0001;

#[derive(Debug, Clone)]
pub struct MockPosition {
    pub ticket: u64,
    pub symbol: String,
    pub side: &'static str,
    pub volume: f64,
    pub open_price: f64,
    pub current_price: f64,
    pub sl: f64,
    pub tp: f64,
    pub profit: f64,
    pub magic: i64,
    pub open_secs: i64,
}

#[derive(Default)]
pub struct MockState {
    pub positions: Vec<MockPosition>,
    pub next_ticket: u64,
    pub bid: f64,
    pub ask: f64,
    pub spread_points: i64,
    pub volatility: f64,
    pub candles: Vec<(i64, f64, f64, f64, f64)>,
    /// (free_margin, margin_level) consumed per get_account_info; the last
    /// entry is sticky.
    pub account_script: VecDeque<(f64, f64)>,
    pub balance: f64,
    pub calls: Vec<String>,
    pub closed: Vec<u64>,
    pub modified: Vec<(u64, f64)>,
    pub reject_orders: bool,
}

/// Scriptable broker bridge used to drive the engine end to end.
#[derive(Clone)]
pub struct MockBroker {
    pub state: Arc<Mutex<MockState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        let mut state = MockState {
            next_ticket: 1,
            bid: 1.2000,
            ask: 1.20005,
            spread_points: 5,
            volatility: 0.0040,
            balance: 10_000.0,
            ..MockState::default()
        };
        state.account_script.push_back((9_000.0, 5_000.0));
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn script_account(&self, entries: &[(f64, f64)]) {
        let mut state = self.state.lock().unwrap();
        state.account_script = entries.iter().copied().collect();
    }

    pub fn set_balance(&self, balance: f64) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn set_candles(&self, candles: Vec<(i64, f64, f64, f64, f64)>) {
        self.state.lock().unwrap().candles = candles;
    }

    pub fn add_open_position(
        &self,
        ticket: u64,
        side: &'static str,
        open_price: f64,
        current_price: f64,
        profit: f64,
        age_minutes: i64,
        sl: f64,
        tp: f64,
    ) {
        let mut state = self.state.lock().unwrap();
        state.next_ticket = state.next_ticket.max(ticket + 1);
        state.positions.push(MockPosition {
            ticket,
            symbol: "EURUSD".to_string(),
            side,
            volume: 0.10,
            open_price,
            current_price,
            sl,
            tp,
            profit,
            magic: MAGIC,
            open_secs: Utc::now().timestamp() - age_minutes * 60,
        });
    }

    /// Moves every position `pips` into its own favorable direction and
    /// lines the quote up with the first position's new price.
    pub fn advance_positions_pips(&self, pips: f64) {
        let mut state = self.state.lock().unwrap();
        for position in &mut state.positions {
            position.current_price = match position.side {
                "buy" => position.open_price + pips * PIP,
                _ => position.open_price - pips * PIP,
            };
        }
        if let Some(first) = state.positions.first() {
            let price = first.current_price;
            state.bid = price;
            state.ask = price + 0.00005;
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn order_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.starts_with("market_"))
            .count()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.state.lock().unwrap().closed.clone()
    }

    pub fn modified(&self) -> Vec<(u64, f64)> {
        self.state.lock().unwrap().modified.clone()
    }

    pub fn set_quote(&self, bid: f64, ask: f64) {
        let mut state = self.state.lock().unwrap();
        state.bid = bid;
        state.ask = ask;
    }

    pub fn set_position_price(&self, ticket: u64, price: f64) {
        let mut state = self.state.lock().unwrap();
        if let Some(position) = state.positions.iter_mut().find(|p| p.ticket == ticket) {
            position.current_price = price;
        }
    }

    pub fn open_tickets(&self) -> Vec<u64> {
        self.state
            .lock()
            .unwrap()
            .positions
            .iter()
            .map(|p| p.ticket)
            .collect()
    }

    fn position_rows(state: &MockState) -> Vec<Value> {
        state
            .positions
            .iter()
            .map(|p| {
                json!({
                    "ticket": p.ticket,
                    "symbol": p.symbol,
                    "type": p.side,
                    "volume": p.volume,
                    "open_price": p.open_price,
                    "sl": p.sl,
                    "tp": p.tp,
                    "comment": "fx-scaling-bot",
                    "magic": p.magic,
                    "current_price": p.current_price,
                    "profit": p.profit,
                    "time": p.open_secs,
                })
            })
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for MockBroker {
    async fn execute(&self, operation: &str, params: Value) -> Result<Value, BrokerError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(operation.to_string());

        match operation {
            "get_account_info" => {
                let (free, level) = if state.account_script.len() > 1 {
                    state.account_script.pop_front().unwrap()
                } else {
                    *state.account_script.front().unwrap_or(&(9_000.0, 5_000.0))
                };
                Ok(json!({
                    "success": true,
                    "account_info": {
                        "balance": state.balance,
                        "equity": state.balance,
                        "margin": 100.0,
                        "margin_free": free,
                        "margin_level": level,
                    }
                }))
            }
            "get_positions" => Ok(json!({
                "success": true,
                "positions": Self::position_rows(&state),
            })),
            "market_buy" | "market_sell" => {
                if state.reject_orders {
                    return Ok(json!({ "success": false, "error": "rejected by desk" }));
                }
                let side = if operation == "market_buy" { "buy" } else { "sell" };
                let price = if side == "buy" { state.ask } else { state.bid };
                let ticket = state.next_ticket;
                state.next_ticket += 1;

                let obj = params.as_object().expect("order params");
                state.positions.push(MockPosition {
                    ticket,
                    symbol: obj["symbol"].as_str().unwrap_or("EURUSD").to_string(),
                    side,
                    volume: obj["volume"].as_f64().unwrap_or(0.0),
                    open_price: price,
                    current_price: price,
                    sl: obj.get("sl").and_then(Value::as_f64).unwrap_or(0.0),
                    tp: obj.get("tp").and_then(Value::as_f64).unwrap_or(0.0),
                    profit: 0.0,
                    magic: obj.get("magic").and_then(Value::as_i64).unwrap_or(0),
                    open_secs: Utc::now().timestamp(),
                });

                Ok(json!({ "success": true, "ticket": ticket, "price": price }))
            }
            "modify_position" => {
                let obj = params.as_object().expect("modify params");
                let ticket = obj["ticket"].as_u64().unwrap_or(0);
                let sl = obj.get("sl").and_then(Value::as_f64).unwrap_or(0.0);
                let tp = obj.get("tp").and_then(Value::as_f64);
                match state.positions.iter().position(|p| p.ticket == ticket) {
                    Some(index) => {
                        state.positions[index].sl = sl;
                        if let Some(tp) = tp {
                            state.positions[index].tp = tp;
                        }
                        state.modified.push((ticket, sl));
                        Ok(json!({ "success": true }))
                    }
                    None => Ok(json!({ "success": false, "error": "unknown ticket" })),
                }
            }
            "close_position" => {
                let ticket = params["ticket"].as_u64().unwrap_or(0);
                match state.positions.iter().position(|p| p.ticket == ticket) {
                    Some(index) => {
                        let removed = state.positions.remove(index);
                        state.closed.push(ticket);
                        Ok(json!({ "success": true, "profit": removed.profit }))
                    }
                    None => Ok(json!({ "success": false, "error": "unknown ticket" })),
                }
            }
            "close_all_positions" => {
                let total: f64 = state.positions.iter().map(|p| p.profit).sum();
                let count = state.positions.len();
                let tickets: Vec<u64> = state.positions.iter().map(|p| p.ticket).collect();
                state.closed.extend(tickets);
                state.positions.clear();
                Ok(json!({
                    "success": true,
                    "closed_positions": count,
                    "total_profit": total,
                }))
            }
            "check_spread" => Ok(json!({
                "success": true,
                "spread": state.spread_points,
                "bid": state.bid,
                "ask": state.ask,
            })),
            "calculate_volatility" => Ok(json!({
                "success": true,
                "volatility": state.volatility,
            })),
            "get_market_data" => {
                let data: Vec<Value> = state
                    .candles
                    .iter()
                    .map(|(t, o, h, l, c)| {
                        json!({
                            "time": t, "open": o, "high": h, "low": l, "close": c,
                            "volume": 100.0,
                        })
                    })
                    .collect();
                Ok(json!({ "success": true, "data": data }))
            }
            other => Err(BrokerError::Malformed(format!("unexpected operation {other}"))),
        }
    }
}

/// Listener that records every published event for assertions.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<fx_scaling_bot::events::TradingEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<fx_scaling_bot::events::TradingEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_of(&self, kind: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// (level, opened) pairs of every scaling step, in publish order.
    pub fn scaling_steps(&self) -> Vec<(u32, u32)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                fx_scaling_bot::events::TradingEvent::ScalingTriggered {
                    level, opened, ..
                } => Some((*level, *opened)),
                _ => None,
            })
            .collect()
    }
}

impl fx_scaling_bot::events::EventListener for EventRecorder {
    fn on_event(&self, event: &fx_scaling_bot::events::TradingEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Strictly falling candles with close == low, stepping down `step_pips`
/// per bar. Keeps the RSI pinned low without flipping the stochastic
/// against an open buy.
pub fn falling_candles(count: usize, start: f64, step_pips: f64) -> Vec<(i64, f64, f64, f64, f64)> {
    let base_secs = 1_709_553_600; // 2024-03-04 12:00:00 UTC
    (0..count)
        .map(|i| {
            let open = start - i as f64 * step_pips * PIP;
            let close = open - step_pips * PIP;
            (base_secs + i as i64 * 300, open, open, close, close)
        })
        .collect()
}

/// Alternating closes around a base price: every indicator stays in its
/// neutral band, so no entry signal fires.
pub fn zigzag_candles(count: usize, base: f64, delta_pips: f64) -> Vec<(i64, f64, f64, f64, f64)> {
    let base_secs = 1_709_553_600;
    (0..count)
        .map(|i| {
            let offset = if i % 2 == 0 { delta_pips } else { -delta_pips } * PIP;
            let close = base + offset;
            (
                base_secs + i as i64 * 300,
                base,
                base + delta_pips * PIP * 1.5,
                base - delta_pips * PIP * 1.5,
                close,
            )
        })
        .collect()
}

pub fn test_config() -> Config {
    Config {
        symbol: "EURUSD".to_string(),
        loop_interval_ms: 1000,
        broker: BrokerConfig {
            bridge_url: String::new(),
            command_timeout_ms: 2000,
            read_retries: 0,
            retry_backoff_ms: 1,
            shutdown_grace_ms: 100,
        },
        market_data: MarketDataConfig {
            symbols: vec!["EURUSD".to_string()],
            timeframes: vec![Timeframe::M5],
            update_interval_ms: 1000,
            ohlc_update_interval_ms: 1000,
            ohlc_count: 50,
            // Every cycle refetches: the mock mutates quotes between cycles.
            max_age_ms: 0,
        },
        indicators: IndicatorConfig {
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
            atr_timeframe: Timeframe::M5,
        },
        margin: MarginConfig {
            min_free_margin: 50.0,
            critical_margin_level: 150.0,
            warning_margin_level: 200.0,
            check_interval_seconds: 10,
        },
        profit_target: ProfitTargetConfig {
            profit_target_percent: 2.0,
            check_interval_seconds: 30,
        },
        stagnant: StagnantConfig {
            max_inactive_minutes: 50.0,
            min_profit_pips: 5.0,
            check_interval_seconds: 60,
        },
        scaling: ScalingConfig {
            initial_positions: 3,
            additional_positions: 4,
            trigger_pips: 15.0,
            lot_increment: 0.01,
            lot_increment_step: 4,
            max_positions: 20,
            max_level: 5,
            base_volume: 0.10,
        },
        trailing: TrailingConfig {
            activation_distance_pips: 15.0,
            distance_pips: 30.0,
            // Tests drive cycles back to back; no trailing rate limit.
            update_interval_seconds: 0,
        },
        position_limits: PositionLimitsConfig {
            max_total: 25,
            max_per_symbol: 25,
            max_per_group: 20,
        },
        volatility: VolatilityConfig {
            low_threshold_pips: 30.0,
            high_threshold_pips: 60.0,
            sl_atr_multiplier: 1.5,
            tp_atr_multiplier: 2.0,
        },
        execution: ExecutionConfig {
            max_spread_points: 20,
            magic_number: MAGIC,
            comment: "fx-scaling-bot".to_string(),
        },
        log_level: "error".to_string(),
    }
}
