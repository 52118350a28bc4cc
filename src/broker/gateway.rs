use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::warn;

use crate::broker::transport::BrokerTransport;
use crate::config::BrokerConfig;
use crate::error::BrokerError;
use crate::models::{AccountSnapshot, Candle, CandleSeries, Position, Side, Tick, Timeframe};

/// A validated market-order submission.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    pub comment: String,
    pub magic: i64,
}

/// Broker confirmation of a filled market order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrderAck {
    pub ticket: u64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpreadInfo {
    pub spread_points: i64,
    pub bid: f64,
    pub ask: f64,
}

impl SpreadInfo {
    pub fn to_tick(self, timestamp: DateTime<Utc>) -> Tick {
        Tick {
            bid: self.bid,
            ask: self.ask,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseAllReport {
    pub closed_positions: u32,
    pub total_profit: f64,
}

/// Typed facade over the broker command transport.
///
/// Decodes the wire result shape into domain types exactly once: booleans,
/// numeric widening and missing-field defaults are resolved here and never
/// downstream. Read operations retry transient failures with linear
/// backoff; write operations are never retried.
pub struct BrokerGateway {
    transport: Box<dyn BrokerTransport>,
    timeout: Duration,
    read_retries: u32,
    retry_backoff: Duration,
}

impl BrokerGateway {
    pub fn new(transport: Box<dyn BrokerTransport>, cfg: &BrokerConfig) -> Self {
        Self {
            transport,
            timeout: Duration::from_millis(cfg.command_timeout_ms),
            read_retries: cfg.read_retries,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }

    async fn call(&self, operation: &str, params: Value) -> Result<Value, BrokerError> {
        let result = tokio::time::timeout(self.timeout, self.transport.execute(operation, params))
            .await
            .map_err(|_| BrokerError::Timeout(self.timeout))??;

        let obj = as_object(&result, operation)?;
        let success = obj.get("success").and_then(Value::as_bool).unwrap_or(false);
        if !success {
            let reason = obj
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("negative acknowledgement")
                .to_string();
            return Err(BrokerError::BrokerRejected { reason });
        }

        Ok(result)
    }

    /// Idempotent reads tolerate transient channel failures.
    async fn call_read(&self, operation: &str, params: Value) -> Result<Value, BrokerError> {
        let mut attempt = 0u32;
        loop {
            match self.call(operation, params.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.read_retries => {
                    attempt += 1;
                    let delay = self.retry_backoff * attempt;
                    warn!(
                        operation,
                        attempt,
                        error = %e,
                        "read operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn get_account_info(&self) -> Result<AccountSnapshot, BrokerError> {
        let result = self.call_read("get_account_info", json!({})).await?;
        let obj = as_object(&result, "get_account_info")?;
        let info = obj
            .get("account_info")
            .and_then(Value::as_object)
            .ok_or_else(|| BrokerError::Malformed("get_account_info: missing account_info".into()))?;

        let balance = f64_field(info, "balance", "get_account_info")?;
        Ok(AccountSnapshot {
            balance,
            equity: opt_f64(info, "equity").unwrap_or(balance),
            margin: opt_f64(info, "margin").unwrap_or(0.0),
            free_margin: f64_field(info, "margin_free", "get_account_info")?,
            margin_level: f64_field(info, "margin_level", "get_account_info")?,
        })
    }

    pub async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, BrokerError> {
        let params = match symbol {
            Some(s) => json!({ "symbol": s }),
            None => json!({}),
        };
        let result = self.call_read("get_positions", params).await?;
        let obj = as_object(&result, "get_positions")?;
        let rows = obj
            .get("positions")
            .and_then(Value::as_array)
            .ok_or_else(|| BrokerError::Malformed("get_positions: missing positions".into()))?;

        rows.iter().map(decode_position).collect()
    }

    pub async fn market_buy(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        self.market_order("market_buy", request).await
    }

    pub async fn market_sell(&self, request: &OrderRequest) -> Result<OrderAck, BrokerError> {
        self.market_order("market_sell", request).await
    }

    async fn market_order(
        &self,
        operation: &str,
        request: &OrderRequest,
    ) -> Result<OrderAck, BrokerError> {
        let mut params = json!({
            "symbol": request.symbol,
            "volume": request.volume,
            "comment": request.comment,
            "magic": request.magic,
        });
        let map = params.as_object_mut().expect("literal object");
        if let Some(sl) = request.stop_loss {
            map.insert("sl".into(), json!(sl));
        }
        if let Some(tp) = request.take_profit {
            map.insert("tp".into(), json!(tp));
        }

        let result = self.call(operation, params).await?;
        let obj = as_object(&result, operation)?;
        Ok(OrderAck {
            ticket: u64_field(obj, "ticket", operation)?,
            price: f64_field(obj, "price", operation)?,
        })
    }

    pub async fn modify_position(
        &self,
        ticket: u64,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<(), BrokerError> {
        let mut params = json!({ "ticket": ticket });
        let map = params.as_object_mut().expect("literal object");
        if let Some(sl) = stop_loss {
            map.insert("sl".into(), json!(sl));
        }
        if let Some(tp) = take_profit {
            map.insert("tp".into(), json!(tp));
        }

        self.call("modify_position", params).await.map(|_| ())
    }

    /// Returns the realized profit reported by the broker.
    pub async fn close_position(
        &self,
        ticket: u64,
        volume: Option<f64>,
    ) -> Result<f64, BrokerError> {
        let mut params = json!({ "ticket": ticket });
        if let Some(v) = volume {
            params
                .as_object_mut()
                .expect("literal object")
                .insert("volume".into(), json!(v));
        }

        let result = self.call("close_position", params).await?;
        let obj = as_object(&result, "close_position")?;
        f64_field(obj, "profit", "close_position")
    }

    pub async fn close_all_positions(
        &self,
        symbol: Option<&str>,
        magic: Option<i64>,
    ) -> Result<CloseAllReport, BrokerError> {
        let mut params = json!({});
        let map = params.as_object_mut().expect("literal object");
        if let Some(s) = symbol {
            map.insert("symbol".into(), json!(s));
        }
        if let Some(m) = magic {
            map.insert("magic".into(), json!(m));
        }

        let result = self.call("close_all_positions", params).await?;
        let obj = as_object(&result, "close_all_positions")?;
        Ok(CloseAllReport {
            closed_positions: u64_field(obj, "closed_positions", "close_all_positions")? as u32,
            total_profit: f64_field(obj, "total_profit", "close_all_positions")?,
        })
    }

    pub async fn check_spread(&self, symbol: &str) -> Result<SpreadInfo, BrokerError> {
        let result = self
            .call_read("check_spread", json!({ "symbol": symbol }))
            .await?;
        let obj = as_object(&result, "check_spread")?;
        Ok(SpreadInfo {
            spread_points: i64_field(obj, "spread", "check_spread")?,
            bid: opt_f64(obj, "bid").unwrap_or(0.0),
            ask: opt_f64(obj, "ask").unwrap_or(0.0),
        })
    }

    /// ATR in price units for (symbol, timeframe, period).
    pub async fn calculate_volatility(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        period: usize,
    ) -> Result<f64, BrokerError> {
        let result = self
            .call_read(
                "calculate_volatility",
                json!({
                    "symbol": symbol,
                    "timeframe": timeframe.as_str(),
                    "period": period,
                }),
            )
            .await?;
        let obj = as_object(&result, "calculate_volatility")?;
        f64_field(obj, "volatility", "calculate_volatility")
    }

    pub async fn get_ohlc(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<CandleSeries, BrokerError> {
        let result = self
            .call_read(
                "get_market_data",
                json!({
                    "symbol": symbol,
                    "timeframe": timeframe.as_str(),
                    "count": count,
                }),
            )
            .await?;
        let obj = as_object(&result, "get_market_data")?;
        let rows = obj
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| BrokerError::Malformed("get_market_data: missing data".into()))?;

        let candles = rows
            .iter()
            .map(decode_candle)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CandleSeries::new(candles))
    }
}

fn as_object<'a>(value: &'a Value, operation: &str) -> Result<&'a Map<String, Value>, BrokerError> {
    value
        .as_object()
        .ok_or_else(|| BrokerError::Malformed(format!("{operation}: result is not an object")))
}

fn f64_field(obj: &Map<String, Value>, name: &str, operation: &str) -> Result<f64, BrokerError> {
    obj.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| BrokerError::Malformed(format!("{operation}: missing numeric field {name}")))
}

fn i64_field(obj: &Map<String, Value>, name: &str, operation: &str) -> Result<i64, BrokerError> {
    obj.get(name)
        .and_then(Value::as_i64)
        .ok_or_else(|| BrokerError::Malformed(format!("{operation}: missing integer field {name}")))
}

fn u64_field(obj: &Map<String, Value>, name: &str, operation: &str) -> Result<u64, BrokerError> {
    obj.get(name)
        .and_then(Value::as_u64)
        .ok_or_else(|| BrokerError::Malformed(format!("{operation}: missing integer field {name}")))
}

fn str_field<'a>(
    obj: &'a Map<String, Value>,
    name: &str,
    operation: &str,
) -> Result<&'a str, BrokerError> {
    obj.get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| BrokerError::Malformed(format!("{operation}: missing string field {name}")))
}

fn opt_f64(obj: &Map<String, Value>, name: &str) -> Option<f64> {
    obj.get(name).and_then(Value::as_f64)
}

/// A broker SL/TP of 0.0 means "no level set".
fn opt_level(obj: &Map<String, Value>, name: &str) -> Option<f64> {
    opt_f64(obj, name).filter(|v| *v != 0.0)
}

fn decode_position(row: &Value) -> Result<Position, BrokerError> {
    let obj = as_object(row, "get_positions")?;

    let side = match str_field(obj, "type", "get_positions")? {
        s if s.eq_ignore_ascii_case("buy") => Side::Buy,
        s if s.eq_ignore_ascii_case("sell") => Side::Sell,
        other => {
            return Err(BrokerError::Malformed(format!(
                "get_positions: unknown position type {other:?}"
            )))
        }
    };

    // Open time must come from the broker; a row without it cannot be aged
    // and is rejected rather than guessed at.
    let open_secs = i64_field(obj, "time", "get_positions")?;
    let open_time = DateTime::<Utc>::from_timestamp(open_secs, 0).ok_or_else(|| {
        BrokerError::Malformed(format!("get_positions: invalid open time {open_secs}"))
    })?;

    Ok(Position {
        ticket: u64_field(obj, "ticket", "get_positions")?,
        symbol: str_field(obj, "symbol", "get_positions")?.to_string(),
        side,
        volume: f64_field(obj, "volume", "get_positions")?,
        open_price: f64_field(obj, "open_price", "get_positions")?,
        open_time,
        magic: opt_f64(obj, "magic").unwrap_or(0.0) as i64,
        comment: obj
            .get("comment")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        stop_loss: opt_level(obj, "sl"),
        take_profit: opt_level(obj, "tp"),
        current_price: f64_field(obj, "current_price", "get_positions")?,
        profit: f64_field(obj, "profit", "get_positions")?,
        group_id: None,
    })
}

fn decode_candle(row: &Value) -> Result<Candle, BrokerError> {
    let obj = as_object(row, "get_market_data")?;
    let secs = i64_field(obj, "time", "get_market_data")?;
    let open_time = DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| BrokerError::Malformed(format!("get_market_data: invalid time {secs}")))?;

    Ok(Candle {
        open_time,
        open: f64_field(obj, "open", "get_market_data")?,
        high: f64_field(obj, "high", "get_market_data")?,
        low: f64_field(obj, "low", "get_market_data")?,
        close: f64_field(obj, "close", "get_market_data")?,
        volume: opt_f64(obj, "volume")
            .or_else(|| opt_f64(obj, "tick_volume"))
            .unwrap_or(0.0),
    })
}
