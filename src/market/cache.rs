//! Tick and OHLC cache with staleness bounds and scheduled refresh.
//!
//! Every entry is guarded by its own async lock. An on-demand read holds the
//! entry lock across the broker fetch, so concurrent readers of the same key
//! coalesce onto one request; the background pollers use `try_lock` and skip
//! any key that is mid-refresh.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::broker::BrokerGateway;
use crate::config::MarketDataConfig;
use crate::error::BrokerError;
use crate::models::{CandleSeries, Tick, Timeframe};

struct Slot<T> {
    value: Option<(T, Instant)>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self { value: None }
    }
}

type SlotHandle<T> = Arc<AsyncMutex<Slot<T>>>;

pub struct MarketDataCache {
    gateway: Arc<BrokerGateway>,
    max_age: Duration,
    ohlc_count: usize,
    tick_interval: Duration,
    ohlc_interval: Duration,
    ticks: Mutex<HashMap<String, SlotHandle<Tick>>>,
    ohlc: Mutex<HashMap<(String, Timeframe), SlotHandle<CandleSeries>>>,
}

impl MarketDataCache {
    pub fn new(gateway: Arc<BrokerGateway>, cfg: &MarketDataConfig) -> Self {
        Self {
            gateway,
            max_age: Duration::from_millis(cfg.max_age_ms),
            ohlc_count: cfg.ohlc_count,
            tick_interval: Duration::from_millis(cfg.update_interval_ms),
            ohlc_interval: Duration::from_millis(cfg.ohlc_update_interval_ms),
            ticks: Mutex::new(HashMap::new()),
            ohlc: Mutex::new(HashMap::new()),
        }
    }

    fn tick_slot(&self, symbol: &str) -> SlotHandle<Tick> {
        self.ticks
            .lock()
            .expect("tick registry poisoned")
            .entry(symbol.to_string())
            .or_default()
            .clone()
    }

    fn ohlc_slot(&self, symbol: &str, timeframe: Timeframe) -> SlotHandle<CandleSeries> {
        self.ohlc
            .lock()
            .expect("ohlc registry poisoned")
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .clone()
    }

    /// Latest tick for the symbol; refreshes synchronously when the cached
    /// value is older than the staleness bound.
    pub async fn tick(&self, symbol: &str) -> Result<Tick, BrokerError> {
        let slot = self.tick_slot(symbol);
        let mut guard = slot.lock().await;

        if let Some((tick, fetched_at)) = &guard.value {
            if fetched_at.elapsed() <= self.max_age {
                return Ok(*tick);
            }
        }

        let spread = self.gateway.check_spread(symbol).await?;
        let tick = spread.to_tick(Utc::now());
        guard.value = Some((tick, Instant::now()));
        Ok(tick)
    }

    /// Latest OHLC window for (symbol, timeframe) under the same staleness
    /// policy as `tick`.
    pub async fn ohlc(&self, symbol: &str, timeframe: Timeframe) -> Result<CandleSeries, BrokerError> {
        let slot = self.ohlc_slot(symbol, timeframe);
        let mut guard = slot.lock().await;

        if let Some((series, fetched_at)) = &guard.value {
            if fetched_at.elapsed() <= self.max_age {
                return Ok(series.clone());
            }
        }

        let series = self
            .gateway
            .get_ohlc(symbol, timeframe, self.ohlc_count)
            .await?;
        guard.value = Some((series.clone(), Instant::now()));
        Ok(series)
    }

    async fn poll_tick(&self, symbol: &str) {
        let slot = self.tick_slot(symbol);
        // Skip symbols currently being refreshed on demand.
        let Ok(mut guard) = slot.try_lock() else {
            return;
        };

        match self.gateway.check_spread(symbol).await {
            Ok(spread) => {
                guard.value = Some((spread.to_tick(Utc::now()), Instant::now()));
            }
            Err(e) => debug!(symbol, error = %e, "tick poll failed"),
        }
    }

    async fn poll_ohlc(&self, symbol: &str, timeframe: Timeframe) {
        let slot = self.ohlc_slot(symbol, timeframe);
        let Ok(mut guard) = slot.try_lock() else {
            return;
        };

        match self.gateway.get_ohlc(symbol, timeframe, self.ohlc_count).await {
            Ok(series) => {
                guard.value = Some((series, Instant::now()));
            }
            Err(e) => debug!(symbol, %timeframe, error = %e, "ohlc poll failed"),
        }
    }

    /// Spawns the background refreshers: one task cycling symbol ticks and
    /// one cycling (symbol, timeframe) OHLC windows. Both stop when the
    /// shutdown flag flips.
    pub fn spawn_pollers(
        self: &Arc<Self>,
        symbols: Vec<String>,
        timeframes: Vec<Timeframe>,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let tick_cache = Arc::clone(self);
        let tick_symbols = symbols.clone();
        let mut tick_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_cache.tick_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for symbol in &tick_symbols {
                            if *tick_shutdown.borrow() {
                                return;
                            }
                            tick_cache.poll_tick(symbol).await;
                        }
                    }
                    _ = tick_shutdown.changed() => {
                        info!("tick poller stopping");
                        return;
                    }
                }
            }
        }));

        let ohlc_cache = Arc::clone(self);
        let mut ohlc_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(ohlc_cache.ohlc_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for symbol in &symbols {
                            for timeframe in &timeframes {
                                if *ohlc_shutdown.borrow() {
                                    return;
                                }
                                ohlc_cache.poll_ohlc(symbol, *timeframe).await;
                            }
                        }
                    }
                    _ = ohlc_shutdown.changed() => {
                        info!("ohlc poller stopping");
                        return;
                    }
                }
            }
        }));

        handles
    }
}
