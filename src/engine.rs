//! The trading control loop.
//!
//! One logical controller drives the cycle stages in fixed order: position
//! reconciliation, volatility refresh, indicator refresh, the risk pipeline,
//! trailing stops, then scaling plans. A failed read aborts its stage for
//! the cycle and the loop survives; an invariant violation stops the engine.
//! Every new order funnels through a single submission choke point: risk
//! veto, store caps, spread gate, then the market order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::broker::{BrokerGateway, BrokerTransport, OrderRequest};
use crate::config::Config;
use crate::error::BrokerError;
use crate::events::{EventBus, TradingEvent};
use crate::indicators::{IndicatorEngine, IndicatorSnapshot};
use crate::market::MarketDataCache;
use crate::models::{AccountSnapshot, Side, SymbolTable, Timeframe};
use crate::positions::PositionStore;
use crate::risk::{
    MarginProtector, ProfitTargetHandler, RiskContext, RiskPipeline, StagnantPositionHandler,
};
use crate::strategy::{entry_signal, exit_signal, ScalingAction, ScalingPlan};
use crate::trailing::TrailingManager;
use crate::volatility::VolatilityManager;

pub struct TradingEngine {
    cfg: Config,
    symbols: SymbolTable,
    gateway: Arc<BrokerGateway>,
    bus: Arc<EventBus>,
    store: Arc<PositionStore>,
    cache: Arc<MarketDataCache>,
    indicators: IndicatorEngine,
    volatility: VolatilityManager,
    trailing: TrailingManager,
    risk: RiskPipeline,
    plans: HashMap<String, ScalingPlan>,
    account: AccountSnapshot,
    last_trailing: Option<std::time::Instant>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl TradingEngine {
    pub fn new(cfg: Config, transport: Box<dyn BrokerTransport>) -> Self {
        let bus = Arc::new(EventBus::new());
        let gateway = Arc::new(BrokerGateway::new(transport, &cfg.broker));
        let store = Arc::new(PositionStore::new(cfg.position_limits.clone(), bus.clone()));
        let cache = Arc::new(MarketDataCache::new(gateway.clone(), &cfg.market_data));
        let symbols = SymbolTable::new();

        let volatility = VolatilityManager::new(
            gateway.clone(),
            bus.clone(),
            cfg.volatility.clone(),
            &cfg.indicators,
        );
        let trailing = TrailingManager::new(cfg.trailing.clone());

        let mut risk = RiskPipeline::new();
        risk.register(Arc::new(MarginProtector::new(cfg.margin.clone())));
        risk.register(Arc::new(ProfitTargetHandler::new(
            cfg.profit_target.clone(),
            cfg.execution.magic_number,
        )));
        risk.register(Arc::new(StagnantPositionHandler::new(
            cfg.stagnant.clone(),
            symbols.clone(),
        )));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            cfg,
            symbols,
            gateway,
            bus,
            store,
            cache,
            indicators: IndicatorEngine::new(),
            volatility,
            trailing,
            risk,
            plans: HashMap::new(),
            account: AccountSnapshot::flat(0.0),
            last_trailing: None,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn store(&self) -> Arc<PositionStore> {
        self.store.clone()
    }

    fn cancelled(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn stage_error(&self, stage: &str, error: &BrokerError) {
        warn!(stage, %error, "cycle stage aborted");
        self.bus.publish(TradingEvent::Error {
            source: stage.to_string(),
            message: error.to_string(),
        });
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!("{}", "=".repeat(60));
        info!("scaling engine starting up");
        info!("symbol: {}", self.cfg.symbol);
        info!(
            "loop: {}ms | scaling: {}+{} per level, trigger {} pips, cap {}",
            self.cfg.loop_interval_ms,
            self.cfg.scaling.initial_positions,
            self.cfg.scaling.additional_positions,
            self.cfg.scaling.trigger_pips,
            self.cfg.scaling.max_positions,
        );
        info!(
            "trailing: activate {} pips, distance {} pips",
            self.cfg.trailing.activation_distance_pips, self.cfg.trailing.distance_pips,
        );
        info!("{}", "=".repeat(60));

        let pollers = self.cache.spawn_pollers(
            self.cfg.market_data.symbols.clone(),
            self.cfg.market_data.timeframes.clone(),
            self.shutdown_rx.clone(),
        );

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.cfg.loop_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle().await {
                        Ok(()) => {}
                        Err(BrokerError::Cancelled) => break,
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "invariant violated, stopping engine");
                            self.bus.publish(TradingEvent::Error {
                                source: "engine".to_string(),
                                message: e.to_string(),
                            });
                            break;
                        }
                        Err(e) => self.stage_error("cycle", &e),
                    }
                }
            }
        }

        self.shutdown(pollers).await;
        Ok(())
    }

    async fn shutdown(&mut self, pollers: Vec<JoinHandle<()>>) {
        info!("stopping background refreshers");
        let _ = self.shutdown_tx.send(true);

        let grace = Duration::from_millis(self.cfg.broker.shutdown_grace_ms);
        for handle in pollers {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!("refresher did not stop within grace period, abandoning");
            }
        }
        info!("engine stopped");
    }

    /// One full control cycle. Public so a harness can drive the engine
    /// deterministically without the timer loop.
    pub async fn run_cycle(&mut self) -> Result<(), BrokerError> {
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }

        // 1. Reconcile positions and refresh the account snapshot.
        match self.reconcile_stage().await {
            Ok(account) => self.account = account,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.stage_error("reconcile", &e);
                return Ok(());
            }
        }

        // 2. Volatility classes for all active symbols.
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }
        for symbol in self.cfg.market_data.symbols.clone() {
            let spec = self.symbols.spec(&symbol);
            if let Err(e) = self.volatility.refresh(&spec, &self.cache).await {
                if e.is_fatal() {
                    return Err(e);
                }
                self.stage_error("volatility", &e);
            }
        }

        // 3. Indicator snapshot for the traded symbol.
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }
        let snapshot = match self.indicator_stage().await {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                self.stage_error("indicators", &e);
                None
            }
        };

        // 4. Risk pipeline in priority order.
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }
        let ctx = RiskContext {
            gateway: &self.gateway,
            store: &self.store,
            bus: &self.bus,
        };
        match self.risk.evaluate(self.account, &ctx).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => self.stage_error("risk", &e),
        }

        // 5. Trailing stops for every live position, at their own cadence.
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }
        let trailing_due = self.last_trailing.map_or(true, |at| {
            at.elapsed() >= Duration::from_secs(self.cfg.trailing.update_interval_seconds)
        });
        if trailing_due {
            self.last_trailing = Some(std::time::Instant::now());
            let positions = self.store.positions();
            self.trailing
                .update(
                    &self.symbols,
                    &positions,
                    &self.gateway,
                    &self.store,
                    &self.bus,
                )
                .await;
        }

        // 6. Strategy: exits, entries and scaling plans.
        if self.cancelled() {
            return Err(BrokerError::Cancelled);
        }
        match self.strategy_stage(snapshot).await {
            Ok(()) => {}
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => self.stage_error("scaling", &e),
        }

        Ok(())
    }

    async fn reconcile_stage(&self) -> Result<AccountSnapshot, BrokerError> {
        let account = self.gateway.get_account_info().await?;
        let rows = self.fetch_owned_positions().await?;
        self.store.reconcile(rows)?;
        Ok(account)
    }

    /// Pulls the broker position list, keeping only positions this engine
    /// owns (magic number match; 0 adopts everything).
    async fn fetch_owned_positions(&self) -> Result<Vec<crate::models::Position>, BrokerError> {
        let mut rows = self.gateway.get_positions(None).await?;
        let magic = self.cfg.execution.magic_number;
        if magic != 0 {
            rows.retain(|p| p.magic == magic);
        }
        Ok(rows)
    }

    async fn indicator_stage(&self) -> Result<Option<IndicatorSnapshot>, BrokerError> {
        let timeframe: Timeframe = self.cfg.indicators.timeframe;
        let series = self.cache.ohlc(&self.cfg.symbol, timeframe).await?;
        Ok(self
            .indicators
            .snapshot(&self.cfg.symbol, timeframe, &series, &self.cfg.indicators))
    }

    async fn strategy_stage(
        &mut self,
        snapshot: Option<IndicatorSnapshot>,
    ) -> Result<(), BrokerError> {
        // Plans whose group is gone (last member closed) are discarded.
        self.plans
            .retain(|group_id, _| self.store.group(group_id).is_some());

        // Exit conditions close a plan's whole group.
        if let Some(snap) = snapshot {
            let exiting: Vec<String> = self
                .plans
                .values()
                .filter(|plan| {
                    !self.store.positions_in_group(&plan.group_id).is_empty()
                        && exit_signal(&snap, plan.side)
                })
                .map(|plan| plan.group_id.clone())
                .collect();

            for group_id in exiting {
                self.close_group(&group_id).await?;
                self.plans.remove(&group_id);
            }
        }

        // Entry: one plan per traded symbol at a time.
        let has_plan = self.plans.values().any(|p| p.symbol == self.cfg.symbol);
        if !has_plan {
            if let Some(side) = snapshot.as_ref().and_then(entry_signal) {
                let group_id =
                    self.store
                        .create_group(&self.cfg.symbol, side, self.cfg.scaling.base_volume);
                info!(group = %group_id, %side, "entry conditions met, scaling plan created");
                let plan = ScalingPlan::new(
                    group_id.clone(),
                    self.cfg.symbol.clone(),
                    side,
                    snapshot.map(|s| s.price).unwrap_or_default(),
                    self.cfg.scaling.clone(),
                );
                self.plans.insert(group_id, plan);
            }
        }

        // Evaluate every plan; at most one transition per plan per cycle.
        let group_ids: Vec<String> = self.plans.keys().cloned().collect();
        for group_id in group_ids {
            let (action, side, symbol) = {
                let plan = &self.plans[&group_id];
                let members = self.store.positions_in_group(&group_id);
                let pip_scale = self.symbols.spec(&plan.symbol).pip_scale;
                (
                    plan.evaluate(&members, pip_scale),
                    plan.side,
                    plan.symbol.clone(),
                )
            };

            match action {
                ScalingAction::Hold => {}
                ScalingAction::Complete => {
                    if let Some(plan) = self.plans.get_mut(&group_id) {
                        plan.mark_completed();
                    }
                    self.bus.publish(TradingEvent::ScalingCompleted {
                        group_id: group_id.clone(),
                    });
                }
                ScalingAction::OpenInitial { count, volume } => {
                    let opened = self
                        .open_batch(&group_id, &symbol, side, count, volume, None)
                        .await?;
                    if opened > 0 {
                        self.bus.publish(TradingEvent::ScalingTriggered {
                            group_id: group_id.clone(),
                            level: 0,
                            opened,
                        });
                    }
                }
                ScalingAction::AddLevel {
                    next_level,
                    count,
                    volume,
                    stop_loss,
                    take_profit,
                } => {
                    let opened = self
                        .open_batch(
                            &group_id,
                            &symbol,
                            side,
                            count,
                            volume,
                            Some((stop_loss, take_profit)),
                        )
                        .await?;
                    if opened > 0 {
                        if let Some(plan) = self.plans.get_mut(&group_id) {
                            plan.commit_level(next_level);
                        }
                        self.bus.publish(TradingEvent::ScalingTriggered {
                            group_id: group_id.clone(),
                            level: next_level,
                            opened,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    async fn close_group(&self, group_id: &str) -> Result<(), BrokerError> {
        let members = self.store.positions_in_group(group_id);
        info!(group = %group_id, count = members.len(), "exit conditions met, closing group");
        for position in members {
            match self.gateway.close_position(position.ticket, None).await {
                Ok(profit) => info!(ticket = position.ticket, profit, "position closed on exit"),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(ticket = position.ticket, error = %e, "exit close failed"),
            }
        }
        Ok(())
    }

    /// Opens up to `count` market orders for a scaling step, attaching each
    /// confirmed ticket to the group. A veto or cap denial stops the batch.
    async fn open_batch(
        &self,
        group_id: &str,
        symbol: &str,
        side: Side,
        count: u32,
        volume: f64,
        levels: Option<(Option<f64>, Option<f64>)>,
    ) -> Result<u32, BrokerError> {
        let mut opened = 0u32;

        for _ in 0..count {
            if self.cancelled() {
                break;
            }
            match self.submit_order(group_id, symbol, side, volume, levels).await? {
                Some(ticket) => {
                    // Adopt the fill before grouping it.
                    let rows = self.fetch_owned_positions().await?;
                    self.store.reconcile(rows)?;
                    if !self.store.attach(ticket, group_id) {
                        warn!(ticket, group = %group_id, "fill could not be attached to group");
                    }
                    opened += 1;
                }
                None => break,
            }
        }

        Ok(opened)
    }

    /// The single choke point for new orders: every risk handler is
    /// consulted, then the store caps, then the spread gate, and only then
    /// the broker. Any refusal aborts the submission with a logged reason.
    async fn submit_order(
        &self,
        group_id: &str,
        symbol: &str,
        side: Side,
        volume: f64,
        levels: Option<(Option<f64>, Option<f64>)>,
    ) -> Result<Option<u64>, BrokerError> {
        let spec = self.symbols.spec(symbol);
        let tick = self.cache.tick(symbol).await?;

        let (stop_loss, take_profit) = match levels {
            Some(levels) => levels,
            None => {
                let entry = match side {
                    Side::Buy => tick.ask,
                    Side::Sell => tick.bid,
                };
                (
                    Some(self.volatility.stop_loss_for(&spec, entry, side)),
                    Some(self.volatility.take_profit_for(&spec, entry, side)),
                )
            }
        };

        let request = OrderRequest {
            symbol: symbol.to_string(),
            side,
            volume,
            stop_loss,
            take_profit,
            comment: self.cfg.execution.comment.clone(),
            magic: self.cfg.execution.magic_number,
        };

        let positions = self.store.positions();
        if let Some(handler) = self.risk.first_denier(&self.account, &positions, &request) {
            info!(
                group = %group_id,
                %side,
                volume,
                handler,
                "order vetoed by risk handler"
            );
            return Ok(None);
        }

        if let Err(denied) = self.store.can_open(symbol, Some(group_id)) {
            info!(group = %group_id, %side, volume, reason = %denied, "order denied by position caps");
            return Ok(None);
        }

        let spread = tick.spread_points(spec.pip_scale);
        if spread > self.cfg.execution.max_spread_points {
            info!(
                symbol,
                spread,
                max = self.cfg.execution.max_spread_points,
                "order skipped, spread too wide"
            );
            return Ok(None);
        }

        let ack = match side {
            Side::Buy => self.gateway.market_buy(&request).await,
            Side::Sell => self.gateway.market_sell(&request).await,
        };

        match ack {
            Ok(ack) => {
                info!(
                    ticket = ack.ticket,
                    price = ack.price,
                    %side,
                    volume,
                    "market order filled"
                );
                Ok(Some(ack.ticket))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                // Writes are never retried here; the scaling step is
                // abandoned for this cycle.
                warn!(%side, volume, error = %e, "market order failed");
                self.bus.publish(TradingEvent::Error {
                    source: "order_submission".to_string(),
                    message: e.to_string(),
                });
                Ok(None)
            }
        }
    }
}
