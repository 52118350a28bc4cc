use serde::{Deserialize, Serialize};

use crate::models::Timeframe;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketDataConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub update_interval_ms: u64,
    pub ohlc_update_interval_ms: u64,
    pub ohlc_count: usize,
    pub max_age_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub timeframe: Timeframe,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub bollinger_period: usize,
    pub bollinger_deviations: f64,
    pub adx_period: usize,
    pub stochastic_k: usize,
    pub stochastic_d: usize,
    pub stochastic_slowing: usize,
    pub atr_period: usize,
    pub atr_timeframe: Timeframe,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarginConfig {
    pub min_free_margin: f64,
    pub critical_margin_level: f64,
    pub warning_margin_level: f64,
    pub check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitTargetConfig {
    pub profit_target_percent: f64,
    pub check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagnantConfig {
    pub max_inactive_minutes: f64,
    pub min_profit_pips: f64,
    pub check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    pub initial_positions: u32,
    pub additional_positions: u32,
    pub trigger_pips: f64,
    pub lot_increment: f64,
    pub lot_increment_step: u32,
    pub max_positions: usize,
    pub max_level: u32,
    pub base_volume: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailingConfig {
    pub activation_distance_pips: f64,
    pub distance_pips: f64,
    pub update_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLimitsConfig {
    pub max_total: usize,
    pub max_per_symbol: usize,
    pub max_per_group: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    pub low_threshold_pips: f64,
    pub high_threshold_pips: f64,
    pub sl_atr_multiplier: f64,
    pub tp_atr_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub max_spread_points: i64,
    pub magic_number: i64,
    pub comment: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    pub bridge_url: String,
    pub command_timeout_ms: u64,
    pub read_retries: u32,
    pub retry_backoff_ms: u64,
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub symbol: String,
    pub loop_interval_ms: u64,
    pub broker: BrokerConfig,
    pub market_data: MarketDataConfig,
    pub indicators: IndicatorConfig,
    pub margin: MarginConfig,
    pub profit_target: ProfitTargetConfig,
    pub stagnant: StagnantConfig,
    pub scaling: ScalingConfig,
    pub trailing: TrailingConfig,
    pub position_limits: PositionLimitsConfig,
    pub volatility: VolatilityConfig,
    pub execution: ExecutionConfig,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let env = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };
        let num = |key: &str, default: &str| -> f64 {
            env(key, default).parse().unwrap_or_else(|_| {
                default.parse().expect("default literal must parse")
            })
        };
        let tf = |key: &str, default: Timeframe| -> Timeframe {
            std::env::var(key)
                .ok()
                .and_then(|s| Timeframe::from_str_loose(&s))
                .unwrap_or(default)
        };

        let symbols: Vec<String> = env("MARKET_DATA_SYMBOLS", "EURUSD")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let timeframes: Vec<Timeframe> = env("MARKET_DATA_TIMEFRAMES", "M5,H1")
            .split(',')
            .filter_map(|s| Timeframe::from_str_loose(s.trim()))
            .collect();

        Config {
            symbol: env("TRADING_SYMBOL", "EURUSD"),
            loop_interval_ms: num("TRADING_LOOP_INTERVAL_MS", "1000") as u64,
            broker: BrokerConfig {
                bridge_url: env("BROKER_BRIDGE_URL", "http://127.0.0.1:8787"),
                command_timeout_ms: num("BROKER_COMMAND_TIMEOUT_MS", "5000") as u64,
                read_retries: num("BROKER_READ_RETRIES", "3") as u32,
                retry_backoff_ms: num("BROKER_RETRY_BACKOFF_MS", "250") as u64,
                shutdown_grace_ms: num("BROKER_SHUTDOWN_GRACE_MS", "5000") as u64,
            },
            market_data: MarketDataConfig {
                symbols,
                timeframes,
                update_interval_ms: num("MARKET_DATA_UPDATE_INTERVAL_MS", "1000") as u64,
                ohlc_update_interval_ms: num("MARKET_DATA_OHLC_UPDATE_INTERVAL_MS", "60000")
                    as u64,
                ohlc_count: num("MARKET_DATA_OHLC_COUNT", "100") as usize,
                max_age_ms: num("MARKET_DATA_MAX_AGE_MS", "5000") as u64,
            },
            indicators: IndicatorConfig {
                timeframe: tf("INDICATORS_TIMEFRAME", Timeframe::M5),
                rsi_period: num("INDICATORS_RSI_PERIOD", "2") as usize,
                macd_fast: num("INDICATORS_MACD_FAST", "2") as usize,
                macd_slow: num("INDICATORS_MACD_SLOW", "4") as usize,
                macd_signal: num("INDICATORS_MACD_SIGNAL", "2") as usize,
                bollinger_period: num("INDICATORS_BOLLINGER_PERIOD", "3") as usize,
                bollinger_deviations: num("INDICATORS_BOLLINGER_DEVIATIONS", "2.0"),
                adx_period: num("INDICATORS_ADX_PERIOD", "2") as usize,
                stochastic_k: num("INDICATORS_STOCHASTIC_K", "2") as usize,
                stochastic_d: num("INDICATORS_STOCHASTIC_D", "2") as usize,
                stochastic_slowing: num("INDICATORS_STOCHASTIC_SLOWING", "2") as usize,
                atr_period: num("INDICATORS_ATR_PERIOD", "14") as usize,
                atr_timeframe: tf("INDICATORS_ATR_TIMEFRAME", Timeframe::H1),
            },
            margin: MarginConfig {
                min_free_margin: num("RISK_MARGIN_MIN_FREE_MARGIN", "50.0"),
                critical_margin_level: num("RISK_MARGIN_CRITICAL_MARGIN_LEVEL", "150.0"),
                warning_margin_level: num("RISK_MARGIN_WARNING_MARGIN_LEVEL", "200.0"),
                check_interval_seconds: num("RISK_MARGIN_CHECK_INTERVAL_SECONDS", "10") as u64,
            },
            profit_target: ProfitTargetConfig {
                profit_target_percent: num("RISK_PROFIT_TARGET_PERCENT", "2.0"),
                check_interval_seconds: num("RISK_PROFIT_TARGET_CHECK_INTERVAL_SECONDS", "30")
                    as u64,
            },
            stagnant: StagnantConfig {
                max_inactive_minutes: num("RISK_STAGNANT_MAX_INACTIVE_MINUTES", "50"),
                min_profit_pips: num("RISK_STAGNANT_MIN_PROFIT_PIPS", "5.0"),
                check_interval_seconds: num("RISK_STAGNANT_CHECK_INTERVAL_SECONDS", "60") as u64,
            },
            scaling: ScalingConfig {
                initial_positions: num("SCALING_INITIAL_POSITIONS", "3") as u32,
                additional_positions: num("SCALING_ADDITIONAL_POSITIONS", "4") as u32,
                trigger_pips: num("SCALING_TRIGGER_PIPS", "15.0"),
                lot_increment: num("SCALING_LOT_INCREMENT", "0.01"),
                lot_increment_step: num("SCALING_LOT_INCREMENT_STEP", "4") as u32,
                max_positions: num("SCALING_MAX_POSITIONS", "20") as usize,
                max_level: num("SCALING_MAX_LEVEL", "5") as u32,
                base_volume: num("SCALING_BASE_VOLUME", "0.10"),
            },
            trailing: TrailingConfig {
                activation_distance_pips: num("TRAILING_ACTIVATION_DISTANCE_PIPS", "15.0"),
                distance_pips: num("TRAILING_DISTANCE_PIPS", "30.0"),
                update_interval_seconds: num("TRAILING_UPDATE_INTERVAL_SECONDS", "5") as u64,
            },
            position_limits: PositionLimitsConfig {
                max_total: num("POSITIONS_MAX_TOTAL", "20") as usize,
                max_per_symbol: num("POSITIONS_MAX_PER_SYMBOL", "10") as usize,
                max_per_group: num("POSITIONS_MAX_PER_GROUP", "20") as usize,
            },
            volatility: VolatilityConfig {
                low_threshold_pips: num("VOLATILITY_LOW_THRESHOLD_PIPS", "30.0"),
                high_threshold_pips: num("VOLATILITY_HIGH_THRESHOLD_PIPS", "60.0"),
                sl_atr_multiplier: num("VOLATILITY_SL_ATR_MULTIPLIER", "1.5"),
                tp_atr_multiplier: num("VOLATILITY_TP_ATR_MULTIPLIER", "2.0"),
            },
            execution: ExecutionConfig {
                max_spread_points: num("EXECUTION_MAX_SPREAD_POINTS", "20") as i64,
                magic_number: num("EXECUTION_MAGIC_NUMBER", "12345") as i64,
                comment: env("EXECUTION_COMMENT", "fx-scaling-bot"),
            },
            log_level: env("LOG_LEVEL", "info"),
        }
    }
}
