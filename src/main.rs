use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{fmt, EnvFilter};

use fx_scaling_bot::broker::HttpTransport;
use fx_scaling_bot::config::Config;
use fx_scaling_bot::engine::TradingEngine;
use fx_scaling_bot::events::LogListener;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .init();

    let transport = Box::new(HttpTransport::new(&cfg.broker.bridge_url));

    let mut engine = TradingEngine::new(cfg, transport);
    engine.bus().subscribe(Arc::new(LogListener));
    engine.run().await?;

    Ok(())
}
