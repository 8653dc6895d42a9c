// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:     Configuration structs loaded from JSON
// - timeframe:  The fixed set of candle periods (1m .. 1d)
// - schema:     Normalized candle record
// - util:       Shared helper utilities (symbols, time)
// - exchanges:  REST kline adapters and adapter registry
// - limiter:    Shared outbound pacing + retry/backoff
// - collector:  One collection cycle (window -> exchange calls)
// - scheduler:  One recurring timer per cadence
// - metrics:    Process-wide counters
//
mod collector;
mod config;
mod exchanges;
mod limiter;
mod metrics;
mod scheduler;
mod schema;
mod timeframe;
mod util;

use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use collector::{Collector, CollectorFactory, kline::KlineCollector};
use config::{load_config, resolve_path};
use exchanges::build_adapters;
use limiter::RateLimiter;
use metrics::METRICS;
use scheduler::Scheduler;

const METRICS_INTERVAL: Duration = Duration::from_secs(60);

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize logging
// - Load configuration
// - Build the single shared RateLimiter and exchange adapters
// - Run the scheduler until Ctrl-C
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = resolve_path(std::env::args().nth(1));
    let config = load_config(&path)?;
    info!(
        "Loaded {}: {} symbols, {} exchanges, {} enabled cadences",
        path,
        config.symbols.len(),
        config.exchanges.len(),
        config.enabled_cadences().len()
    );

    // --------------------------------------------------------
    // One limiter for the whole process.
    //
    // Every collector created by the factory shares this instance,
    // so pacing applies across all cadences and exchanges.
    // --------------------------------------------------------
    let limiter = Arc::new(RateLimiter::new(config.rate_limiter.clone()));
    let adapters = Arc::new(build_adapters(&config.exchanges)?);
    let log_candles = config.log_candles();

    let factory: Arc<dyn CollectorFactory> = Arc::new(move || {
        Box::new(KlineCollector::new(
            limiter.clone(),
            adapters.clone(),
            log_candles,
        )) as Box<dyn Collector>
    });

    let cancel = CancellationToken::new();

    // --------------------------------------------------------
    // Shutdown on Ctrl-C
    // --------------------------------------------------------
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Cannot listen for Ctrl-C: {}", e);
                return;
            }
            info!("Ctrl-C received");
            cancel.cancel();
        }
    });

    // --------------------------------------------------------
    // Metrics reporter (periodic, low-noise)
    // --------------------------------------------------------
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(METRICS_INTERVAL) => info!("[METRICS] {}", METRICS.summary()),
                }
            }
        }
    });

    Scheduler::new(&config, factory, cancel).run().await;

    info!("[METRICS] final {}", METRICS.summary());
    Ok(())
}
