/// Collector module
///
/// This module defines the boundary between the scheduler and the code
/// that actually talks to exchanges:
/// - `CollectionCycle`: one requested time window, built per timer tick
/// - `Collector`: performs one cycle
/// - `CollectorFactory`: opens a fresh collector (unit of work) per tick
///
/// Design notes:
/// - The scheduler never retries; whatever the collector returns is final
/// - Collectors route every outbound call through the shared `RateLimiter`
pub mod kline;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::timeframe::Timeframe;

/// Ephemeral request for one collection cycle.
///
/// Created on every tick and discarded once the collector returns.
#[derive(Debug, Clone)]
pub struct CollectionCycle {
    pub symbols: Vec<String>,
    pub exchanges: Vec<String>,
    pub timeframes: Vec<Timeframe>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Performs one collection cycle.
///
/// CONTRACT:
/// - Every exchange call goes through the process-wide `RateLimiter`
/// - Should observe `cycle.cancel` between calls
/// - Errors are reported to the scheduler, which logs and drops them
///
#[async_trait::async_trait]
pub trait Collector: Send + Sync {
    async fn collect_recent_data(&self, cycle: &CollectionCycle) -> anyhow::Result<()>;
}

/// Opens a fresh collector scope for one tick.
pub trait CollectorFactory: Send + Sync {
    fn create(&self) -> Box<dyn Collector>;
}

impl<F> CollectorFactory for F
where
    F: Fn() -> Box<dyn Collector> + Send + Sync,
{
    fn create(&self) -> Box<dyn Collector> {
        self()
    }
}
