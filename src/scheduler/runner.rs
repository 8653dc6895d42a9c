use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::Utc;
use futures_util::FutureExt;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::collector::{CollectionCycle, CollectorFactory};
use crate::config::CadenceDefinition;
use crate::metrics::METRICS;
use crate::timeframe::Timeframe;

/// Everything one cadence timer needs, shared with its tick tasks.
pub(super) struct CadenceContext {
    pub timeframe: Timeframe,
    pub definition: CadenceDefinition,
    pub symbols: Vec<String>,
    pub exchanges: Vec<String>,
    pub factory: Arc<dyn CollectorFactory>,
    pub cancel: CancellationToken,
}

/// Spawns the recurring timer for one cadence.
///
/// DESIGN:
/// - First tick fires immediately, then every `interval_minutes`
/// - Each tick runs in its own task, so a slow cycle never delays the
///   timer. Ticks of the same cadence may overlap.
/// - Aborting the returned handle stops future ticks only; cycles
///   already running finish on their own
///
pub(super) fn spawn_cadence(ctx: Arc<CadenceContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(ctx.definition.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = ctx.cancel.cancelled() => {
                    debug!("[{}] timer stopping: shutdown requested", ctx.timeframe);
                    break;
                }

                _ = ticker.tick() => {
                    tokio::spawn(run_cycle(ctx.clone()));
                }
            }
        }
    })
}

/// How one tick of a cadence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CycleOutcome {
    Completed,
    Failed,
    Panicked,
    /// Shutdown was requested before or during the cycle.
    Cancelled,
}

/// Runs one collection cycle for a cadence.
///
/// Every failure, including a panic inside the collector, ends here.
/// Nothing propagates to the timer or to other cadences.
pub(super) async fn run_cycle(ctx: Arc<CadenceContext>) -> CycleOutcome {
    if ctx.cancel.is_cancelled() {
        return CycleOutcome::Cancelled;
    }

    METRICS.cycles_started.fetch_add(1, Ordering::Relaxed);

    let collector = ctx.factory.create();

    let end_time = Utc::now();
    let cycle = CollectionCycle {
        symbols: ctx.symbols.clone(),
        exchanges: ctx.exchanges.clone(),
        timeframes: vec![ctx.timeframe],
        start_time: end_time - ctx.definition.lookback(),
        end_time,
        cancel: ctx.cancel.clone(),
    };

    debug!(
        "[{}] collecting {} .. {}",
        ctx.timeframe, cycle.start_time, cycle.end_time
    );

    let outcome = AssertUnwindSafe(collector.collect_recent_data(&cycle))
        .catch_unwind()
        .await;

    match outcome {
        Ok(result) if ctx.cancel.is_cancelled() => {
            METRICS.cycles_cancelled.fetch_add(1, Ordering::Relaxed);
            match result {
                Ok(()) => debug!("[{}] collection cycle stopped by shutdown", ctx.timeframe),
                Err(e) => debug!(
                    "[{}] collection cycle stopped by shutdown: {:#}",
                    ctx.timeframe, e
                ),
            }
            CycleOutcome::Cancelled
        }
        Ok(Ok(())) => {
            METRICS.cycles_succeeded.fetch_add(1, Ordering::Relaxed);
            info!("[{}] collection cycle completed", ctx.timeframe);
            CycleOutcome::Completed
        }
        Ok(Err(e)) => {
            METRICS.cycles_failed.fetch_add(1, Ordering::Relaxed);
            error!("[{}] collection cycle failed: {:#}", ctx.timeframe, e);
            CycleOutcome::Failed
        }
        Err(panic) => {
            METRICS.cycles_failed.fetch_add(1, Ordering::Relaxed);
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            warn!("[{}] collection cycle panicked: {}", ctx.timeframe, reason);
            CycleOutcome::Panicked
        }
    }
}
