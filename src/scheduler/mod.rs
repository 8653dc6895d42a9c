//! Multi-cadence ingestion scheduler.
//!
//! One independent recurring timer per enabled cadence. On every tick the
//! timer builds a `[now - lookback, now]` window and hands it to a fresh
//! collector. Cadences never wait on each other, and a failing cadence
//! never affects the others.
//!
//! Per-timer lifecycle:
//!
//! ```text
//! Idle -> Firing -> Collecting -> Idle -> ...
//!   any state --stop()--> Disposed
//! ```

mod runner;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::CollectorFactory;
use crate::config::{CadenceDefinition, Config};
use crate::metrics::METRICS;
use crate::timeframe::Timeframe;

use runner::CadenceContext;

/// How often the hosting loop wakes up while idle.
const IDLE_POLL: Duration = Duration::from_secs(60);

struct CadenceTimer {
    timeframe: Timeframe,
    handle: JoinHandle<()>,
}

pub struct Scheduler {
    cadences: Vec<(Timeframe, CadenceDefinition)>,
    symbols: Vec<String>,
    exchanges: Vec<String>,
    factory: Arc<dyn CollectorFactory>,
    cancel: CancellationToken,

    /// Mutated only by `start` and `stop`.
    timers: Vec<CadenceTimer>,
}

impl Scheduler {
    /// Captures the enabled cadences from `config`.
    ///
    /// Cadences are fixed from here on; later config changes are not seen.
    pub fn new(
        config: &Config,
        factory: Arc<dyn CollectorFactory>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cadences: config.enabled_cadences(),
            symbols: config.symbols.clone(),
            exchanges: config.exchanges.clone(),
            factory,
            cancel,
            timers: Vec::new(),
        }
    }

    /// Creates one timer per enabled cadence.
    ///
    /// Calling `start` on a running scheduler is a no-op.
    pub fn start(&mut self) {
        if !self.timers.is_empty() {
            warn!("Scheduler already started with {} timers", self.timers.len());
            return;
        }

        for (timeframe, definition) in &self.cadences {
            let ctx = Arc::new(CadenceContext {
                timeframe: *timeframe,
                definition: definition.clone(),
                symbols: self.symbols.clone(),
                exchanges: self.exchanges.clone(),
                factory: self.factory.clone(),
                cancel: self.cancel.clone(),
            });

            info!(
                "[{}] timer created: every {}m, lookback {}m",
                timeframe, definition.interval_minutes, definition.lookback_minutes
            );

            self.timers.push(CadenceTimer {
                timeframe: *timeframe,
                handle: runner::spawn_cadence(ctx),
            });
        }

        METRICS
            .cadences_active
            .store(self.timers.len(), Ordering::Relaxed);
        info!("Scheduler started with {} cadences", self.timers.len());
    }

    /// Disposes every timer.
    ///
    /// No tick fires after this returns. Cycles already running are left
    /// to finish or to observe the cancellation token.
    pub fn stop(&mut self) {
        if self.timers.is_empty() {
            return;
        }

        for timer in self.timers.drain(..) {
            timer.handle.abort();
            debug!("[{}] timer disposed", timer.timeframe);
        }

        METRICS.cadences_active.store(0, Ordering::Relaxed);
        info!("Scheduler stopped");
    }

    /// Number of live timers.
    pub fn timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Hosting loop: starts the timers, idles until cancellation, stops.
    pub async fn run(mut self) {
        self.start();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(IDLE_POLL) => {
                    debug!("Scheduler idle: {}", METRICS.summary());
                }
            }
        }

        info!("Shutdown requested, stopping scheduler");
        self.stop();
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
