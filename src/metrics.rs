use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;

/// Global runtime metrics for the ingestion process.
///
/// Purpose:
/// - Track active cadences
/// - Track collection cycle outcomes
/// - Track outbound call pressure (calls, retries, rate limits)
///
/// Design:
/// - Lock-free (Atomics)
/// - Cheap to update
/// - Safe in async + multithreaded contexts
#[derive(Default)]
pub struct RuntimeMetrics {
    // Scheduler
    pub cadences_active: AtomicUsize,
    pub cycles_started: AtomicUsize,
    pub cycles_succeeded: AtomicUsize,
    pub cycles_failed: AtomicUsize,
    pub cycles_cancelled: AtomicUsize,

    // Rate limiter
    pub limiter_calls: AtomicUsize,
    pub limiter_retries: AtomicUsize,
    pub rate_limit_hits: AtomicUsize,
    pub limiter_exhausted: AtomicUsize,

    // Output
    pub candles_collected: AtomicUsize,
}

impl RuntimeMetrics {
    /// One-line summary for the periodic reporter.
    pub fn summary(&self) -> String {
        format!(
            "cadences={} cycles={} ok={} failed={} cancelled={} calls={} retries={} rate_limited={} exhausted={} candles={}",
            self.cadences_active.load(Ordering::Relaxed),
            self.cycles_started.load(Ordering::Relaxed),
            self.cycles_succeeded.load(Ordering::Relaxed),
            self.cycles_failed.load(Ordering::Relaxed),
            self.cycles_cancelled.load(Ordering::Relaxed),
            self.limiter_calls.load(Ordering::Relaxed),
            self.limiter_retries.load(Ordering::Relaxed),
            self.rate_limit_hits.load(Ordering::Relaxed),
            self.limiter_exhausted.load(Ordering::Relaxed),
            self.candles_collected.load(Ordering::Relaxed),
        )
    }
}

/// Global metrics registry (singleton)
pub static METRICS: Lazy<Arc<RuntimeMetrics>> =
    Lazy::new(|| Arc::new(RuntimeMetrics::default()));
