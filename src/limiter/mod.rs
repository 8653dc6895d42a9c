//! Shared outbound call limiter.
//!
//! Every exchange call made during a collection cycle goes through one
//! process-wide [`RateLimiter`]. It provides:
//! - a pacing floor between successive calls
//! - retry with backoff for rate-limited and transient failures
//! - immediate propagation of fatal failures
//!
//! The pacing floor is a soft hint, not a token bucket. The last-call
//! timestamp is read under the mutex but the wait happens outside it, so
//! two concurrent callers can observe the same timestamp and both proceed
//! inside one interval.

mod backoff;
mod classify;
mod error;

pub use classify::{FailureClass, classify};
pub use error::LimiterError;

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RateLimiterSettings;
use crate::metrics::METRICS;

/// Throttles and retries outbound operations.
///
/// THREAD SAFETY:
/// - Shared as `Arc<RateLimiter>` across every client in the process
/// - The only mutable state is the last successful call instant
pub struct RateLimiter {
    settings: RateLimiterSettings,
    last_call: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(settings: RateLimiterSettings) -> Self {
        Self {
            settings,
            last_call: Mutex::new(None),
        }
    }

    /// Runs `operation` under the pacing floor and retry policy.
    ///
    /// RETURNS:
    /// - `Ok(T)` from the first successful attempt
    /// - `LimiterError::RateLimitExceeded` after `max_retries` rate-limited attempts
    /// - the original error after `max_retries` transient attempts
    /// - the original error immediately for a fatal failure
    /// - `LimiterError::Cancelled` if `cancel` fires before or during a wait
    ///
    /// The operation is a factory so every attempt gets a fresh future.
    pub async fn execute<T, F, Fut>(
        &self,
        mut operation: F,
        operation_name: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_retries = self.settings.max_retries;
        let mut attempt: u32 = 0;

        while attempt < max_retries {
            if cancel.is_cancelled() {
                return Err(LimiterError::Cancelled {
                    operation: operation_name.to_string(),
                }
                .into());
            }

            let pacing = self.pacing_delay();
            if !pacing.is_zero() {
                debug!("{}: pacing for {:?}", operation_name, pacing);
                self.wait(pacing, operation_name, cancel).await?;
            }

            debug!(
                "{}: attempt {}/{}",
                operation_name,
                attempt + 1,
                max_retries
            );
            METRICS.limiter_calls.fetch_add(1, Ordering::Relaxed);

            let err = match operation().await {
                Ok(value) => {
                    self.record_call();
                    return Ok(value);
                }
                Err(err) => err,
            };

            attempt += 1;

            let class = classify(&err);
            let delay = match class {
                FailureClass::RateLimited => {
                    METRICS.rate_limit_hits.fetch_add(1, Ordering::Relaxed);

                    if attempt >= max_retries {
                        error!(
                            "{}: rate limited on all {} attempts: {:#}",
                            operation_name, attempt, err
                        );
                        METRICS.limiter_exhausted.fetch_add(1, Ordering::Relaxed);
                        return Err(LimiterError::RateLimitExceeded {
                            operation: operation_name.to_string(),
                            attempts: attempt,
                            source: err,
                        }
                        .into());
                    }

                    backoff::rate_limit_delay(
                        self.settings.rate_limit_delay_ms,
                        self.settings.max_delay_ms,
                        attempt,
                    )
                }

                FailureClass::Transient => {
                    if attempt >= max_retries {
                        error!(
                            "{}: transient failure persisted after {} attempts: {:#}",
                            operation_name, attempt, err
                        );
                        METRICS.limiter_exhausted.fetch_add(1, Ordering::Relaxed);
                        return Err(err);
                    }

                    backoff::transient_delay(self.settings.base_delay_ms, attempt)
                }

                FailureClass::Fatal => {
                    error!("{}: fatal failure: {:#}", operation_name, err);
                    return Err(err);
                }
            };

            warn!(
                "{}: {} failure on attempt {}/{}, retrying in {:?}: {:#}",
                operation_name,
                class.as_str(),
                attempt,
                max_retries,
                delay,
                err
            );
            METRICS.limiter_retries.fetch_add(1, Ordering::Relaxed);

            self.wait(delay, operation_name, cancel).await?;
        }

        Err(LimiterError::RetryLoopExhausted {
            operation: operation_name.to_string(),
        }
        .into())
    }

    /// Time still owed to the pacing floor, from a snapshot of the last call.
    fn pacing_delay(&self) -> Duration {
        let last_call = *self.lock_last_call();

        match last_call {
            Some(at) => self.settings.min_interval().saturating_sub(at.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn record_call(&self) {
        *self.lock_last_call() = Some(Instant::now());
    }

    /// Poisoning only means another caller panicked mid-update; the
    /// timestamp is still a usable pacing hint.
    fn lock_last_call(&self) -> MutexGuard<'_, Option<Instant>> {
        self.last_call.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter timestamp mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    async fn wait(
        &self,
        delay: Duration,
        operation_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), LimiterError> {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(LimiterError::Cancelled {
                operation: operation_name.to_string(),
            }),

            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;

    fn settings(max_retries: u32, min_interval_ms: u64) -> RateLimiterSettings {
        RateLimiterSettings {
            max_retries,
            rate_limit_delay_ms: 100,
            max_delay_ms: 1_000,
            base_delay_ms: 50,
            min_interval_between_calls_ms: min_interval_ms,
        }
    }

    fn connection_reset() -> anyhow::Error {
        io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer").into()
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retries_then_returns_original() {
        let limiter = RateLimiter::new(settings(3, 0));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let result: anyhow::Result<()> = limiter
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(connection_reset()) }
                },
                "transient",
                &cancel,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.downcast_ref::<LimiterError>().is_none());

        let io_err = err.downcast_ref::<io::Error>().expect("original io::Error");
        assert_eq!(io_err.kind(), io::ErrorKind::ConnectionReset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_then_success() {
        let limiter = RateLimiter::new(settings(4, 0));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let value = limiter
            .execute(
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n <= 2 {
                            Err(anyhow::anyhow!("HTTP 429"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                "recovering",
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_failure_is_not_retried() {
        let limiter = RateLimiter::new(settings(3, 0));
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result: anyhow::Result<()> = limiter
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow::anyhow!("invalid symbol")) }
                },
                "fatal",
                &cancel,
            )
            .await;

        assert_eq!(result.unwrap_err().to_string(), "invalid symbol");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_wraps_last_error() {
        let limiter = RateLimiter::new(settings(3, 0));
        let attempt_times = Arc::new(Mutex::new(Vec::new()));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let result: anyhow::Result<()> = limiter
            .execute(
                || {
                    let times = attempt_times.clone();
                    async move {
                        let mut times = times.lock().unwrap();
                        times.push(start.elapsed());
                        Err(anyhow::anyhow!("rate limit exceeded (attempt {})", times.len()))
                    }
                },
                "exhausted",
                &cancel,
            )
            .await;

        // 100ms then 200ms of backoff between the three attempts
        let times = attempt_times.lock().unwrap().clone();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], Duration::ZERO);
        assert!(times[1] >= Duration::from_millis(100) && times[1] < Duration::from_millis(150));
        assert!(times[2] >= Duration::from_millis(300) && times[2] < Duration::from_millis(350));

        let err = result.unwrap_err();
        match err.downcast_ref::<LimiterError>() {
            Some(LimiterError::RateLimitExceeded {
                attempts, source, ..
            }) => {
                assert_eq!(*attempts, 3);
                assert_eq!(source.to_string(), "rate limit exceeded (attempt 3)");
            }
            other => panic!("expected RateLimitExceeded, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_respect_min_interval() {
        let limiter = RateLimiter::new(settings(3, 200));
        let cancel = CancellationToken::new();

        let first_done = limiter
            .execute(|| async { Ok(Instant::now()) }, "first", &cancel)
            .await
            .unwrap();
        let second_start = limiter
            .execute(|| async { Ok(Instant::now()) }, "second", &cancel)
            .await
            .unwrap();

        assert!(second_start.duration_since(first_done) >= Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_call_does_not_update_timestamp() {
        let limiter = RateLimiter::new(settings(1, 200));
        let cancel = CancellationToken::new();

        let _: anyhow::Result<()> = limiter
            .execute(|| async { Err(anyhow::anyhow!("bad request")) }, "fails", &cancel)
            .await;

        let start = Instant::now();
        limiter
            .execute(|| async { Ok(()) }, "after_failure", &cancel)
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_may_share_one_interval() {
        let limiter = RateLimiter::new(settings(3, 200));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        limiter
            .execute(|| async { Ok(()) }, "seed", &cancel)
            .await
            .unwrap();

        // both callers snapshot the seed timestamp before either records a call
        let (a, b) = tokio::join!(
            limiter.execute(|| async { Ok(start.elapsed()) }, "a", &cancel),
            limiter.execute(|| async { Ok(start.elapsed()) }, "b", &cancel),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let window = Duration::from_millis(200)..Duration::from_millis(250);
        assert!(window.contains(&a), "a started at {a:?}");
        assert!(window.contains(&b), "b started at {b:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pacing_wait() {
        let limiter = Arc::new(RateLimiter::new(settings(3, 1_000)));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        limiter
            .execute(|| async { Ok(()) }, "seed", &cancel)
            .await
            .unwrap();

        let task = tokio::spawn({
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let calls = calls.clone();
            async move {
                limiter
                    .execute(
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async { Ok(()) }
                        },
                        "paced",
                        &cancel,
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LimiterError>(),
            Some(LimiterError::Cancelled { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff() {
        let limiter = Arc::new(RateLimiter::new(settings(3, 0)));
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));

        let task = tokio::spawn({
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let calls = calls.clone();
            async move {
                limiter
                    .execute(
                        || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            async { Err::<(), _>(anyhow::anyhow!("too many requests")) }
                        },
                        "cancelled",
                        &cancel,
                    )
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LimiterError>(),
            Some(LimiterError::Cancelled { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_retries_hits_invariant_error() {
        let limiter = RateLimiter::new(settings(0, 0));
        let cancel = CancellationToken::new();

        let err = limiter
            .execute(|| async { Ok(()) }, "never", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<LimiterError>(),
            Some(LimiterError::RetryLoopExhausted { .. })
        ));
    }
}
