use thiserror::Error;

/// Failures produced by the limiter itself.
///
/// Transient and fatal operation errors are NOT wrapped here; they are
/// returned as the original `anyhow::Error` so callers can downcast them.
#[derive(Debug, Error)]
pub enum LimiterError {
    /// The operation kept hitting upstream rate limits until
    /// `max_retries` was reached.
    #[error("rate limit exceeded for '{operation}' after {attempts} attempts")]
    RateLimitExceeded {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    /// Cancellation was observed while waiting for pacing or backoff.
    #[error("'{operation}' cancelled while waiting")]
    Cancelled { operation: String },

    /// The retry loop ended without a result. Never expected.
    #[error("retry loop for '{operation}' exited without a result")]
    RetryLoopExhausted { operation: String },
}
