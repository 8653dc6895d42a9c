use std::time::Duration;

/// Backoff after the `attempt`-th rate-limit failure (1-based).
///
/// Formula: min(max_delay, base * 2^(attempt-1))
pub fn rate_limit_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(exponential_ms(base_ms, attempt).min(max_ms))
}

/// Backoff after the `attempt`-th transient failure (1-based).
///
/// Formula: base * 2^(attempt-1), no cap.
pub fn transient_delay(base_ms: u64, attempt: u32) -> Duration {
    Duration::from_millis(exponential_ms(base_ms, attempt))
}

fn exponential_ms(base_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(63);
    base_ms.saturating_mul(1u64 << exponent)
}
