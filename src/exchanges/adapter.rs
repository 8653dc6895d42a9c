use chrono::{DateTime, Utc};

use crate::schema::Candle;
use crate::timeframe::Timeframe;

/// ExchangeAdapter is the abstraction layer between:
/// - The generic collector
/// - Exchange-specific REST kline endpoints
///
/// Each exchange implementation must:
/// - Build the exchange-specific kline request
/// - Parse the raw response into normalized `Candle`s
/// - Surface rate-limit responses with rate-limit wording
///   ("429", "rate limit", ...) so the shared limiter backs off
///
/// THREAD SAFETY:
/// - Must be Send + Sync
/// - Adapter instances are shared across cadences
///
/// Adapters never retry or pace on their own. Callers route
/// every `fetch_klines` through the shared `RateLimiter`.
///
#[async_trait::async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Returns the canonical exchange name.
    ///
    /// CONTRACT:
    /// - Must match an entry of `exchanges` in configuration
    ///
    fn name(&self) -> &'static str;

    /// Fetches candles whose open time lies in `[start, end]`.
    ///
    /// ERRORS:
    /// - Transport failures keep their `reqwest::Error` type
    /// - Rate-limit responses carry rate-limit wording
    /// - Anything else is a plain error
    ///
    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>>;
}
