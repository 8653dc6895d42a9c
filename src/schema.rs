use serde::{Deserialize, Serialize};

use crate::timeframe::Timeframe;

// ------------------------------------------------------------
// Candle
// ------------------------------------------------------------
//
// One OHLCV bar as returned by an exchange kline endpoint,
// normalized across all exchanges.
//
// Produced by exchange clients, consumed by the collector.
// Persistence happens downstream and is not part of this process.
//
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Candle {
    /// Exchange identifier (e.g. "binance", "bybit")
    pub exchange: String,

    /// Trading pair in normalized internal format
    /// Example: "BTC/USDT"
    pub symbol: String,

    pub timeframe: Timeframe,

    /// Bar open time in milliseconds since Unix epoch
    pub open_time: i64,

    /// Prices and volume as strings
    ///
    /// DESIGN DECISION:
    /// Kept as the exchange sent them to avoid floating-point precision issues.
    pub open: String,
    pub high: String,
    pub low: String,
    pub close: String,
    pub volume: String,
}
