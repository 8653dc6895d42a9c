/// Utility helpers shared by exchange clients.
///
/// IMPORTANT:
/// - No exchange I/O should live here.
/// - This module must remain lightweight and deterministic.
///
use chrono::{DateTime, Utc};

/// Convert an internal symbol into the exchange-specific format.
///
/// Examples:
/// - ("binance", "BTC/USDT") -> "BTCUSDT"
/// - ("bybit", "eth/usdt")   -> "ETHUSDT"
///
pub fn symbol_to_exchange(exchange: &str, symbol: &str) -> String {
    match exchange {
        "binance" | "bybit" => symbol.replace('/', "").to_uppercase(),
        _ => symbol.to_string(),
    }
}

/// Milliseconds since Unix epoch, the unit every kline API speaks.
pub fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_symbol_to_exchange() {
        assert_eq!(symbol_to_exchange("binance", "BTC/USDT"), "BTCUSDT");
        assert_eq!(symbol_to_exchange("bybit", "eth/usdt"), "ETHUSDT");
        assert_eq!(symbol_to_exchange("unknown", "BTC/USDT"), "BTC/USDT");
    }

    #[test]
    fn test_to_millis() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_millis(t), 1_704_067_200_000);
    }
}
