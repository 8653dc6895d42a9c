//! Exchange adapter registry and factory
//!
//! This module provides:
//! - Central registration of all supported exchanges
//! - A factory function to resolve adapters by name
//!
//! All exchange-specific logic must live in dedicated adapter modules.
//! The rest of the application must interact exclusively through
//! the `ExchangeAdapter` trait.

pub mod adapter;
mod binance;
mod bybit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use adapter::ExchangeAdapter;
use log::warn;

/// HTTP timeout applied to every kline request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared adapters keyed by exchange name.
pub type AdapterMap = HashMap<String, Arc<dyn ExchangeAdapter>>;

/// Returns an exchange adapter instance by name.
///
/// RETURNS:
/// - `Ok(Some(adapter))` if the exchange is supported
/// - `Ok(None)` if the exchange is unknown
/// - `Err` if the HTTP client could not be built
///
/// CONTRACT:
/// - `name` MUST match an entry of `exchanges` in config.json
/// - Adapter names are lowercase and stable
///
pub fn get_adapter(name: &str) -> anyhow::Result<Option<Arc<dyn ExchangeAdapter>>> {
    let adapter: Arc<dyn ExchangeAdapter> = match name {
        "binance" => Arc::new(binance::BinanceAdapter::new(REQUEST_TIMEOUT)?),
        "bybit" => Arc::new(bybit::BybitAdapter::new(REQUEST_TIMEOUT)?),
        _ => return Ok(None),
    };
    Ok(Some(adapter))
}

/// Builds one adapter per configured exchange.
///
/// Unknown exchanges are logged and skipped; cycles will report
/// them as failed fetches.
pub fn build_adapters(names: &[String]) -> anyhow::Result<AdapterMap> {
    let mut adapters = AdapterMap::new();

    for name in names {
        match get_adapter(name)? {
            Some(adapter) => {
                adapters.insert(name.clone(), adapter);
            }
            None => warn!("Exchange '{}' is not supported", name),
        }
    }

    Ok(adapters)
}
