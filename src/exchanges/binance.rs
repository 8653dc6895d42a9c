use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use crate::{schema::Candle, timeframe::Timeframe, util};

use super::adapter::ExchangeAdapter;

const BASE_URL: &str = "https://api.binance.com";

/// Binance returns at most 1000 klines per request.
const MAX_LIMIT: u32 = 1000;

/// Binance (Global) REST kline adapter
///
/// Binance Spot REST:
/// https://developers.binance.com/docs/binance-spot-api-docs/rest-api/market-data-endpoints#klinecandlestick-data
///
/// Response rows are positional arrays:
/// [openTime, open, high, low, close, volume, closeTime, ...]
pub struct BinanceAdapter {
    http: reqwest::Client,
    base_url: String,
}

impl BinanceAdapter {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(BASE_URL, timeout)
    }

    pub fn with_base_url(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn klines_url(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        format!(
            "{}/api/v3/klines?symbol={}&interval={}&startTime={}&endTime={}&limit={}",
            self.base_url,
            util::symbol_to_exchange(self.name(), symbol),
            timeframe.as_str(),
            util::to_millis(start),
            util::to_millis(end),
            MAX_LIMIT,
        )
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BinanceAdapter {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = self.klines_url(symbol, timeframe, start, end);

        // URLs carry millisecond timestamps, which must not leak into
        // error text matched by the limiter's classifier.
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| e.without_url())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.without_url())?;

        // --------------------------------------------------
        // 429: request weight exceeded
        // 418: IP auto-banned after repeated 429s
        // --------------------------------------------------
        if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::IM_A_TEAPOT {
            bail!(
                "binance rate limit: HTTP {} for {} {}",
                status.as_u16(),
                symbol,
                timeframe
            );
        }

        if !status.is_success() {
            bail!(
                "binance klines {} {} failed: HTTP {}: {}",
                symbol,
                timeframe,
                status.as_u16(),
                body
            );
        }

        parse_klines(self.name(), symbol, timeframe, &body)
    }
}

fn parse_klines(
    exchange: &str,
    symbol: &str,
    timeframe: Timeframe,
    body: &str,
) -> anyhow::Result<Vec<Candle>> {
    let rows: Vec<Vec<Value>> =
        serde_json::from_str(body).context("binance klines: unexpected response shape")?;

    rows.iter()
        .map(|row| {
            let field = |i: usize| -> anyhow::Result<String> {
                row.get(i)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .with_context(|| format!("binance kline column {} missing", i))
            };

            Ok(Candle {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
                timeframe,
                open_time: row
                    .first()
                    .and_then(Value::as_i64)
                    .context("binance kline open time missing")?,
                open: field(1)?,
                high: field(2)?,
                low: field(3)?,
                close: field(4)?,
                volume: field(5)?,
            })
        })
        .collect()
}
