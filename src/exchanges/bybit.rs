use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::{schema::Candle, timeframe::Timeframe, util};

use super::adapter::ExchangeAdapter;

const BASE_URL: &str = "https://api.bybit.com";

const MAX_LIMIT: u32 = 1000;

/// Bybit's "too many visits" return code.
const RET_CODE_RATE_LIMIT: i64 = 10006;

/// Bybit V5 REST kline adapter (spot category)
///
/// https://bybit-exchange.github.io/docs/v5/market/kline
///
/// Rows are string arrays, newest first:
/// [startTime, open, high, low, close, volume, turnover]
pub struct BybitAdapter {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KlineResponse {
    ret_code: i64,
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    list: Vec<Vec<String>>,
}

impl BybitAdapter {
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
            "{}/v5/market/kline?category=spot&symbol={}&interval={}&start={}&end={}&limit={}",
            self.base_url,
            util::symbol_to_exchange(self.name(), symbol),
            interval(timeframe),
            util::to_millis(start),
            util::to_millis(end),
            MAX_LIMIT,
        )
    }
}

/// Bybit expresses intervals in minutes, except daily.
fn interval(timeframe: Timeframe) -> &'static str {
    match timeframe {
        Timeframe::M1 => "1",
        Timeframe::M5 => "5",
        Timeframe::M15 => "15",
        Timeframe::H1 => "60",
        Timeframe::H4 => "240",
        Timeframe::D1 => "D",
    }
}

#[async_trait::async_trait]
impl ExchangeAdapter for BybitAdapter {
    fn name(&self) -> &'static str {
        "bybit"
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Candle>> {
        let url = self.klines_url(symbol, timeframe, start, end);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| e.without_url())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.without_url())?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            bail!("bybit rate limit: HTTP 429 for {} {}", symbol, timeframe);
        }

        if !status.is_success() {
            bail!(
                "bybit klines {} {} failed: HTTP {}: {}",
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
    let response: KlineResponse =
        serde_json::from_str(body).context("bybit klines: unexpected response shape")?;

    // Bybit reports most errors with HTTP 200 and a non-zero retCode
    match response.ret_code {
        0 => {}
        RET_CODE_RATE_LIMIT => bail!("bybit rate limit: {}", response.ret_msg),
        code => bail!("bybit klines {} failed: retCode {}: {}", symbol, code, response.ret_msg),
    }

    let rows = response.result.map(|r| r.list).unwrap_or_default();

    let mut candles = rows
        .into_iter()
        .map(|row| {
            let [open_time, open, high, low, close, volume, ..] = row.as_slice() else {
                bail!("bybit kline row has {} columns, expected 7", row.len());
            };

            Ok(Candle {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
                timeframe,
                open_time: open_time
                    .parse::<i64>()
                    .with_context(|| format!("bybit kline start time '{}'", open_time))?,
                open: open.clone(),
                high: high.clone(),
                low: low.clone(),
                close: close.clone(),
                volume: volume.clone(),
            })
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}
