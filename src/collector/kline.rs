use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, error, info};

use crate::exchanges::AdapterMap;
use crate::limiter::{LimiterError, RateLimiter};
use crate::metrics::METRICS;

use super::{CollectionCycle, Collector};

/// Fetches klines for every (exchange, symbol, timeframe) in a cycle.
///
/// BEHAVIOR:
/// - One limiter-wrapped call per combination
/// - A failed combination is logged and the cycle continues
/// - The cycle fails if any combination failed
/// - Shutdown ends the cycle with an error, never with `Ok`
///
/// Candles are forwarded to the log; storage is downstream.
pub struct KlineCollector {
    limiter: Arc<RateLimiter>,
    adapters: Arc<AdapterMap>,
    log_candles: bool,
}

impl KlineCollector {
    pub fn new(limiter: Arc<RateLimiter>, adapters: Arc<AdapterMap>, log_candles: bool) -> Self {
        Self {
            limiter,
            adapters,
            log_candles,
        }
    }
}

#[async_trait::async_trait]
impl Collector for KlineCollector {
    async fn collect_recent_data(&self, cycle: &CollectionCycle) -> anyhow::Result<()> {
        let mut total = 0usize;
        let mut failed = 0usize;

        for exchange in &cycle.exchanges {
            for symbol in &cycle.symbols {
                for &timeframe in &cycle.timeframes {
                    if cycle.cancel.is_cancelled() {
                        debug!("Cycle cancelled before {} {} {}", exchange, symbol, timeframe);
                        anyhow::bail!(
                            "collection cancelled after {} of {} kline fetches",
                            total,
                            cycle.exchanges.len() * cycle.symbols.len() * cycle.timeframes.len()
                        );
                    }

                    total += 1;

                    let Some(adapter) = self.adapters.get(exchange) else {
                        error!("No adapter for exchange '{}'", exchange);
                        failed += 1;
                        continue;
                    };

                    let operation = format!("{}:{}:{}", exchange, symbol, timeframe);
                    let result = self
                        .limiter
                        .execute(
                            || {
                                adapter.fetch_klines(
                                    symbol,
                                    timeframe,
                                    cycle.start_time,
                                    cycle.end_time,
                                )
                            },
                            &operation,
                            &cycle.cancel,
                        )
                        .await;

                    match result {
                        Ok(candles) => {
                            debug!("{}: {} candles", operation, candles.len());
                            METRICS
                                .candles_collected
                                .fetch_add(candles.len(), Ordering::Relaxed);

                            if self.log_candles {
                                for candle in &candles {
                                    info!("[CANDLE] {}", serde_json::to_string(candle)?);
                                }
                            }
                        }
                        Err(e)
                            if matches!(
                                e.downcast_ref::<LimiterError>(),
                                Some(LimiterError::Cancelled { .. })
                            ) =>
                        {
                            debug!("{} interrupted by shutdown", operation);
                            return Err(e);
                        }
                        Err(e) => {
                            error!("{} failed: {:#}", operation, e);
                            failed += 1;
                        }
                    }
                }
            }
        }

        if failed > 0 {
            anyhow::bail!("{} of {} kline fetches failed", failed, total);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimiterSettings;
    use crate::exchanges::adapter::ExchangeAdapter;
    use crate::schema::Candle;
    use crate::timeframe::Timeframe;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Returns one candle per call, fails for symbols listed in `failing`.
    struct FakeAdapter {
        failing: Vec<&'static str>,
        calls: Mutex<Vec<(String, Timeframe)>>,
    }

    #[async_trait::async_trait]
    impl ExchangeAdapter for FakeAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_klines(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Candle>> {
            self.calls
                .lock()
                .unwrap()
                .push((symbol.to_string(), timeframe));

            if self.failing.contains(&symbol) {
                anyhow::bail!("invalid symbol {}", symbol);
            }

            Ok(vec![Candle {
                exchange: "fake".into(),
                symbol: symbol.into(),
                timeframe,
                open_time: start.timestamp_millis(),
                open: "1".into(),
                high: "2".into(),
                low: "0.5".into(),
                close: "1.5".into(),
                volume: "10".into(),
            }])
        }
    }

    fn limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimiterSettings {
            min_interval_between_calls_ms: 0,
            ..RateLimiterSettings::default()
        }))
    }

    fn cycle(symbols: &[&str], exchanges: &[&str], cancel: CancellationToken) -> CollectionCycle {
        let end_time = Utc::now();
        CollectionCycle {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            exchanges: exchanges.iter().map(|s| s.to_string()).collect(),
            timeframes: vec![Timeframe::H1],
            start_time: end_time - Duration::minutes(180),
            end_time,
            cancel,
        }
    }

    fn collector_with(adapter: Arc<FakeAdapter>) -> KlineCollector {
        let mut adapters = AdapterMap::new();
        adapters.insert("fake".to_string(), adapter as Arc<dyn ExchangeAdapter>);
        KlineCollector::new(limiter(), Arc::new(adapters), false)
    }

    #[tokio::test]
    async fn test_collects_every_symbol() {
        let adapter = Arc::new(FakeAdapter {
            failing: vec![],
            calls: Mutex::new(Vec::new()),
        });
        let collector = collector_with(adapter.clone());

        collector
            .collect_recent_data(&cycle(&["BTC/USDT", "ETH/USDT"], &["fake"], CancellationToken::new()))
            .await
            .unwrap();

        let calls = adapter.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("BTC/USDT".to_string(), Timeframe::H1),
                ("ETH/USDT".to_string(), Timeframe::H1),
            ]
        );
    }

    #[tokio::test]
    async fn test_one_failing_symbol_does_not_stop_the_cycle() {
        let adapter = Arc::new(FakeAdapter {
            failing: vec!["BAD/USDT"],
            calls: Mutex::new(Vec::new()),
        });
        let collector = collector_with(adapter.clone());

        let err = collector
            .collect_recent_data(&cycle(
                &["BAD/USDT", "ETH/USDT"],
                &["fake"],
                CancellationToken::new(),
            ))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "1 of 2 kline fetches failed");
        // fatal errors are not retried, so exactly one call per symbol
        assert_eq!(adapter.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_exchange_counts_as_failure() {
        let adapter = Arc::new(FakeAdapter {
            failing: vec![],
            calls: Mutex::new(Vec::new()),
        });
        let collector = collector_with(adapter.clone());

        let err = collector
            .collect_recent_data(&cycle(&["BTC/USDT"], &["fake", "mtgox"], CancellationToken::new()))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "1 of 2 kline fetches failed");
        assert_eq!(adapter.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_makes_no_calls() {
        let adapter = Arc::new(FakeAdapter {
            failing: vec![],
            calls: Mutex::new(Vec::new()),
        });
        let collector = collector_with(adapter.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = collector
            .collect_recent_data(&cycle(&["BTC/USDT"], &["fake"], cancel))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "collection cancelled after 0 of 1 kline fetches");
        assert!(adapter.calls.lock().unwrap().is_empty());
    }

    /// Cancels the shared token on its first call, then fails transiently.
    struct CancellingAdapter {
        cancel: CancellationToken,
        calls: Mutex<usize>,
    }

    #[async_trait::async_trait]
    impl ExchangeAdapter for CancellingAdapter {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn fetch_klines(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<Vec<Candle>> {
            *self.calls.lock().unwrap() += 1;
            self.cancel.cancel();
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset").into())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_during_backoff_stops_the_cycle() {
        let cancel = CancellationToken::new();
        let adapter = Arc::new(CancellingAdapter {
            cancel: cancel.clone(),
            calls: Mutex::new(0),
        });
        let mut adapters = AdapterMap::new();
        adapters.insert("fake".to_string(), adapter.clone() as Arc<dyn ExchangeAdapter>);
        let collector = KlineCollector::new(limiter(), Arc::new(adapters), false);

        let err = collector
            .collect_recent_data(&cycle(&["BTC/USDT", "ETH/USDT"], &["fake"], cancel))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<LimiterError>(),
            Some(LimiterError::Cancelled { .. })
        ));
        assert_eq!(*adapter.calls.lock().unwrap(), 1);
    }
}
