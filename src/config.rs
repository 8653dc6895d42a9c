use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use serde::Deserialize;

use crate::timeframe::Timeframe;

/// Environment variable consulted when no config path is passed on the command line.
pub const CONFIG_PATH_ENV: &str = "KLINE_INGEST_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Upper bound for cadence interval and lookback (one year).
pub const MAX_CADENCE_MINUTES: u64 = 525_600;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Which symbols are collected on which exchanges
// - The shared rate limiter policy
// - One cadence per timeframe
// - Optional debug configuration
//
// Loaded once at startup. There is no hot reload.
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Trading pairs in normalized form (BASE/QUOTE)
    pub symbols: Vec<String>,

    /// Exchange identifiers (e.g. "binance")
    pub exchanges: Vec<String>,

    /// Process-wide rate limiter settings
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,

    /// Cadence definitions keyed by timeframe
    #[serde(default)]
    pub cadences: BTreeMap<Timeframe, CadenceDefinition>,

    /// Optional debug configuration
    pub debug: Option<DebugConfig>,
}

impl Config {
    /// Parses and validates a JSON document.
    ///
    /// Timeframes missing from `cadences` get their default definition,
    /// so the result always carries all six buckets.
    pub fn from_json(data: &str) -> anyhow::Result<Self> {
        let mut cfg: Config = serde_json::from_str(data)?;

        for tf in Timeframe::ALL {
            cfg.cadences
                .entry(tf)
                .or_insert_with(|| CadenceDefinition::default_for(tf));
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Checks semantic constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbols.is_empty() {
            return Err(ConfigError::NoSymbols);
        }
        if self.exchanges.is_empty() {
            return Err(ConfigError::NoExchanges);
        }
        if self.rate_limiter.max_retries < 1 {
            return Err(ConfigError::MaxRetries);
        }

        for (tf, cadence) in &self.cadences {
            if !(1..=MAX_CADENCE_MINUTES).contains(&cadence.interval_minutes) {
                return Err(ConfigError::Cadence {
                    timeframe: *tf,
                    field: "interval_minutes",
                });
            }
            if !(1..=MAX_CADENCE_MINUTES).contains(&cadence.lookback_minutes) {
                return Err(ConfigError::Cadence {
                    timeframe: *tf,
                    field: "lookback_minutes",
                });
            }
        }

        Ok(())
    }

    /// Returns enabled cadences in timeframe order.
    pub fn enabled_cadences(&self) -> Vec<(Timeframe, CadenceDefinition)> {
        self.cadences
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(tf, c)| (*tf, c.clone()))
            .collect()
    }

    pub fn log_candles(&self) -> bool {
        self.debug
            .as_ref()
            .is_some_and(|d| d.log_candles.unwrap_or(false))
    }
}

/// Semantic configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one symbol must be configured")]
    NoSymbols,

    #[error("at least one exchange must be configured")]
    NoExchanges,

    #[error("rate_limiter.max_retries must be >= 1")]
    MaxRetries,

    #[error("cadence {timeframe}: {field} must be between 1 and 525600")]
    Cadence {
        timeframe: Timeframe,
        field: &'static str,
    },
}

// ------------------------------------------------------------
// Rate limiter settings
// ------------------------------------------------------------
//
// One instance per process, injected into the shared RateLimiter.
//
// Backoff policy:
// - rate limited:  min(max_delay_ms, rate_limit_delay_ms * 2^(attempt-1))
// - transient:     base_delay_ms * 2^(attempt-1)   (uncapped)
//
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimiterSettings {
    /// Attempts allowed before giving up on a retryable failure
    pub max_retries: u32,

    /// Base backoff for rate-limit failures
    pub rate_limit_delay_ms: u64,

    /// Cap for rate-limit backoff
    pub max_delay_ms: u64,

    /// Base backoff for transient (network / timeout) failures
    pub base_delay_ms: u64,

    /// Minimum spacing between successive outbound calls
    pub min_interval_between_calls_ms: u64,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limit_delay_ms: 1_000,
            max_delay_ms: 30_000,
            base_delay_ms: 500,
            min_interval_between_calls_ms: 100,
        }
    }
}

impl RateLimiterSettings {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_between_calls_ms)
    }
}

// ------------------------------------------------------------
// Cadence definition
// ------------------------------------------------------------
//
// Controls one recurring collection timer.
//
// The lookback is intentionally larger than the interval so that
// consecutive windows overlap and no candle falls in a gap.
//
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CadenceDefinition {
    /// Firing period in minutes
    pub interval_minutes: u64,

    /// Size of the requested window in minutes
    pub lookback_minutes: u64,

    /// Enables or disables this cadence at startup
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CadenceDefinition {
    /// Default firing period and lookback for a timeframe.
    pub fn default_for(tf: Timeframe) -> Self {
        let (interval_minutes, lookback_minutes) = match tf {
            Timeframe::M1 => (1, 5),
            Timeframe::M5 => (5, 15),
            Timeframe::M15 => (15, 45),
            Timeframe::H1 => (60, 180),
            Timeframe::H4 => (240, 720),
            Timeframe::D1 => (1440, 4320),
        };

        Self {
            interval_minutes,
            lookback_minutes,
            enabled: true,
        }
    }

    /// Firing period, clamped to `1..=MAX_CADENCE_MINUTES`.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(clamp_minutes(self.interval_minutes) * 60)
    }

    /// Window size, clamped to `1..=MAX_CADENCE_MINUTES`.
    pub fn lookback(&self) -> chrono::Duration {
        let minutes = i64::try_from(clamp_minutes(self.lookback_minutes)).unwrap_or(i64::MAX);
        chrono::Duration::try_minutes(minutes).unwrap_or(chrono::Duration::MAX)
    }
}

// Values that skipped validation must not overflow timer or window math.
fn clamp_minutes(minutes: u64) -> u64 {
    minutes.clamp(1, MAX_CADENCE_MINUTES)
}

// ------------------------------------------------------------
// Debug configuration
// ------------------------------------------------------------
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    /// Logs every collected candle as JSON
    pub log_candles: Option<bool>,
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Path resolution order:
// 1. first command line argument
// 2. KLINE_INGEST_CONFIG
// 3. ./config.json
//
pub fn resolve_path(arg: Option<String>) -> String {
    arg.or_else(|| std::env::var(CONFIG_PATH_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string())
}

pub fn load_config(path: &str) -> anyhow::Result<Config> {
    let data = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read config '{}': {}", path, e))?;
    Config::from_json(&data)
}
