//! Environment-sourced configuration, validated at process start.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// The 20 instruments tracked by default when `TRACKED_PAIRS` is unset.
pub const DEFAULT_TRACKED_PAIRS: &[&str] = &[
    "EUR_USD", "GBP_USD", "USD_JPY", "USD_CAD", "AUD_USD", "USD_CHF", "NZD_USD",
    "EUR_GBP", "EUR_JPY", "EUR_CHF", "GBP_JPY", "GBP_CHF", "AUD_JPY", "AUD_NZD",
    "EUR_AUD", "GBP_AUD", "USD_CNH", "USD_HKD", "EUR_CAD", "GBP_CAD",
];

/// Broker environment selector. Practice and live use distinct base URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEnv {
    Practice,
    Live,
}

impl BrokerEnv {
    pub fn base_url(&self) -> &'static str {
        match self {
            BrokerEnv::Practice => "https://api-fxpractice.oanda.com",
            BrokerEnv::Live => "https://api-fxtrade.oanda.com",
        }
    }
}

/// Runtime configuration for every pipeline service.
#[derive(Clone)]
pub struct Config {
    pub broker_token: String,
    pub broker_env: BrokerEnv,
    pub broker_timeout: Duration,
    pub tracked_pairs: Vec<String>,
    pub correlation_threshold: f64,
    pub correlation_window: usize,
    pub volatility_threshold: f64,
    pub cache_ttl_prices: Duration,
    pub cache_ttl_metrics: Duration,
    pub cache_ttl_correlation: Duration,
    pub rate_limit_requests: u32,
    pub rate_limit_window: Duration,
    pub fanout_max_clients: usize,
    pub fanout_ping_interval: Duration,
    pub fanout_ping_timeout: Duration,
    pub fanout_bind: String,
    pub hourly_enabled: bool,
    pub daily_enabled: bool,
    pub fetch_concurrency: usize,
    pub data_retention_days: u32,
    pub store_dsn: String,
    pub cache_addr: String,
    pub environment: String,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// `BROKER_TOKEN` is required; everything else falls back to the
    /// documented defaults. Returns `ConfigInvalid` with a diagnostic
    /// naming the offending option.
    pub fn from_env() -> Result<Self> {
        let broker_token = env::var("BROKER_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| {
                EngineError::ConfigInvalid("BROKER_TOKEN is required and must be non-empty".into())
            })?;

        let broker_env = match get_or("BROKER_ENV", "practice").to_lowercase().as_str() {
            "practice" => BrokerEnv::Practice,
            "live" => BrokerEnv::Live,
            other => {
                return Err(EngineError::ConfigInvalid(format!(
                    "BROKER_ENV must be 'practice' or 'live', got '{other}'"
                )))
            }
        };

        let tracked_pairs = match env::var("TRACKED_PAIRS") {
            Ok(raw) => raw
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            Err(_) => DEFAULT_TRACKED_PAIRS.iter().map(|p| p.to_string()).collect(),
        };

        let config = Self {
            broker_token,
            broker_env,
            broker_timeout: Duration::from_secs(parse_or("BROKER_TIMEOUT_SECS", 10u64)?),
            tracked_pairs,
            correlation_threshold: parse_or("CORRELATION_THRESHOLD", 0.7f64)?,
            correlation_window: parse_or("CORRELATION_WINDOW_SIZE", 100usize)?,
            volatility_threshold: parse_or("VOLATILITY_THRESHOLD", 2.0f64)?,
            cache_ttl_prices: Duration::from_secs(parse_or("CACHE_TTL_PRICES", 300u64)?),
            cache_ttl_metrics: Duration::from_secs(parse_or("CACHE_TTL_METRICS", 3600u64)?),
            cache_ttl_correlation: Duration::from_secs(parse_or("CACHE_TTL_CORRELATION", 86_400u64)?),
            rate_limit_requests: parse_or("RATE_LIMIT_REQUESTS", 100u32)?,
            rate_limit_window: Duration::from_secs(parse_or("RATE_LIMIT_WINDOW", 60u64)?),
            fanout_max_clients: parse_or("FANOUT_MAX_CLIENTS", 1000usize)?,
            fanout_ping_interval: Duration::from_secs(parse_or("FANOUT_PING_INTERVAL", 25u64)?),
            fanout_ping_timeout: Duration::from_secs(parse_or("FANOUT_PING_TIMEOUT", 5u64)?),
            fanout_bind: get_or("FANOUT_BIND", "0.0.0.0:5001"),
            hourly_enabled: parse_bool_or("JOB_HOURLY_ENABLED", true)?,
            daily_enabled: parse_bool_or("JOB_DAILY_ENABLED", true)?,
            fetch_concurrency: parse_or("FETCH_CONCURRENCY", 8usize)?,
            data_retention_days: parse_or("DATA_RETENTION_DAYS", 365u32)?,
            store_dsn: get_or(
                "STORE_DSN",
                "host=localhost port=5432 user=postgres dbname=fx_trading_data",
            ),
            cache_addr: get_or("CACHE_ADDR", "redis://127.0.0.1:6379/0"),
            environment: get_or("ENVIRONMENT", "development"),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.tracked_pairs.is_empty() {
            return Err(EngineError::ConfigInvalid(
                "TRACKED_PAIRS must contain at least one instrument".into(),
            ));
        }
        for pair in &self.tracked_pairs {
            if !pair.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(EngineError::ConfigInvalid(format!(
                    "invalid instrument identifier '{pair}' in TRACKED_PAIRS"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.correlation_threshold) {
            return Err(EngineError::ConfigInvalid(format!(
                "CORRELATION_THRESHOLD must be within [0, 1], got {}",
                self.correlation_threshold
            )));
        }
        if self.correlation_window < 2 {
            return Err(EngineError::ConfigInvalid(
                "CORRELATION_WINDOW_SIZE must be at least 2".into(),
            ));
        }
        if self.volatility_threshold <= 0.0 {
            return Err(EngineError::ConfigInvalid(
                "VOLATILITY_THRESHOLD must be positive".into(),
            ));
        }
        if self.rate_limit_requests == 0 || self.rate_limit_window.is_zero() {
            return Err(EngineError::ConfigInvalid(
                "RATE_LIMIT_REQUESTS and RATE_LIMIT_WINDOW must be positive".into(),
            ));
        }
        if self.fetch_concurrency == 0 {
            return Err(EngineError::ConfigInvalid(
                "FETCH_CONCURRENCY must be at least 1".into(),
            ));
        }
        if self.fanout_max_clients == 0 {
            return Err(EngineError::ConfigInvalid(
                "FANOUT_MAX_CLIENTS must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }

    pub fn is_tracked(&self, instrument: &str) -> bool {
        self.tracked_pairs.iter().any(|p| p == instrument)
    }
}

// The token and DSN stay out of logs; Debug prints everything else.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("broker_token", &"<redacted>")
            .field("broker_env", &self.broker_env)
            .field("tracked_pairs", &self.tracked_pairs.len())
            .field("correlation_threshold", &self.correlation_threshold)
            .field("correlation_window", &self.correlation_window)
            .field("volatility_threshold", &self.volatility_threshold)
            .field("fanout_max_clients", &self.fanout_max_clients)
            .field("hourly_enabled", &self.hourly_enabled)
            .field("daily_enabled", &self.daily_enabled)
            .field("store_dsn", &"<redacted>")
            .field("cache_addr", &"<redacted>")
            .field("environment", &self.environment)
            .finish()
    }
}

fn get_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            EngineError::ConfigInvalid(format!("{key} could not be parsed from '{raw}'"))
        }),
        Err(_) => Ok(default),
    }
}

fn parse_bool_or(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(EngineError::ConfigInvalid(format!(
                "{key} must be a boolean, got '{raw}'"
            ))),
        },
        Err(_) => Ok(default),
    }
}
