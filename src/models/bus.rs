//! Message shapes carried on the cache bus channels.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    /// Severity of a volatility alert from the excess ratio over the
    /// configured threshold.
    pub fn for_volatility(volatility: f64, threshold: f64) -> Severity {
        let ratio = volatility / threshold;
        if ratio >= 1.5 {
            Severity::Critical
        } else if ratio >= 1.1 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    /// Severity of a correlation alert from the coefficient magnitude.
    pub fn for_correlation(magnitude: f64) -> Severity {
        if magnitude >= 0.9 {
            Severity::Critical
        } else if magnitude >= 0.8 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// The latest quote for one instrument; also the cached value under
/// `prices:<instrument>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub mid: Decimal,
    pub time: DateTime<Utc>,
}

/// `price_updates` channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub instrument: String,
    pub price: PriceQuote,
    pub timestamp: DateTime<Utc>,
}

/// `volatility_alerts` channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityAlert {
    pub instrument: String,
    pub volatility: Decimal,
    pub threshold: Decimal,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// `correlation_alerts` channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationAlert {
    pub pair1: String,
    pub pair2: String,
    pub correlation: Decimal,
    pub threshold: Decimal,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Kind of dataset announced on `data_ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Prices,
    Metrics,
    Correlations,
    Candles,
}

/// `data_ready` channel message, published once per job run after all
/// per-instrument publishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataReady {
    pub data_type: DataType,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
