//! Pairwise correlation entries and best-pair rankings.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Category of a correlation pair, disjoint by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairCategory {
    Hedging,
    NegativelyCorrelated,
    Uncorrelated,
    Moderate,
    HighCorrelation,
}

impl PairCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PairCategory::Hedging => "hedging",
            PairCategory::NegativelyCorrelated => "negatively_correlated",
            PairCategory::Uncorrelated => "uncorrelated",
            PairCategory::Moderate => "moderate",
            PairCategory::HighCorrelation => "high_correlation",
        }
    }

    pub fn all() -> [PairCategory; 5] {
        [
            PairCategory::Hedging,
            PairCategory::NegativelyCorrelated,
            PairCategory::Uncorrelated,
            PairCategory::Moderate,
            PairCategory::HighCorrelation,
        ]
    }
}

impl std::fmt::Display for PairCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PairCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "hedging" => Ok(PairCategory::Hedging),
            "negatively_correlated" => Ok(PairCategory::NegativelyCorrelated),
            "uncorrelated" => Ok(PairCategory::Uncorrelated),
            "moderate" => Ok(PairCategory::Moderate),
            "high_correlation" => Ok(PairCategory::HighCorrelation),
            other => Err(format!("unknown pair category '{other}'")),
        }
    }
}

/// Pearson correlation between two instruments over a shared window of
/// closes. `pair1 < pair2` lexicographically by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub pair1: String,
    pub pair2: String,
    pub time: DateTime<Utc>,
    pub correlation: Decimal,
    pub window_size: usize,
}

impl CorrelationEntry {
    /// Canonical ordering: the lexicographically smaller instrument first.
    pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
        if a <= b {
            (a.to_string(), b.to_string())
        } else {
            (b.to_string(), a.to_string())
        }
    }

    pub fn is_canonical(&self) -> bool {
        self.pair1 < self.pair2
    }
}

/// The serialized form cached under `correlation:matrix`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub time: DateTime<Utc>,
    pub window_size: usize,
    pub instruments: Vec<String>,
    pub entries: Vec<CorrelationEntry>,
}

/// A categorized, ranked correlation pair. Each daily run appends a fresh
/// snapshot tagged by `time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPairEntry {
    pub pair1: String,
    pub pair2: String,
    pub time: DateTime<Utc>,
    pub correlation: Decimal,
    pub category: PairCategory,
    /// Rank within the category at this `time`, starting at 1.
    pub rank: u32,
    pub reason: String,
}
