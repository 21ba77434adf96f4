//! Derived volatility metrics for a single instrument.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::instrument::AssetClass;

/// Volatility metrics derived from the trailing candle window of one
/// instrument. A metric whose input window was too short is `None`,
/// never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityMetric {
    pub instrument: String,
    pub asset_class: AssetClass,
    /// Time of the latest candle in the window.
    pub time: DateTime<Utc>,
    pub hv20: Option<Decimal>,
    pub hv50: Option<Decimal>,
    pub sma15: Option<Decimal>,
    pub sma30: Option<Decimal>,
    pub sma50: Option<Decimal>,
    pub bb_upper: Option<Decimal>,
    pub bb_middle: Option<Decimal>,
    pub bb_lower: Option<Decimal>,
    pub atr: Option<Decimal>,
}

impl VolatilityMetric {
    /// Whether any metric was computable from the input window.
    pub fn has_values(&self) -> bool {
        self.hv20.is_some()
            || self.hv50.is_some()
            || self.sma15.is_some()
            || self.sma30.is_some()
            || self.sma50.is_some()
            || self.bb_middle.is_some()
            || self.atr.is_some()
    }
}
