//! Candle and quote-side types for time-bucketed price data.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Time-bucket size of a candle series. H1 is the primary granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Granularity {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D,
    W,
    M,
}

impl Granularity {
    /// The broker wire form of this granularity.
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::M1 => "M1",
            Granularity::M5 => "M5",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H4 => "H4",
            Granularity::D => "D",
            Granularity::W => "W",
            Granularity::M => "M",
        }
    }
}

impl std::str::FromStr for Granularity {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "M1" => Ok(Granularity::M1),
            "M5" => Ok(Granularity::M5),
            "M15" => Ok(Granularity::M15),
            "M30" => Ok(Granularity::M30),
            "H1" => Ok(Granularity::H1),
            "H4" => Ok(Granularity::H4),
            "D" => Ok(Granularity::D),
            "W" => Ok(Granularity::W),
            "M" => Ok(Granularity::M),
            other => Err(EngineError::BrokerParse(format!(
                "unknown granularity '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One quote side of a candle: open, high, low, close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

impl Ohlc {
    /// `low <= min(open, close) <= max(open, close) <= high`.
    pub fn is_coherent(&self) -> bool {
        self.low <= self.open.min(self.close) && self.open.max(self.close) <= self.high
    }

    /// Pointwise midpoint of two sides.
    pub fn midpoint(bid: &Ohlc, ask: &Ohlc) -> Ohlc {
        let two = Decimal::from(2);
        Ohlc {
            open: (bid.open + ask.open) / two,
            high: (bid.high + ask.high) / two,
            low: (bid.low + ask.low) / two,
            close: (bid.close + ask.close) / two,
        }
    }
}

/// One row of time-bucketed price information for an
/// (instrument, bucket-start, granularity) triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub instrument: String,
    pub time: DateTime<Utc>,
    pub granularity: Granularity,
    pub bid: Ohlc,
    pub ask: Ohlc,
    pub mid: Ohlc,
    pub volume: i64,
}

impl Candle {
    /// Validate the candle invariants: side coherence, `bid <= ask`
    /// pointwise, and non-negative volume.
    pub fn validate(&self) -> Result<()> {
        for (name, side) in [("bid", &self.bid), ("ask", &self.ask), ("mid", &self.mid)] {
            if !side.is_coherent() {
                return Err(EngineError::BrokerParse(format!(
                    "{} {} candle at {}: {name} side violates low <= open/close <= high",
                    self.instrument, self.granularity, self.time
                )));
            }
        }
        let pairs = [
            (self.bid.open, self.ask.open),
            (self.bid.high, self.ask.high),
            (self.bid.low, self.ask.low),
            (self.bid.close, self.ask.close),
        ];
        if pairs.iter().any(|(b, a)| b > a) {
            return Err(EngineError::BrokerParse(format!(
                "{} {} candle at {}: bid exceeds ask",
                self.instrument, self.granularity, self.time
            )));
        }
        if self.volume < 0 {
            return Err(EngineError::BrokerParse(format!(
                "{} {} candle at {}: negative volume",
                self.instrument, self.granularity, self.time
            )));
        }
        Ok(())
    }
}
