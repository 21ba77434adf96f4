//! Wire DTOs for the broker candle endpoint.
//!
//! Numeric fields arrive as decimal strings and are parsed into
//! `Decimal` before anything else touches them; binary floats would
//! corrupt the fifth decimal place of FX quotes.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;

use crate::error::{EngineError, Result};
use crate::models::{Candle, Granularity, Ohlc};

/// Response body of `GET /v3/instruments/{instrument}/candles`.
#[derive(Debug, Deserialize)]
pub struct CandlesResponse {
    pub instrument: String,
    pub granularity: String,
    pub candles: Vec<RawCandle>,
}

/// One candle record as sent by the broker. Quote sides are present
/// according to the requested price components.
#[derive(Debug, Deserialize)]
pub struct RawCandle {
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub complete: bool,
    pub bid: Option<RawOhlc>,
    pub ask: Option<RawOhlc>,
    pub mid: Option<RawOhlc>,
    #[serde(default)]
    pub volume: i64,
}

/// OHLC quadruple of decimal strings.
#[derive(Debug, Deserialize)]
pub struct RawOhlc {
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
}

impl RawOhlc {
    fn parse(&self) -> Result<Ohlc> {
        let field = |s: &str| {
            Decimal::from_str(s)
                .map_err(|e| EngineError::BrokerParse(format!("bad decimal '{s}': {e}")))
        };
        Ok(Ohlc {
            open: field(&self.o)?,
            high: field(&self.h)?,
            low: field(&self.l)?,
            close: field(&self.c)?,
        })
    }
}

/// A parsed candle together with the broker's completeness flag. The
/// final bucket of a fetch is usually still forming.
#[derive(Debug, Clone)]
pub struct FetchedCandle {
    pub complete: bool,
    pub candle: Candle,
}

impl RawCandle {
    /// Convert the raw record into a validated model candle.
    ///
    /// Mid is computed as (bid+ask)/2 when the broker omits it; with only
    /// a mid side present, bid and ask collapse onto mid.
    pub fn into_fetched(self, instrument: &str, granularity: Granularity) -> Result<FetchedCandle> {
        let bid = self.bid.as_ref().map(|s| s.parse()).transpose()?;
        let ask = self.ask.as_ref().map(|s| s.parse()).transpose()?;
        let mid = self.mid.as_ref().map(|s| s.parse()).transpose()?;

        let (bid, ask, mid) = match (bid, ask, mid) {
            (Some(b), Some(a), Some(m)) => (b, a, m),
            (Some(b), Some(a), None) => {
                let m = Ohlc::midpoint(&b, &a);
                (b, a, m)
            }
            (None, None, Some(m)) => (m, m, m),
            _ => {
                return Err(EngineError::BrokerParse(format!(
                    "{instrument} candle at {} carries no usable quote side",
                    self.time
                )))
            }
        };

        let candle = Candle {
            instrument: instrument.to_string(),
            time: self.time,
            granularity,
            bid,
            ask,
            mid,
            volume: self.volume,
        };
        candle.validate()?;

        Ok(FetchedCandle {
            complete: self.complete,
            candle,
        })
    }
}
