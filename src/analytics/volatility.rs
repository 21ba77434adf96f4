//! Volatility metrics: historical volatility, SMA, Bollinger Bands, ATR.

use rust_decimal::prelude::ToPrimitive;

use crate::analytics::math::{self, log_returns, sma, stddev};
use crate::models::{AssetClass, Candle, VolatilityMetric};

/// Annualization factor: 252 trading days.
const ANNUALIZATION: f64 = 252.0;

pub const HV_SHORT_WINDOW: usize = 20;
pub const HV_LONG_WINDOW: usize = 50;
pub const SMA_WINDOWS: [usize; 3] = [15, 30, 50];
pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_STDDEV: f64 = 2.0;
pub const ATR_WINDOW: usize = 14;

/// Annualized historical volatility over the last `window` log returns,
/// expressed as a percent.
///
/// Requires at least `window + 1` closes; with fewer the metric is
/// omitted rather than reported as zero.
pub fn historical_volatility(closes: &[f64], window: usize) -> Option<f64> {
    if closes.len() < window + 1 {
        return None;
    }
    let returns = log_returns(closes);
    let sd = stddev(&returns, window)?;
    Some(sd * ANNUALIZATION.sqrt() * 100.0)
}

/// Bollinger Bands: (upper, middle, lower) over the last
/// `BOLLINGER_WINDOW` closes. A constant series collapses all three
/// bands onto the mean.
pub fn bollinger(closes: &[f64]) -> Option<(f64, f64, f64)> {
    let middle = sma(closes, BOLLINGER_WINDOW)?;
    let sd = stddev(closes, BOLLINGER_WINDOW)?;
    Some((
        middle + BOLLINGER_STDDEV * sd,
        middle,
        middle - BOLLINGER_STDDEV * sd,
    ))
}

/// Average true range over `period` candles given as (high, low, close)
/// tuples in time order. True range is gap-aware: it includes the jump
/// from the previous close.
pub fn atr(ohlc: &[(f64, f64, f64)], period: usize) -> Option<f64> {
    if ohlc.len() < period + 1 {
        return None;
    }
    let tr: Vec<f64> = ohlc
        .windows(2)
        .map(|pair| {
            let (_, _, prev_close) = pair[0];
            let (high, low, _) = pair[1];
            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect();
    sma(&tr, period)
}

/// Derive the full volatility metric set from an oldest-first H1 candle
/// window. Metrics whose window is not covered are left unset; returns
/// `None` when nothing at all is computable.
pub fn compute_metrics(candles: &[Candle]) -> Option<VolatilityMetric> {
    let last = candles.last()?;

    let closes: Vec<f64> = candles
        .iter()
        .filter_map(|c| c.mid.close.to_f64())
        .collect();
    let ranges: Vec<(f64, f64, f64)> = candles
        .iter()
        .filter_map(|c| {
            Some((
                c.mid.high.to_f64()?,
                c.mid.low.to_f64()?,
                c.mid.close.to_f64()?,
            ))
        })
        .collect();

    let bands = bollinger(&closes);
    let metric = VolatilityMetric {
        instrument: last.instrument.clone(),
        asset_class: AssetClass::classify(&last.instrument),
        time: last.time,
        hv20: historical_volatility(&closes, HV_SHORT_WINDOW).and_then(math::to_rate_decimal),
        hv50: historical_volatility(&closes, HV_LONG_WINDOW).and_then(math::to_rate_decimal),
        sma15: sma(&closes, SMA_WINDOWS[0]).and_then(math::to_price_decimal),
        sma30: sma(&closes, SMA_WINDOWS[1]).and_then(math::to_price_decimal),
        sma50: sma(&closes, SMA_WINDOWS[2]).and_then(math::to_price_decimal),
        bb_upper: bands.map(|(u, _, _)| u).and_then(math::to_price_decimal),
        bb_middle: bands.map(|(_, m, _)| m).and_then(math::to_price_decimal),
        bb_lower: bands.map(|(_, _, l)| l).and_then(math::to_price_decimal),
        atr: atr(&ranges, ATR_WINDOW).and_then(math::to_price_decimal),
    };

    metric.has_values().then_some(metric)
}
