//! Shared numeric helpers for the analytics functions.
//!
//! Intermediate arithmetic runs in f64; results are converted to
//! fixed-scale decimals at the persistence edge with banker's rounding.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Decimal places persisted for prices and price-denominated metrics.
pub const PRICE_SCALE: u32 = 5;
/// Decimal places persisted for volatility and correlation values.
pub const RATE_SCALE: u32 = 6;

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Arithmetic mean of the last `window` values.
pub fn sma(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    mean(&values[values.len() - window..])
}

/// Sample standard deviation (N-1 denominator) of the last `window` values.
///
/// The sample convention is a deliberate, documented choice; the source
/// data never pins one, and what matters is that it stays stable.
pub fn stddev(values: &[f64], window: usize) -> Option<f64> {
    if window < 2 || values.len() < window {
        return None;
    }
    let tail = &values[values.len() - window..];
    let m = mean(tail)?;
    let var = tail.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (window as f64 - 1.0);
    Some(var.sqrt())
}

/// Log returns ln(c_i / c_{i-1}) of consecutive closes.
pub fn log_returns(closes: &[f64]) -> Vec<f64> {
    closes
        .windows(2)
        .map(|pair| (pair[1] / pair[0]).ln())
        .collect()
}

/// Pearson correlation coefficient of two equal-length series.
///
/// Returns `None` when either series has zero variance (the coefficient
/// is undefined) or the lengths differ.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let n = x.len() as f64;
    let mx = x.iter().sum::<f64>() / n;
    let my = y.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    // Floating error can push a perfect fit past |1|.
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// Convert to a 5-decimal price value. `round_dp` rounds half-to-even.
pub fn to_price_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(PRICE_SCALE))
}

/// Convert to a 6-decimal rate value. `round_dp` rounds half-to-even.
pub fn to_rate_decimal(value: f64) -> Option<Decimal> {
    Decimal::from_f64(value).map(|d| d.round_dp(RATE_SCALE))
}
