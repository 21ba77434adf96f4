//! Unit tests for the shared numeric helpers.

use fxpulse::analytics::math::{
    log_returns, pearson, sma, stddev, to_price_decimal, to_rate_decimal,
};
use rust_decimal_macros::dec;

#[test]
fn sma_of_last_window() {
    let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
    assert_eq!(sma(&values, 2), Some(4.5));
    assert_eq!(sma(&values, 5), Some(3.0));
}

#[test]
fn sma_insufficient_data() {
    let values = vec![1.0, 2.0];
    assert_eq!(sma(&values, 3), None);
    assert_eq!(sma(&values, 0), None);
}

#[test]
fn stddev_uses_sample_convention() {
    // Mean 5, squared deviations sum 32, sample variance 32/7.
    let values = vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
    let sd = stddev(&values, 8).unwrap();
    assert!((sd - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
}

#[test]
fn stddev_of_constant_series_is_zero() {
    let values = vec![1.5; 30];
    assert_eq!(stddev(&values, 20), Some(0.0));
}

#[test]
fn log_returns_of_consecutive_closes() {
    let closes = vec![1.0, std::f64::consts::E];
    let returns = log_returns(&closes);
    assert_eq!(returns.len(), 1);
    assert!((returns[0] - 1.0).abs() < 1e-12);
}

#[test]
fn pearson_perfect_positive() {
    let x: Vec<f64> = (0..100).map(|i| 1.0 + 0.01 * i as f64).collect();
    let y: Vec<f64> = (0..100).map(|i| 1.0 + 0.02 * i as f64).collect();
    let rho = pearson(&x, &y).unwrap();
    assert!((rho - 1.0).abs() < 1e-6);
}

#[test]
fn pearson_perfect_negative() {
    let x: Vec<f64> = (0..50).map(|i| i as f64).collect();
    let y: Vec<f64> = (0..50).map(|i| 100.0 - 2.0 * i as f64).collect();
    let rho = pearson(&x, &y).unwrap();
    assert!((rho + 1.0).abs() < 1e-6);
}

#[test]
fn pearson_undefined_on_zero_variance() {
    let x = vec![1.0; 10];
    let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
    assert_eq!(pearson(&x, &y), None);
    assert_eq!(pearson(&y, &x), None);
}

#[test]
fn pearson_result_is_clamped() {
    let x: Vec<f64> = (0..30).map(|i| 1.0 + 1e-9 * i as f64).collect();
    let rho = pearson(&x, &x).unwrap();
    assert!((-1.0..=1.0).contains(&rho));
}

#[test]
fn price_decimal_rounds_to_five_places() {
    assert_eq!(to_price_decimal(1.2345649), Some(dec!(1.23456)));
    assert_eq!(to_price_decimal(1.2345651), Some(dec!(1.23457)));
    assert_eq!(to_price_decimal(2.2), Some(dec!(2.20000)));
}

#[test]
fn rate_decimal_rounds_to_six_places() {
    assert_eq!(to_rate_decimal(0.12345649), Some(dec!(0.123456)));
    assert_eq!(to_rate_decimal(1.0), Some(dec!(1)));
}
