//! Unit tests for correlation pair classification and ranking.

use chrono::{TimeZone, Utc};
use fxpulse::analytics::best_pairs::{classify, rank_best_pairs};
use fxpulse::models::{CorrelationEntry, PairCategory};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

fn entry(pair1: &str, pair2: &str, rho: f64) -> CorrelationEntry {
    CorrelationEntry {
        pair1: pair1.to_string(),
        pair2: pair2.to_string(),
        time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        correlation: Decimal::from_f64(rho).unwrap().round_dp(6),
        window_size: 100,
    }
}

#[test]
fn classification_rule_table() {
    let cases = [
        (-1.0, PairCategory::Hedging),
        (-0.7, PairCategory::Hedging),
        (-0.69, PairCategory::NegativelyCorrelated),
        (-0.41, PairCategory::NegativelyCorrelated),
        (-0.4, PairCategory::Moderate),
        (-0.39, PairCategory::Uncorrelated),
        (0.0, PairCategory::Uncorrelated),
        (0.39, PairCategory::Uncorrelated),
        (0.4, PairCategory::Moderate),
        (0.69, PairCategory::Moderate),
        (0.7, PairCategory::HighCorrelation),
        (1.0, PairCategory::HighCorrelation),
    ];
    for (rho, expected) in cases {
        assert_eq!(classify(rho), expected, "rho = {rho}");
    }
}

#[test]
fn categories_are_disjoint_over_a_sweep() {
    let mut rho = -1.0;
    while rho <= 1.0 {
        // classify is total and single-valued on the sweep; the first-match
        // ordering never leaves a gap.
        let _ = classify(rho);
        rho += 0.001;
    }
}

#[test]
fn ranking_orders_by_magnitude_within_category() {
    let entries = vec![
        entry("AUD_USD", "EUR_USD", 0.75),
        entry("EUR_USD", "GBP_USD", 0.95),
        entry("GBP_USD", "USD_JPY", -0.9),
        entry("EUR_USD", "USD_CHF", 0.1),
    ];
    let ranked = rank_best_pairs(&entries);
    assert_eq!(ranked.len(), 4);

    let high: Vec<&fxpulse::models::BestPairEntry> = ranked
        .iter()
        .filter(|b| b.category == PairCategory::HighCorrelation)
        .collect();
    assert_eq!(high.len(), 2);
    assert_eq!(high[0].pair1, "EUR_USD");
    assert_eq!(high[0].pair2, "GBP_USD");
    assert_eq!(high[0].rank, 1);
    assert_eq!(high[1].pair1, "AUD_USD");
    assert_eq!(high[1].rank, 2);

    let hedging: Vec<_> = ranked
        .iter()
        .filter(|b| b.category == PairCategory::Hedging)
        .collect();
    assert_eq!(hedging.len(), 1);
    assert_eq!(hedging[0].rank, 1);

    let uncorrelated: Vec<_> = ranked
        .iter()
        .filter(|b| b.category == PairCategory::Uncorrelated)
        .collect();
    assert_eq!(uncorrelated.len(), 1);
}

#[test]
fn equal_magnitude_ties_break_by_pair_order() {
    let entries = vec![
        entry("GBP_USD", "USD_JPY", 0.8),
        entry("AUD_USD", "EUR_USD", 0.8),
    ];
    let ranked = rank_best_pairs(&entries);
    assert_eq!(ranked[0].pair1, "AUD_USD");
    assert_eq!(ranked[0].rank, 1);
    assert_eq!(ranked[1].pair1, "GBP_USD");
    assert_eq!(ranked[1].rank, 2);
}

#[test]
fn ranks_restart_per_category() {
    let entries = vec![
        entry("A_1", "B_1", 0.9),
        entry("A_2", "B_2", 0.5),
        entry("A_3", "B_3", 0.45),
    ];
    let ranked = rank_best_pairs(&entries);
    for b in &ranked {
        if b.category == PairCategory::HighCorrelation || b.pair1 == "A_2" {
            assert_eq!(b.rank, 1, "{}", b.pair1);
        }
    }
    let moderate: Vec<_> = ranked
        .iter()
        .filter(|b| b.category == PairCategory::Moderate)
        .collect();
    assert_eq!(moderate.len(), 2);
    assert_eq!(moderate[0].rank, 1);
    assert_eq!(moderate[1].rank, 2);
}

#[test]
fn reasons_are_category_specific() {
    let ranked = rank_best_pairs(&[entry("EUR_USD", "GBP_USD", -0.85)]);
    assert_eq!(ranked[0].category, PairCategory::Hedging);
    assert!(ranked[0].reason.to_lowercase().contains("hedging"));
}
