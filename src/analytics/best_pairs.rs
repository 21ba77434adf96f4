//! Classification and ranking of correlation pairs.

use rust_decimal::prelude::ToPrimitive;

use crate::models::{BestPairEntry, CorrelationEntry, PairCategory};

/// Classify a correlation coefficient. First match wins; the boundaries
/// keep the five categories disjoint.
pub fn classify(rho: f64) -> PairCategory {
    if rho <= -0.7 {
        PairCategory::Hedging
    } else if rho < -0.4 {
        PairCategory::NegativelyCorrelated
    } else if rho.abs() < 0.4 {
        PairCategory::Uncorrelated
    } else if rho.abs() < 0.7 {
        PairCategory::Moderate
    } else {
        PairCategory::HighCorrelation
    }
}

fn reason(category: PairCategory, rho: f64) -> String {
    match category {
        PairCategory::Hedging => {
            "Excellent for hedging - strongly negative correlation".to_string()
        }
        PairCategory::NegativelyCorrelated => {
            "Good for hedging - negative correlation".to_string()
        }
        PairCategory::Uncorrelated => {
            "Good for diversification - low correlation".to_string()
        }
        PairCategory::Moderate => format!("Moderate correlation: {rho:.3}"),
        PairCategory::HighCorrelation => {
            format!("High correlation: {rho:.3} - avoid together")
        }
    }
}

/// Classify and rank a run's correlation entries into best-pair rows.
///
/// Within each category pairs rank by |rho| descending, ties broken by
/// `(pair1, pair2)` ascending; ranks restart at 1 per category. The output
/// is ordered category by category, ranked pairs in order.
pub fn rank_best_pairs(entries: &[CorrelationEntry]) -> Vec<BestPairEntry> {
    let mut out = Vec::with_capacity(entries.len());

    for category in PairCategory::all() {
        let mut members: Vec<&CorrelationEntry> = entries
            .iter()
            .filter(|e| {
                e.correlation
                    .to_f64()
                    .is_some_and(|rho| classify(rho) == category)
            })
            .collect();
        members.sort_by(|a, b| {
            b.correlation
                .abs()
                .cmp(&a.correlation.abs())
                .then_with(|| (&a.pair1, &a.pair2).cmp(&(&b.pair1, &b.pair2)))
        });

        for (idx, entry) in members.iter().enumerate() {
            let rho = entry.correlation.to_f64().unwrap_or_default();
            out.push(BestPairEntry {
                pair1: entry.pair1.clone(),
                pair2: entry.pair2.clone(),
                time: entry.time,
                correlation: entry.correlation,
                category,
                rank: idx as u32 + 1,
                reason: reason(category, rho),
            });
        }
    }

    out
}
