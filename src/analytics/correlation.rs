//! Pairwise Pearson correlation over time-aligned close series.

use chrono::{DateTime, Utc};

use crate::analytics::math::pearson;

/// A timestamped close, oldest-first in every series handed to this module.
pub type ClosePoint = (DateTime<Utc>, f64);

/// Why a pair produced no correlation this run. Pairs flagged this way are
/// skipped from the matrix, not reported as zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingCoverage {
    /// The two series share fewer aligned timestamps than the window needs.
    TooFewAligned { aligned: usize, required: usize },
    /// One of the aligned series is constant; the coefficient is undefined.
    ZeroVariance,
}

impl std::fmt::Display for MissingCoverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MissingCoverage::TooFewAligned { aligned, required } => write!(
                f,
                "missing coverage: {aligned} aligned samples, {required} required"
            ),
            MissingCoverage::ZeroVariance => {
                write!(f, "missing coverage: zero-variance series")
            }
        }
    }
}

/// Inner-join two oldest-first series on their timestamps.
pub fn align(a: &[ClosePoint], b: &[ClosePoint]) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    let mut i = 0;
    let mut j = 0;
    while i < a.len() && j < b.len() {
        match a[i].0.cmp(&b[j].0) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                xs.push(a[i].1);
                ys.push(b[j].1);
                i += 1;
                j += 1;
            }
        }
    }
    (xs, ys)
}

/// Pearson correlation of two instruments over their shared window.
///
/// The series are aligned by timestamp first; pairs sharing fewer than
/// `window_size` samples, or with a constant aligned series, yield
/// `MissingCoverage`.
pub fn correlate(
    a: &[ClosePoint],
    b: &[ClosePoint],
    window_size: usize,
) -> std::result::Result<f64, MissingCoverage> {
    let (xs, ys) = align(a, b);
    if xs.len() < window_size {
        return Err(MissingCoverage::TooFewAligned {
            aligned: xs.len(),
            required: window_size,
        });
    }
    // Correlate over the most recent `window_size` aligned samples.
    let xs = &xs[xs.len() - window_size..];
    let ys = &ys[ys.len() - window_size..];
    pearson(xs, ys).ok_or(MissingCoverage::ZeroVariance)
}
