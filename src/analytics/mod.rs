//! Pure, deterministic transformations over candle sequences.

pub mod best_pairs;
pub mod correlation;
pub mod math;
pub mod volatility;

pub use best_pairs::{classify, rank_best_pairs};
pub use correlation::{align, correlate, ClosePoint, MissingCoverage};
pub use volatility::{atr, bollinger, compute_metrics, historical_volatility};
