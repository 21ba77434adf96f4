//! Shared data models spanning the engine layers.

pub mod bus;
pub mod candle;
pub mod correlation;
pub mod instrument;
pub mod metrics;

pub use bus::{
    CorrelationAlert, DataReady, DataType, PriceQuote, PriceUpdate, Severity, VolatilityAlert,
};
pub use candle::{Candle, Granularity, Ohlc};
pub use correlation::{BestPairEntry, CorrelationEntry, CorrelationMatrix, PairCategory};
pub use instrument::AssetClass;
pub use metrics::VolatilityMetric;
