//! FX market-data ingestion and analytics pipeline.
//!
//! Hourly jobs pull OHLC candles from the broker, derive volatility
//! metrics, and persist both; a daily job computes the cross-instrument
//! correlation matrix and best-pair rankings. Derived values land in a
//! TTL cache whose pub/sub bus feeds the websocket fan-out server.

pub mod analytics;
pub mod cache;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod fanout;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{EngineError, Result};
