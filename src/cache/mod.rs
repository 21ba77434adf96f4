//! Hot TTL-bounded cache plus the in-order publish/subscribe bus.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;

pub use memory::MemoryCache;
pub use redis::RedisCache;

/// Bus channel names. Fixed; the fan-out server subscribes to all four.
pub const CHANNEL_PRICES: &str = "price_updates";
pub const CHANNEL_VOLATILITY_ALERTS: &str = "volatility_alerts";
pub const CHANNEL_CORRELATION_ALERTS: &str = "correlation_alerts";
pub const CHANNEL_DATA_READY: &str = "data_ready";

pub const ALL_CHANNELS: [&str; 4] = [
    CHANNEL_PRICES,
    CHANNEL_VOLATILITY_ALERTS,
    CHANNEL_CORRELATION_ALERTS,
    CHANNEL_DATA_READY,
];

/// Cache key builders for the typed key classes.
pub mod keys {
    pub fn prices(instrument: &str) -> String {
        format!("prices:{instrument}")
    }

    pub fn metrics(instrument: &str) -> String {
        format!("metrics:{instrument}")
    }

    pub const CORRELATION_MATRIX: &str = "correlation:matrix";

    pub fn best_pairs(category: &str) -> String {
        format!("best_pairs:{category}")
    }

    pub const BEST_PAIRS_ALL: &str = "best_pairs:all";
}

/// One message observed on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: String,
}

/// A live bus subscription. Delivery order within a channel is preserved
/// for a single subscriber; there is no replay of messages published
/// before the subscription existed.
pub struct BusSubscription {
    rx: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    pub fn from_receiver(rx: mpsc::Receiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// Next message, or `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

/// Typed key-value cache with class-specific TTLs and an ephemeral
/// at-most-once bus. Values are JSON strings; a miss is not an error.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Overwrite `key`; the TTL resets on every write.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Read `key`. Expired or absent keys return `None`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Publish on a bus channel. Messages are not durable.
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Subscribe to a set of channels.
    async fn subscribe(&self, channels: &[&str]) -> Result<BusSubscription>;
}
