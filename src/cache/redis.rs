//! Redis-backed cache and pub/sub bus.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::{BusMessage, BusSubscription, Cache};
use crate::error::{EngineError, Result};

/// Buffered messages per subscription before the reader applies
/// backpressure upstream.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Cache over a shared Redis connection manager. KV commands multiplex on
/// one managed connection; each bus subscription holds its own pub/sub
/// connection, as Redis requires.
pub struct RedisCache {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis. Failures surface as `CacheUnavailable`; the
    /// caller decides whether that is fatal.
    pub async fn connect(addr: &str) -> Result<Self> {
        let client = redis::Client::open(addr)
            .map_err(|e| EngineError::CacheUnavailable(format!("open: {e}")))?;
        let manager = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| EngineError::CacheUnavailable(format!("connect: {e}")))?;
        Ok(Self { client, manager })
    }
}

fn cache_err(e: redis::RedisError) -> EngineError {
    EngineError::CacheUnavailable(e.to_string())
}

#[async_trait]
impl Cache for RedisCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs())
            .await
            .map_err(cache_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        conn.get(key).await.map_err(cache_err)
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        let receivers: i64 = conn.publish(channel, payload).await.map_err(cache_err)?;
        debug!(channel, receivers, "published bus message");
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusSubscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(cache_err)?;
        for channel in channels {
            pubsub.subscribe(*channel).await.map_err(cache_err)?;
        }

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(channel = %channel, error = %e, "dropping undecodable bus message");
                        continue;
                    }
                };
                if tx.send(BusMessage { channel, payload }).await.is_err() {
                    break;
                }
            }
            // The stream ending means the pub/sub connection is gone; the
            // closed channel tells the subscriber.
        });

        Ok(BusSubscription::from_receiver(rx))
    }
}
