//! In-process cache and bus with the Redis semantics.
//!
//! Backs the test suites and cache-less development runs: TTL expiry on
//! read, per-channel ordered fan-out, no replay.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;

use crate::cache::{BusMessage, BusSubscription, Cache};
use crate::error::Result;

const BUS_CAPACITY: usize = 1024;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory `Cache` implementation.
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
    bus: broadcast::Sender<BusMessage>,
}

impl MemoryCache {
    pub fn new() -> Self {
        let (bus, _) = broadcast::channel(BUS_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            bus,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("memory cache lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                // Expire lazily on read, like Redis does internally.
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // No subscribers is fine; the bus is fire-and-forget.
        let _ = self.bus.send(BusMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusSubscription> {
        let wanted: HashSet<String> = channels.iter().map(|c| c.to_string()).collect();
        let mut bus_rx = self.bus.subscribe();
        let (tx, rx) = mpsc::channel(BUS_CAPACITY);

        tokio::spawn(async move {
            loop {
                match bus_rx.recv().await {
                    Ok(msg) if wanted.contains(&msg.channel) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    // A lag drops messages, matching at-most-once delivery.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(BusSubscription::from_receiver(rx))
    }
}
