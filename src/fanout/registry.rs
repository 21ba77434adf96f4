//! Session and room bookkeeping for the fan-out server.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::{EngineError, Result};
use crate::fanout::session::OutboundQueue;

struct SessionEntry {
    queue: Arc<OutboundQueue>,
    subscriptions: HashSet<String>,
    wildcard: bool,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    /// instrument -> member client ids. Bookkeeping only; the bus is the
    /// single source of updates.
    rooms: HashMap<String, HashSet<String>>,
    wildcards: HashSet<String>,
}

/// Aggregate counters for `get_server_stats`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub active_sessions: usize,
    pub total_subscriptions: usize,
}

/// Session registry guarded by a single mutex.
///
/// Membership changes are O(1) under the lock; relay routing collects a
/// snapshot of target queues and delivers after releasing it.
pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    max_clients: usize,
}

impl SessionRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            max_clients,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().expect("session registry lock poisoned")
    }

    /// Admit a new session, enforcing the configured capacity.
    pub fn register(&self, client_id: &str, queue: Arc<OutboundQueue>) -> Result<()> {
        let mut inner = self.lock();
        if inner.sessions.len() >= self.max_clients {
            return Err(EngineError::CapacityReached);
        }
        inner.sessions.insert(
            client_id.to_string(),
            SessionEntry {
                queue,
                subscriptions: HashSet::new(),
                wildcard: false,
            },
        );
        Ok(())
    }

    /// Drop a session and release all its room memberships.
    pub fn unregister(&self, client_id: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.sessions.remove(client_id) {
            for instrument in &entry.subscriptions {
                if let Some(room) = inner.rooms.get_mut(instrument) {
                    room.remove(client_id);
                    if room.is_empty() {
                        inner.rooms.remove(instrument);
                    }
                }
            }
        }
        inner.wildcards.remove(client_id);
    }

    /// Add validated instruments to a session's room set.
    pub fn subscribe(&self, client_id: &str, pairs: &[String]) {
        let mut inner = self.lock();
        if !inner.sessions.contains_key(client_id) {
            return;
        }
        for pair in pairs {
            inner
                .rooms
                .entry(pair.clone())
                .or_default()
                .insert(client_id.to_string());
        }
        if let Some(entry) = inner.sessions.get_mut(client_id) {
            entry.subscriptions.extend(pairs.iter().cloned());
        }
    }

    /// Wildcard subscription: join every tracked room and mark the session
    /// for the global relay.
    pub fn subscribe_all(&self, client_id: &str, universe: &[String]) {
        self.subscribe(client_id, universe);
        let mut inner = self.lock();
        if inner.sessions.contains_key(client_id) {
            inner.wildcards.insert(client_id.to_string());
            if let Some(entry) = inner.sessions.get_mut(client_id) {
                entry.wildcard = true;
            }
        }
    }

    /// Remove instruments from a session. A wildcard session shrinking its
    /// set this way downgrades to the explicit remainder.
    pub fn unsubscribe(&self, client_id: &str, pairs: &[String]) {
        let mut inner = self.lock();
        for pair in pairs {
            if let Some(room) = inner.rooms.get_mut(pair) {
                room.remove(client_id);
                if room.is_empty() {
                    inner.rooms.remove(pair);
                }
            }
        }
        inner.wildcards.remove(client_id);
        if let Some(entry) = inner.sessions.get_mut(client_id) {
            for pair in pairs {
                entry.subscriptions.remove(pair);
            }
            entry.wildcard = false;
        }
    }

    pub fn unsubscribe_all(&self, client_id: &str) {
        let mut inner = self.lock();
        let subscriptions = match inner.sessions.get(client_id) {
            Some(entry) => entry.subscriptions.clone(),
            None => return,
        };
        for pair in &subscriptions {
            if let Some(room) = inner.rooms.get_mut(pair) {
                room.remove(client_id);
                if room.is_empty() {
                    inner.rooms.remove(pair);
                }
            }
        }
        inner.wildcards.remove(client_id);
        if let Some(entry) = inner.sessions.get_mut(client_id) {
            entry.subscriptions.clear();
            entry.wildcard = false;
        }
    }

    /// Current subscription set of a session, sorted for stable replies.
    pub fn subscriptions_of(&self, client_id: &str) -> Option<(Vec<String>, bool)> {
        let inner = self.lock();
        inner.sessions.get(client_id).map(|entry| {
            let mut pairs: Vec<String> = entry.subscriptions.iter().cloned().collect();
            pairs.sort();
            (pairs, entry.wildcard)
        })
    }

    /// Queues of sessions that should see a message for `instrument`:
    /// room members plus wildcard sessions.
    pub fn instrument_targets(&self, instrument: &str) -> Vec<Arc<OutboundQueue>> {
        let inner = self.lock();
        let mut ids: HashSet<&String> = inner.wildcards.iter().collect();
        if let Some(room) = inner.rooms.get(instrument) {
            ids.extend(room.iter());
        }
        ids.iter()
            .filter_map(|id| inner.sessions.get(*id).map(|e| e.queue.clone()))
            .collect()
    }

    /// Queues of sessions subscribed to either leg of a pair.
    pub fn pair_targets(&self, pair1: &str, pair2: &str) -> Vec<Arc<OutboundQueue>> {
        let inner = self.lock();
        let mut ids: HashSet<&String> = inner.wildcards.iter().collect();
        for instrument in [pair1, pair2] {
            if let Some(room) = inner.rooms.get(instrument) {
                ids.extend(room.iter());
            }
        }
        ids.iter()
            .filter_map(|id| inner.sessions.get(*id).map(|e| e.queue.clone()))
            .collect()
    }

    /// Every live session queue; used for `data_ready`.
    pub fn all_targets(&self) -> Vec<Arc<OutboundQueue>> {
        let inner = self.lock();
        inner.sessions.values().map(|e| e.queue.clone()).collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.lock();
        RegistryStats {
            active_sessions: inner.sessions.len(),
            total_subscriptions: inner
                .sessions
                .values()
                .map(|e| e.subscriptions.len())
                .sum(),
        }
    }
}
