//! Shared dependencies injected into job implementations.

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Config;
use crate::db::Store;
use crate::services::broker::BrokerClient;

/// Context handed to jobs at construction.
///
/// Jobs never own connections; they borrow the shared broker client,
/// store, and cache for the duration of one run.
pub struct JobContext {
    pub broker: Arc<BrokerClient>,
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub config: Arc<Config>,
}

impl JobContext {
    pub fn new(
        broker: Arc<BrokerClient>,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            broker,
            store,
            cache,
            config,
        }
    }
}
