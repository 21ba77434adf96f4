//! Scheduled jobs: hourly ingestion and daily correlation analysis.

pub mod context;
pub mod daily;
pub mod hourly;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

pub use context::JobContext;
pub use daily::DailyCorrelationJob;
pub use hourly::HourlyJob;

/// Serialize and publish a bus message in one step.
pub(crate) async fn publish_json<T: serde::Serialize>(
    cache: &dyn crate::cache::Cache,
    channel: &str,
    value: &T,
) -> Result<()> {
    let payload = serde_json::to_string(value).map_err(|e| {
        crate::error::EngineError::CacheUnavailable(format!("encode {channel} payload: {e}"))
    })?;
    cache.publish(channel, &payload).await
}

/// A schedulable unit of work.
///
/// `now` is the logical tick time, which the scheduler may pin to the
/// nominal cron time when recovering a near-miss; implementations stamp
/// derived rows with it rather than the wall clock.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Execute one run. Returns the number of records processed.
    async fn run(&self, now: DateTime<Utc>) -> Result<u64>;
}
