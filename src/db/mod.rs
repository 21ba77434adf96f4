//! Durable typed storage of candles, metrics, correlations, best pairs,
//! and the job log.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{BestPairEntry, Candle, CorrelationEntry, Granularity, VolatilityMetric};

pub use memory::MemStore;
pub use postgres::PgStore;

/// Terminal or in-flight state of a scheduled job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Handle to the job-log row created by `begin_job`, owned by the job
/// invocation that created it.
#[derive(Debug, Clone)]
pub struct JobRunHandle {
    pub id: i64,
    pub job_name: String,
    pub start_time: DateTime<Utc>,
}

/// One audit row of scheduler activity.
#[derive(Debug, Clone)]
pub struct JobRunRow {
    pub id: i64,
    pub job_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub status: JobStatus,
    pub error_message: Option<String>,
    pub records_processed: Option<u64>,
}

/// A timestamped mid-close used as correlation input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoredClose {
    pub time: DateTime<Utc>,
    pub close: Decimal,
}

/// Storage contract shared by the Postgres and in-memory backends.
///
/// All writes are keyed so that re-running a job over the same window
/// converges to the same state; there is no cross-table transaction.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert candle rows by `(instrument, time, granularity)`, replacing
    /// numeric fields and bumping `updated_at`. Returns rows written.
    async fn upsert_candles(&self, rows: &[Candle]) -> Result<u64>;

    /// Upsert metric rows by `(instrument, time)`. Returns rows written.
    async fn upsert_volatility(&self, rows: &[VolatilityMetric]) -> Result<u64>;

    /// Insert correlation rows by `(pair1, pair2, time)`. Rows violating
    /// the canonical `pair1 < pair2` ordering are rejected with
    /// `StoreInvariant`.
    async fn insert_correlations(&self, rows: &[CorrelationEntry]) -> Result<u64>;

    /// Append best-pair rows; snapshot-per-run semantics, never upserted.
    async fn append_best_pairs(&self, rows: &[BestPairEntry]) -> Result<u64>;

    /// Most recent candles, newest-first by `time`, at most `limit`.
    async fn get_recent_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        limit: u32,
    ) -> Result<Vec<Candle>>;

    /// Mid-closes of the most recent `window` candles, oldest-first.
    async fn get_recent_closes(
        &self,
        instrument: &str,
        granularity: Granularity,
        window: u32,
    ) -> Result<Vec<StoredClose>>;

    /// Open a job-log row with status `running`.
    async fn begin_job(&self, job_name: &str) -> Result<JobRunHandle>;

    /// Finalize a job-log row.
    async fn end_job(
        &self,
        handle: &JobRunHandle,
        status: JobStatus,
        error_message: Option<&str>,
        records_processed: Option<u64>,
    ) -> Result<()>;
}
