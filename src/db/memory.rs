//! In-memory storage backend with the same semantics as Postgres.
//!
//! Used by the test suites and local development runs; the inspection
//! helpers expose row-level state the SQL backend keeps internal.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::{JobRunHandle, JobRunRow, JobStatus, Store, StoredClose};
use crate::error::{EngineError, Result};
use crate::models::{BestPairEntry, Candle, CorrelationEntry, Granularity, VolatilityMetric};

/// A candle row together with its bookkeeping timestamps.
#[derive(Debug, Clone)]
pub struct StoredCandle {
    pub candle: Candle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

type CandleKey = (String, DateTime<Utc>, Granularity);

#[derive(Default)]
struct Inner {
    candles: BTreeMap<CandleKey, StoredCandle>,
    volatility: BTreeMap<(String, DateTime<Utc>), VolatilityMetric>,
    correlations: BTreeMap<(String, String, DateTime<Utc>), CorrelationEntry>,
    best_pairs: Vec<BestPairEntry>,
    job_runs: Vec<JobRunRow>,
    next_job_id: i64,
}

/// In-memory `Store` implementation.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a panicked test thread; propagate the panic.
        self.inner.lock().expect("mem store lock poisoned")
    }

    pub fn candle_count(&self) -> usize {
        self.lock().candles.len()
    }

    pub fn get_candle(
        &self,
        instrument: &str,
        time: DateTime<Utc>,
        granularity: Granularity,
    ) -> Option<StoredCandle> {
        self.lock()
            .candles
            .get(&(instrument.to_string(), time, granularity))
            .cloned()
    }

    pub fn get_metric(&self, instrument: &str, time: DateTime<Utc>) -> Option<VolatilityMetric> {
        self.lock()
            .volatility
            .get(&(instrument.to_string(), time))
            .cloned()
    }

    pub fn correlations(&self) -> Vec<CorrelationEntry> {
        self.lock().correlations.values().cloned().collect()
    }

    pub fn best_pairs(&self) -> Vec<BestPairEntry> {
        self.lock().best_pairs.clone()
    }

    pub fn job_runs(&self) -> Vec<JobRunRow> {
        self.lock().job_runs.clone()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn upsert_candles(&self, rows: &[Candle]) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.lock();
        for candle in rows {
            let key = (candle.instrument.clone(), candle.time, candle.granularity);
            inner
                .candles
                .entry(key)
                .and_modify(|existing| {
                    existing.candle = candle.clone();
                    existing.updated_at = now;
                })
                .or_insert_with(|| StoredCandle {
                    candle: candle.clone(),
                    created_at: now,
                    updated_at: now,
                });
        }
        Ok(rows.len() as u64)
    }

    async fn upsert_volatility(&self, rows: &[VolatilityMetric]) -> Result<u64> {
        let mut inner = self.lock();
        for metric in rows {
            inner
                .volatility
                .insert((metric.instrument.clone(), metric.time), metric.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn insert_correlations(&self, rows: &[CorrelationEntry]) -> Result<u64> {
        for row in rows {
            if !row.is_canonical() {
                return Err(EngineError::StoreInvariant(format!(
                    "correlation pair not canonically ordered: {} / {}",
                    row.pair1, row.pair2
                )));
            }
        }
        let mut inner = self.lock();
        for row in rows {
            inner
                .correlations
                .insert((row.pair1.clone(), row.pair2.clone(), row.time), row.clone());
        }
        Ok(rows.len() as u64)
    }

    async fn append_best_pairs(&self, rows: &[BestPairEntry]) -> Result<u64> {
        let mut inner = self.lock();
        inner.best_pairs.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn get_recent_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let inner = self.lock();
        let mut matching: Vec<&StoredCandle> = inner
            .candles
            .values()
            .filter(|s| s.candle.instrument == instrument && s.candle.granularity == granularity)
            .collect();
        matching.sort_by(|a, b| b.candle.time.cmp(&a.candle.time));
        Ok(matching
            .into_iter()
            .take(limit as usize)
            .map(|s| s.candle.clone())
            .collect())
    }

    async fn get_recent_closes(
        &self,
        instrument: &str,
        granularity: Granularity,
        window: u32,
    ) -> Result<Vec<StoredClose>> {
        let newest_first = self
            .get_recent_candles(instrument, granularity, window)
            .await?;
        let mut closes: Vec<StoredClose> = newest_first
            .into_iter()
            .map(|c| StoredClose {
                time: c.time,
                close: c.mid.close,
            })
            .collect();
        closes.reverse();
        Ok(closes)
    }

    async fn begin_job(&self, job_name: &str) -> Result<JobRunHandle> {
        let start_time = Utc::now();
        let mut inner = self.lock();
        inner.next_job_id += 1;
        let id = inner.next_job_id;
        inner.job_runs.push(JobRunRow {
            id,
            job_name: job_name.to_string(),
            start_time,
            end_time: None,
            duration_seconds: None,
            status: JobStatus::Running,
            error_message: None,
            records_processed: None,
        });
        Ok(JobRunHandle {
            id,
            job_name: job_name.to_string(),
            start_time,
        })
    }

    async fn end_job(
        &self,
        handle: &JobRunHandle,
        status: JobStatus,
        error_message: Option<&str>,
        records_processed: Option<u64>,
    ) -> Result<()> {
        let end_time = Utc::now();
        let mut inner = self.lock();
        let row = inner
            .job_runs
            .iter_mut()
            .find(|r| r.id == handle.id)
            .ok_or_else(|| {
                EngineError::StoreInvariant(format!("unknown job run id {}", handle.id))
            })?;
        row.end_time = Some(end_time);
        row.duration_seconds = Some((end_time - handle.start_time).num_seconds());
        row.status = status;
        row.error_message = error_message.map(str::to_string);
        row.records_processed = records_processed;
        Ok(())
    }
}
