//! PostgreSQL storage backend.

use async_trait::async_trait;
use chrono::Utc;
use tokio_postgres::{Client, NoTls, Row};

use crate::db::{JobRunHandle, JobStatus, Store, StoredClose};
use crate::error::{EngineError, Result};
use crate::models::{
    BestPairEntry, Candle, CorrelationEntry, Granularity, Ohlc, VolatilityMetric,
};

/// Store backed by tokio-postgres. One multiplexed connection serves all
/// statement batches; each write commits individually, idempotent upserts
/// make partially-completed jobs safe to re-run.
pub struct PgStore {
    client: Client,
}

impl PgStore {
    /// Connect and bootstrap the schema. Connection failures surface as
    /// `StoreUnavailable`.
    pub async fn connect(dsn: &str) -> Result<Self> {
        let (client, connection) = tokio_postgres::connect(dsn, NoTls)
            .await
            .map_err(|e| EngineError::StoreUnavailable(format!("connect: {e}")))?;

        // The connection future drives the socket for the client's lifetime.
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "postgres connection error");
            }
        });

        let store = Self { client };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        let statements = [
            "CREATE TABLE IF NOT EXISTS candles (
                instrument TEXT NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                granularity TEXT NOT NULL,
                open_bid NUMERIC(12,5) NOT NULL,
                high_bid NUMERIC(12,5) NOT NULL,
                low_bid NUMERIC(12,5) NOT NULL,
                close_bid NUMERIC(12,5) NOT NULL,
                open_ask NUMERIC(12,5) NOT NULL,
                high_ask NUMERIC(12,5) NOT NULL,
                low_ask NUMERIC(12,5) NOT NULL,
                close_ask NUMERIC(12,5) NOT NULL,
                open_mid NUMERIC(12,5) NOT NULL,
                high_mid NUMERIC(12,5) NOT NULL,
                low_mid NUMERIC(12,5) NOT NULL,
                close_mid NUMERIC(12,5) NOT NULL,
                volume BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (instrument, time, granularity)
            )",
            "CREATE TABLE IF NOT EXISTS volatility (
                instrument TEXT NOT NULL,
                asset_class TEXT NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                hv20 NUMERIC(12,6),
                hv50 NUMERIC(12,6),
                sma15 NUMERIC(12,5),
                sma30 NUMERIC(12,5),
                sma50 NUMERIC(12,5),
                bb_upper NUMERIC(12,5),
                bb_middle NUMERIC(12,5),
                bb_lower NUMERIC(12,5),
                atr NUMERIC(12,5),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (instrument, time)
            )",
            "CREATE TABLE IF NOT EXISTS correlation (
                pair1 TEXT NOT NULL,
                pair2 TEXT NOT NULL,
                time TIMESTAMPTZ NOT NULL,
                correlation NUMERIC(9,6) NOT NULL,
                window_size INTEGER NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                UNIQUE (pair1, pair2, time),
                CHECK (pair1 < pair2)
            )",
            "CREATE TABLE IF NOT EXISTS best_pairs (
                id BIGSERIAL PRIMARY KEY,
                time TIMESTAMPTZ NOT NULL,
                pair1 TEXT NOT NULL,
                pair2 TEXT NOT NULL,
                correlation NUMERIC(9,6) NOT NULL,
                category TEXT NOT NULL,
                rank INTEGER NOT NULL,
                reason TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )",
            "CREATE TABLE IF NOT EXISTS job_log (
                id BIGSERIAL PRIMARY KEY,
                job_name TEXT NOT NULL,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ,
                duration_seconds BIGINT,
                status TEXT NOT NULL,
                error_message TEXT,
                records_processed BIGINT
            )",
        ];
        for sql in statements {
            self.client
                .execute(sql, &[])
                .await
                .map_err(|e| EngineError::StoreUnavailable(format!("init schema: {e}")))?;
        }
        Ok(())
    }

    fn candle_from_row(row: &Row) -> Result<Candle> {
        let granularity: String = row.get("granularity");
        let granularity: Granularity = granularity
            .parse()
            .map_err(|_| EngineError::StoreInvariant(format!("bad granularity '{granularity}'")))?;
        Ok(Candle {
            instrument: row.get("instrument"),
            time: row.get("time"),
            granularity,
            bid: Ohlc {
                open: row.get("open_bid"),
                high: row.get("high_bid"),
                low: row.get("low_bid"),
                close: row.get("close_bid"),
            },
            ask: Ohlc {
                open: row.get("open_ask"),
                high: row.get("high_ask"),
                low: row.get("low_ask"),
                close: row.get("close_ask"),
            },
            mid: Ohlc {
                open: row.get("open_mid"),
                high: row.get("high_mid"),
                low: row.get("low_mid"),
                close: row.get("close_mid"),
            },
            volume: row.get("volume"),
        })
    }
}

fn store_err(e: tokio_postgres::Error) -> EngineError {
    EngineError::StoreUnavailable(e.to_string())
}

#[async_trait]
impl Store for PgStore {
    async fn upsert_candles(&self, rows: &[Candle]) -> Result<u64> {
        let statement = self
            .client
            .prepare(
                "INSERT INTO candles (instrument, time, granularity,
                    open_bid, high_bid, low_bid, close_bid,
                    open_ask, high_ask, low_ask, close_ask,
                    open_mid, high_mid, low_mid, close_mid, volume)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                 ON CONFLICT (instrument, time, granularity) DO UPDATE SET
                    open_bid = EXCLUDED.open_bid, high_bid = EXCLUDED.high_bid,
                    low_bid = EXCLUDED.low_bid, close_bid = EXCLUDED.close_bid,
                    open_ask = EXCLUDED.open_ask, high_ask = EXCLUDED.high_ask,
                    low_ask = EXCLUDED.low_ask, close_ask = EXCLUDED.close_ask,
                    open_mid = EXCLUDED.open_mid, high_mid = EXCLUDED.high_mid,
                    low_mid = EXCLUDED.low_mid, close_mid = EXCLUDED.close_mid,
                    volume = EXCLUDED.volume, updated_at = NOW()",
            )
            .await
            .map_err(store_err)?;

        let mut written = 0u64;
        for c in rows {
            let granularity = c.granularity.as_str();
            written += self
                .client
                .execute(
                    &statement,
                    &[
                        &c.instrument,
                        &c.time,
                        &granularity,
                        &c.bid.open,
                        &c.bid.high,
                        &c.bid.low,
                        &c.bid.close,
                        &c.ask.open,
                        &c.ask.high,
                        &c.ask.low,
                        &c.ask.close,
                        &c.mid.open,
                        &c.mid.high,
                        &c.mid.low,
                        &c.mid.close,
                        &c.volume,
                    ],
                )
                .await
                .map_err(store_err)?;
        }
        Ok(written)
    }

    async fn upsert_volatility(&self, rows: &[VolatilityMetric]) -> Result<u64> {
        let statement = self
            .client
            .prepare(
                "INSERT INTO volatility (instrument, asset_class, time,
                    hv20, hv50, sma15, sma30, sma50, bb_upper, bb_middle, bb_lower, atr)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                 ON CONFLICT (instrument, time) DO UPDATE SET
                    asset_class = EXCLUDED.asset_class,
                    hv20 = EXCLUDED.hv20, hv50 = EXCLUDED.hv50,
                    sma15 = EXCLUDED.sma15, sma30 = EXCLUDED.sma30, sma50 = EXCLUDED.sma50,
                    bb_upper = EXCLUDED.bb_upper, bb_middle = EXCLUDED.bb_middle,
                    bb_lower = EXCLUDED.bb_lower, atr = EXCLUDED.atr,
                    updated_at = NOW()",
            )
            .await
            .map_err(store_err)?;

        let mut written = 0u64;
        for m in rows {
            let asset_class = m.asset_class.to_string();
            written += self
                .client
                .execute(
                    &statement,
                    &[
                        &m.instrument,
                        &asset_class,
                        &m.time,
                        &m.hv20,
                        &m.hv50,
                        &m.sma15,
                        &m.sma30,
                        &m.sma50,
                        &m.bb_upper,
                        &m.bb_middle,
                        &m.bb_lower,
                        &m.atr,
                    ],
                )
                .await
                .map_err(store_err)?;
        }
        Ok(written)
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
        let statement = self
            .client
            .prepare(
                "INSERT INTO correlation (pair1, pair2, time, correlation, window_size)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT (pair1, pair2, time) DO UPDATE SET
                    correlation = EXCLUDED.correlation, updated_at = NOW()",
            )
            .await
            .map_err(store_err)?;

        let mut written = 0u64;
        for r in rows {
            let window = r.window_size as i32;
            written += self
                .client
                .execute(
                    &statement,
                    &[&r.pair1, &r.pair2, &r.time, &r.correlation, &window],
                )
                .await
                .map_err(store_err)?;
        }
        Ok(written)
    }

    async fn append_best_pairs(&self, rows: &[BestPairEntry]) -> Result<u64> {
        let statement = self
            .client
            .prepare(
                "INSERT INTO best_pairs (time, pair1, pair2, correlation, category, rank, reason)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .await
            .map_err(store_err)?;

        let mut written = 0u64;
        for r in rows {
            let category = r.category.as_str();
            let rank = r.rank as i32;
            written += self
                .client
                .execute(
                    &statement,
                    &[
                        &r.time,
                        &r.pair1,
                        &r.pair2,
                        &r.correlation,
                        &category,
                        &rank,
                        &r.reason,
                    ],
                )
                .await
                .map_err(store_err)?;
        }
        Ok(written)
    }

    async fn get_recent_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        limit: u32,
    ) -> Result<Vec<Candle>> {
        let limit = i64::from(limit);
        let granularity_str = granularity.as_str();
        let rows = self
            .client
            .query(
                "SELECT * FROM candles
                 WHERE instrument = $1 AND granularity = $2
                 ORDER BY time DESC LIMIT $3",
                &[&instrument, &granularity_str, &limit],
            )
            .await
            .map_err(store_err)?;
        rows.iter().map(Self::candle_from_row).collect()
    }

    async fn get_recent_closes(
        &self,
        instrument: &str,
        granularity: Granularity,
        window: u32,
    ) -> Result<Vec<StoredClose>> {
        let limit = i64::from(window);
        let granularity_str = granularity.as_str();
        let rows = self
            .client
            .query(
                "SELECT time, close_mid FROM candles
                 WHERE instrument = $1 AND granularity = $2
                 ORDER BY time DESC LIMIT $3",
                &[&instrument, &granularity_str, &limit],
            )
            .await
            .map_err(store_err)?;

        let mut closes: Vec<StoredClose> = rows
            .iter()
            .map(|row| StoredClose {
                time: row.get("time"),
                close: row.get("close_mid"),
            })
            .collect();
        closes.reverse();
        Ok(closes)
    }

    async fn begin_job(&self, job_name: &str) -> Result<JobRunHandle> {
        let start_time = Utc::now();
        let status = JobStatus::Running.to_string();
        let row = self
            .client
            .query_one(
                "INSERT INTO job_log (job_name, start_time, status)
                 VALUES ($1, $2, $3) RETURNING id",
                &[&job_name, &start_time, &status],
            )
            .await
            .map_err(store_err)?;
        Ok(JobRunHandle {
            id: row.get(0),
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
        let duration = (end_time - handle.start_time).num_seconds();
        let status = status.to_string();
        let records = records_processed.and_then(|r| i64::try_from(r).ok());
        self.client
            .execute(
                "UPDATE job_log SET end_time = $2, duration_seconds = $3,
                    status = $4, error_message = $5, records_processed = $6
                 WHERE id = $1",
                &[
                    &handle.id,
                    &end_time,
                    &duration,
                    &status,
                    &error_message,
                    &records,
                ],
            )
            .await
            .map_err(store_err)?;
        Ok(())
    }
}
