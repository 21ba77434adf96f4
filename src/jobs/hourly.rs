//! Hourly ingestion job: fetch, upsert, derive, cache, publish.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use rust_decimal::prelude::ToPrimitive;
use tracing::{debug, error, info, warn};

use crate::analytics::{compute_metrics, math};
use crate::cache::{keys, CHANNEL_DATA_READY, CHANNEL_PRICES, CHANNEL_VOLATILITY_ALERTS};
use crate::error::{EngineError, Result};
use crate::jobs::{publish_json, Job, JobContext};
use crate::models::{
    Candle, DataReady, DataType, Granularity, PriceQuote, PriceUpdate, Severity, VolatilityAlert,
    VolatilityMetric,
};

pub const JOB_NAME: &str = "hourly_fetch_and_metrics";

/// Last two completed candles; tolerance for a missed prior run.
const FETCH_COUNT: usize = 2;
const PRICE_SIDES: &str = "MBA";
/// Candle window loaded for metric derivation (~12 days of H1).
const ANALYTICS_WINDOW: u32 = 300;
/// Instrument failures above this share of the universe fail the run.
const MAX_FAILURE_RATIO: f64 = 0.3;

/// Fetches the latest candles for every tracked instrument, derives
/// volatility metrics, persists both, refreshes the hot cache, and fans
/// out bus notifications.
pub struct HourlyJob {
    ctx: Arc<JobContext>,
}

impl HourlyJob {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn process_instrument(&self, instrument: &str, now: DateTime<Utc>) -> Result<u64> {
        let fetched = self
            .ctx
            .broker
            .fetch_candles(instrument, Granularity::H1, FETCH_COUNT, PRICE_SIDES)
            .await?;

        let completed: Vec<Candle> = fetched
            .into_iter()
            .filter(|f| f.complete)
            .map(|f| f.candle)
            .collect();
        if completed.is_empty() {
            return Err(EngineError::InsufficientData(format!(
                "{instrument}: broker returned no completed candles"
            )));
        }

        let mut records = self.ctx.store.upsert_candles(&completed).await?;

        let mut window = self
            .ctx
            .store
            .get_recent_candles(instrument, Granularity::H1, ANALYTICS_WINDOW)
            .await?;
        window.reverse(); // analytics wants oldest-first

        let metric = compute_metrics(&window);
        match &metric {
            Some(m) => {
                records += self
                    .ctx
                    .store
                    .upsert_volatility(std::slice::from_ref(m))
                    .await?;
            }
            None => {
                debug!(
                    instrument,
                    samples = window.len(),
                    "window too short for metrics, skipping"
                );
            }
        }

        // The latest candle exists: at least one row was just upserted.
        if let Some(latest) = window.last() {
            if let Err(e) = self
                .cache_and_publish(instrument, latest, metric.as_ref(), now)
                .await
            {
                // Cache trouble is logged, never fatal for the run.
                warn!(instrument, error = %e, "cache write failed, store remains authoritative");
            }
        }

        Ok(records)
    }

    async fn cache_and_publish(
        &self,
        instrument: &str,
        latest: &Candle,
        metric: Option<&VolatilityMetric>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let config = &self.ctx.config;
        let quote = PriceQuote {
            bid: latest.bid.close,
            ask: latest.ask.close,
            mid: latest.mid.close,
            time: latest.time,
        };

        let key = keys::prices(instrument);
        let changed = match self.ctx.cache.get(&key).await? {
            Some(raw) => serde_json::from_str::<PriceQuote>(&raw)
                .map(|prev| prev.mid != quote.mid || prev.time != quote.time)
                .unwrap_or(true),
            None => true,
        };

        let payload = serde_json::to_string(&quote)
            .map_err(|e| EngineError::CacheUnavailable(format!("encode quote: {e}")))?;
        self.ctx
            .cache
            .put(&key, &payload, config.cache_ttl_prices)
            .await?;

        if changed {
            publish_json(
                self.ctx.cache.as_ref(),
                CHANNEL_PRICES,
                &PriceUpdate {
                    instrument: instrument.to_string(),
                    price: quote,
                    timestamp: now,
                },
            )
            .await?;
        }

        let Some(metric) = metric else {
            return Ok(());
        };

        let metric_payload = serde_json::to_string(metric)
            .map_err(|e| EngineError::CacheUnavailable(format!("encode metrics: {e}")))?;
        self.ctx
            .cache
            .put(
                &keys::metrics(instrument),
                &metric_payload,
                config.cache_ttl_metrics,
            )
            .await?;

        if let Some(hv20) = metric.hv20 {
            let hv = hv20.to_f64().unwrap_or(0.0);
            if hv > config.volatility_threshold {
                let threshold = math::to_rate_decimal(config.volatility_threshold)
                    .unwrap_or_default();
                publish_json(
                    self.ctx.cache.as_ref(),
                    CHANNEL_VOLATILITY_ALERTS,
                    &VolatilityAlert {
                        instrument: instrument.to_string(),
                        volatility: hv20,
                        threshold,
                        severity: Severity::for_volatility(hv, config.volatility_threshold),
                        message: format!(
                            "Volatility ({hv20}) exceeded threshold ({threshold})"
                        ),
                        timestamp: now,
                    },
                )
                .await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Job for HourlyJob {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<u64> {
        let instruments = self.ctx.config.tracked_pairs.clone();
        let universe = instruments.len();
        info!(instruments = universe, "hourly job starting");

        let results: Vec<(String, Result<u64>)> = stream::iter(instruments)
            .map(|instrument| async move {
                let outcome = self.process_instrument(&instrument, now).await;
                (instrument, outcome)
            })
            .buffer_unordered(self.ctx.config.fetch_concurrency)
            .collect()
            .await;

        let mut records = 0u64;
        let mut succeeded = 0usize;
        let mut failed = 0usize;
        for (instrument, outcome) in results {
            match outcome {
                Ok(r) => {
                    records += r;
                    succeeded += 1;
                }
                // Credentials and store connectivity break every remaining
                // instrument too; fail the run and let the next tick retry.
                Err(e)
                    if matches!(
                        e,
                        EngineError::BrokerAuth { .. }
                            | EngineError::StoreUnavailable(_)
                            | EngineError::StoreInvariant(_)
                    ) =>
                {
                    return Err(e)
                }
                Err(e) => {
                    failed += 1;
                    error!(instrument = %instrument, error = %e, "instrument ingestion failed");
                }
            }
        }

        if universe > 0 && (failed as f64) / (universe as f64) > MAX_FAILURE_RATIO {
            return Err(EngineError::JobFailed(format!(
                "{failed}/{universe} instruments failed, above the {:.0}% tolerance",
                MAX_FAILURE_RATIO * 100.0
            )));
        }
        if failed > 0 {
            warn!(failed, succeeded, "hourly run completed with partial coverage");
        }

        // data_ready follows every per-instrument publish of this run.
        if let Err(e) = publish_json(
            self.ctx.cache.as_ref(),
            CHANNEL_DATA_READY,
            &DataReady {
                data_type: DataType::Prices,
                count: succeeded,
                timestamp: now,
                message: Some(format!("prices data updated ({succeeded} instruments)")),
            },
        )
        .await
        {
            warn!(error = %e, "data_ready publish failed");
        }

        info!(records, succeeded, failed, "hourly job finished");
        Ok(records)
    }
}
