//! Daily correlation job: matrix, ranking, persistence, fan-out.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use tracing::{info, warn};

use crate::analytics::{correlate, math, rank_best_pairs, ClosePoint};
use crate::cache::{keys, CHANNEL_CORRELATION_ALERTS, CHANNEL_DATA_READY};
use crate::error::{EngineError, Result};
use crate::jobs::{publish_json, Job, JobContext};
use crate::models::{
    AssetClass, BestPairEntry, CorrelationAlert, CorrelationEntry, CorrelationMatrix, DataReady,
    DataType, Granularity, PairCategory, Severity,
};

pub const JOB_NAME: &str = "daily_correlation_analysis";

/// Computes the pairwise correlation matrix over the FX and metal
/// universe, persists entries and the ranked best-pairs snapshot, caches
/// both, and publishes alerts for strongly correlated pairs.
pub struct DailyCorrelationJob {
    ctx: Arc<JobContext>,
}

impl DailyCorrelationJob {
    pub fn new(ctx: Arc<JobContext>) -> Self {
        Self { ctx }
    }

    async fn load_series(&self, universe: &[String]) -> Result<Vec<(String, Vec<ClosePoint>)>> {
        let window = self.ctx.config.correlation_window as u32;
        let mut series = Vec::with_capacity(universe.len());
        for instrument in universe {
            let closes = self
                .ctx
                .store
                .get_recent_closes(instrument, Granularity::H1, window)
                .await?;
            let points: Vec<ClosePoint> = closes
                .iter()
                .filter_map(|c| Some((c.time, c.close.to_f64()?)))
                .collect();
            if points.len() < 2 {
                info!(
                    instrument = %instrument,
                    samples = points.len(),
                    "skipping instrument with insufficient history"
                );
                continue;
            }
            series.push((instrument.clone(), points));
        }
        Ok(series)
    }

    async fn write_cache(
        &self,
        universe: &[String],
        entries: &[CorrelationEntry],
        best: &[BestPairEntry],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let config = &self.ctx.config;
        let ttl = config.cache_ttl_correlation;

        let matrix = CorrelationMatrix {
            time: now,
            window_size: config.correlation_window,
            instruments: universe.to_vec(),
            entries: entries.to_vec(),
        };
        let encode = |label: &str, e: serde_json::Error| {
            EngineError::CacheUnavailable(format!("encode {label}: {e}"))
        };
        let payload = serde_json::to_string(&matrix).map_err(|e| encode("matrix", e))?;
        self.ctx
            .cache
            .put(keys::CORRELATION_MATRIX, &payload, ttl)
            .await?;

        let payload = serde_json::to_string(&best).map_err(|e| encode("best pairs", e))?;
        self.ctx
            .cache
            .put(keys::BEST_PAIRS_ALL, &payload, ttl)
            .await?;

        for category in PairCategory::all() {
            let members: Vec<&BestPairEntry> =
                best.iter().filter(|b| b.category == category).collect();
            let payload = serde_json::to_string(&members).map_err(|e| encode("best pairs", e))?;
            self.ctx
                .cache
                .put(&keys::best_pairs(category.as_str()), &payload, ttl)
                .await?;
        }
        Ok(())
    }

    async fn publish_alerts(&self, entries: &[CorrelationEntry], now: DateTime<Utc>) {
        let threshold = self.ctx.config.correlation_threshold;
        let threshold_decimal = math::to_rate_decimal(threshold).unwrap_or_default();
        for entry in entries {
            let magnitude = entry.correlation.to_f64().unwrap_or(0.0).abs();
            if magnitude < threshold {
                continue;
            }
            let alert = CorrelationAlert {
                pair1: entry.pair1.clone(),
                pair2: entry.pair2.clone(),
                correlation: entry.correlation,
                threshold: threshold_decimal,
                severity: Severity::for_correlation(magnitude),
                message: format!(
                    "Correlation between {} and {} is {}",
                    entry.pair1, entry.pair2, entry.correlation
                ),
                timestamp: now,
            };
            if let Err(e) =
                publish_json(self.ctx.cache.as_ref(), CHANNEL_CORRELATION_ALERTS, &alert).await
            {
                warn!(pair1 = %entry.pair1, pair2 = %entry.pair2, error = %e,
                    "correlation alert publish failed");
            }
        }
    }
}

#[async_trait]
impl Job for DailyCorrelationJob {
    fn name(&self) -> &'static str {
        JOB_NAME
    }

    async fn run(&self, now: DateTime<Utc>) -> Result<u64> {
        let config = &self.ctx.config;
        let window = config.correlation_window;

        // Only FX and metals correlate; iterating the sorted universe makes
        // every emitted pair canonical by construction.
        let mut universe: Vec<String> = config
            .tracked_pairs
            .iter()
            .filter(|p| AssetClass::classify(p).correlates())
            .cloned()
            .collect();
        universe.sort();
        info!(instruments = universe.len(), window, "daily correlation job starting");

        let series = self.load_series(&universe).await?;

        let mut entries = Vec::new();
        let mut skipped = 0usize;
        for i in 0..series.len() {
            for j in i + 1..series.len() {
                let (a_name, a) = &series[i];
                let (b_name, b) = &series[j];
                match correlate(a, b, window) {
                    Ok(rho) => {
                        let correlation = math::to_rate_decimal(rho).ok_or_else(|| {
                            EngineError::JobFailed(format!(
                                "non-finite correlation for {a_name}/{b_name}"
                            ))
                        })?;
                        let (pair1, pair2) = CorrelationEntry::canonical_pair(a_name, b_name);
                        entries.push(CorrelationEntry {
                            pair1,
                            pair2,
                            time: now,
                            correlation,
                            window_size: window,
                        });
                    }
                    Err(reason) => {
                        skipped += 1;
                        info!(pair1 = %a_name, pair2 = %b_name, %reason, "pair skipped");
                    }
                }
            }
        }

        let mut records = self.ctx.store.insert_correlations(&entries).await?;
        let best = rank_best_pairs(&entries);
        records += self.ctx.store.append_best_pairs(&best).await?;

        if let Err(e) = self.write_cache(&universe, &entries, &best, now).await {
            warn!(error = %e, "cache write failed, store remains authoritative");
        }

        self.publish_alerts(&entries, now).await;

        if let Err(e) = publish_json(
            self.ctx.cache.as_ref(),
            CHANNEL_DATA_READY,
            &DataReady {
                data_type: DataType::Correlations,
                count: entries.len(),
                timestamp: now,
                message: Some(format!(
                    "correlations data updated ({} pairs)",
                    entries.len()
                )),
            },
        )
        .await
        {
            warn!(error = %e, "data_ready publish failed");
        }

        info!(
            correlations = entries.len(),
            best_pairs = best.len(),
            skipped,
            "daily correlation job finished"
        );
        Ok(records)
    }
}
