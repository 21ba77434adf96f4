//! Authenticated REST client for the broker candle endpoint.

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::models::Granularity;
use crate::services::broker::messages::{CandlesResponse, FetchedCandle};
use crate::services::broker::rate_limit::TokenBucket;

/// Hard cap the broker enforces on candles per request.
pub const MAX_CANDLES_PER_CALL: usize = 5000;

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const MAX_ATTEMPTS: u32 = 5;

/// REST client for candle batches. All outbound calls pass through the
/// process-wide token bucket; transient failures retry with exponential
/// backoff inside a single `fetch_candles` call.
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    tracked: Vec<String>,
    bucket: TokenBucket,
}

impl BrokerClient {
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.broker_env.base_url(),
            &config.broker_token,
            config.broker_timeout,
            config.tracked_pairs.clone(),
            config.rate_limit_requests,
            config.rate_limit_window,
        )
    }

    /// Build a client against an explicit base URL. Tests point this at a
    /// local mock server.
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: Duration,
        tracked: Vec<String>,
        rate_limit_requests: u32,
        rate_limit_window: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::BrokerUnavailable(format!("http client init: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            tracked,
            bucket: TokenBucket::new(rate_limit_requests, rate_limit_window),
        })
    }

    /// Fetch up to `count` candles for a tracked instrument.
    ///
    /// `price` selects the quote sides as a combination of `M`, `B`, `A`.
    /// Retries `BrokerUnavailable` and `BrokerRateLimited` with exponential
    /// backoff (base 1 s, cap 60 s) up to a bounded attempt count; auth and
    /// bad-request failures surface immediately.
    pub async fn fetch_candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        price: &str,
    ) -> Result<Vec<FetchedCandle>> {
        if !self.tracked.iter().any(|p| p == instrument) {
            return Err(EngineError::BrokerBadRequest(format!(
                "instrument '{instrument}' is not in the tracked set"
            )));
        }
        if price.is_empty() || !price.chars().all(|c| matches!(c, 'M' | 'B' | 'A')) {
            return Err(EngineError::BrokerBadRequest(format!(
                "invalid price components '{price}'"
            )));
        }
        let count = count.min(MAX_CANDLES_PER_CALL);

        let mut backoff = BACKOFF_BASE;
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.bucket.acquire().await;

            match self.fetch_once(instrument, granularity, count, price).await {
                Ok(candles) => return Ok(candles),
                Err(err) if err.is_retryable() && attempt < MAX_ATTEMPTS => {
                    let wait = match &err {
                        EngineError::BrokerRateLimited {
                            retry_after: Some(hint),
                        } => (*hint).min(BACKOFF_CAP),
                        _ => backoff,
                    };
                    warn!(
                        instrument,
                        attempt,
                        wait_secs = wait.as_secs(),
                        error = %err,
                        "broker call failed, backing off"
                    );
                    tokio::time::sleep(wait).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn fetch_once(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        price: &str,
    ) -> Result<Vec<FetchedCandle>> {
        let url = format!("{}/v3/instruments/{instrument}/candles", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[
                ("count", count.to_string()),
                ("granularity", granularity.as_str().to_string()),
                ("price", price.to_string()),
            ])
            .send()
            .await
            .map_err(|e| {
                // Timeouts and connection failures are transient.
                EngineError::BrokerUnavailable(format!("{instrument}: {e}"))
            })?;

        let status = response.status();
        match status {
            s if s.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(EngineError::BrokerAuth {
                    status: status.as_u16(),
                })
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(EngineError::BrokerRateLimited { retry_after });
            }
            s if s.is_server_error() => {
                return Err(EngineError::BrokerUnavailable(format!(
                    "{instrument}: status {status}"
                )))
            }
            _ => {
                let body = response.text().await.unwrap_or_default();
                return Err(EngineError::BrokerBadRequest(format!(
                    "{instrument}: status {status}: {}",
                    body.chars().take(200).collect::<String>()
                )));
            }
        }

        let body: CandlesResponse = response
            .json()
            .await
            .map_err(|e| EngineError::BrokerParse(format!("{instrument}: {e}")))?;

        debug!(
            instrument,
            granularity = %granularity,
            count = body.candles.len(),
            "fetched candle batch"
        );

        body.candles
            .into_iter()
            .map(|raw| raw.into_fetched(instrument, granularity))
            .collect()
    }
}
