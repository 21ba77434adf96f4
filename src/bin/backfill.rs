//! One-shot candle backfill through the normal idempotent upsert path.
//!
//! Usage: backfill [count] [granularity]
//! Defaults to 500 H1 candles per tracked instrument (broker cap 5000).

use std::sync::Arc;

use dotenvy::dotenv;
use tracing::{error, info, warn};

use fxpulse::config::Config;
use fxpulse::db::{PgStore, Store};
use fxpulse::logging;
use fxpulse::models::{Candle, Granularity};
use fxpulse::services::broker::{BrokerClient, MAX_CANDLES_PER_CALL};

#[tokio::main]
async fn main() {
    dotenv().ok();

    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };
    logging::init_logging(&config.environment);

    let mut args = std::env::args().skip(1);
    let count: usize = match args.next().map(|raw| raw.parse()).transpose() {
        Ok(count) => count.unwrap_or(500).min(MAX_CANDLES_PER_CALL),
        Err(_) => {
            eprintln!("Usage: backfill [count] [granularity]");
            std::process::exit(1);
        }
    };
    let granularity: Granularity = match args.next().map(|raw| raw.parse()).transpose() {
        Ok(granularity) => granularity.unwrap_or(Granularity::H1),
        Err(_) => {
            eprintln!("Usage: backfill [count] [granularity]");
            std::process::exit(1);
        }
    };

    let store = match PgStore::connect(&config.store_dsn).await {
        Ok(store) => store,
        Err(e) => {
            error!(error = %e, "store init failed");
            std::process::exit(2);
        }
    };

    let broker = match BrokerClient::from_config(&config) {
        Ok(broker) => broker,
        Err(e) => {
            error!(error = %e, "broker client init failed");
            std::process::exit(2);
        }
    };

    info!(
        count,
        granularity = %granularity,
        instruments = config.tracked_pairs.len(),
        "backfill starting"
    );

    let mut total = 0u64;
    let mut failed = 0usize;
    for instrument in &config.tracked_pairs {
        match broker
            .fetch_candles(instrument, granularity, count, "MBA")
            .await
        {
            Ok(fetched) => {
                let completed: Vec<Candle> = fetched
                    .into_iter()
                    .filter(|f| f.complete)
                    .map(|f| f.candle)
                    .collect();
                match store.upsert_candles(&completed).await {
                    Ok(written) => {
                        total += written;
                        info!(instrument = %instrument, written, "instrument backfilled");
                    }
                    Err(e) => {
                        error!(instrument = %instrument, error = %e, "upsert failed");
                        std::process::exit(2);
                    }
                }
            }
            Err(e) => {
                failed += 1;
                warn!(instrument = %instrument, error = %e, "fetch failed, instrument skipped");
            }
        }
    }

    info!(total, failed, "backfill finished");
}
