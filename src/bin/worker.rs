//! Worker service: scheduler plus the hourly and daily jobs.
//!
//! Runs as a singleton; idempotent store writes make overlapping
//! deployments converge rather than conflict.

use std::sync::Arc;

use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info};

use fxpulse::cache::{Cache, RedisCache};
use fxpulse::config::Config;
use fxpulse::core::scheduler::{
    Scheduler, DAILY_DEADLINE, DAILY_GRACE, DAILY_SCHEDULE, HOURLY_DEADLINE, HOURLY_GRACE,
    HOURLY_SCHEDULE,
};
use fxpulse::db::{PgStore, Store};
use fxpulse::jobs::{DailyCorrelationJob, HourlyJob, JobContext};
use fxpulse::logging;
use fxpulse::services::broker::BrokerClient;

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
    info!(environment = %config.environment, "starting fxpulse worker");
    info!(instruments = config.tracked_pairs.len(), "tracked universe loaded");

    let store: Arc<dyn Store> = match PgStore::connect(&config.store_dsn).await {
        Ok(store) => {
            info!("store connected");
            Arc::new(store)
        }
        Err(e) => {
            error!(error = %e, "store init failed");
            std::process::exit(2);
        }
    };

    let cache: Arc<dyn Cache> = match RedisCache::connect(&config.cache_addr).await {
        Ok(cache) => {
            info!("cache connected");
            Arc::new(cache)
        }
        Err(e) => {
            error!(error = %e, "cache init failed");
            std::process::exit(2);
        }
    };

    let broker = match BrokerClient::from_config(&config) {
        Ok(broker) => Arc::new(broker),
        Err(e) => {
            error!(error = %e, "broker client init failed");
            std::process::exit(2);
        }
    };

    let ctx = Arc::new(JobContext::new(
        broker,
        store.clone(),
        cache,
        config.clone(),
    ));

    let mut scheduler = Scheduler::new(store);
    if config.hourly_enabled {
        let job = Arc::new(HourlyJob::new(ctx.clone()));
        if let Err(e) = scheduler.register(job, HOURLY_SCHEDULE, HOURLY_GRACE, HOURLY_DEADLINE) {
            error!(error = %e, "could not register hourly job");
            std::process::exit(1);
        }
    } else {
        info!("hourly job disabled by configuration");
    }
    if config.daily_enabled {
        let job = Arc::new(DailyCorrelationJob::new(ctx.clone()));
        if let Err(e) = scheduler.register(job, DAILY_SCHEDULE, DAILY_GRACE, DAILY_DEADLINE) {
            error!(error = %e, "could not register daily job");
            std::process::exit(1);
        }
    } else {
        info!("daily correlation job disabled by configuration");
    }

    scheduler.start().await;
    info!("worker started, waiting for shutdown signal");

    shutdown_signal().await;
    info!("shutdown signal received");
    scheduler.shutdown().await;
    info!("worker stopped");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
