//! Fan-out service: websocket sessions fed by the cache bus.
//!
//! This service cannot operate without the bus; losing it is fatal.

use std::sync::Arc;

use dotenvy::dotenv;
use tokio::signal;
use tracing::{error, info};

use fxpulse::cache::{Cache, RedisCache};
use fxpulse::config::Config;
use fxpulse::fanout::FanoutServer;
use fxpulse::logging;

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
    info!(environment = %config.environment, "starting fxpulse fan-out server");

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

    let server = FanoutServer::new(cache, config.clone());
    let router = server.router();

    // The relay owns the bus subscription; its loss takes the process down.
    tokio::spawn(async move {
        if let Err(e) = server.run_relay().await {
            error!(error = %e, "bus relay lost");
            std::process::exit(2);
        }
    });

    let listener = match tokio::net::TcpListener::bind(&config.fanout_bind).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(bind = %config.fanout_bind, error = %e, "could not bind listener");
            std::process::exit(2);
        }
    };
    info!(
        bind = %config.fanout_bind,
        max_clients = config.fanout_max_clients,
        ping_interval_secs = config.fanout_ping_interval.as_secs(),
        "fan-out server listening"
    );

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        error!(error = %e, "server error");
        std::process::exit(2);
    }
    info!("fan-out server stopped");
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
    info!("shutdown signal received");
}
