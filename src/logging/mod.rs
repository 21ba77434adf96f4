//! Logging initialization with environment-based formatters
//!
//! - Production: Structured JSON logs for cloud monitoring
//! - Development: Colorful, human-readable logs

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging based on the environment.
///
/// Production emits JSON structured logs suitable for log aggregation
/// systems; everything else gets a colorful human-readable format.
pub fn init_logging(environment: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let is_production = matches!(environment, "production" | "prod");

    if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(std::io::stdout),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_ansi(true)
                    .with_writer(std::io::stdout),
            )
            .init();
    }
}
