//! Engine-wide error kinds, scoped by recovery behavior.

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the pipeline components.
///
/// Variants are grouped by how callers are expected to react: broker errors
/// split into retryable and terminal kinds, store errors into transient
/// connectivity and invariant violations, cache errors are non-fatal for
/// jobs but fatal for the fan-out server.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("broker rejected credentials (status {status})")]
    BrokerAuth { status: u16 },

    #[error("broker rate limited")]
    BrokerRateLimited { retry_after: Option<Duration> },

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("broker rejected request: {0}")]
    BrokerBadRequest(String),

    #[error("malformed broker response: {0}")]
    BrokerParse(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("store invariant violated: {0}")]
    StoreInvariant(String),

    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("fan-out server at capacity")]
    CapacityReached,

    #[error("slow consumer: {0}")]
    SlowConsumer(String),

    #[error("job failed: {0}")]
    JobFailed(String),
}

impl EngineError {
    /// Whether a broker call that failed with this error may be retried
    /// within the same job run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::BrokerUnavailable(_) | EngineError::BrokerRateLimited { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
