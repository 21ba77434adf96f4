//! Real-time fan-out server: long-lived subscriber sessions fed by the
//! cache bus through per-instrument rooms.

pub mod messages;
pub mod registry;
pub mod session;

use std::sync::Arc;

use axum::extract::{State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::cache::{
    BusMessage, Cache, ALL_CHANNELS, CHANNEL_CORRELATION_ALERTS, CHANNEL_DATA_READY,
    CHANNEL_PRICES, CHANNEL_VOLATILITY_ALERTS,
};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::fanout::messages::{envelope, events};
use crate::fanout::registry::SessionRegistry;

pub use registry::RegistryStats;

/// Shared state behind the router and the relay task.
#[derive(Clone)]
pub struct FanoutState {
    pub registry: Arc<SessionRegistry>,
    pub cache: Arc<dyn Cache>,
    pub config: Arc<Config>,
}

/// The fan-out server. It never originates price or metric data; it only
/// relays the bus into subscriber sessions and answers point queries from
/// the cache.
pub struct FanoutServer {
    state: FanoutState,
}

impl FanoutServer {
    pub fn new(cache: Arc<dyn Cache>, config: Arc<Config>) -> Self {
        let registry = Arc::new(SessionRegistry::new(config.fanout_max_clients));
        Self {
            state: FanoutState {
                registry,
                cache,
                config,
            },
        }
    }

    pub fn state(&self) -> FanoutState {
        self.state.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            )
            .with_state(self.state.clone())
    }

    /// Subscribe the relay to the bus and spawn its dispatch loop.
    ///
    /// The subscription is established before this returns, so messages
    /// published afterwards are guaranteed to be observed.
    pub async fn start_relay(&self) -> Result<tokio::task::JoinHandle<Result<()>>> {
        let mut subscription = self.state.cache.subscribe(&ALL_CHANNELS).await?;
        info!(channels = ?ALL_CHANNELS, "bus relay started");

        let registry = self.state.registry.clone();
        Ok(tokio::spawn(async move {
            while let Some(message) = subscription.recv().await {
                relay_message(&registry, &message);
            }
            Err(EngineError::CacheUnavailable(
                "bus subscription ended".to_string(),
            ))
        }))
    }

    /// Consume the bus and dispatch into session queues. Returns only on
    /// bus loss, which is fatal for this server.
    pub async fn run_relay(&self) -> Result<()> {
        let handle = self.start_relay().await?;
        match handle.await {
            Ok(result) => result,
            Err(e) => Err(EngineError::CacheUnavailable(format!("relay task: {e}"))),
        }
    }
}

async fn ws_handler(State(state): State<FanoutState>, ws: WebSocketUpgrade) -> Response {
    if state.registry.active_sessions() >= state.config.fanout_max_clients {
        warn!(
            max_clients = state.config.fanout_max_clients,
            "connection rejected at capacity"
        );
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "capacity",
                "max_clients": state.config.fanout_max_clients,
            })),
        )
            .into_response();
    }
    ws.on_upgrade(move |socket| session::handle_socket(socket, state))
}

async fn health(State(state): State<FanoutState>) -> Json<Value> {
    let stats = state.registry.stats();
    Json(json!({
        "status": "healthy",
        "service": "fxpulse-fanout",
        "active_clients": stats.active_sessions,
        "max_clients": state.config.fanout_max_clients,
        "timestamp": Utc::now(),
    }))
}

/// Route one bus message to the sessions that should observe it.
fn relay_message(registry: &SessionRegistry, message: &BusMessage) {
    let payload: Value = match serde_json::from_str(&message.payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(channel = %message.channel, error = %e, "undecodable bus payload dropped");
            return;
        }
    };

    match message.channel.as_str() {
        CHANNEL_PRICES => {
            let Some(instrument) = payload.get("instrument").and_then(Value::as_str) else {
                warn!("price update without instrument dropped");
                return;
            };
            let text = envelope(events::PRICE_UPDATE, &payload);
            for queue in registry.instrument_targets(instrument) {
                queue.push_text(text.clone(), true);
            }
        }
        CHANNEL_VOLATILITY_ALERTS => {
            let Some(instrument) = payload.get("instrument").and_then(Value::as_str) else {
                warn!("volatility alert without instrument dropped");
                return;
            };
            let text = envelope(events::VOLATILITY_ALERT, &payload);
            for queue in registry.instrument_targets(instrument) {
                queue.push_text(text.clone(), false);
            }
        }
        CHANNEL_CORRELATION_ALERTS => {
            let pair1 = payload.get("pair1").and_then(Value::as_str);
            let pair2 = payload.get("pair2").and_then(Value::as_str);
            let (Some(pair1), Some(pair2)) = (pair1, pair2) else {
                warn!("correlation alert without pair legs dropped");
                return;
            };
            let text = envelope(events::CORRELATION_ALERT, &payload);
            for queue in registry.pair_targets(pair1, pair2) {
                queue.push_text(text.clone(), false);
            }
        }
        CHANNEL_DATA_READY => {
            let text = envelope(events::DATA_READY, &payload);
            for queue in registry.all_targets() {
                queue.push_text(text.clone(), false);
            }
        }
        other => {
            debug!(channel = other, "message on unknown channel ignored");
        }
    }
}
