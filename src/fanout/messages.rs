//! Wire format of the fan-out session channel.
//!
//! Every frame in either direction is `{"event": <name>, "data": <object>}`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::PriceQuote;

/// Outbound event names.
pub mod events {
    pub const CONNECTION_ESTABLISHED: &str = "connection_established";
    pub const SUBSCRIPTION_CONFIRMED: &str = "subscription_confirmed";
    pub const UNSUBSCRIPTION_CONFIRMED: &str = "unsubscription_confirmed";
    pub const SUBSCRIPTION_ERROR: &str = "subscription_error";
    pub const SUBSCRIPTIONS_INFO: &str = "subscriptions_info";
    pub const PRICE_RESPONSE: &str = "price_response";
    pub const PRICE_ERROR: &str = "price_error";
    pub const ALL_PRICES_RESPONSE: &str = "all_prices_response";
    pub const SERVER_STATS: &str = "server_stats";
    pub const PONG: &str = "pong";

    // Bus relays.
    pub const PRICE_UPDATE: &str = "price_update";
    pub const VOLATILITY_ALERT: &str = "volatility_alert";
    pub const CORRELATION_ALERT: &str = "correlation_alert";
    pub const DATA_READY: &str = "data_ready";
}

/// Inbound frame before event-specific parsing.
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// The `pairs` field of subscribe/unsubscribe: a list or the wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairSelection {
    All,
    Pairs(Vec<String>),
}

impl PairSelection {
    pub fn parse(data: &Value) -> Option<PairSelection> {
        match data.get("pairs")? {
            Value::String(s) if s == "*" => Some(PairSelection::All),
            Value::Array(items) => {
                let pairs: Option<Vec<String>> = items
                    .iter()
                    .map(|v| v.as_str().map(str::to_string))
                    .collect();
                pairs.map(PairSelection::Pairs)
            }
            _ => None,
        }
    }
}

/// Serialize an outbound frame.
pub fn envelope<T: Serialize>(event: &str, data: &T) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

#[derive(Debug, Serialize)]
pub struct ConnectionEstablished {
    pub message: String,
    pub client_id: String,
    pub tracked_pairs: Vec<String>,
    pub pair_count: usize,
    pub max_clients: usize,
    pub active_clients: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionConfirmed {
    pub pairs: Vec<String>,
    pub pair_count: usize,
    pub subscribed_to_all: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UnsubscriptionConfirmed {
    pub pairs: Vec<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionError {
    pub error: String,
    pub valid_pairs: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionsInfo {
    pub subscribed_pairs: Vec<String>,
    pub pair_count: usize,
    pub subscribed_to_all: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PriceResponse {
    pub instrument: String,
    pub price: PriceQuote,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PriceError {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct AllPricesResponse {
    pub prices: BTreeMap<String, PriceQuote>,
    pub pair_count: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ServerStats {
    pub active_clients: usize,
    pub max_clients: usize,
    pub total_subscriptions: usize,
    pub average_subs_per_client: f64,
    pub tracked_pairs: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct Pong {
    pub timestamp: DateTime<Utc>,
}
