//! Integration tests for the fan-out server over real websocket sessions.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use fxpulse::cache::{
    keys, Cache, MemoryCache, CHANNEL_CORRELATION_ALERTS, CHANNEL_DATA_READY, CHANNEL_PRICES,
    CHANNEL_VOLATILITY_ALERTS,
};

use crate::test_utils::{
    expect_silence, next_event, send_event, spawn_fanout, test_config, ws_connect,
};

const TRACKED: [&str; 2] = ["EUR_USD", "GBP_USD"];

async fn setup() -> (std::net::SocketAddr, Arc<MemoryCache>) {
    let cache = Arc::new(MemoryCache::new());
    let addr = spawn_fanout(Arc::new(test_config(&TRACKED)), cache.clone()).await;
    (addr, cache)
}

fn price_update_payload(instrument: &str) -> String {
    json!({
        "instrument": instrument,
        "price": {
            "bid": "1.29995", "ask": "1.30005", "mid": "1.30000",
            "time": "2024-06-01T10:00:00Z"
        },
        "timestamp": "2024-06-01T10:00:01Z"
    })
    .to_string()
}

#[tokio::test]
async fn handshake_returns_client_id_and_universe() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;

    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "connection_established");
    assert!(!data["client_id"].as_str().unwrap().is_empty());
    assert_eq!(data["pair_count"], 2);
    assert_eq!(data["tracked_pairs"][0], "EUR_USD");
}

#[tokio::test]
async fn price_updates_are_filtered_by_room_and_data_ready_reaches_everyone() {
    let (addr, cache) = setup().await;

    let mut a = ws_connect(addr).await;
    next_event(&mut a).await; // welcome
    send_event(&mut a, "subscribe", json!({ "pairs": ["EUR_USD"] })).await;
    let (event, _) = next_event(&mut a).await;
    assert_eq!(event, "subscription_confirmed");

    let mut b = ws_connect(addr).await;
    next_event(&mut b).await;
    send_event(&mut b, "subscribe", json!({ "pairs": "*" })).await;
    let (event, data) = next_event(&mut b).await;
    assert_eq!(event, "subscription_confirmed");
    assert_eq!(data["subscribed_to_all"], true);

    cache
        .publish(CHANNEL_PRICES, &price_update_payload("GBP_USD"))
        .await
        .unwrap();
    cache
        .publish(
            CHANNEL_DATA_READY,
            &json!({ "data_type": "prices", "count": 1, "timestamp": "2024-06-01T10:00:02Z" })
                .to_string(),
        )
        .await
        .unwrap();

    // B observes the GBP update then the broadcast.
    let (event, data) = next_event(&mut b).await;
    assert_eq!(event, "price_update");
    assert_eq!(data["instrument"], "GBP_USD");
    let (event, _) = next_event(&mut b).await;
    assert_eq!(event, "data_ready");

    // A skipped the GBP update entirely; its next frame is the broadcast.
    let (event, _) = next_event(&mut a).await;
    assert_eq!(event, "data_ready");
}

#[tokio::test]
async fn invalid_subscription_changes_nothing() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;

    send_event(&mut ws, "subscribe", json!({ "pairs": ["EUR_USD", "DOGE_MOON"] })).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "subscription_error");
    assert!(data["error"].as_str().unwrap().contains("DOGE_MOON"));

    send_event(&mut ws, "get_subscriptions", json!({})).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "subscriptions_info");
    assert_eq!(data["pair_count"], 0);
}

#[tokio::test]
async fn subscriptions_track_subscribe_and_unsubscribe() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;

    send_event(&mut ws, "subscribe", json!({ "pairs": ["EUR_USD", "GBP_USD"] })).await;
    next_event(&mut ws).await;
    send_event(&mut ws, "unsubscribe", json!({ "pairs": ["EUR_USD"] })).await;
    let (event, _) = next_event(&mut ws).await;
    assert_eq!(event, "unsubscription_confirmed");

    send_event(&mut ws, "get_subscriptions", json!({})).await;
    let (_, data) = next_event(&mut ws).await;
    assert_eq!(data["subscribed_pairs"], json!(["GBP_USD"]));
    assert_eq!(data["subscribed_to_all"], false);
}

#[tokio::test]
async fn point_queries_read_the_cache() {
    let (addr, cache) = setup().await;
    cache
        .put(
            &keys::prices("EUR_USD"),
            &json!({
                "bid": "1.08940", "ask": "1.08950", "mid": "1.08945",
                "time": "2024-06-01T10:00:00Z"
            })
            .to_string(),
            Duration::from_secs(300),
        )
        .await
        .unwrap();

    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;

    send_event(&mut ws, "request_price", json!({ "instrument": "EUR_USD" })).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "price_response");
    assert_eq!(data["instrument"], "EUR_USD");
    assert_eq!(data["price"]["mid"], "1.08945");

    // Cache miss is a not-found reply, not an error frame-less hang.
    send_event(&mut ws, "request_price", json!({ "instrument": "GBP_USD" })).await;
    let (event, _) = next_event(&mut ws).await;
    assert_eq!(event, "price_error");

    // Unknown instruments never reach the cache.
    send_event(&mut ws, "request_price", json!({ "instrument": "DOGE_MOON" })).await;
    let (event, _) = next_event(&mut ws).await;
    assert_eq!(event, "price_error");

    send_event(&mut ws, "request_all_prices", json!({})).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "all_prices_response");
    assert_eq!(data["pair_count"], 1);
    assert!(data["prices"]["EUR_USD"].is_object());
}

#[tokio::test]
async fn ping_gets_a_pong_with_server_time() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;

    send_event(&mut ws, "ping", json!({})).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "pong");
    assert!(data["timestamp"].as_str().is_some());
}

#[tokio::test]
async fn server_stats_count_sessions_and_subscriptions() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;
    send_event(&mut ws, "subscribe", json!({ "pairs": ["EUR_USD", "GBP_USD"] })).await;
    next_event(&mut ws).await;

    send_event(&mut ws, "get_server_stats", json!({})).await;
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "server_stats");
    assert_eq!(data["active_clients"], 1);
    assert_eq!(data["total_subscriptions"], 2);
    assert_eq!(data["tracked_pairs"], 2);
}

#[tokio::test]
async fn alerts_route_to_subscribers_of_either_leg() {
    let (addr, cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;
    send_event(&mut ws, "subscribe", json!({ "pairs": ["GBP_USD"] })).await;
    next_event(&mut ws).await;

    cache
        .publish(
            CHANNEL_CORRELATION_ALERTS,
            &json!({
                "pair1": "EUR_USD", "pair2": "GBP_USD",
                "correlation": "0.95", "threshold": "0.7",
                "severity": "critical", "message": "strongly correlated",
                "timestamp": "2024-06-01T10:00:00Z"
            })
            .to_string(),
        )
        .await
        .unwrap();

    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "correlation_alert");
    assert_eq!(data["pair2"], "GBP_USD");
}

#[tokio::test]
async fn volatility_alerts_respect_rooms() {
    let (addr, cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;
    send_event(&mut ws, "subscribe", json!({ "pairs": ["EUR_USD"] })).await;
    next_event(&mut ws).await;

    // An alert for an unsubscribed instrument stays silent.
    cache
        .publish(
            CHANNEL_VOLATILITY_ALERTS,
            &json!({
                "instrument": "GBP_USD", "volatility": "2.45", "threshold": "2.0",
                "severity": "warning", "message": "volatility spike",
                "timestamp": "2024-06-01T10:00:00Z"
            })
            .to_string(),
        )
        .await
        .unwrap();
    expect_silence(&mut ws, Duration::from_millis(300)).await;

    cache
        .publish(
            CHANNEL_VOLATILITY_ALERTS,
            &json!({
                "instrument": "EUR_USD", "volatility": "2.45", "threshold": "2.0",
                "severity": "warning", "message": "volatility spike",
                "timestamp": "2024-06-01T10:00:00Z"
            })
            .to_string(),
        )
        .await
        .unwrap();
    let (event, data) = next_event(&mut ws).await;
    assert_eq!(event, "volatility_alert");
    assert_eq!(data["instrument"], "EUR_USD");
    assert_eq!(data["severity"], "warning");
}

#[tokio::test]
async fn sessions_beyond_capacity_are_rejected() {
    let cache = Arc::new(MemoryCache::new());
    let mut config = test_config(&TRACKED);
    config.fanout_max_clients = 1;
    let addr = spawn_fanout(Arc::new(config), cache).await;

    let mut first = ws_connect(addr).await;
    next_event(&mut first).await;

    // The handshake itself is refused with a capacity reason.
    let second = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
    assert!(second.is_err());
}

#[tokio::test]
async fn health_endpoint_reports_session_counts() {
    let (addr, _cache) = setup().await;
    let mut ws = ws_connect(addr).await;
    next_event(&mut ws).await;

    let body: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_clients"], 1);
}
