//! Shared helpers for the integration suites.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fxpulse::cache::{BusMessage, BusSubscription, Cache};
use fxpulse::config::{BrokerEnv, Config};
use fxpulse::fanout::FanoutServer;
use fxpulse::models::{Candle, Granularity, Ohlc};
use fxpulse::services::broker::BrokerClient;

pub const TEST_TOKEN: &str = "test-token";

pub fn test_config(tracked: &[&str]) -> Config {
    Config {
        broker_token: TEST_TOKEN.to_string(),
        broker_env: BrokerEnv::Practice,
        broker_timeout: Duration::from_secs(5),
        tracked_pairs: tracked.iter().map(|s| s.to_string()).collect(),
        correlation_threshold: 0.7,
        correlation_window: 100,
        volatility_threshold: 2.0,
        cache_ttl_prices: Duration::from_secs(300),
        cache_ttl_metrics: Duration::from_secs(3600),
        cache_ttl_correlation: Duration::from_secs(86_400),
        rate_limit_requests: 100,
        rate_limit_window: Duration::from_secs(60),
        fanout_max_clients: 100,
        fanout_ping_interval: Duration::from_secs(60),
        fanout_ping_timeout: Duration::from_secs(5),
        fanout_bind: "127.0.0.1:0".to_string(),
        hourly_enabled: true,
        daily_enabled: true,
        fetch_concurrency: 1,
        data_retention_days: 365,
        store_dsn: String::new(),
        cache_addr: String::new(),
        environment: "test".to_string(),
    }
}

pub fn test_broker(base_url: &str, tracked: &[&str]) -> BrokerClient {
    BrokerClient::new(
        base_url,
        TEST_TOKEN,
        Duration::from_secs(5),
        tracked.iter().map(|s| s.to_string()).collect(),
        100,
        Duration::from_secs(60),
    )
    .unwrap()
}

/// An hour on the fixed test day.
pub fn hour(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(n)
}

/// A coherent candle with a flat spread around `close`.
pub fn seeded_candle(instrument: &str, time: DateTime<Utc>, close: f64) -> Candle {
    let close = Decimal::from_f64(close).unwrap().round_dp(5);
    let spread = Decimal::new(5, 5); // 0.00005
    let side = |offset: Decimal| Ohlc {
        open: close + offset,
        high: close + offset + spread,
        low: close + offset - spread,
        close: close + offset,
    };
    Candle {
        instrument: instrument.to_string(),
        time,
        granularity: Granularity::H1,
        bid: side(-spread),
        ask: side(spread),
        mid: side(Decimal::ZERO),
        volume: 1000,
    }
}

fn price_string(value: f64) -> String {
    format!("{value:.5}")
}

/// One broker-shaped candle record with flat OHLC around `close`.
pub fn broker_candle(time: DateTime<Utc>, close: f64, complete: bool) -> Value {
    let flat = |value: f64| {
        json!({
            "o": price_string(value),
            "h": price_string(value),
            "l": price_string(value),
            "c": price_string(value),
        })
    };
    json!({
        "time": time.to_rfc3339_opts(SecondsFormat::Nanos, true),
        "complete": complete,
        "bid": flat(close - 0.00005),
        "ask": flat(close + 0.00005),
        "mid": flat(close),
        "volume": 1200,
    })
}

pub fn broker_response(instrument: &str, candles: Vec<Value>) -> Value {
    json!({
        "instrument": instrument,
        "granularity": "H1",
        "candles": candles,
    })
}

/// Mount the candle endpoint for one instrument.
pub async fn mount_candles(server: &MockServer, instrument: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(format!("/v3/instruments/{instrument}/candles")))
        .and(header("Authorization", format!("Bearer {TEST_TOKEN}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub async fn mount_status(server: &MockServer, instrument: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/v3/instruments/{instrument}/candles")))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// Collect everything a subscription yields until it stays quiet.
pub async fn drain(sub: &mut BusSubscription) -> Vec<BusMessage> {
    let mut messages = Vec::new();
    while let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(300), sub.recv()).await {
        messages.push(msg);
    }
    messages
}

pub type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bind a fan-out server on an ephemeral port with its relay running.
pub async fn spawn_fanout(config: Arc<Config>, cache: Arc<dyn Cache>) -> SocketAddr {
    let server = FanoutServer::new(cache, config);
    let router = server.router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // The relay subscription is live once start_relay returns; the loop
    // task it spawned keeps running after the handle is dropped.
    let _relay = server.start_relay().await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    addr
}

pub async fn ws_connect(addr: SocketAddr) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    ws
}

/// Next `{event, data}` frame, skipping control frames.
pub async fn next_event(ws: &mut WsClient) -> (String, Value) {
    let deadline = Duration::from_secs(3);
    loop {
        let frame = tokio::time::timeout(deadline, ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = frame {
            let value: Value = serde_json::from_str(&text).unwrap();
            let event = value["event"].as_str().unwrap().to_string();
            return (event, value["data"].clone());
        }
    }
}

/// Assert that no text frame arrives within the window.
pub async fn expect_silence(ws: &mut WsClient, window: Duration) {
    let result = tokio::time::timeout(window, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break text,
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => panic!("socket closed while expecting silence"),
            }
        }
    })
    .await;
    if let Ok(text) = result {
        panic!("expected silence, received: {text}");
    }
}

pub async fn send_event(ws: &mut WsClient, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    ws.send(Message::Text(frame)).await.unwrap();
}
