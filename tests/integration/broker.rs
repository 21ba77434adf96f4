//! Integration tests for the broker client against a mock server.

use rust_decimal_macros::dec;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fxpulse::error::EngineError;
use fxpulse::models::Granularity;

use crate::test_utils::{broker_candle, broker_response, hour, mount_candles, test_broker};

#[tokio::test]
async fn fetch_parses_decimal_strings_and_flags() {
    let server = MockServer::start().await;
    let body = broker_response(
        "EUR_USD",
        vec![
            broker_candle(hour(10), 1.10000, true),
            broker_candle(hour(11), 1.10050, false),
        ],
    );
    mount_candles(&server, "EUR_USD", body).await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let fetched = client
        .fetch_candles("EUR_USD", Granularity::H1, 2, "MBA")
        .await
        .unwrap();

    assert_eq!(fetched.len(), 2);
    assert!(fetched[0].complete);
    assert!(!fetched[1].complete);
    assert_eq!(fetched[0].candle.mid.close, dec!(1.10000));
    assert_eq!(fetched[0].candle.bid.close, dec!(1.09995));
    assert_eq!(fetched[0].candle.ask.close, dec!(1.10005));
    assert_eq!(fetched[0].candle.time, hour(10));
}

#[tokio::test]
async fn auth_failure_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let err = client
        .fetch_candles("EUR_USD", Granularity::H1, 2, "MBA")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BrokerAuth { status: 401 }));
}

#[tokio::test]
async fn bad_request_does_not_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let err = client
        .fetch_candles("EUR_USD", Granularity::H1, 2, "MBA")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BrokerBadRequest(_)));
}

#[tokio::test]
async fn rate_limit_retries_after_the_hint() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_candles(
        &server,
        "EUR_USD",
        broker_response("EUR_USD", vec![broker_candle(hour(10), 1.1, true)]),
    )
    .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let fetched = client
        .fetch_candles("EUR_USD", Granularity::H1, 1, "MBA")
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
}

#[tokio::test]
async fn server_errors_retry_with_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_candles(
        &server,
        "EUR_USD",
        broker_response("EUR_USD", vec![broker_candle(hour(10), 1.1, true)]),
    )
    .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let fetched = client
        .fetch_candles("EUR_USD", Granularity::H1, 1, "MBA")
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert!(server.received_requests().await.unwrap().len() >= 2);
}

#[tokio::test]
async fn malformed_body_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let err = client
        .fetch_candles("EUR_USD", Granularity::H1, 2, "MBA")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BrokerParse(_)));
}

#[tokio::test]
async fn untracked_instrument_is_rejected_before_any_request() {
    let server = MockServer::start().await;
    let client = test_broker(&server.uri(), &["EUR_USD"]);

    let err = client
        .fetch_candles("GBP_USD", Granularity::H1, 2, "MBA")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BrokerBadRequest(_)));
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_price_components_are_rejected() {
    let server = MockServer::start().await;
    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let err = client
        .fetch_candles("EUR_USD", Granularity::H1, 2, "XYZ")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::BrokerBadRequest(_)));
}

#[tokio::test]
async fn count_is_clamped_to_the_broker_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v3/instruments/EUR_USD/candles"))
        .and(query_param("count", "5000"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(broker_response("EUR_USD", Vec::new())),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = test_broker(&server.uri(), &["EUR_USD"]);
    let fetched = client
        .fetch_candles("EUR_USD", Granularity::H1, 9000, "MBA")
        .await
        .unwrap();
    assert!(fetched.is_empty());
}
