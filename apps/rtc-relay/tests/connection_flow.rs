mod support;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::time::{Instant, sleep};

use rtc_relay::connection::{ConnectOptions, Connection};
use rtc_relay::engine::MockEngine;
use rtc_relay::negotiation::UNASSIGNED_ID;
use rtc_relay::poller::{PollState, PollerConfig};
use rtc_relay::signaling::{HttpSignalingClient, IceCandidate, SessionDescription};
use support::{StubRelay, init_tracing};

fn fast_options() -> ConnectOptions {
    ConnectOptions {
        poller: PollerConfig {
            interval: Duration::from_millis(50),
            max_attempts: 3,
        },
        ..ConnectOptions::default()
    }
}

async fn wait_until<F, Fut>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while !condition().await {
        if Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn connection_against(
    relay: &StubRelay,
    options: ConnectOptions,
) -> (Arc<MockEngine>, Connection) {
    let engine = Arc::new(MockEngine::with_offer("offer-sdp"));
    let signaling = Arc::new(
        HttpSignalingClient::new(&relay.base_url, Duration::from_secs(5)).expect("client"),
    );
    let connection = Connection::new(engine.clone(), signaling, options)
        .await
        .expect("connection");
    (engine, connection)
}

#[test_timeout::tokio_timeout_test]
async fn negotiation_over_http_assigns_relay_id() {
    init_tracing();
    let relay = StubRelay::start().await;
    let (engine, connection) = connection_against(&relay, fast_options()).await;
    assert_eq!(connection.id(), UNASSIGNED_ID);

    assert_eq!(connection.begin().await.expect("begin"), 42);
    assert_eq!(connection.id(), 42);
    assert_eq!(
        engine.remote_descriptions(),
        vec![SessionDescription::answer("answer-sdp")]
    );
    assert_eq!(relay.offers().await, vec![json!({ "sdp": "offer-sdp" })]);
    assert!(relay.posted().await.is_empty());

    connection.close().await.expect("close");
}

#[test_timeout::tokio_timeout_test]
async fn local_candidates_reach_relay_scoped_and_in_order() {
    init_tracing();
    let relay = StubRelay::start().await;
    let (engine, connection) = connection_against(&relay, fast_options()).await;

    let early = IceCandidate::new("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host")
        .with_mid("0", 0);
    let late = IceCandidate::new("candidate:2 1 udp 2122260223 10.0.0.2 5000 typ host")
        .with_mid("0", 0);
    engine.discover_candidate(early.clone());
    engine.finish_gathering();
    let conn = &connection;
    wait_until(Duration::from_secs(2), move || async move {
        conn.candidate_stats().pending == 1
    })
    .await;
    assert!(relay.posted().await.is_empty());

    connection.begin().await.expect("begin");
    engine.discover_candidate(late.clone());
    let stub = &relay;
    wait_until(Duration::from_secs(2), move || async move {
        stub.posted().await.len() == 2
    })
    .await;

    let posted = relay.posted().await;
    assert_eq!(posted[0].0.as_deref(), Some("42"));
    assert_eq!(posted[0].1["candidate"], json!(early.candidate));
    assert_eq!(posted[1].0.as_deref(), Some("42"));
    assert_eq!(posted[1].1["candidate"], json!(late.candidate));
    assert_eq!(connection.candidate_stats().ignored, 1);

    connection.close().await.expect("close");
}

#[test_timeout::tokio_timeout_test]
async fn polling_applies_remote_candidates_then_stops() {
    init_tracing();
    let relay = StubRelay::start().await;
    relay.script_fetch(Some(Vec::new())).await;
    relay.script_fetch(None).await;
    relay
        .script_fetch(Some(vec![json!({
            "candidate": "candidate:9 1 udp 1 192.0.2.9 7000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        })]))
        .await;
    let (engine, connection) = connection_against(&relay, fast_options()).await;

    connection.begin().await.expect("begin");
    let (conn, mock) = (&connection, &engine);
    wait_until(Duration::from_secs(2), move || async move {
        conn.poll_state() == PollState::Exhausted && mock.added_candidates().len() == 1
    })
    .await;
    sleep(Duration::from_millis(300)).await;

    assert_eq!(relay.fetch_scopes().await.len(), 3);
    assert_eq!(
        engine.added_candidates()[0].candidate,
        "candidate:9 1 udp 1 192.0.2.9 7000 typ host"
    );
}

#[test_timeout::tokio_timeout_test]
async fn failed_offer_tears_down_polling() {
    init_tracing();
    let relay = StubRelay::start_with(
        support::RelayState {
            offer_failure: Some((axum::http::StatusCode::SERVICE_UNAVAILABLE, "busy".into())),
            ..support::RelayState::default()
        },
        None,
    )
    .await;
    let (_engine, connection) = connection_against(&relay, ConnectOptions::default()).await;

    let err = connection.begin().await.unwrap_err();
    assert!(err.is_negotiation_failure());
    assert!(err.to_string().contains("post offer"));
    assert_eq!(connection.poll_state(), PollState::Stopped);

    sleep(Duration::from_millis(300)).await;
    assert!(relay.fetch_scopes().await.is_empty());
}
