//! Integration tests for reconnect policy outcomes
//!
//! Exhaustion, user abort while reconnecting, stop while reconnecting and
//! authentication failure.

mod common;

use common::{init_tracing, run_client, refused_url, Client, ServerFixture};
use msglink::error::condition;
use msglink::{ConnectionOptions, ConnectionState, ListenerOptions, ReconnectConfig};
use std::time::Duration;

fn fast_policy() -> ReconnectConfig {
    ReconnectConfig::with_delays(Duration::from_millis(1), Duration::from_millis(20))
}

fn plain_server() -> ListenerOptions {
    ListenerOptions::new()
        .sasl_mechanisms("PLAIN")
        .credential("user", "secret")
}

#[tokio::test]
async fn test_refused_without_reconnect() {
    init_tracing();
    let client = run_client(Client::to_url(refused_url())).await;
    let counts = &client.counts;

    assert_eq!(counts.start, 1);
    assert_eq!(counts.open, 0);
    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 1);
    assert_eq!(counts.errors[0].name, condition::TRANSPORT_IO);
    assert_eq!(counts.transport_close, 1);
}

#[tokio::test]
async fn test_attempts_exhausted() {
    init_tracing();
    let client = run_client(
        Client::to_url(refused_url()).reconnect(fast_policy().max_attempts(Some(2))),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.reconnecting, 2);
    assert_eq!(counts.transport_error, 1);
    assert_eq!(counts.errors[0].name, condition::RECONNECT_EXHAUSTED);
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.final_attempts, Some(2));
    assert_eq!(counts.final_state, Some(ConnectionState::Failed));
}

#[tokio::test]
async fn test_zero_max_attempts_fails_on_first_error() {
    init_tracing();
    let client = run_client(
        Client::to_url(refused_url()).reconnect(fast_policy().max_attempts(Some(0))),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 1);
    assert_eq!(counts.errors[0].name, condition::RECONNECT_EXHAUSTED);
    assert_eq!(counts.transport_close, 1);
}

#[tokio::test]
async fn test_stop_while_reconnecting() {
    init_tracing();
    let client = run_client(
        Client::to_url(refused_url())
            .reconnect(fast_policy())
            .stop_after(Duration::from_millis(300)),
    )
    .await;
    let counts = &client.counts;

    assert!(counts.reconnecting >= 1, "reconnecting {}", counts.reconnecting);
    assert_eq!(counts.open, 0);
    assert_eq!(counts.transport_error, 0);
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.close, 0);
}

#[tokio::test]
async fn test_close_while_reconnecting_abandons_reconnect() {
    init_tracing();
    let client = run_client(
        Client::to_servers(vec![ServerFixture::new(0)])
            .reconnect(ReconnectConfig::default())
            .close_on_reconnecting(),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.open, 1);
    assert_eq!(counts.reconnecting, 1);
    assert_eq!(counts.close, 0);
    assert_eq!(counts.transport_error, 0);
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.final_state, Some(ConnectionState::Failed));
}

#[tokio::test]
async fn test_close_from_timer_during_backoff_abandons_reconnect() {
    init_tracing();
    let slow = ReconnectConfig::with_delays(Duration::from_millis(500), Duration::from_secs(1));
    let client = run_client(
        Client::to_url(refused_url())
            .reconnect(slow)
            .close_after(Duration::from_millis(100)),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.reconnecting, 1);
    assert_eq!(counts.close, 0);
    assert_eq!(counts.transport_error, 0);
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.final_state, Some(ConnectionState::Failed));
    assert_eq!(counts.final_attempts, Some(0));
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    init_tracing();
    let client = run_client(
        Client::to_servers(vec![ServerFixture::new(0)])
            .options(ConnectionOptions::new().sasl_allowed_mechs("PLAIN"))
            .reconnect(fast_policy()),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.open, 0);
    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 1);
    assert!(counts.errors[0].is_auth(), "error {}", counts.errors[0]);
    assert_eq!(counts.transport_close, 1);
}

#[tokio::test]
async fn test_plain_credentials_checked_by_server() {
    init_tracing();
    let client = run_client(
        Client::to_servers(vec![ServerFixture::new(0)])
            .server_options(plain_server())
            .options(
                ConnectionOptions::new()
                    .sasl_allowed_mechs("PLAIN")
                    .user("user")
                    .password("wrong"),
            )
            .reconnect(fast_policy()),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.open, 0);
    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 1);
    assert_eq!(counts.errors[0].name, condition::UNAUTHORIZED_ACCESS);
    assert_eq!(counts.transport_close, 1);
}

#[tokio::test]
async fn test_plain_credentials_accepted() {
    init_tracing();
    let client = run_client(
        Client::to_servers(vec![ServerFixture::new(100)])
            .server_options(plain_server())
            .options(
                ConnectionOptions::new()
                    .sasl_allowed_mechs("PLAIN")
                    .user("user")
                    .password("secret"),
            )
            .send_one(),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.open, 1);
    assert_eq!(counts.accepted, 1);
    assert_eq!(counts.transport_error, 0);
    assert_eq!(counts.close, 1);
    assert_eq!(counts.transport_close, 1);
}
