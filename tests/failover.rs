//! Integration tests for failover across several servers
//!
//! Three local servers: the first closes as soon as the connection opens,
//! the second after one message, the third accepts everything.

mod common;

use common::{init_tracing, run_client, Client, ServerFixture};
use msglink::{ConnectionState, ReconnectConfig};

fn three_servers() -> Vec<ServerFixture> {
    vec![
        ServerFixture::new(0),
        ServerFixture::new(1),
        ServerFixture::new(100),
    ]
}

#[tokio::test]
async fn test_failover_through_three_servers() {
    init_tracing();
    let client = run_client(
        Client::to_servers(three_servers())
            .reconnect(ReconnectConfig::default())
            .send_one(),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.start, 1);
    assert_eq!(counts.open, 3);
    assert!(counts.reconnecting >= 2, "reconnecting {}", counts.reconnecting);
    assert_eq!(counts.accepted, 1);
    assert_eq!(counts.transport_error, 0, "errors {:?}", counts.errors);
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.close, 1);
    assert_eq!(counts.final_state, Some(ConnectionState::Closed));
}

#[tokio::test]
async fn test_sender_reopens_on_each_reconnect() {
    init_tracing();
    let client = run_client(
        Client::to_servers(three_servers())
            .reconnect(ReconnectConfig::default())
            .send_one(),
    )
    .await;
    let counts = &client.counts;

    // The first server closes before answering the attach; the other two
    // re-attach the replayed sender on a reconnected connection
    assert_eq!(counts.sender_open, 2);
    assert_eq!(counts.sender_reconnected, vec![true, true]);
}

#[tokio::test]
async fn test_reconnected_flag_and_endpoint_rotation() {
    init_tracing();
    let client = run_client(
        Client::to_servers(three_servers())
            .reconnect(ReconnectConfig::default())
            .send_one(),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.reconnected, vec![false, true, true]);
    assert_eq!(counts.open_ports.len(), 3);
    let mut distinct = counts.open_ports.clone();
    distinct.dedup();
    assert_eq!(
        distinct.len(),
        3,
        "each open used the next endpoint: {:?}",
        counts.open_ports
    );
    assert_eq!(counts.final_attempts, Some(0));
}

#[tokio::test]
async fn test_forced_close_without_reconnect_is_terminal() {
    init_tracing();
    let client = run_client(Client::to_servers(vec![ServerFixture::new(0)]).send_one()).await;
    let counts = &client.counts;

    assert_eq!(counts.open, 1);
    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 1);
    assert_eq!(
        counts.errors[0].name,
        msglink::error::condition::CONNECTION_FORCED
    );
    assert_eq!(counts.errors[0].description, "Failover testing");
    assert_eq!(counts.transport_close, 1);
    assert_eq!(counts.close, 0);
    assert_eq!(counts.final_state, Some(ConnectionState::Failed));
}

#[tokio::test]
async fn test_clean_peer_close_is_not_retried() {
    init_tracing();
    let client = run_client(
        Client::to_servers(vec![ServerFixture::new(0).clean_close()])
            .reconnect(ReconnectConfig::default()),
    )
    .await;
    let counts = &client.counts;

    assert_eq!(counts.open, 1);
    assert_eq!(counts.reconnecting, 0);
    assert_eq!(counts.transport_error, 0);
    assert_eq!(counts.close, 1);
    assert_eq!(counts.transport_close, 1);
}
