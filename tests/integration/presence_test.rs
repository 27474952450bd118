//! Heartbeats, timeouts and shutdown drain.

use std::time::Duration;

use relay_realtime::connection::close;
use relay_realtime::message::types::OutboundFrame;

use crate::helpers::{self, Cluster};

fn cluster() -> Cluster {
    let mut config = helpers::test_config();
    config.realtime.heartbeat_interval_ms = 50;
    config.realtime.heartbeat_timeout_ms = 200;
    Cluster::start_with(1, config)
}

#[tokio::test]
async fn test_silent_session_times_out() {
    let cluster = cluster();
    let node = cluster.node(0);
    let quiet = helpers::subscribed(node, "quiet", "room-1").await;

    assert!(helpers::eventually(Duration::from_secs(2), || quiet.is_closed()).await);
    assert_eq!(
        quiet.close_reason().map(|r| r.code),
        Some(close::HEARTBEAT_TIMEOUT)
    );
    assert_eq!(node.status().sessions, 0);
    assert!(helpers::eventually(Duration::from_secs(1), || !node.registry.has_topic("room-1")).await);
    assert!(node.metrics.snapshot().heartbeat_timeouts >= 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_answering_pings_keeps_session_alive() {
    let cluster = cluster();
    let node = cluster.node(0);
    let chatty = node.connections.open("chatty").unwrap();

    let mut pinged = false;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        pinged |= helpers::drain(&chatty)
            .iter()
            .any(|f| matches!(f, OutboundFrame::Ping { .. }));
        helpers::send(node, &chatty, r#"{"type":"PONG"}"#).await;
    }

    assert!(pinged);
    assert!(!chatty.is_closed());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_client_ping_is_answered() {
    let cluster = Cluster::start(1);
    let node = cluster.node(0);
    let session = node.connections.open("alice").unwrap();

    helpers::send(node, &session, r#"{"type":"PING"}"#).await;
    assert!(
        helpers::drain(&session)
            .iter()
            .any(|f| matches!(f, OutboundFrame::Pong { .. }))
    );

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_sessions_as_going_away() {
    let cluster = Cluster::start(1);
    let node = cluster.node(0);
    let alice = helpers::subscribed(node, "alice", "room-1").await;

    node.shutdown().await;

    assert!(alice.is_closed());
    assert_eq!(alice.close_reason().map(|r| r.code), Some(close::GOING_AWAY));
    assert!(!node.connections.is_accepting());
    assert!(node.connections.open("late").is_err());
}

#[tokio::test]
async fn test_second_connection_replaces_the_first() {
    let cluster = Cluster::start(1);
    let node = cluster.node(0);
    let first = node.connections.open("alice").unwrap();
    let second = node.connections.open("alice").unwrap();

    assert!(first.is_closed());
    assert_eq!(first.close_reason().map(|r| r.code), Some(close::NORMAL));
    assert!(!second.is_closed());
    assert_eq!(node.status().sessions, 1);

    cluster.shutdown().await;
}
