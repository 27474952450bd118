//! Recovery of lost notifications, resume and retention.

use std::time::Duration;

use chrono::{TimeDelta, Utc};
use relay_core::traits::MembershipStore;
use relay_realtime::message::types::OutboundFrame;

use crate::helpers::{self, Cluster};

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_reconciliation_delivers_after_lost_notifications() {
    let cluster = Cluster::start(2);
    let alice = helpers::subscribed(cluster.node(1), "alice", "room-1").await;
    let bob = cluster.node(0).connections.open("bob").unwrap();

    cluster.bus.set_dropping(true);
    for i in 1..=3 {
        helpers::publish(cluster.node(0), &bob, "room-1", &format!("m{i}")).await;
    }
    assert_eq!(cluster.bus.dropped(), 3);

    let received = helpers::collect_messages(&alice, "room-1", 3, WAIT).await;
    assert_eq!(
        received,
        vec![
            (1, "m1".to_string()),
            (2, "m2".to_string()),
            (3, "m3".to_string()),
        ]
    );
    assert!(cluster.node(1).metrics.snapshot().messages_replayed >= 3);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_bus_reconnect_triggers_catch_up() {
    let mut config = helpers::test_config();
    config.broadcast.reconcile_interval_ms = 60_000;
    let cluster = Cluster::start_with(2, config);
    let alice = helpers::subscribed(cluster.node(1), "alice", "room-1").await;
    let bob = cluster.node(0).connections.open("bob").unwrap();

    cluster.bus.set_dropping(true);
    helpers::publish(cluster.node(0), &bob, "room-1", "missed").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(helpers::messages(&helpers::drain(&alice), "room-1").is_empty());
    assert_eq!(cluster.node(1).metrics.snapshot().messages_replayed, 0);

    cluster.bus.set_dropping(false);
    cluster.bus.announce_reconnect();

    let received = helpers::collect_messages(&alice, "room-1", 1, WAIT).await;
    assert_eq!(received, vec![(1, "missed".to_string())]);
    assert_eq!(cluster.node(1).metrics.snapshot().bus_reconnects, 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_resume_replays_only_missed_messages() {
    let cluster = Cluster::start(2);
    let bob = cluster.node(0).connections.open("bob").unwrap();
    for i in 1..=5 {
        helpers::publish(cluster.node(0), &bob, "room-1", &format!("m{i}")).await;
    }

    let alice = cluster.node(1).connections.open("alice").unwrap();
    helpers::send(
        cluster.node(1),
        &alice,
        r#"{"type":"SUBSCRIBE","topic":"room-1","sequence":2}"#,
    )
    .await;

    let frames = helpers::drain(&alice);
    assert!(
        frames.iter().any(|f| matches!(
            f,
            OutboundFrame::Subscribed { topic, sequence: 5 } if topic == "room-1"
        )),
        "{frames:?}"
    );
    let sequences: Vec<u64> = helpers::messages(&frames, "room-1")
        .into_iter()
        .map(|(seq, _)| seq)
        .collect();
    assert_eq!(sequences, vec![3, 4, 5]);

    helpers::publish(cluster.node(0), &bob, "room-1", "m6").await;
    let received = helpers::collect_messages(&alice, "room-1", 1, WAIT).await;
    assert_eq!(received, vec![(6, "m6".to_string())]);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_resume_past_retention_reports_expired_messages() {
    let mut config = helpers::test_config();
    config.outbox.retention_seconds = 0;
    let cluster = Cluster::start_with(2, config);
    let bob = cluster.node(0).connections.open("bob").unwrap();
    for i in 1..=3 {
        helpers::publish(cluster.node(0), &bob, "archive", &format!("m{i}")).await;
    }

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(cluster.node(0).reconciler.evict().await, 3);
    assert_eq!(cluster.store.retained("archive"), 0);

    let alice = cluster.node(1).connections.open("alice").unwrap();
    helpers::send(
        cluster.node(1),
        &alice,
        r#"{"type":"SUBSCRIBE","topic":"archive","sequence":0}"#,
    )
    .await;

    let frames = helpers::drain(&alice);
    assert!(
        frames
            .iter()
            .any(|f| matches!(f, OutboundFrame::Error { code, .. } if code == "MESSAGES_EXPIRED")),
        "{frames:?}"
    );
    let status = cluster.node(1).status();
    assert!(!status.retention_gap);
    assert_eq!(status.metrics.resume_gaps, 3);
    assert!(!alice.is_closed());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_membership_and_watermarks_are_recorded() {
    let cluster = Cluster::start(2);
    let alice = helpers::subscribed(cluster.node(0), "alice", "room-1").await;
    helpers::publish(cluster.node(0), &alice, "room-1", "m1").await;

    let report = cluster.node(0).reconciler.pass().await;
    assert!(report.store_reachable);
    assert_eq!(report.suspected_partitions, 0);

    let live = cluster
        .store
        .live_nodes(Utc::now() - TimeDelta::seconds(60))
        .await
        .unwrap();
    assert!(live.iter().any(|m| m.node_id.as_str() == "node-0"));

    cluster.shutdown().await;
}
