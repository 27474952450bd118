//! Slow consumers under both overflow policies.

use relay_core::config::OverflowPolicy;
use relay_realtime::connection::close;
use relay_realtime::message::types::OutboundFrame;

use crate::helpers::{self, Cluster};

fn cluster(policy: OverflowPolicy) -> Cluster {
    let mut config = helpers::test_config();
    config.realtime.queue_capacity = 4;
    config.realtime.overflow_policy = policy;
    Cluster::start_with(1, config)
}

#[tokio::test]
async fn test_drop_oldest_keeps_the_newest_messages() {
    let cluster = cluster(OverflowPolicy::DropOldest);
    let node = cluster.node(0);
    let slow = helpers::subscribed(node, "slow", "room-1").await;
    let publisher = node.connections.open("fast").unwrap();

    for i in 1..=10 {
        helpers::publish(node, &publisher, "room-1", &format!("m{i}")).await;
    }

    assert!(!slow.is_closed());
    let frames = helpers::drain(&slow);
    let sequences: Vec<u64> = helpers::messages(&frames, "room-1")
        .into_iter()
        .map(|(seq, _)| seq)
        .collect();
    assert_eq!(sequences, vec![7, 8, 9, 10]);
    assert_eq!(node.metrics.snapshot().messages_dropped, 6);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_policy_closes_only_the_slow_session() {
    let cluster = cluster(OverflowPolicy::Disconnect);
    let node = cluster.node(0);
    let slow = helpers::subscribed(node, "slow", "room-1").await;
    let keeper = helpers::subscribed(node, "keeper", "room-1").await;
    let publisher = node.connections.open("fast").unwrap();

    for i in 1..=6 {
        helpers::publish(node, &publisher, "room-1", &format!("m{i}")).await;
        let kept = helpers::drain(&keeper);
        assert!(kept.iter().all(|f| !matches!(f, OutboundFrame::Error { .. })));
    }

    assert!(slow.is_closed());
    assert_eq!(slow.close_reason().map(|r| r.code), Some(close::SLOW_CONSUMER));
    assert!(!keeper.is_closed());
    assert!(node.connections.session(&slow.id).is_none());
    assert_eq!(node.metrics.snapshot().slow_consumer_disconnects, 1);
    assert_eq!(node.registry.subscriber_count("room-1"), 1);

    cluster.shutdown().await;
}
