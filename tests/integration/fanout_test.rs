//! Cross-node fan-out, ordering and degraded mode.

use std::time::Duration;

use relay_realtime::message::types::OutboundFrame;

use crate::helpers::{self, Cluster};

const WAIT: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_message_reaches_subscribers_on_every_node() {
    let cluster = Cluster::start(2);
    let alice = helpers::subscribed(cluster.node(0), "alice", "room-1").await;
    let bob = helpers::subscribed(cluster.node(1), "bob", "room-1").await;

    let sequence = helpers::publish(cluster.node(1), &bob, "room-1", "hello").await;
    assert_eq!(sequence, 1);

    let received = helpers::collect_messages(&alice, "room-1", 1, WAIT).await;
    assert_eq!(received, vec![(1, "hello".to_string())]);
    assert_eq!(cluster.node(0).metrics.snapshot().messages_delivered, 1);

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delivered_message_names_the_publisher() {
    let cluster = Cluster::start(2);
    let alice = helpers::subscribed(cluster.node(0), "alice", "room-1").await;
    let bob = cluster.node(1).connections.open("bob").unwrap();

    helpers::publish(cluster.node(1), &bob, "room-1", "hi").await;

    let mut from = None;
    helpers::eventually(WAIT, || {
        for frame in helpers::drain(&alice) {
            if let OutboundFrame::Message { from: sender, .. } = frame {
                from = sender;
                return true;
            }
        }
        false
    })
    .await;
    assert_eq!(from.as_deref(), Some("bob"));

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_interleaved_publishers_deliver_in_sequence_order() {
    let cluster = Cluster::start(3);
    let watchers = [
        helpers::subscribed(cluster.node(0), "w0", "room-1").await,
        helpers::subscribed(cluster.node(1), "w1", "room-1").await,
        helpers::subscribed(cluster.node(2), "w2", "room-1").await,
    ];
    let publishers = [
        cluster.node(0).connections.open("p0").unwrap(),
        cluster.node(1).connections.open("p1").unwrap(),
        cluster.node(2).connections.open("p2").unwrap(),
    ];

    for i in 0..30 {
        let n = i % 3;
        helpers::publish(cluster.node(n), &publishers[n], "room-1", &format!("m{i}")).await;
    }

    for watcher in &watchers {
        let received = helpers::collect_messages(watcher, "room-1", 30, WAIT).await;
        let sequences: Vec<u64> = received.iter().map(|(seq, _)| *seq).collect();
        assert_eq!(sequences, (1..=30).collect::<Vec<u64>>(), "watcher {}", watcher.user_id);
    }

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_publishers_never_duplicate_or_reorder() {
    let cluster = Cluster::start(2);
    let watcher = helpers::subscribed(cluster.node(0), "watcher", "room-1").await;

    let mut tasks = Vec::new();
    for n in 0..2 {
        let node = cluster.node(n).clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..20 {
                node.dispatcher
                    .publish("room-1", bytes::Bytes::from(format!("n{n}-{i}")), None)
                    .await
                    .unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let received = helpers::collect_messages(&watcher, "room-1", 40, WAIT).await;
    let sequences: Vec<u64> = received.iter().map(|(seq, _)| *seq).collect();
    assert_eq!(sequences, (1..=40).collect::<Vec<u64>>());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_unsubscribed_session_receives_nothing_more() {
    let cluster = Cluster::start(2);
    let alice = helpers::subscribed(cluster.node(0), "alice", "room-1").await;
    let bob = cluster.node(1).connections.open("bob").unwrap();

    helpers::send(cluster.node(0), &alice, r#"{"type":"UNSUBSCRIBE","topic":"room-1"}"#).await;
    assert!(matches!(
        helpers::drain(&alice).as_slice(),
        [OutboundFrame::Unsubscribed { .. }]
    ));

    helpers::publish(cluster.node(1), &bob, "room-1", "late").await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(helpers::messages(&helpers::drain(&alice), "room-1").is_empty());

    cluster.shutdown().await;
}

#[tokio::test]
async fn test_publish_fails_while_store_is_down_then_recovers() {
    let cluster = Cluster::start(1);
    let node = cluster.node(0);
    let alice = helpers::subscribed(node, "alice", "room-1").await;

    cluster.store.set_available(false);
    helpers::send(
        node,
        &alice,
        r#"{"type":"PUBLISH","topic":"room-1","payload":"lost"}"#,
    )
    .await;
    let frames = helpers::drain(&alice);
    assert!(
        frames
            .iter()
            .any(|f| matches!(f, OutboundFrame::Error { code, .. } if code == "PUBLISH_FAILED")),
        "{frames:?}"
    );
    assert!(helpers::messages(&frames, "room-1").is_empty());
    assert!(node.status().store_unavailable);
    assert!(!alice.is_closed());

    cluster.store.set_available(true);
    assert!(helpers::eventually(WAIT, || !node.status().store_unavailable).await);

    let sequence = helpers::publish(node, &alice, "room-1", "back").await;
    assert_eq!(sequence, 1);

    cluster.shutdown().await;
}
