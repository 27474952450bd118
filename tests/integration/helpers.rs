//! Shared test helpers for integration tests.

use std::sync::Arc;
use std::time::Duration;

use relay_core::config::{AppConfig, OutboxBackend};
use relay_core::types::NodeId;
use relay_database::MemoryOutboxStore;
use relay_realtime::bridge::MemoryBus;
use relay_realtime::connection::handle::SessionHandle;
use relay_realtime::message::types::OutboundFrame;
use relay_realtime::{NodeBackends, RelayNode};

/// Test configuration: memory backend and short intervals.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.outbox.backend = OutboxBackend::Memory;
    config.realtime.heartbeat_interval_ms = 1_000;
    config.realtime.heartbeat_timeout_ms = 10_000;
    config.realtime.drain_timeout_ms = 200;
    config.broadcast.reconcile_interval_ms = 100;
    config
}

/// Nodes sharing one outbox and one bus.
pub struct Cluster {
    /// Shared outbox.
    pub store: Arc<MemoryOutboxStore>,
    /// Shared bus.
    pub bus: Arc<MemoryBus>,
    /// Started nodes, named `node-0`, `node-1`, ...
    pub nodes: Vec<Arc<RelayNode>>,
}

impl Cluster {
    /// Start `count` nodes with [`test_config`].
    pub fn start(count: usize) -> Self {
        Self::start_with(count, test_config())
    }

    /// Start `count` nodes with `config`.
    pub fn start_with(count: usize, config: AppConfig) -> Self {
        let store = Arc::new(MemoryOutboxStore::new());
        let bus = Arc::new(MemoryBus::new(1024));
        let nodes = (0..count)
            .map(|i| {
                let node = Arc::new(RelayNode::new(
                    &config,
                    NodeId::new(format!("node-{i}")),
                    NodeBackends::memory(store.clone(), bus.clone()),
                ));
                node.start();
                node
            })
            .collect();
        Self { store, bus, nodes }
    }

    /// Node `i`.
    pub fn node(&self, i: usize) -> &Arc<RelayNode> {
        &self.nodes[i]
    }

    /// Shut every node down.
    pub async fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown().await;
        }
    }
}

/// Open a session on `node` and subscribe it to `topic`, discarding the
/// `SUBSCRIBED` confirmation.
pub async fn subscribed(node: &RelayNode, user: &str, topic: &str) -> Arc<SessionHandle> {
    let session = node.connections.open(user).unwrap();
    send(node, &session, &format!(r#"{{"type":"SUBSCRIBE","topic":"{topic}"}}"#)).await;
    let frames = drain(&session);
    assert!(
        frames
            .iter()
            .any(|f| matches!(f, OutboundFrame::Subscribed { .. })),
        "expected SUBSCRIBED, got {frames:?}"
    );
    session
}

/// Route a raw text frame from `session`.
pub async fn send(node: &RelayNode, session: &SessionHandle, raw: &str) {
    node.connections.handle_text(&session.id, raw).await;
}

/// Publish `payload` to `topic` from `session` and return the receipt sequence.
pub async fn publish(node: &RelayNode, session: &SessionHandle, topic: &str, payload: &str) -> u64 {
    send(
        node,
        session,
        &format!(r#"{{"type":"PUBLISH","topic":"{topic}","payload":"{payload}"}}"#),
    )
    .await;
    let frames = drain(session);
    frames
        .iter()
        .find_map(|f| match f {
            OutboundFrame::Published { sequence, .. } => Some(*sequence),
            _ => None,
        })
        .unwrap_or_else(|| panic!("no PUBLISHED receipt in {frames:?}"))
}

/// Everything currently queued for `session`.
pub fn drain(session: &SessionHandle) -> Vec<OutboundFrame> {
    std::iter::from_fn(|| session.queue().try_pop()).collect()
}

/// `(sequence, payload)` of the `MESSAGE` frames in `frames` for `topic`.
pub fn messages(frames: &[OutboundFrame], topic: &str) -> Vec<(u64, String)> {
    frames
        .iter()
        .filter_map(|f| match f {
            OutboundFrame::Message {
                topic: t,
                sequence,
                payload,
                ..
            } if t == topic => Some((*sequence, payload.clone())),
            _ => None,
        })
        .collect()
}

/// Poll `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Collect `MESSAGE` frames for `topic` until `count` arrived or `timeout` elapses.
pub async fn collect_messages(
    session: &SessionHandle,
    topic: &str,
    count: usize,
    timeout: Duration,
) -> Vec<(u64, String)> {
    let mut received = Vec::new();
    eventually(timeout, || {
        received.extend(messages(&drain(session), topic));
        received.len() >= count
    })
    .await;
    received
}
