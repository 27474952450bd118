//! End-to-end WebSocket tests against servers on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use relay_api::AppState;
use relay_api::app::run_server;
use relay_core::result::AppResult;
use relay_realtime::RelayNode;

use crate::helpers::{self, Cluster};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

struct Server {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<AppResult<()>>,
}

impl Server {
    async fn start(node: Arc<RelayNode>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let state = AppState::new(Arc::new(helpers::test_config()), node);
        let task = tokio::spawn(run_server(state, listener, async {
            let _ = stopped.await;
        }));
        Self {
            addr,
            stop: Some(stop),
            task,
        }
    }

    async fn connect(&self, user: Option<&str>) -> Client {
        let mut request = format!("ws://{}/ws", self.addr)
            .into_client_request()
            .unwrap();
        if let Some(user) = user {
            request
                .headers_mut()
                .insert("X-User-Id", HeaderValue::from_str(user).unwrap());
        }
        let (client, _) = connect_async(request).await.unwrap();
        client
    }

    async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, self.task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::text(frame.to_string()))
        .await
        .unwrap();
}

/// Next JSON frame of type `kind`, skipping everything else.
async fn expect_frame(client: &mut Client, kind: &str) -> Value {
    tokio::time::timeout(WAIT, async {
        loop {
            let message = client.next().await.unwrap().unwrap();
            if let Message::Text(text) = message {
                let frame: Value = serde_json::from_str(text.as_str()).unwrap();
                if frame["type"] == kind {
                    return frame;
                }
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no {kind} frame"))
}

/// Close code of the next close frame.
async fn expect_close(client: &mut Client) -> u16 {
    tokio::time::timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
                Some(Ok(_)) => continue,
                _ => panic!("connection ended without a close frame"),
            }
        }
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_publish_on_one_server_reaches_client_on_another() {
    let cluster = Cluster::start(2);
    let server_a = Server::start(cluster.node(0).clone()).await;
    let server_b = Server::start(cluster.node(1).clone()).await;

    let mut alice = server_a.connect(Some("alice")).await;
    send(&mut alice, json!({"type": "SUBSCRIBE", "topic": "room-1"})).await;
    let subscribed = expect_frame(&mut alice, "SUBSCRIBED").await;
    assert_eq!(subscribed["sequence"], 0);

    let mut bob = server_b.connect(Some("bob")).await;
    send(
        &mut bob,
        json!({"type": "PUBLISH", "topic": "room-1", "payload": "hello"}),
    )
    .await;
    let receipt = expect_frame(&mut bob, "PUBLISHED").await;
    assert_eq!(receipt["sequence"], 1);

    let message = expect_frame(&mut alice, "MESSAGE").await;
    assert_eq!(message["topic"], "room-1");
    assert_eq!(message["sequence"], 1);
    assert_eq!(message["payload"], "hello");
    assert_eq!(message["from"], "bob");

    server_a.stop().await;
    server_b.stop().await;
}

#[tokio::test]
async fn test_lost_notification_is_recovered_by_reconciliation() {
    let cluster = Cluster::start(2);
    let server_a = Server::start(cluster.node(0).clone()).await;
    let server_b = Server::start(cluster.node(1).clone()).await;
    cluster.bus.set_dropping(true);

    let mut alice = server_a.connect(Some("alice")).await;
    send(&mut alice, json!({"type": "SUBSCRIBE", "topic": "room-1"})).await;
    expect_frame(&mut alice, "SUBSCRIBED").await;

    let mut bob = server_b.connect(Some("bob")).await;
    send(
        &mut bob,
        json!({"type": "PUBLISH", "topic": "room-1", "payload": "hello"}),
    )
    .await;
    expect_frame(&mut bob, "PUBLISHED").await;

    let message = expect_frame(&mut alice, "MESSAGE").await;
    assert_eq!(message["sequence"], 1);
    assert_eq!(message["payload"], "hello");
    assert_eq!(cluster.bus.dropped(), 1);

    server_a.stop().await;
    server_b.stop().await;
}

#[tokio::test]
async fn test_missing_user_id_closes_with_policy_violation() {
    let cluster = Cluster::start(1);
    let server = Server::start(cluster.node(0).clone()).await;

    let mut anonymous = server.connect(None).await;
    assert_eq!(expect_close(&mut anonymous).await, 1008);
    assert_eq!(cluster.node(0).status().sessions, 0);

    server.stop().await;
}

#[tokio::test]
async fn test_malformed_frame_closes_with_protocol_error() {
    let cluster = Cluster::start(1);
    let server = Server::start(cluster.node(0).clone()).await;

    let mut alice = server.connect(Some("alice")).await;
    alice.send(Message::text("{not json")).await.unwrap();
    assert_eq!(expect_close(&mut alice).await, 1002);

    server.stop().await;
}

#[tokio::test]
async fn test_unknown_frame_type_closes_with_protocol_error() {
    let cluster = Cluster::start(1);
    let server = Server::start(cluster.node(0).clone()).await;

    let mut alice = server.connect(Some("alice")).await;
    send(
        &mut alice,
        json!({"type": "SHOUT", "topic": "room-1", "payload": "x"}),
    )
    .await;
    assert_eq!(expect_close(&mut alice).await, 1002);
    assert_eq!(cluster.node(0).status().metrics.protocol_violations, 1);

    server.stop().await;
}

#[tokio::test]
async fn test_invalid_topic_is_an_error_not_a_close() {
    let cluster = Cluster::start(1);
    let server = Server::start(cluster.node(0).clone()).await;

    let mut alice = server.connect(Some("alice")).await;
    send(&mut alice, json!({"type": "SUBSCRIBE", "topic": "bad topic!"})).await;
    let error = expect_frame(&mut alice, "ERROR").await;
    assert_eq!(error["code"], "INVALID_TOPIC");

    send(&mut alice, json!({"type": "PING"})).await;
    expect_frame(&mut alice, "PONG").await;

    server.stop().await;
}

#[tokio::test]
async fn test_server_shutdown_sends_going_away() {
    let cluster = Cluster::start(1);
    let server = Server::start(cluster.node(0).clone()).await;

    let mut alice = server.connect(Some("alice")).await;
    send(&mut alice, json!({"type": "SUBSCRIBE", "topic": "room-1"})).await;
    expect_frame(&mut alice, "SUBSCRIBED").await;

    let stopping = tokio::spawn(server.stop());
    assert_eq!(expect_close(&mut alice).await, 1001);
    stopping.await.unwrap();
}
