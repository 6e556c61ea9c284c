//! End-to-end relay tests: a real listener serving the real router, driven
//! by WebSocket clients.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use roomcast::api::{AppState, create_router};
use roomcast::config::RelayConfig;
use roomcast::ws::Hub;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(config: RelayConfig) -> SocketAddr {
    let hub = Hub::new();
    let app = create_router(AppState::new(hub, config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A test peer that splits coalesced frames back into individual envelopes.
struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    queue: VecDeque<Value>,
}

impl TestClient {
    async fn connect(addr: SocketAddr, path: &str) -> Self {
        let (ws, _) = connect_async(format!("ws://{addr}{path}")).await.unwrap();
        Self {
            ws,
            queue: VecDeque::new(),
        }
    }

    async fn send(&mut self, envelope: Value) {
        self.ws
            .send(Message::Text(envelope.to_string().into()))
            .await
            .unwrap();
    }

    async fn next_envelope(&mut self) -> Value {
        loop {
            if let Some(envelope) = self.queue.pop_front() {
                return envelope;
            }
            let frame = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("connection closed while waiting for a frame")
                .expect("read error while waiting for a frame");
            if let Message::Text(text) = frame {
                for line in text.split('\n') {
                    self.queue.push_back(serde_json::from_str(line).unwrap());
                }
            }
        }
    }

    async fn close(mut self) {
        let _ = self.ws.close(None).await;
    }
}

fn stage_grid(envelope: &Value) -> Value {
    assert_eq!(envelope["type"], "stage", "expected a stage envelope: {envelope}");
    envelope["content"]["stage"].clone()
}

#[tokio::test]
async fn joiner_gets_stage_snapshot_first() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    let snapshot = a.next_envelope().await;
    assert_eq!(snapshot["from"], "server");
    assert_eq!(stage_grid(&snapshot), json!([]));

    a.send(json!({"type": "stage", "content": {"stage": [[[7]]]}, "from": ""}))
        .await;
    let echoed = a.next_envelope().await;
    assert_eq!(stage_grid(&echoed), json!([[[7]]]));

    let mut b = TestClient::connect(addr, "/ws?room=r1").await;
    let first = b.next_envelope().await;
    assert_eq!(first["from"], "server");
    assert_eq!(stage_grid(&first), json!([[[7]]]));
}

#[tokio::test]
async fn from_is_always_the_assigned_identity() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=chat").await;
    a.next_envelope().await;
    let mut b = TestClient::connect(addr, "/ws?room=chat").await;
    b.next_envelope().await;
    a.next_envelope().await; // b's join snapshot

    a.send(json!({"type": "chat", "content": "hello", "from": "ignored"}))
        .await;

    let received = b.next_envelope().await;
    assert_eq!(received["type"], "chat");
    assert_eq!(received["content"], "hello");
    let from = received["from"].as_str().unwrap();
    assert_ne!(from, "ignored");
    assert_ne!(from, "server");
    assert!(!from.is_empty());

    // The sender hears its own message back with the same stamped identity.
    let echoed = a.next_envelope().await;
    assert_eq!(echoed["from"], from);
}

#[tokio::test]
async fn rooms_are_isolated() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    a.next_envelope().await;
    let mut b = TestClient::connect(addr, "/ws?room=r2").await;
    b.next_envelope().await;

    a.send(json!({"type": "chat", "content": "only r1", "from": ""}))
        .await;
    // a gets its own echo; b must see nothing but silence.
    assert_eq!(a.next_envelope().await["content"], "only r1");
    assert!(
        timeout(Duration::from_millis(300), b.ws.next()).await.is_err(),
        "message leaked across rooms"
    );
}

#[tokio::test]
async fn stage_scenario_with_late_joiner() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    a.next_envelope().await;
    let mut b = TestClient::connect(addr, "/ws?room=r1").await;
    b.next_envelope().await;
    a.next_envelope().await;
    let mut c = TestClient::connect(addr, "/ws?room=r1").await;
    c.next_envelope().await;
    a.next_envelope().await;
    b.next_envelope().await;

    a.send(json!({"type": "stage", "content": {"stage": [[[1]]]}, "from": ""}))
        .await;

    let to_a = a.next_envelope().await;
    let to_b = b.next_envelope().await;
    let to_c = c.next_envelope().await;
    for envelope in [&to_a, &to_b, &to_c] {
        assert_eq!(stage_grid(envelope), json!([[[1]]]));
    }
    // All three carry the same stamped sender identity.
    assert_eq!(to_a["from"], to_b["from"]);
    assert_eq!(to_b["from"], to_c["from"]);
    assert_ne!(to_a["from"], "server");

    let mut d = TestClient::connect(addr, "/ws?room=r1").await;
    let first = d.next_envelope().await;
    assert_eq!(first["from"], "server");
    assert_eq!(stage_grid(&first), json!([[[1]]]));
}

#[tokio::test]
async fn departure_is_announced_to_remaining_members() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    a.next_envelope().await;
    let mut b = TestClient::connect(addr, "/ws?room=r1").await;
    b.next_envelope().await;
    a.next_envelope().await;

    // Learn b's identity from a relayed message, then let b leave.
    b.send(json!({"type": "chat", "content": "bye", "from": ""}))
        .await;
    let chat = a.next_envelope().await;
    let b_id = chat["from"].as_str().unwrap().to_string();
    b.next_envelope().await; // b's own echo
    b.close().await;

    let left = a.next_envelope().await;
    assert_eq!(left["type"], "client_left");
    assert_eq!(left["from"], "server");
    assert_eq!(left["content"]["client_id"], b_id.as_str());
}

#[tokio::test]
async fn malformed_frames_are_skipped_not_fatal() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    a.next_envelope().await;

    // Not JSON at all, then a stage envelope with a bad grid: both are
    // dropped without ending the session.
    a.ws.send(Message::Text("not json".into())).await.unwrap();
    a.send(json!({"type": "stage", "content": {"stage": "nope"}, "from": ""}))
        .await;

    a.send(json!({"type": "chat", "content": "still here", "from": ""}))
        .await;
    assert_eq!(a.next_envelope().await["content"], "still here");
}

#[tokio::test]
async fn missing_room_id_joins_the_default_room() {
    let addr = spawn_server(RelayConfig::default()).await;

    let mut a = TestClient::connect(addr, "/ws").await;
    a.next_envelope().await;
    // The path form lands in the same room namespace.
    let mut b = TestClient::connect(addr, "/ws/default").await;
    b.next_envelope().await;
    a.next_envelope().await;

    b.send(json!({"type": "chat", "content": "hi", "from": ""}))
        .await;
    assert_eq!(a.next_envelope().await["content"], "hi");
}

#[tokio::test]
async fn origin_allow_list_is_enforced_on_upgrade() {
    let mut config = RelayConfig::default();
    config.server.allowed_origins = vec!["http://localhost:5173".to_string()];
    let addr = spawn_server(config).await;

    // No Origin header: rejected before upgrade.
    let err = connect_async(format!("ws://{addr}/ws?room=r1"))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 403),
        other => panic!("expected an HTTP rejection, got {other:?}"),
    }

    // Wrong origin: rejected.
    let mut request = format!("ws://{addr}/ws?room=r1")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://evil.example".parse().unwrap());
    assert!(connect_async(request).await.is_err());

    // Allowed origin: upgrade succeeds and the relay works.
    let mut request = format!("ws://{addr}/ws?room=r1")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://localhost:5173".parse().unwrap());
    let (ws, _) = connect_async(request).await.unwrap();
    let mut client = TestClient {
        ws,
        queue: VecDeque::new(),
    };
    assert_eq!(client.next_envelope().await["type"], "stage");
}

#[tokio::test]
async fn health_and_stats_reflect_membership() {
    let addr = spawn_server(RelayConfig::default()).await;
    let http = reqwest::Client::new();

    let health: Value = http
        .get(format!("http://{addr}/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert!(health["version"].is_string());

    let mut a = TestClient::connect(addr, "/ws?room=r1").await;
    a.next_envelope().await;
    let mut b = TestClient::connect(addr, "/ws?room=r2").await;
    b.next_envelope().await;

    let stats = wait_for_stats(&http, addr, |stats| stats["clients"] == 2).await;
    let rooms = stats["rooms"].as_array().unwrap();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0]["room_id"], "r1");
    assert_eq!(rooms[0]["members"], 1);
    assert_eq!(rooms[1]["room_id"], "r2");
    assert_eq!(rooms[1]["members"], 1);

    // Empty rooms are torn down once their last member leaves.
    a.close().await;
    b.close().await;
    let stats = wait_for_stats(&http, addr, |stats| {
        stats["clients"] == 0 && stats["rooms"].as_array().unwrap().is_empty()
    })
    .await;
    assert_eq!(stats["clients"], 0);
}

async fn wait_for_stats(
    http: &reqwest::Client,
    addr: SocketAddr,
    ready: impl Fn(&Value) -> bool,
) -> Value {
    timeout(RECV_TIMEOUT, async {
        loop {
            let stats: Value = http
                .get(format!("http://{addr}/stats"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if ready(&stats) {
                return stats;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stats never reached the expected state")
}
