//! End-to-end tests against the real router with a WebSocket client.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chatrelay::config::RelayConfig;
use chatrelay::server::build_router;
use chatrelay::state::AppState;
use chatrelay::types::RecordFormat;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tower::ServiceExt;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Boot the relay on an ephemeral port and return its WS URL
async fn boot_server(config: RelayConfig) -> (String, Arc<AppState>) {
    let state = Arc::new(AppState::new(config));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{}/ws", addr), state)
}

async fn wait_for_connections(state: &AppState, count: usize) {
    timeout(TIMEOUT, async {
        while state.hub.connection_count().await != count {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("hub never reached expected connection count");
}

/// Connect a client and return it with the ID the hub assigned
async fn connect(url: &str, state: &AppState) -> (WsStream, String) {
    let before: HashSet<String> = state.hub.connection_ids().await.into_iter().collect();
    let (ws, _) = connect_async(url).await.expect("connect");
    wait_for_connections(state, before.len() + 1).await;

    let id = state
        .hub
        .connection_ids()
        .await
        .into_iter()
        .find(|id| !before.contains(id))
        .expect("new connection id");
    (ws, id)
}

async fn next_text(ws: &mut WsStream) -> String {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

#[tokio::test]
async fn test_ping_pong_over_websocket() {
    let (url, state) = boot_server(RelayConfig::default()).await;
    let (mut a, a_id) = connect(&url, &state).await;
    let (mut b, b_id) = connect(&url, &state).await;

    a.send(Message::Text("ping".into())).await.unwrap();
    let expected = format!("{}:ping", a_id);
    assert_eq!(next_text(&mut a).await, expected);
    assert_eq!(next_text(&mut b).await, expected);

    a.close(None).await.unwrap();
    wait_for_connections(&state, 1).await;
    assert!(!state.hub.contains(&a_id).await);

    b.send(Message::Text("pong".into())).await.unwrap();
    assert_eq!(next_text(&mut b).await, format!("{}:pong", b_id));
}

#[tokio::test]
async fn test_binary_utf8_frames_are_relayed() {
    let (url, state) = boot_server(RelayConfig::default()).await;
    let (mut a, a_id) = connect(&url, &state).await;

    a.send(Message::Binary(b"bytes".to_vec().into())).await.unwrap();
    assert_eq!(next_text(&mut a).await, format!("{}:bytes", a_id));
}

#[tokio::test]
async fn test_json_format_sends_welcome_and_structured_records() {
    let (url, state) = boot_server(RelayConfig {
        record_format: RecordFormat::Json,
        ..Default::default()
    })
    .await;

    let (mut a, _) = connect_async(url.as_str()).await.expect("connect");
    let welcome: serde_json::Value = serde_json::from_str(&next_text(&mut a).await).unwrap();
    assert_eq!(welcome["t"], "welcome");
    let a_id = welcome["id"].as_str().unwrap().to_string();
    wait_for_connections(&state, 1).await;
    assert!(state.hub.contains(&a_id).await);

    a.send(Message::Text("a:b".into())).await.unwrap();
    let chat: serde_json::Value = serde_json::from_str(&next_text(&mut a).await).unwrap();
    assert_eq!(chat["t"], "chat");
    assert_eq!(chat["from"], a_id.as_str());
    assert_eq!(chat["text"], "a:b");
}

#[tokio::test]
async fn test_stats_endpoint() {
    let state = Arc::new(AppState::default());
    let response = build_router(state)
        .oneshot(
            Request::builder()
                .uri("/api/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let stats: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(stats["connections"], 0);
    assert_eq!(stats["record_format"], "tagged");
}

#[tokio::test]
async fn test_health_and_index_page() {
    let state = Arc::new(AppState::default());
    let app = build_router(state);

    let health = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    // Default static dir is ./public, relative to the crate root
    let index = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(index.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_non_utf8_binary_frame_is_dropped() {
    let (url, state) = boot_server(RelayConfig::default()).await;
    let (mut a, a_id) = connect(&url, &state).await;

    a.send(Message::Binary(vec![0xff, 0xfe, 0xfd].into()))
        .await
        .unwrap();
    a.send(Message::Text("after".into())).await.unwrap();

    // The first record back is for the text frame, nothing was relayed for the binary one
    assert_eq!(next_text(&mut a).await, format!("{}:after", a_id));
    assert!(state.hub.contains(&a_id).await);
}

#[tokio::test]
async fn test_oversized_message_closes_connection() {
    let (url, state) = boot_server(RelayConfig {
        max_message_bytes: 16,
        ..Default::default()
    })
    .await;
    let (mut a, a_id) = connect(&url, &state).await;

    a.send(Message::Text("short".into())).await.unwrap();
    assert_eq!(next_text(&mut a).await, format!("{}:short", a_id));

    a.send(Message::Text("x".repeat(64).into())).await.unwrap();
    wait_for_connections(&state, 0).await;
    assert!(!state.hub.contains(&a_id).await);
}

#[tokio::test]
async fn test_stalled_reader_is_dropped_and_socket_torn_down() {
    let (url, state) = boot_server(RelayConfig {
        outbound_buffer: 1,
        send_timeout: Duration::from_millis(50),
        max_message_bytes: 1024 * 1024,
        ..Default::default()
    })
    .await;
    let (mut talker, talker_id) = connect(&url, &state).await;
    let (mut stalled, stalled_id) = connect(&url, &state).await;

    // `stalled` never reads, so its socket buffers fill up and its sends time out
    let payload = "x".repeat(256 * 1024);
    let expected = format!("{}:{}", talker_id, payload);
    let mut rounds = 0;
    while state.hub.contains(&stalled_id).await {
        rounds += 1;
        assert!(rounds <= 1000, "stalled reader was never dropped");
        talker.send(Message::Text(payload.clone().into())).await.unwrap();
        assert_eq!(next_text(&mut talker).await, expected);
    }
    assert!(state.hub.contains(&talker_id).await);
    assert_eq!(state.hub.connection_count().await, 1);

    // Once its queue is closed the writer drains and the server drops the socket
    timeout(TIMEOUT, async {
        loop {
            match stalled.next().await {
                Some(Ok(_)) => continue,
                Some(Err(_)) | None => break,
            }
        }
    })
    .await
    .expect("stalled socket was never torn down");
}
