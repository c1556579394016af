use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::hub::{ChannelSender, Hub};
use crate::protocol;
use crate::state::AppState;
use crate::types::*;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request");

    ws.max_message_size(state.config.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let id = new_connection_id();
    let (mut sink, stream) = socket.split();

    // JSON clients get told their own ID up front; tagged clients only ever
    // see relayed records
    if state.hub.record_format() == RecordFormat::Json {
        if let Some(msg) = protocol::welcome(&id) {
            if sink.send(Message::Text(msg.into())).await.is_err() {
                tracing::error!(conn_id = %id, "Failed to send welcome message");
                return;
            }
        }
    }

    let (sender, outbound) = ChannelSender::channel(state.config.outbound_buffer);
    state.hub.on_connect(id.clone(), Arc::new(sender)).await;
    tracing::info!(conn_id = %id, "WebSocket connected");

    let mut send_task = tokio::spawn(write_records(id.clone(), sink, outbound));
    let mut recv_task = tokio::spawn(read_messages(id.clone(), stream, state.hub.clone()));

    // Whichever half stops first takes the other down with it
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.hub.on_disconnect(&id).await;
    tracing::info!(conn_id = %id, "WebSocket connection closed");
}

/// Drain the connection's outbound queue into the socket
async fn write_records(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Record>,
) {
    while let Some(record) = outbound.recv().await {
        if sink.send(Message::Text(record.as_ref().into())).await.is_err() {
            tracing::debug!(conn_id = %id, "Socket write failed");
            break;
        }
    }
}

/// Feed inbound frames to the hub until the client goes away.
///
/// Pings are answered by the WebSocket layer itself.
async fn read_messages(id: ConnectionId, mut stream: SplitStream<WebSocket>, hub: Arc<Hub>) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                hub.on_message(&id, text.as_str()).await;
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    hub.on_message(&id, text).await;
                }
                Err(_) => {
                    tracing::warn!(conn_id = %id, len = data.len(), "Dropping non-UTF-8 binary frame");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::debug!(conn_id = %id, "Client sent close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(conn_id = %id, "WebSocket error: {}", e);
                break;
            }
        }
    }
}
