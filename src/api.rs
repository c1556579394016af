//! HTTP endpoints next to the WebSocket relay.

use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;
use crate::types::RecordFormat;

/// Response for `GET /api/stats`
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Live connections in the hub right now
    pub connections: usize,
    pub record_format: RecordFormat,
}

/// GET /api/stats
pub async fn stats(State(state): State<Arc<AppState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.hub.connection_count().await,
        record_format: state.hub.record_format(),
    })
}

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}
