//! HTTP handlers for the observability surface.

use axum::Json;
use axum::extract::State;
use serde::Serialize;
use serde_json::{Value, json};

use super::state::AppState;

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub clients: usize,
    pub rooms: Vec<RoomStats>,
}

#[derive(Debug, Serialize)]
pub struct RoomStats {
    pub room_id: String,
    pub members: usize,
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let mut rooms: Vec<RoomStats> = state
        .hub
        .room_counts()
        .into_iter()
        .map(|(room_id, members)| RoomStats { room_id, members })
        .collect();
    rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));

    Json(StatsResponse {
        clients: state.hub.client_count(),
        rooms,
    })
}
