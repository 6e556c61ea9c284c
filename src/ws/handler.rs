//! WebSocket upgrade boundary: origin validation, room-id resolution, and
//! wiring an accepted socket to its room.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, header};
use axum::response::Response;
use log::{info, warn};
use serde::Deserialize;

use crate::api::{ApiError, AppState};

use super::connection;
use super::connection::MAX_FRAME_BYTES;

/// Room identifier used when the client supplies none.
const DEFAULT_ROOM: &str = "default";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    room: Option<String>,
}

/// Upgrade handler for `GET /ws`, room taken from the `room` query
/// parameter.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    accept(state, headers, ws, query.room)
}

/// Upgrade handler for `GET /ws/{room_id}`.
pub async fn ws_room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    accept(state, headers, ws, Some(room_id))
}

fn accept(
    state: AppState,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
    room_id: Option<String>,
) -> Result<Response, ApiError> {
    if !origin_allowed(&headers, &state.config.server.allowed_origins) {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("<none>");
        warn!("Blocked WebSocket connection from origin: {origin}");
        return Err(ApiError::forbidden("origin not allowed"));
    }

    let room_id = normalize_room_id(room_id);
    info!("WebSocket upgrade for room {room_id}");

    let hub = state.hub.clone();
    Ok(ws
        .max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| {
            // The room is resolved only once the socket exists, so every
            // recorded registration intent is matched by a registration.
            let room = hub.get_or_create(&room_id);
            connection::serve_connection(socket, room)
        }))
}

/// Empty or missing identifiers are normalized, never rejected.
fn normalize_room_id(room_id: Option<String>) -> String {
    match room_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => DEFAULT_ROOM.to_string(),
    }
}

/// An empty allow-list admits any origin. A configured list requires a
/// matching `Origin` header; browser clients always send one.
fn origin_allowed(headers: &HeaderMap, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match headers.get(header::ORIGIN).and_then(|value| value.to_str().ok()) {
        Some(origin) => allowed.iter().any(|candidate| candidate == origin),
        None => false,
    }
}
