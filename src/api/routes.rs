//! API route definitions.

use axum::http::{HeaderValue, Method};
use axum::{Router, routing::get};
use log::warn;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::ws;

use super::handlers;
use super::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer(&state);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/ws", get(ws::ws_handler))
        .route("/ws/{room_id}", get(ws::ws_room_handler))
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(state: &AppState) -> CorsLayer {
    let allowed = &state.config.server.allowed_origins;
    if allowed.is_empty() {
        warn!("CORS: no origins configured, allowing any origin");
        return CorsLayer::new().allow_origin(Any).allow_methods([Method::GET]);
    }

    let origins: Vec<HeaderValue> = allowed
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("CORS: ignoring unparseable origin {origin:?}");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET])
}
