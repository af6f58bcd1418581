//! HTTP server setup with Axum

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use super::sse::{ingest_handler, replay_handler, stream_handler};
use crate::hub::EventHub;

/// Create the Axum router with all endpoints
pub fn create_router(hub: Arc<EventHub>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(stream_handler).post(ingest_handler))
        .route("/events", get(replay_handler).post(ingest_handler))
        .route("/events/stream", get(stream_handler))
        .route("/health", get(health_check))
        .route("/info", get(server_info_handler))
        .layer(cors)
        .with_state(hub)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct ServerInfoResponse {
    pub name: String,
    pub version: String,
    pub last_event_id: u64,
    pub active_sessions: usize,
}

/// GET /info
async fn server_info_handler(State(hub): State<Arc<EventHub>>) -> Json<ServerInfoResponse> {
    Json(ServerInfoResponse {
        name: crate::NAME.to_string(),
        version: crate::VERSION.to_string(),
        last_event_id: hub.last_event_id(),
        active_sessions: hub.active_sessions(),
    })
}
