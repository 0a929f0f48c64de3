// HTTP surface: health check, Prometheus metrics, and the WebSocket route.

pub mod ws;

use std::sync::Arc;

use axum::{response::IntoResponse, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::engine::server::GameServer;
use crate::metrics;

/// Shared handle for every route.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<GameServer>,
}

pub fn router(server: Arc<GameServer>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws::ws_game))
        .with_state(AppState { server })
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "service": "minefield-backend" }))
}

async fn metrics_handler() -> impl IntoResponse {
    metrics::render()
}
