//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Two listeners, two routers. The control router is a small HTTP surface
//! for liveness probes and operators; the relay router only upgrades
//! websockets. Clients connect to the relay at its root path.

pub mod ws;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::services::{heartbeat, registry, scene};
use crate::state::AppState;

/// Liveness/info endpoints.
pub fn control_app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/info", get(info))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Websocket relay endpoint.
pub fn relay_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(ws::handle_ws))
        .route("/ws", get(ws::handle_ws))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct IndexResponse {
    msg: &'static str,
}

async fn index() -> Json<IndexResponse> {
    Json(IndexResponse { msg: "boardrelay is running" })
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    participants: usize,
    awaiting_pong: usize,
    objects: usize,
}

async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        participants: registry::participant_count(&state).await,
        awaiting_pong: heartbeat::pending_count(&state).await,
        objects: scene::object_count(&state).await,
    })
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
