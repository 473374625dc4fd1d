//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the websocket endpoint both coordinators share with
//! the small HTTP query surface consumed by the serving layer.

pub mod presentations;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/presentations/{task_id}", get(presentations::get_presentation))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
