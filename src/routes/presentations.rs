//! Presentation liveness query for the serving layer.
//!
//! A page loading a task view asks here whether a live session exists, so
//! it can decide to offer reconnection instead of relying on having caught
//! a `presentation_started` broadcast.

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::state::{AppState, SessionSummary};

#[derive(Debug, Serialize)]
pub struct PresentationStatus {
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<SessionSummary>,
}

/// `GET /api/presentations/{task_id}` — pure read, no side effects.
pub async fn get_presentation(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Json<PresentationStatus> {
    let is_active = state.presentations.is_active(&task_id).await;
    let summary = state.presentations.summary(&task_id).await;
    Json(PresentationStatus { is_active, summary })
}
