//! Shared application state and domain types.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns the two coordinators, the connection hub, and the durable object
//! store. Coordinators hold their own private maps — nothing lives in
//! module-level statics, so tests get a fresh instance per case.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::hub::Hub;
use crate::services::presentation::PresentationCoordinator;
use crate::services::store::ObjectStore;
use crate::services::whiteboard::WhiteboardCoordinator;

// =============================================================================
// TIME
// =============================================================================

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

// =============================================================================
// PRESENTATION TYPES
// =============================================================================

/// One submitted answer. Keyed by (student, question) in the session map;
/// a re-submission for the same pair replaces the prior record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub answer: serde_json::Value,
    pub student_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slide_index: Option<i64>,
    pub submitted_at: i64,
}

/// Read-only view of a live session, served to the HTTP query surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub teacher_id: String,
    pub started_at: i64,
    pub answer_count: usize,
}

// =============================================================================
// WHITEBOARD TYPES
// =============================================================================

/// A drawable object. The durable store owns the canonical copy; this type
/// only travels on the wire and through the store boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhiteboardObject {
    /// Caller-assigned id, unique within a whiteboard.
    pub id: String,
    /// Object type tag ("path", "text", "rect", ...). Opaque to the server.
    pub kind: String,
    /// Arbitrary drawing data: geometry, style, text.
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state. Clone is required by Axum — all inner fields
/// are Arc-wrapped.
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub presentations: Arc<PresentationCoordinator>,
    pub whiteboards: Arc<WhiteboardCoordinator>,
    pub store: Arc<dyn ObjectStore>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            hub: Arc::new(Hub::new()),
            presentations: Arc::new(PresentationCoordinator::new()),
            whiteboards: Arc::new(WhiteboardCoordinator::new()),
            store,
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
