//! Wire protocol — tagged message enums for both coordinators.
//!
//! DESIGN
//! ======
//! Every frame on the wire is a JSON object with a mandatory `type` field.
//! Inbound frames deserialize into the closed [`ClientMessage`] enum, so
//! payload shapes are validated at the boundary before any handler runs;
//! an unknown `type` fails deserialization and becomes an `error` frame to
//! the sender. Outbound frames are [`ServerMessage`] values serialized the
//! same way.
//!
//! Whiteboard clients historically used two spellings per operation
//! (`add`/`create`, `update`/`modify`, `remove`/`delete`); both are
//! accepted via serde aliases, and broadcasts use the canonical name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{AnswerRecord, WhiteboardObject};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code for structured `error` frames.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;
}

/// Code used for frames that fail to parse or carry an unknown `type`.
pub const E_BAD_MESSAGE: &str = "E_BAD_MESSAGE";

/// Code used when a slide-change sender is not tagged as a teacher.
pub const E_NOT_TEACHER: &str = "E_NOT_TEACHER";

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Reference to a whiteboard object by id, used by `remove` payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub id: String,
}

/// Every message a client may send. Closed set: anything else is rejected.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    // --- presentation coordinator ---
    StartPresentation {
        task_id: String,
        teacher_id: String,
        #[serde(default)]
        teacher_name: Option<String>,
    },
    JoinPresentation {
        task_id: String,
        student_id: String,
        #[serde(default)]
        student_name: Option<String>,
    },
    SubmitAnswer {
        task_id: String,
        question_id: String,
        answer: serde_json::Value,
        student_id: String,
        #[serde(default)]
        student_name: Option<String>,
        #[serde(default)]
        slide_index: Option<i64>,
    },
    EndPresentation {
        task_id: String,
        teacher_id: String,
    },
    ClearQuestionAnswers {
        task_id: String,
        question_id: String,
        teacher_id: String,
    },
    SlideChanged {
        task_id: String,
        slide_index: i64,
        teacher_id: String,
    },

    // --- whiteboard coordinator ---
    Init {
        whiteboard_id: String,
    },
    #[serde(alias = "create")]
    Add {
        object: WhiteboardObject,
    },
    #[serde(alias = "modify")]
    Update {
        object: WhiteboardObject,
    },
    #[serde(alias = "delete")]
    Remove {
        #[serde(default)]
        object: Option<ObjectRef>,
        #[serde(default)]
        objects: Option<Vec<ObjectRef>>,
    },
    Clear,
}

impl ClientMessage {
    /// Canonical `type` tag, for structured logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StartPresentation { .. } => "start_presentation",
            Self::JoinPresentation { .. } => "join_presentation",
            Self::SubmitAnswer { .. } => "submit_answer",
            Self::EndPresentation { .. } => "end_presentation",
            Self::ClearQuestionAnswers { .. } => "clear_question_answers",
            Self::SlideChanged { .. } => "slide_changed",
            Self::Init { .. } => "init",
            Self::Add { .. } => "add",
            Self::Update { .. } => "update",
            Self::Remove { .. } => "remove",
            Self::Clear => "clear",
        }
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Every message the server may emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on websocket upgrade.
    Connected {
        client_id: Uuid,
    },

    // --- presentation coordinator ---
    PresentationStarted {
        task_id: String,
        teacher_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        teacher_name: Option<String>,
    },
    /// Reply to `join_presentation`: carries the full answer snapshot so a
    /// late joiner does not depend on having seen every prior broadcast.
    JoinedPresentation {
        task_id: String,
        answers: Vec<AnswerRecord>,
    },
    StudentJoined {
        task_id: String,
        student_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        student_name: Option<String>,
    },
    NewAnswer {
        task_id: String,
        answer: AnswerRecord,
    },
    AnswerSubmitted {
        task_id: String,
        question_id: String,
    },
    PresentationEnded {
        task_id: String,
    },
    QuestionAnswersCleared {
        task_id: String,
        question_id: String,
    },
    SlideChanged {
        task_id: String,
        slide_index: i64,
    },
    PresentationNotFound {
        task_id: String,
    },

    // --- whiteboard coordinator ---
    /// Reply to `init`: full object snapshot for the bound whiteboard.
    WhiteboardState {
        whiteboard_id: String,
        objects: Vec<WhiteboardObject>,
    },
    Add {
        object: WhiteboardObject,
    },
    Modify {
        object: WhiteboardObject,
    },
    Delete {
        objects: Vec<ObjectRef>,
    },
    Clear {
        whiteboard_id: String,
    },

    Error {
        code: String,
        message: String,
    },
}

impl ServerMessage {
    /// Build an `error` frame from a plain message with the generic code.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { code: E_BAD_MESSAGE.to_string(), message: message.into() }
    }

    /// Build an `error` frame from a typed coordinator error.
    pub fn error_from(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self::Error { code: err.error_code().to_string(), message: err.to_string() }
    }
}

// =============================================================================
// TESTS
// =============================================================================
