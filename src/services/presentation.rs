//! Presentation coordinator — live teacher-led sessions keyed by task.
//!
//! DESIGN
//! ======
//! Sessions are ephemeral: they exist only in this coordinator's map and a
//! process restart loses them, which is acceptable for live presentations.
//! Answer submission is an upsert keyed by (student, question) — the most
//! recent submission wins, no merge.
//!
//! Handlers here are pure state operations returning typed results; the
//! websocket dispatch layer owns all broadcast and reply decisions.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use crate::protocol::ErrorCode;
use crate::state::{AnswerRecord, SessionSummary, now_ms};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    #[error("no active presentation for task {0}")]
    NotFound(String),
    #[error("teacher {teacher_id} does not own the presentation for task {task_id}")]
    NotOwner { task_id: String, teacher_id: String },
}

impl ErrorCode for PresentationError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_PRESENTATION_NOT_FOUND",
            Self::NotOwner { .. } => "E_NOT_OWNER",
        }
    }
}

/// One live session. At most one per task id.
struct PresentationSession {
    teacher_id: String,
    started_at: i64,
    /// (student_id, question_id) -> latest submitted answer.
    answers: HashMap<(String, String), AnswerRecord>,
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// In-memory session table. One per process, owned by `AppState`.
pub struct PresentationCoordinator {
    sessions: RwLock<HashMap<String, PresentationSession>>,
}

/// Broadcast channel name for a task's presentation session.
#[must_use]
pub fn channel(task_id: &str) -> String {
    format!("presentation:{task_id}")
}

impl Default for PresentationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: RwLock::new(HashMap::new()) }
    }

    /// Start a session for a task, replacing any prior session for the same
    /// task. A teacher restarting a presentation discards previous answers.
    /// Returns the start time in ms since epoch.
    pub async fn start(&self, task_id: &str, teacher_id: &str) -> i64 {
        let started_at = now_ms();
        let mut sessions = self.sessions.write().await;
        let replaced = sessions
            .insert(
                task_id.to_string(),
                PresentationSession {
                    teacher_id: teacher_id.to_string(),
                    started_at,
                    answers: HashMap::new(),
                },
            )
            .is_some();
        info!(%task_id, %teacher_id, replaced, "presentation started");
        started_at
    }

    /// Snapshot of all answers for a live session, oldest first. This is
    /// what a joining connection receives to compensate for missed
    /// broadcasts.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no session is live for the task.
    pub async fn answers(&self, task_id: &str) -> Result<Vec<AnswerRecord>, PresentationError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(task_id)
            .ok_or_else(|| PresentationError::NotFound(task_id.to_string()))?;
        let mut answers: Vec<AnswerRecord> = session.answers.values().cloned().collect();
        answers.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.student_id.cmp(&b.student_id))
                .then_with(|| a.question_id.cmp(&b.question_id))
        });
        Ok(answers)
    }

    /// Upsert an answer keyed by (student, question). Last write wins.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no session is live for the task.
    pub async fn submit_answer(&self, task_id: &str, record: AnswerRecord) -> Result<(), PresentationError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(task_id)
            .ok_or_else(|| PresentationError::NotFound(task_id.to_string()))?;
        let key = (record.student_id.clone(), record.question_id.clone());
        session.answers.insert(key, record);
        Ok(())
    }

    /// End a session. Only the owning teacher may end it.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no session is live, `NotOwner` if `teacher_id`
    /// does not match the session's owner.
    pub async fn end(&self, task_id: &str, teacher_id: &str) -> Result<(), PresentationError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get(task_id)
            .ok_or_else(|| PresentationError::NotFound(task_id.to_string()))?;
        if session.teacher_id != teacher_id {
            return Err(PresentationError::NotOwner {
                task_id: task_id.to_string(),
                teacher_id: teacher_id.to_string(),
            });
        }
        sessions.remove(task_id);
        info!(%task_id, %teacher_id, "presentation ended");
        Ok(())
    }

    /// Remove every answer for one question, across all students. Answers
    /// for other questions are untouched. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Same ownership rules as [`Self::end`].
    pub async fn clear_question(
        &self,
        task_id: &str,
        question_id: &str,
        teacher_id: &str,
    ) -> Result<usize, PresentationError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(task_id)
            .ok_or_else(|| PresentationError::NotFound(task_id.to_string()))?;
        if session.teacher_id != teacher_id {
            return Err(PresentationError::NotOwner {
                task_id: task_id.to_string(),
                teacher_id: teacher_id.to_string(),
            });
        }
        let before = session.answers.len();
        session.answers.retain(|(_, qid), _| qid != question_id);
        Ok(before - session.answers.len())
    }

    /// Ownership check with no state change, used by `slide_changed`.
    ///
    /// # Errors
    ///
    /// Same ownership rules as [`Self::end`].
    pub async fn verify_owner(&self, task_id: &str, teacher_id: &str) -> Result<(), PresentationError> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(task_id)
            .ok_or_else(|| PresentationError::NotFound(task_id.to_string()))?;
        if session.teacher_id != teacher_id {
            return Err(PresentationError::NotOwner {
                task_id: task_id.to_string(),
                teacher_id: teacher_id.to_string(),
            });
        }
        Ok(())
    }

    /// Whether a session is live for a task. Pure read for the query surface.
    pub async fn is_active(&self, task_id: &str) -> bool {
        self.sessions.read().await.contains_key(task_id)
    }

    /// Summary of a live session for the query surface, if any.
    pub async fn summary(&self, task_id: &str) -> Option<SessionSummary> {
        let sessions = self.sessions.read().await;
        sessions.get(task_id).map(|s| SessionSummary {
            teacher_id: s.teacher_id.clone(),
            started_at: s.started_at,
            answer_count: s.answers.len(),
        })
    }
}

#[cfg(test)]
#[path = "presentation_test.rs"]
mod tests;
