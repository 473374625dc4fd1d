//! WebSocket handler — message dispatch for both coordinators.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client id, registers an outbound queue with the
//! hub, and enters a `select!` loop:
//! - Incoming client frames → parse into `ClientMessage` + dispatch
//! - Published frames from channel peers → forward to client
//!
//! Handler functions validate, call the coordinators, and return an
//! `Outcome`. The dispatch layer owns all outbound concerns: reply to
//! sender and publish to channel. Failures reply to the sender only and
//! never broadcast.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register with hub → send `connected` with `client_id`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (reply / publish / both)
//! 4. Close → teardown (end owned presentation, unregister)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::hub::Role;
use crate::protocol::{ClientMessage, E_NOT_TEACHER, ObjectRef, ServerMessage};
use crate::services::whiteboard::WhiteboardError;
use crate::services::{presentation, whiteboard};
use crate::state::{AnswerRecord, AppState, WhiteboardObject, now_ms};

const DEFAULT_SEND_QUEUE_CAPACITY: usize = 256;

fn send_queue_capacity() -> usize {
    std::env::var("WS_SEND_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_SEND_QUEUE_CAPACITY)
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what — handlers never send frames directly.
enum Outcome {
    /// Send one message to the sender only.
    Reply(ServerMessage),
    /// Reply to the sender, publish a different message to channel peers.
    ReplyAndPublish {
        reply: ServerMessage,
        publish: ServerMessage,
        channel: String,
    },
    /// Reply to the sender and publish to the full channel, sender
    /// included: the sender sees both its confirmation and the broadcast
    /// form through its hub queue.
    ReplyAndPublishAll {
        reply: ServerMessage,
        publish: ServerMessage,
        channel: String,
    },
    /// Publish to every channel member, sender included (the sender
    /// receives its copy through its hub queue).
    Publish { message: ServerMessage, channel: String },
    /// Publish to channel peers only. Used for whiteboard mutations, which
    /// are fire-and-forget for the sender.
    PublishExcludeSender { message: ServerMessage, channel: String },
}

// =============================================================================
// UPGRADE & CONNECTION
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let client_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(send_queue_capacity());
    state.hub.register(client_id, tx).await;
    state
        .hub
        .send(client_id, ServerMessage::Connected { client_id })
        .await;

    info!(%client_id, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        for reply in process_inbound_text(&state, client_id, &text).await {
                            let _ = send_message(&mut socket, &reply).await;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            Some(message) = rx.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    handle_disconnect(&state, client_id).await;
    info!(%client_id, "ws: client disconnected");
}

/// Connection-close teardown. If the closing connection is the owning
/// teacher of a live session, the session ends exactly as if
/// `end_presentation` had been sent: peers get `presentation_ended` and the
/// session is removed. Students and whiteboard peers just unsubscribe.
///
/// The started task is read from the context, not the bound channel: a
/// teacher who moved to a whiteboard channel after starting still owns the
/// session, and it must not outlive the connection.
async fn handle_disconnect(state: &AppState, client_id: Uuid) {
    let Some(context) = state.hub.unregister(client_id).await else {
        return;
    };
    let Some(task_id) = context.started_task else {
        return;
    };
    let Some(teacher_id) = context.user_id else {
        return;
    };

    // Ownership check runs inside `end`: if another teacher replaced the
    // session in the meantime, this disconnect must not tear it down.
    if state.presentations.end(&task_id, &teacher_id).await.is_ok() {
        info!(%client_id, %task_id, "owning teacher disconnected; presentation ended");
        let ended = ServerMessage::PresentationEnded { task_id: task_id.clone() };
        state
            .hub
            .publish(&presentation::channel(&task_id), &ended, None)
            .await;
    }
}

// =============================================================================
// DISPATCH
// =============================================================================

/// Parse and process one inbound text frame; returns frames for the sender.
///
/// Split out from the socket loop so tests can exercise dispatch, fan-out,
/// and failure semantics without a live websocket.
async fn process_inbound_text(state: &AppState, client_id: Uuid, text: &str) -> Vec<ServerMessage> {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound message");
            return vec![ServerMessage::error(format!("invalid message: {e}"))];
        }
    };

    info!(%client_id, kind = msg.kind(), "ws: recv message");

    let result = match msg {
        ClientMessage::StartPresentation { task_id, teacher_id, teacher_name } => {
            handle_start(state, client_id, task_id, teacher_id, teacher_name).await
        }
        ClientMessage::JoinPresentation { task_id, student_id, student_name } => {
            handle_join(state, client_id, task_id, student_id, student_name).await
        }
        ClientMessage::SubmitAnswer {
            task_id,
            question_id,
            answer,
            student_id,
            student_name,
            slide_index,
        } => {
            let record = AnswerRecord {
                question_id,
                answer,
                student_id,
                student_name,
                slide_index,
                submitted_at: now_ms(),
            };
            handle_submit(state, task_id, record).await
        }
        ClientMessage::EndPresentation { task_id, teacher_id } => {
            handle_end(state, task_id, teacher_id).await
        }
        ClientMessage::ClearQuestionAnswers { task_id, question_id, teacher_id } => {
            handle_clear_question(state, task_id, question_id, teacher_id).await
        }
        ClientMessage::SlideChanged { task_id, slide_index, teacher_id } => {
            handle_slide_changed(state, client_id, task_id, slide_index, teacher_id).await
        }
        ClientMessage::Init { whiteboard_id } => handle_init(state, client_id, whiteboard_id).await,
        ClientMessage::Add { object } => handle_add(state, client_id, object).await,
        ClientMessage::Update { object } => handle_update(state, client_id, object).await,
        ClientMessage::Remove { object, objects } => {
            handle_remove(state, client_id, object, objects).await
        }
        ClientMessage::Clear => handle_clear(state, client_id).await,
    };

    match result {
        Ok(Outcome::Reply(reply)) => vec![reply],
        Ok(Outcome::ReplyAndPublish { reply, publish, channel }) => {
            state.hub.publish(&channel, &publish, Some(client_id)).await;
            vec![reply]
        }
        Ok(Outcome::ReplyAndPublishAll { reply, publish, channel }) => {
            state.hub.publish(&channel, &publish, None).await;
            vec![reply]
        }
        Ok(Outcome::Publish { message, channel }) => {
            state.hub.publish(&channel, &message, None).await;
            vec![]
        }
        Ok(Outcome::PublishExcludeSender { message, channel }) => {
            state.hub.publish(&channel, &message, Some(client_id)).await;
            vec![]
        }
        Err(err) => vec![err],
    }
}

// =============================================================================
// PRESENTATION HANDLERS
// =============================================================================

async fn handle_start(
    state: &AppState,
    client_id: Uuid,
    task_id: String,
    teacher_id: String,
    teacher_name: Option<String>,
) -> Result<Outcome, ServerMessage> {
    let channel = presentation::channel(&task_id);
    state
        .hub
        .tag(client_id, Role::Teacher, &teacher_id, teacher_name.as_deref())
        .await;
    state.hub.subscribe(client_id, &channel).await;
    state.hub.mark_started_task(client_id, &task_id).await;
    state.presentations.start(&task_id, &teacher_id).await;

    let started = ServerMessage::PresentationStarted { task_id, teacher_id, teacher_name };
    Ok(Outcome::ReplyAndPublish { reply: started.clone(), publish: started, channel })
}

async fn handle_join(
    state: &AppState,
    client_id: Uuid,
    task_id: String,
    student_id: String,
    student_name: Option<String>,
) -> Result<Outcome, ServerMessage> {
    let channel = presentation::channel(&task_id);

    // Subscribe before reading the snapshot: a submission landing in
    // between arrives as a broadcast instead of falling through the gap.
    let previous = state.hub.context(client_id).await.unwrap_or_default().channel;
    state.hub.subscribe(client_id, &channel).await;

    let Ok(answers) = state.presentations.answers(&task_id).await else {
        // Joining a dead task must leave the connection untouched.
        restore_channel(state, client_id, previous).await;
        return Ok(Outcome::Reply(ServerMessage::PresentationNotFound { task_id }));
    };

    state
        .hub
        .tag(client_id, Role::Student, &student_id, student_name.as_deref())
        .await;

    Ok(Outcome::ReplyAndPublish {
        reply: ServerMessage::JoinedPresentation { task_id: task_id.clone(), answers },
        publish: ServerMessage::StudentJoined { task_id, student_id, student_name },
        channel,
    })
}

async fn handle_submit(
    state: &AppState,
    task_id: String,
    record: AnswerRecord,
) -> Result<Outcome, ServerMessage> {
    let question_id = record.question_id.clone();
    state
        .presentations
        .submit_answer(&task_id, record.clone())
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    // Sender included: the submitting client sees its own answer in the
    // same broadcast form every other channel member applies.
    Ok(Outcome::ReplyAndPublishAll {
        reply: ServerMessage::AnswerSubmitted { task_id: task_id.clone(), question_id },
        publish: ServerMessage::NewAnswer { task_id: task_id.clone(), answer: record },
        channel: presentation::channel(&task_id),
    })
}

async fn handle_end(
    state: &AppState,
    task_id: String,
    teacher_id: String,
) -> Result<Outcome, ServerMessage> {
    state
        .presentations
        .end(&task_id, &teacher_id)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::Publish {
        message: ServerMessage::PresentationEnded { task_id: task_id.clone() },
        channel: presentation::channel(&task_id),
    })
}

async fn handle_clear_question(
    state: &AppState,
    task_id: String,
    question_id: String,
    teacher_id: String,
) -> Result<Outcome, ServerMessage> {
    state
        .presentations
        .clear_question(&task_id, &question_id, &teacher_id)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::Publish {
        message: ServerMessage::QuestionAnswersCleared { task_id: task_id.clone(), question_id },
        channel: presentation::channel(&task_id),
    })
}

async fn handle_slide_changed(
    state: &AppState,
    client_id: Uuid,
    task_id: String,
    slide_index: i64,
    teacher_id: String,
) -> Result<Outcome, ServerMessage> {
    // The sender must already hold the teacher role; a slide-change message
    // never promotes a connection.
    let context = state.hub.context(client_id).await.unwrap_or_default();
    if context.role != Some(Role::Teacher) {
        return Err(ServerMessage::Error {
            code: E_NOT_TEACHER.to_string(),
            message: "slide_changed requires a teacher connection".to_string(),
        });
    }

    state
        .presentations
        .verify_owner(&task_id, &teacher_id)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::Publish {
        message: ServerMessage::SlideChanged { task_id: task_id.clone(), slide_index },
        channel: presentation::channel(&task_id),
    })
}

// =============================================================================
// WHITEBOARD HANDLERS
// =============================================================================

/// Whiteboard id and channel the connection is bound to, or `E_NOT_BOUND`.
/// There is no implicit default whiteboard: mutations before `init` fail.
async fn bound_whiteboard(state: &AppState, client_id: Uuid) -> Result<(String, String), ServerMessage> {
    let context = state.hub.context(client_id).await.unwrap_or_default();
    let Some(board) = context
        .channel
        .as_deref()
        .and_then(whiteboard::board_from_channel)
    else {
        return Err(ServerMessage::error_from(&WhiteboardError::NotBound));
    };
    let board = board.to_string();
    let channel = whiteboard::channel(&board);
    Ok((board, channel))
}

async fn handle_init(
    state: &AppState,
    client_id: Uuid,
    whiteboard_id: String,
) -> Result<Outcome, ServerMessage> {
    // Subscribe before reading the snapshot: a peer mutation landing in
    // between arrives as a broadcast instead of falling through the gap.
    // Re-applying an object already in the snapshot is safe — every
    // mutation is an upsert or a delete by id.
    let previous = state.hub.context(client_id).await.unwrap_or_default().channel;
    state
        .hub
        .subscribe(client_id, &whiteboard::channel(&whiteboard_id))
        .await;

    match state.whiteboards.snapshot(state.store.as_ref(), &whiteboard_id).await {
        Ok(objects) => Ok(Outcome::Reply(ServerMessage::WhiteboardState { whiteboard_id, objects })),
        Err(e) => {
            // Failed read: the connection keeps its previous binding.
            restore_channel(state, client_id, previous).await;
            Err(ServerMessage::error_from(&e))
        }
    }
}

async fn handle_add(
    state: &AppState,
    client_id: Uuid,
    object: WhiteboardObject,
) -> Result<Outcome, ServerMessage> {
    let (board, channel) = bound_whiteboard(state, client_id).await?;
    // Persist before broadcast: a peer reconnecting right after the fan-out
    // must see this object in its snapshot.
    state
        .whiteboards
        .add(state.store.as_ref(), &board, &object)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::PublishExcludeSender { message: ServerMessage::Add { object }, channel })
}

async fn handle_update(
    state: &AppState,
    client_id: Uuid,
    object: WhiteboardObject,
) -> Result<Outcome, ServerMessage> {
    let (board, channel) = bound_whiteboard(state, client_id).await?;
    state
        .whiteboards
        .update(state.store.as_ref(), &board, &object)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::PublishExcludeSender { message: ServerMessage::Modify { object }, channel })
}

async fn handle_remove(
    state: &AppState,
    client_id: Uuid,
    object: Option<ObjectRef>,
    objects: Option<Vec<ObjectRef>>,
) -> Result<Outcome, ServerMessage> {
    let (board, channel) = bound_whiteboard(state, client_id).await?;

    let mut refs: Vec<ObjectRef> = objects.unwrap_or_default();
    if let Some(single) = object {
        refs.push(single);
    }
    if refs.is_empty() {
        return Err(ServerMessage::error("remove requires `object` or `objects`"));
    }

    let ids: Vec<String> = refs.iter().map(|r| r.id.clone()).collect();
    state
        .whiteboards
        .remove(state.store.as_ref(), &board, &ids)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::PublishExcludeSender { message: ServerMessage::Delete { objects: refs }, channel })
}

async fn handle_clear(state: &AppState, client_id: Uuid) -> Result<Outcome, ServerMessage> {
    let (board, channel) = bound_whiteboard(state, client_id).await?;
    state
        .whiteboards
        .clear(state.store.as_ref(), &board)
        .await
        .map_err(|e| ServerMessage::error_from(&e))?;

    Ok(Outcome::PublishExcludeSender {
        message: ServerMessage::Clear { whiteboard_id: board },
        channel,
    })
}

// =============================================================================
// HELPERS
// =============================================================================

/// Roll a connection back to the channel it was in before a failed bind.
async fn restore_channel(state: &AppState, client_id: Uuid, previous: Option<String>) {
    match previous {
        Some(previous) => state.hub.subscribe(client_id, &previous).await,
        None => state.hub.unsubscribe(client_id).await,
    }
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize message");
            return Err(());
        }
    };
    if let ServerMessage::Error { code, message } = message {
        warn!(code, message, "ws: send error frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
