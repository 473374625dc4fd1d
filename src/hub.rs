//! Connection hub — per-client outbound queues, contexts, and channels.
//!
//! DESIGN
//! ======
//! The hub is the connection multiplexer both coordinators sit behind. Each
//! websocket connection registers an mpsc sender keyed by its `client_id`;
//! named channels group connections for broadcast. Session metadata (role,
//! user id, bound channel) lives in an explicit [`ConnectionContext`] side
//! table keyed by `client_id`, never stashed on the transport object.
//!
//! Delivery is best-effort `try_send`: a slow client drops frames instead of
//! stalling the hub. Joiners recover missed broadcasts via snapshots.

use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::protocol::ServerMessage;

// =============================================================================
// TYPES
// =============================================================================

/// Role a connection was tagged with when it joined a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Teacher,
    Student,
}

/// Per-connection session metadata. Created empty on register, populated by
/// the first session-joining message, dropped on unregister.
#[derive(Debug, Clone, Default)]
pub struct ConnectionContext {
    /// Channel this connection is currently subscribed to, if any.
    pub channel: Option<String>,
    /// Task whose presentation this connection started, if any. Survives
    /// channel moves so disconnect teardown still finds the session.
    pub started_task: Option<String>,
    pub role: Option<Role>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Default)]
struct HubInner {
    /// `client_id` -> sender for outgoing messages.
    clients: HashMap<Uuid, mpsc::Sender<ServerMessage>>,
    contexts: HashMap<Uuid, ConnectionContext>,
    /// Channel name -> subscribed client ids.
    channels: HashMap<String, HashSet<Uuid>>,
}

/// The hub itself. One per process, owned by `AppState`.
pub struct Hub {
    inner: RwLock<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self { inner: RwLock::new(HubInner::default()) }
    }

    /// Register a new connection with an empty context.
    pub async fn register(&self, client_id: Uuid, tx: mpsc::Sender<ServerMessage>) {
        let mut inner = self.inner.write().await;
        inner.clients.insert(client_id, tx);
        inner.contexts.insert(client_id, ConnectionContext::default());
    }

    /// Remove a connection: sender, context, and any channel membership.
    /// Returns the final context so the caller can run disconnect teardown.
    pub async fn unregister(&self, client_id: Uuid) -> Option<ConnectionContext> {
        let mut inner = self.inner.write().await;
        inner.clients.remove(&client_id);
        let context = inner.contexts.remove(&client_id);
        if let Some(channel) = context.as_ref().and_then(|c| c.channel.clone()) {
            remove_from_channel(&mut inner, &channel, client_id);
        }
        context
    }
}

// =============================================================================
// CHANNELS & CONTEXT
// =============================================================================

impl Hub {
    /// Subscribe a connection to a channel, leaving its previous channel
    /// (if any) first. A connection is in at most one channel at a time.
    pub async fn subscribe(&self, client_id: Uuid, channel: &str) {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&client_id) {
            return;
        }
        let previous = inner
            .contexts
            .get(&client_id)
            .and_then(|c| c.channel.clone());
        if previous.as_deref() == Some(channel) {
            return;
        }
        if let Some(previous) = previous {
            remove_from_channel(&mut inner, &previous, client_id);
        }
        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(client_id);
        if let Some(context) = inner.contexts.get_mut(&client_id) {
            context.channel = Some(channel.to_string());
        }
    }

    /// Remove a connection from its current channel, if any.
    pub async fn unsubscribe(&self, client_id: Uuid) {
        let mut inner = self.inner.write().await;
        let previous = inner
            .contexts
            .get_mut(&client_id)
            .and_then(|c| c.channel.take());
        if let Some(previous) = previous {
            remove_from_channel(&mut inner, &previous, client_id);
        }
    }

    /// Record the task whose presentation this connection started.
    pub async fn mark_started_task(&self, client_id: Uuid, task_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(context) = inner.contexts.get_mut(&client_id) {
            context.started_task = Some(task_id.to_string());
        }
    }

    /// Tag a connection with role and identity.
    pub async fn tag(&self, client_id: Uuid, role: Role, user_id: &str, display_name: Option<&str>) {
        let mut inner = self.inner.write().await;
        if let Some(context) = inner.contexts.get_mut(&client_id) {
            context.role = Some(role);
            context.user_id = Some(user_id.to_string());
            context.display_name = display_name.map(ToString::to_string);
        }
    }

    /// Snapshot of a connection's context.
    pub async fn context(&self, client_id: Uuid) -> Option<ConnectionContext> {
        let inner = self.inner.read().await;
        inner.contexts.get(&client_id).cloned()
    }
}

fn remove_from_channel(inner: &mut HubInner, channel: &str, client_id: Uuid) {
    if let Some(members) = inner.channels.get_mut(channel) {
        members.remove(&client_id);
        if members.is_empty() {
            inner.channels.remove(channel);
        }
    }
}

// =============================================================================
// DELIVERY
// =============================================================================

impl Hub {
    /// Deliver a message to one connection. Best-effort.
    pub async fn send(&self, client_id: Uuid, message: ServerMessage) {
        let inner = self.inner.read().await;
        if let Some(tx) = inner.clients.get(&client_id) {
            // Best-effort: if the client's queue is full, drop the frame.
            let _ = tx.try_send(message);
        }
    }

    /// Publish a message to every connection in a channel, optionally
    /// excluding the sender.
    pub async fn publish(&self, channel: &str, message: &ServerMessage, exclude: Option<Uuid>) {
        let inner = self.inner.read().await;
        let Some(members) = inner.channels.get(channel) else {
            return;
        };
        for client_id in members {
            if exclude == Some(*client_id) {
                continue;
            }
            if let Some(tx) = inner.clients.get(client_id) {
                let _ = tx.try_send(message.clone());
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
