//! Whiteboard coordinator — durable-store mediation and apply ordering.
//!
//! DESIGN
//! ======
//! The durable store is the single source of truth. This coordinator holds
//! no object cache: it serializes mutations per whiteboard, writes through
//! to the store, and lets the dispatch layer broadcast only after the write
//! succeeds. A failed or timed-out write surfaces as an error to the sender
//! and nothing is broadcast, so peers never believe in state the store does
//! not hold.
//!
//! Per-whiteboard ordering comes from a guard mutex held across each
//! mutation. Guards are created on first touch and kept for the process
//! lifetime; the map is bounded by the number of distinct whiteboards used.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tracing::error;

use crate::protocol::ErrorCode;
use crate::services::store::{ObjectStore, StoreError};
use crate::state::WhiteboardObject;

// =============================================================================
// TYPES
// =============================================================================

const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

fn store_timeout_ms() -> u64 {
    std::env::var("STORE_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_STORE_TIMEOUT_MS)
}

#[derive(Debug, thiserror::Error)]
pub enum WhiteboardError {
    #[error("connection is not bound to a whiteboard; send init first")]
    NotBound,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("durable store timed out after {0} ms")]
    Timeout(u64),
}

impl ErrorCode for WhiteboardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotBound => "E_NOT_BOUND",
            Self::Store(e) => e.error_code(),
            Self::Timeout(_) => "E_STORE",
        }
    }
}

// =============================================================================
// COORDINATOR
// =============================================================================

/// Mediates whiteboard mutations. One per process, owned by `AppState`.
pub struct WhiteboardCoordinator {
    guards: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

/// Broadcast channel name for a whiteboard.
#[must_use]
pub fn channel(whiteboard_id: &str) -> String {
    format!("whiteboard:{whiteboard_id}")
}

/// Inverse of [`channel`].
#[must_use]
pub fn board_from_channel(channel: &str) -> Option<&str> {
    channel.strip_prefix("whiteboard:")
}

impl Default for WhiteboardCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl WhiteboardCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self { guards: RwLock::new(HashMap::new()) }
    }

    async fn guard(&self, whiteboard_id: &str) -> Arc<Mutex<()>> {
        let mut guards = self.guards.write().await;
        guards
            .entry(whiteboard_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Full object snapshot, in creation order. Sent to a connection that
    /// binds via `init` so it does not depend on past broadcasts.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read fails or times out.
    pub async fn snapshot(
        &self,
        store: &dyn ObjectStore,
        whiteboard_id: &str,
    ) -> Result<Vec<WhiteboardObject>, WhiteboardError> {
        timed(store.list(whiteboard_id)).await
    }

    /// Persist a newly created object. The write completes before the
    /// caller may broadcast.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails or times out.
    pub async fn add(
        &self,
        store: &dyn ObjectStore,
        whiteboard_id: &str,
        object: &WhiteboardObject,
    ) -> Result<(), WhiteboardError> {
        let guard = self.guard(whiteboard_id).await;
        let _ordering = guard.lock().await;
        timed(store.put(whiteboard_id, object)).await
    }

    /// Persist a full replacement of an object's stored data. An unknown id
    /// upserts: `update` and `add` share the same durable write, so a peer
    /// whose `add` broadcast was dropped still converges on the next edit.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write fails or times out.
    pub async fn update(
        &self,
        store: &dyn ObjectStore,
        whiteboard_id: &str,
        object: &WhiteboardObject,
    ) -> Result<(), WhiteboardError> {
        let guard = self.guard(whiteboard_id).await;
        let _ordering = guard.lock().await;
        timed(store.put(whiteboard_id, object)).await
    }

    /// Delete one or many objects by id. Missing ids are not an error.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails or times out.
    pub async fn remove(
        &self,
        store: &dyn ObjectStore,
        whiteboard_id: &str,
        object_ids: &[String],
    ) -> Result<(), WhiteboardError> {
        let guard = self.guard(whiteboard_id).await;
        let _ordering = guard.lock().await;
        match object_ids {
            [] => Ok(()),
            [only] => timed(store.delete(whiteboard_id, only)).await,
            many => timed(store.delete_many(whiteboard_id, many)).await,
        }
    }

    /// Wipe every object on a whiteboard.
    ///
    /// # Errors
    ///
    /// Returns a store error if the delete fails or times out.
    pub async fn clear(
        &self,
        store: &dyn ObjectStore,
        whiteboard_id: &str,
    ) -> Result<(), WhiteboardError> {
        let guard = self.guard(whiteboard_id).await;
        let _ordering = guard.lock().await;
        timed(store.delete_all(whiteboard_id)).await
    }
}

/// Bound every store call so a stalled backend surfaces an error frame
/// instead of hanging the connection.
async fn timed<T>(
    fut: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, WhiteboardError> {
    let ms = store_timeout_ms();
    match tokio::time::timeout(Duration::from_millis(ms), fut).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            error!(timeout_ms = ms, "durable store call timed out");
            Err(WhiteboardError::Timeout(ms))
        }
    }
}

#[cfg(test)]
#[path = "whiteboard_test.rs"]
mod tests;
