//! Durable object store — the single source of truth for whiteboards.
//!
//! DESIGN
//! ======
//! The whiteboard coordinator never caches object content; every mutation
//! goes through this boundary and every snapshot is read back from it.
//! `ObjectStore` is a trait so tests can swap in an in-memory or failing
//! store without a live database.
//!
//! `list` returns objects in creation order, which makes the stored set a
//! replayable log for newly joining peers.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::protocol::ErrorCode;
use crate::state::WhiteboardObject;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE",
        }
    }
}

/// Narrow persistence contract consumed by the whiteboard coordinator.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All objects for a whiteboard, in creation order.
    async fn list(&self, whiteboard_id: &str) -> Result<Vec<WhiteboardObject>, StoreError>;

    /// Insert or fully replace one object (upsert on the composite key).
    async fn put(&self, whiteboard_id: &str, object: &WhiteboardObject) -> Result<(), StoreError>;

    /// Delete one object by id. Deleting a missing id is not an error.
    async fn delete(&self, whiteboard_id: &str, object_id: &str) -> Result<(), StoreError>;

    /// Delete many objects by id.
    async fn delete_many(&self, whiteboard_id: &str, object_ids: &[String]) -> Result<(), StoreError>;

    /// Wipe every object on a whiteboard.
    async fn delete_all(&self, whiteboard_id: &str) -> Result<(), StoreError>;
}

// =============================================================================
// POSTGRES IMPLEMENTATION
// =============================================================================

/// `ObjectStore` backed by the `whiteboard_objects` table.
pub struct PgObjectStore {
    pool: PgPool,
}

impl PgObjectStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ObjectStore for PgObjectStore {
    async fn list(&self, whiteboard_id: &str) -> Result<Vec<WhiteboardObject>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, serde_json::Value)>(
            "SELECT object_id, kind, data FROM whiteboard_objects \
             WHERE whiteboard_id = $1 ORDER BY created_at ASC, object_id ASC",
        )
        .bind(whiteboard_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, kind, data)| WhiteboardObject { id, kind, data })
            .collect())
    }

    async fn put(&self, whiteboard_id: &str, object: &WhiteboardObject) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO whiteboard_objects (whiteboard_id, object_id, kind, data, updated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (whiteboard_id, object_id) DO UPDATE SET \
                 kind = EXCLUDED.kind, data = EXCLUDED.data, updated_at = now()",
        )
        .bind(whiteboard_id)
        .bind(&object.id)
        .bind(&object.kind)
        .bind(&object.data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, whiteboard_id: &str, object_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM whiteboard_objects WHERE whiteboard_id = $1 AND object_id = $2")
            .bind(whiteboard_id)
            .bind(object_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_many(&self, whiteboard_id: &str, object_ids: &[String]) -> Result<(), StoreError> {
        if object_ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM whiteboard_objects WHERE whiteboard_id = $1 AND object_id = ANY($2)")
            .bind(whiteboard_id)
            .bind(object_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self, whiteboard_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM whiteboard_objects WHERE whiteboard_id = $1")
            .bind(whiteboard_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_helpers::{MemoryStore, dummy_object};

    #[tokio::test]
    async fn memory_store_put_is_upsert() {
        let store = MemoryStore::new();
        let mut obj = dummy_object("o1");
        store.put("wb1", &obj).await.unwrap();

        obj.data = serde_json::json!({"text": "edited"});
        store.put("wb1", &obj).await.unwrap();

        let objects = store.list("wb1").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].data, serde_json::json!({"text": "edited"}));
    }

    #[tokio::test]
    async fn memory_store_preserves_creation_order() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.put("wb1", &dummy_object(id)).await.unwrap();
        }
        // Updating "a" must not move it to the end of the replay order.
        store.put("wb1", &dummy_object("a")).await.unwrap();

        let ids: Vec<_> = store
            .list("wb1")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn memory_store_deletes_are_scoped_to_board() {
        let store = MemoryStore::new();
        store.put("wb1", &dummy_object("o1")).await.unwrap();
        store.put("wb2", &dummy_object("o1")).await.unwrap();

        store.delete("wb1", "o1").await.unwrap();
        assert!(store.list("wb1").await.unwrap().is_empty());
        assert_eq!(store.list("wb2").await.unwrap().len(), 1);

        store.delete_all("wb2").await.unwrap();
        assert!(store.list("wb2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn memory_store_delete_many() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store.put("wb1", &dummy_object(id)).await.unwrap();
        }
        store
            .delete_many("wb1", &["a".to_string(), "c".to_string()])
            .await
            .unwrap();
        let ids: Vec<_> = store
            .list("wb1")
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.id)
            .collect();
        assert_eq!(ids, ["b"]);
    }
}
