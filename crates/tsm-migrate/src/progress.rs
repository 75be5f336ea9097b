//! Progress cursor store
//!
//! Persists, per (category, target, packet) key, the identifier of the
//! last file whose batches were all durably acknowledged. A missing
//! cursor means "never completed anything for this key; start from the
//! newest file". The orchestrator only calls `set` after the whole file
//! is ingested, so a crash between batches re-runs the file rather than
//! skipping it. Single writer per key; concurrent runs against the same
//! key are not supported.

use crate::model::CursorKey;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;
use tsm_common::MigrateError;

/// Cursor get/set seam
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Last fully ingested file id for the key, or `None` if no file for
    /// this key has ever completed
    async fn get(&self, key: &CursorKey) -> tsm_common::Result<Option<String>>;

    /// Record `file_id` as fully ingested for the key
    async fn set(&self, key: &CursorKey, file_id: &str) -> tsm_common::Result<()>;
}

/// Redis-backed cursor store
#[derive(Clone)]
pub struct RedisProgressStore {
    conn: ConnectionManager,
    scope: String,
}

impl RedisProgressStore {
    /// Connect to Redis and scope all keys under `scope`
    pub async fn connect(url: &str, scope: &str) -> tsm_common::Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| MigrateError::ProgressStore(format!("bad redis url: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| MigrateError::ProgressStore(format!("redis connect: {}", e)))?;
        Ok(Self {
            conn,
            scope: scope.to_string(),
        })
    }
}

#[async_trait]
impl ProgressStore for RedisProgressStore {
    async fn get(&self, key: &CursorKey) -> tsm_common::Result<Option<String>> {
        let store_key = key.store_key(&self.scope);
        let mut conn = self.conn.clone();
        let value: Option<String> = conn
            .get(&store_key)
            .await
            .map_err(|e| MigrateError::ProgressStore(format!("get {}: {}", store_key, e)))?;
        Ok(value)
    }

    async fn set(&self, key: &CursorKey, file_id: &str) -> tsm_common::Result<()> {
        let store_key = key.store_key(&self.scope);
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(&store_key, file_id)
            .await
            .map_err(|e| MigrateError::ProgressStore(format!("set {}: {}", store_key, e)))?;
        debug!(key = %store_key, file_id = %file_id, "Cursor advanced");
        Ok(())
    }
}

/// In-memory cursor store for tests and dry runs
#[derive(Default)]
pub struct MemoryProgressStore {
    cursors: Mutex<HashMap<String, String>>,
}

impl MemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all cursors (tests)
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ProgressStore for MemoryProgressStore {
    async fn get(&self, key: &CursorKey) -> tsm_common::Result<Option<String>> {
        let cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        Ok(cursors.get(&key.store_key("mem")).cloned())
    }

    async fn set(&self, key: &CursorKey, file_id: &str) -> tsm_common::Result<()> {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        cursors.insert(key.store_key("mem"), file_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LogCategory;

    fn key() -> CursorKey {
        CursorKey {
            category: LogCategory::Telemetry,
            target: "INST".to_string(),
            packet: "HEALTH".to_string(),
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryProgressStore::new();
        assert_eq!(store.get(&key()).await.unwrap(), None);

        store.set(&key(), "20250101120000000000000").await.unwrap();
        assert_eq!(
            store.get(&key()).await.unwrap(),
            Some("20250101120000000000000".to_string())
        );
    }

    #[tokio::test]
    async fn test_memory_store_keys_are_independent() {
        let store = MemoryProgressStore::new();
        let other = CursorKey {
            category: LogCategory::Command,
            ..key()
        };
        store.set(&key(), "a").await.unwrap();
        assert_eq!(store.get(&other).await.unwrap(), None);
    }
}
