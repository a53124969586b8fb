//! Keyed local cache — the only client component that touches durable
//! storage.
//!
//! Absence of a key is a normal result, never an error. Everything else
//! on the client is written against the `KeyedCache` trait, so tests run
//! against the memory backend and production uses the libSQL one.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::SyncError;

/// Asynchronous key/value store for client state.
#[async_trait]
pub trait KeyedCache: Send + Sync {
    /// Read a value; `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Value>, SyncError>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &str, value: &Value) -> Result<(), SyncError>;

    /// Delete a key. Deleting an absent key is a no-op.
    async fn remove(&self, key: &str) -> Result<(), SyncError>;
}

/// In-memory cache backend (tests, ephemeral sessions).
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyedCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, SyncError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), SyncError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Durable cache backend on a local libSQL database, a single `kv` table.
pub struct LibSqlCache {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
}

impl LibSqlCache {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: &std::path::Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SyncError::Cache(format!("Failed to create cache directory: {e}")))?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| SyncError::Cache(format!("Failed to open cache database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| SyncError::Cache(format!("Failed to connect to cache: {e}")))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            (),
        )
        .await
        .map_err(|e| SyncError::Cache(format!("Failed to create kv table: {e}")))?;
        Ok(Self { db, conn })
    }
}

#[async_trait]
impl KeyedCache for LibSqlCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, SyncError> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv WHERE key = ?1", libsql::params![key])
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let raw: String = row.get(0).map_err(|e| SyncError::Cache(e.to_string()))?;
                let value = serde_json::from_str(&raw)
                    .map_err(|e| SyncError::Cache(format!("corrupt cache entry {key:?}: {e}")))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(SyncError::Cache(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), SyncError> {
        self.conn
            .execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                libsql::params![key, value.to_string()],
            )
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), SyncError> {
        self.conn
            .execute("DELETE FROM kv WHERE key = ?1", libsql::params![key])
            .await
            .map_err(|e| SyncError::Cache(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn memory_cache_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("missing").await.unwrap(), None);

        cache.set("k", &json!({"a": 1})).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!({"a": 1})));

        cache.remove("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        // Removing again is fine.
        cache.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn libsql_cache_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let cache = LibSqlCache::open(&path).await.unwrap();
            cache
                .set("task-queue-j1", &json!([{"id": "a", "done": false}]))
                .await
                .unwrap();
        }

        let cache = LibSqlCache::open(&path).await.unwrap();
        assert_eq!(
            cache.get("task-queue-j1").await.unwrap(),
            Some(json!([{"id": "a", "done": false}]))
        );
    }
}
