//! SQLite cache store
//!
//! Keeps entries in a single table so several processes (the HTTP server and
//! the CLI) can share one cache file and invalidate each other's keys.

use super::{CacheEntry, CacheError, CacheResult, CacheStore, KeyPattern};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Cache store backed by a SQLite database file
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    /// Open or create a cache database
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CacheError::Store(format!("{}: {}", parent.display(), e)))?;
        }

        tracing::info!(path = %path.display(), "Opening cache database");

        let conn = Connection::open(&path)?;
        // WAL lets the server keep reading while the CLI invalidates
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Open a private in-memory database
    pub fn in_memory() -> CacheResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        })
    }

    fn init_schema(conn: &Connection) -> CacheResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_entries_expires ON cache_entries(expires_at);
            "#,
        )?;
        Ok(())
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the connection on the blocking thread pool
    async fn with_conn<T, F>(&self, f: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> CacheResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| CacheError::Store("Cache connection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| CacheError::Store(format!("Cache task failed: {}", e)))?
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        let key = key.to_string();
        let row: Option<(String, i64, i64)> = self
            .with_conn(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value, created_at, expires_at FROM cache_entries WHERE key = ?",
                        params![key],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?)
            })
            .await?;

        match row {
            Some((value, created_at, expires_at)) => Ok(Some(CacheEntry {
                value: serde_json::from_str(&value)?,
                created_at: from_millis(created_at),
                expires_at: from_millis(expires_at),
            })),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, entry: CacheEntry) -> CacheResult<()> {
        let key = key.to_string();
        let value = serde_json::to_string(&entry.value)?;
        let created_at = entry.created_at.timestamp_millis();
        let expires_at = entry.expires_at.timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO cache_entries (key, value, created_at, expires_at)
                 VALUES (?, ?, ?, ?)",
                params![key, value, created_at, expires_at],
            )?;
            Ok(())
        })
        .await
    }

    async fn remove_matching(&self, pattern: &KeyPattern) -> CacheResult<usize> {
        let pattern = pattern.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;

            let keys: Vec<String> = {
                let mut stmt = tx.prepare("SELECT key FROM cache_entries")?;
                let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
                let mut keys = Vec::new();
                for key in rows {
                    let key = key?;
                    if pattern.matches(&key) {
                        keys.push(key);
                    }
                }
                keys
            };

            for key in &keys {
                tx.execute("DELETE FROM cache_entries WHERE key = ?", params![key])?;
            }
            tx.commit()?;

            Ok(keys.len())
        })
        .await
    }

    async fn remove_expired(&self, now: DateTime<Utc>) -> CacheResult<usize> {
        let now = now.timestamp_millis();
        self.with_conn(move |conn| {
            Ok(conn.execute("DELETE FROM cache_entries WHERE expires_at <= ?", params![now])?)
        })
        .await
    }

    async fn len(&self) -> CacheResult<usize> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_creation() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("cache.db");

        let store = SqliteStore::open(&path).unwrap();
        assert!(store.path().exists());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_and_load() {
        let store = SqliteStore::in_memory().unwrap();
        let now = DateTime::<Utc>::from_timestamp_millis(1_725_000_000_000).unwrap();
        let entry = CacheEntry::new(
            json!({ "totalStudents": 420, "genderDistribution": { "boys": 200, "girls": 220 } }),
            now,
            Duration::from_secs(300),
        );

        store.set("school:1:stats:2024:1:all", entry.clone()).await.unwrap();

        let loaded = store.get("school:1:stats:2024:1:all").await.unwrap().unwrap();
        assert_eq!(loaded, entry);
        assert!(store.get("school:2:stats:2024:1:all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_entries_shared_between_handles() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.db");
        let now = Utc::now();

        let writer = SqliteStore::open(&path).unwrap();
        writer
            .set(
                "region:3:stats:all:all:all",
                CacheEntry::new(json!(1), now, Duration::from_secs(60)),
            )
            .await
            .unwrap();

        let other = SqliteStore::open(&path).unwrap();
        let removed = other
            .remove_matching(&KeyPattern::new("region:*").unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(writer.get("region:3:stats:all:all:all").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_remove_expired() {
        let store = SqliteStore::in_memory().unwrap();
        let now = Utc::now();

        store
            .set("old", CacheEntry::new(json!(1), now, Duration::ZERO))
            .await
            .unwrap();
        store
            .set("fresh", CacheEntry::new(json!(2), now, Duration::from_secs(60)))
            .await
            .unwrap();

        assert_eq!(store.remove_expired(now).await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("fresh").await.unwrap().is_some());
    }
}
