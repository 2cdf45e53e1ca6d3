//! Key/value stores behind the TTL cache.

use async_trait::async_trait;
use lru::LruCache;
use rusqlite::{params, OptionalExtension};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::db::Db;
use crate::error::{ImpactError, Result};

/// Opaque persistent store: blobs by key, last writer wins.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, blob: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Thread-safe in-process LRU store.
///
/// Bounded so a long-lived server does not grow without limit; evicted
/// entries are simply refetched (or reloaded from disk when layered).
pub struct MemoryStore {
    cache: Mutex<LruCache<String, String>>,
}

impl MemoryStore {
    /// Create a store holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(cap)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, String>> {
        // a panic mid-put cannot leave the map half-written, so a poisoned lock is still usable
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, blob: &str) -> Result<()> {
        self.lock().put(key.to_string(), blob.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.lock().pop(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}

/// SQLite-backed store, scoped per tenant/installation.
pub struct SqliteStore {
    db: Db,
    scope: String,
}

impl SqliteStore {
    /// `db` must already have the `kv_store` migration applied.
    pub fn new(db: Db, scope: impl Into<String>) -> Self {
        Self {
            db,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Number of entries stored under this scope.
    pub async fn count(&self) -> Result<usize> {
        let scope = self.scope.clone();
        self.db
            .with_connection(move |conn| {
                let n: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM kv_store WHERE scope = ?1",
                    params![scope],
                    |row| row.get(0),
                )?;
                Ok::<usize, ImpactError>(n.max(0) as usize)
            })
            .await
    }
}

#[async_trait]
impl KvStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let scope = self.scope.clone();
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                let blob = conn
                    .query_row(
                        "SELECT blob FROM kv_store WHERE scope = ?1 AND key = ?2",
                        params![scope, key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok::<Option<String>, ImpactError>(blob)
            })
            .await
    }

    async fn set(&self, key: &str, blob: &str) -> Result<()> {
        let scope = self.scope.clone();
        let key = key.to_string();
        let blob = blob.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "INSERT INTO kv_store (scope, key, blob, updated_at) \
                     VALUES (?1, ?2, ?3, CURRENT_TIMESTAMP) \
                     ON CONFLICT(scope, key) DO UPDATE SET blob = excluded.blob, updated_at = excluded.updated_at",
                    params![scope, key, blob],
                )?;
                Ok::<(), ImpactError>(())
            })
            .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let scope = self.scope.clone();
        let key = key.to_string();
        self.db
            .with_connection(move |conn| {
                conn.execute(
                    "DELETE FROM kv_store WHERE scope = ?1 AND key = ?2",
                    params![scope, key],
                )?;
                Ok::<(), ImpactError>(())
            })
            .await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let scope = self.scope.clone();
        let prefix = prefix.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key FROM kv_store WHERE scope = ?1 AND substr(key, 1, length(?2)) = ?2 ORDER BY key",
                )?;
                let keys = stmt
                    .query_map(params![scope, prefix], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok::<Vec<String>, ImpactError>(keys)
            })
            .await
    }
}

/// Memory in front of a persistent store. Reads promote disk hits into
/// memory; writes and deletes go to both layers.
pub struct LayeredStore {
    memory: MemoryStore,
    disk: Arc<dyn KvStore>,
}

impl LayeredStore {
    pub fn new(memory: MemoryStore, disk: Arc<dyn KvStore>) -> Self {
        Self { memory, disk }
    }
}

#[async_trait]
impl KvStore for LayeredStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        if let Some(blob) = self.memory.get(key).await? {
            return Ok(Some(blob));
        }
        let blob = self.disk.get(key).await?;
        if let Some(ref b) = blob {
            self.memory.set(key, b).await?;
        }
        Ok(blob)
    }

    async fn set(&self, key: &str, blob: &str) -> Result<()> {
        self.memory.set(key, blob).await?;
        self.disk.set(key, blob).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.memory.delete(key).await?;
        self.disk.delete(key).await
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        // disk holds everything memory holds
        self.disk.keys(prefix).await
    }
}
