use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::KvStore;
use crate::config::CacheConfig;

/// Source of "now" for expiry checks, in epoch milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Hand-driven clock for expiry tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self { now: AtomicI64::new(start_ms) }
    }

    pub fn set(&self, ms: i64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// A keyed cache family: key prefix, schema version and TTL.
///
/// Bumping a family's version invalidates every stored entry of that family
/// on its next read, whatever its age.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFamily {
    pub prefix: &'static str,
    pub version: &'static str,
    pub ttl: Duration,
}

impl CacheFamily {
    pub const IDENTITY_VERSION: &'static str = "2";
    pub const ASSET_VERSION: &'static str = "1";
    pub const RELATIONSHIPS_VERSION: &'static str = "1";
    pub const SEARCH_VERSION: &'static str = "1";
    pub const ASSET_TYPES_VERSION: &'static str = "1";

    pub fn new(prefix: &'static str, version: &'static str, ttl: Duration) -> Self {
        Self { prefix, version, ttl }
    }

    pub fn identity(ttl: Duration) -> Self {
        Self::new("identity", Self::IDENTITY_VERSION, ttl)
    }

    pub fn asset(ttl: Duration) -> Self {
        Self::new("asset", Self::ASSET_VERSION, ttl)
    }

    pub fn relationships(ttl: Duration) -> Self {
        Self::new("relationships", Self::RELATIONSHIPS_VERSION, ttl)
    }

    pub fn search(ttl: Duration) -> Self {
        Self::new("search", Self::SEARCH_VERSION, ttl)
    }

    pub fn asset_types(ttl: Duration) -> Self {
        Self::new("asset_types", Self::ASSET_TYPES_VERSION, ttl)
    }

    pub fn key(&self, id: &str) -> String {
        format!("{}:{}", self.prefix, id)
    }

    fn key_prefix(&self) -> String {
        format!("{}:", self.prefix)
    }
}

/// The five families the engine uses, with TTLs from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheFamilies {
    pub identity: CacheFamily,
    pub asset: CacheFamily,
    pub relationships: CacheFamily,
    pub search: CacheFamily,
    pub asset_types: CacheFamily,
}

impl CacheFamilies {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            identity: CacheFamily::identity(Duration::from_secs(config.identity_ttl_secs)),
            asset: CacheFamily::asset(Duration::from_secs(config.asset_ttl_secs)),
            relationships: CacheFamily::relationships(Duration::from_secs(config.asset_ttl_secs)),
            search: CacheFamily::search(Duration::from_secs(config.search_ttl_secs)),
            asset_types: CacheFamily::asset_types(Duration::from_secs(config.asset_type_ttl_secs)),
        }
    }

    pub fn all(&self) -> [&CacheFamily; 5] {
        [
            &self.identity,
            &self.asset,
            &self.relationships,
            &self.search,
            &self.asset_types,
        ]
    }

    pub fn by_prefix(&self, prefix: &str) -> Option<&CacheFamily> {
        self.all().into_iter().find(|f| f.prefix == prefix)
    }
}

impl Default for CacheFamilies {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Bounded key for free-text inputs such as filter expressions.
pub fn digest_key(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    version: String,
    timestamp_ms: i64,
    payload: Value,
}

/// Counters since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expired: u64,
    pub version_mismatches: u64,
    pub corrupt: u64,
    pub store_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    version_mismatches: AtomicU64,
    corrupt: AtomicU64,
    store_errors: AtomicU64,
}

enum Verdict {
    Valid(Value),
    Expired,
    VersionMismatch,
    Corrupt,
}

/// Versioned TTL cache over a [`KvStore`].
#[derive(Clone)]
pub struct TtlCache {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    counters: Arc<Counters>,
}

impl TtlCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    fn judge(&self, family: &CacheFamily, blob: &str) -> Verdict {
        let envelope: Envelope = match serde_json::from_str(blob) {
            Ok(e) => e,
            Err(_) => return Verdict::Corrupt,
        };
        if envelope.version != family.version {
            return Verdict::VersionMismatch;
        }
        let age_ms = self.clock.now_ms() - envelope.timestamp_ms;
        if age_ms >= family.ttl.as_millis() as i64 {
            return Verdict::Expired;
        }
        Verdict::Valid(envelope.payload)
    }

    /// Valid payload for `id`, or `None`. Invalid entries are evicted here.
    pub async fn get<T: DeserializeOwned>(&self, family: &CacheFamily, id: &str) -> Option<T> {
        let key = family.key(id);
        let blob = match self.store.get(&key).await {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Err(e) => {
                log::warn!("Cache read failed for {}: {} (treating as miss)", key, e);
                self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let reason = match self.judge(family, &blob) {
            Verdict::Valid(payload) => match serde_json::from_value::<T>(payload) {
                Ok(value) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    log::debug!("Cache hit: {}", key);
                    return Some(value);
                }
                Err(_) => {
                    self.counters.corrupt.fetch_add(1, Ordering::Relaxed);
                    "payload shape changed"
                }
            },
            Verdict::Expired => {
                self.counters.expired.fetch_add(1, Ordering::Relaxed);
                "expired"
            }
            Verdict::VersionMismatch => {
                self.counters.version_mismatches.fetch_add(1, Ordering::Relaxed);
                "version mismatch"
            }
            Verdict::Corrupt => {
                self.counters.corrupt.fetch_add(1, Ordering::Relaxed);
                "unreadable blob"
            }
        };

        log::debug!("Cache evict {}: {}", key, reason);
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self.store.delete(&key).await {
            log::warn!("Cache eviction failed for {}: {}", key, e);
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    /// Store `payload` under `id`, stamped with the family version and now.
    /// Failures are logged; the engine keeps working uncached.
    pub async fn set<T: Serialize>(&self, family: &CacheFamily, id: &str, payload: &T) {
        let key = family.key(id);
        let payload = match serde_json::to_value(payload) {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Cache serialize failed for {}: {}", key, e);
                return;
            }
        };
        let envelope = Envelope {
            version: family.version.to_string(),
            timestamp_ms: self.clock.now_ms(),
            payload,
        };
        let blob = match serde_json::to_string(&envelope) {
            Ok(b) => b,
            Err(e) => {
                log::warn!("Cache serialize failed for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &blob).await {
            log::warn!("Cache write failed for {}: {}", key, e);
            self.counters.store_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop one entry regardless of validity.
    pub async fn invalidate(&self, family: &CacheFamily, id: &str) {
        let key = family.key(id);
        if let Err(e) = self.store.delete(&key).await {
            log::warn!("Cache invalidate failed for {}: {}", key, e);
        }
    }

    /// Keys of `family` split into (valid, invalid), without evicting.
    pub async fn census(&self, family: &CacheFamily) -> (Vec<String>, Vec<String>) {
        let keys = match self.store.keys(&family.key_prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Cache could not list {}: {}", family.prefix, e);
                return (Vec::new(), Vec::new());
            }
        };

        let mut valid = Vec::new();
        let mut invalid = Vec::new();
        for key in keys {
            match self.store.get(&key).await {
                Ok(Some(blob)) if matches!(self.judge(family, &blob), Verdict::Valid(_)) => valid.push(key),
                Ok(None) => {}
                _ => invalid.push(key),
            }
        }
        (valid, invalid)
    }

    /// Eagerly remove every invalid entry of `family`. Returns (kept, removed).
    ///
    /// The engine itself only expires lazily; this is for maintenance tooling.
    pub async fn purge(&self, family: &CacheFamily) -> (usize, usize) {
        let (valid, invalid) = self.census(family).await;
        let mut removed = 0;
        for key in invalid {
            if self.store.delete(&key).await.is_ok() {
                removed += 1;
            }
        }
        log::info!("Cache purge {}: kept {}, removed {}", family.prefix, valid.len(), removed);
        (valid.len(), removed)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
            version_mismatches: self.counters.version_mismatches.load(Ordering::Relaxed),
            corrupt: self.counters.corrupt.load(Ordering::Relaxed),
            store_errors: self.counters.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::error::{ImpactError, Result};
    use async_trait::async_trait;

    const T0: i64 = 1_700_000_000_000;

    fn cache_at(start: i64) -> (TtlCache, Arc<ManualClock>, Arc<MemoryStore>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = Arc::new(MemoryStore::new(64));
        let cache = TtlCache::with_clock(store.clone(), clock.clone());
        (cache, clock, store)
    }

    #[tokio::test]
    async fn test_ttl_boundary() {
        let (cache, clock, _) = cache_at(T0);
        let family = CacheFamily::identity(Duration::from_secs(60));
        cache.set(&family, "1", &"Ada".to_string()).await;

        clock.set(T0 + 60_000 - 1);
        assert_eq!(cache.get::<String>(&family, "1").await.as_deref(), Some("Ada"));

        clock.set(T0 + 60_000 + 1);
        assert_eq!(cache.get::<String>(&family, "1").await, None);
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_version_mismatch_invalidates_at_age_zero() {
        let (cache, _clock, store) = cache_at(T0);
        let v1 = CacheFamily::new("identity", "v1", Duration::from_secs(3600));
        let v2 = CacheFamily::new("identity", "v2", Duration::from_secs(3600));

        cache.set(&v1, "7", &42u32).await;
        assert_eq!(cache.get::<u32>(&v2, "7").await, None);
        // evicted on read
        assert!(store.get("identity:7").await.unwrap().is_none());
        assert_eq!(cache.get::<u32>(&v1, "7").await, None);
        assert_eq!(cache.stats().version_mismatches, 1);
    }

    #[tokio::test]
    async fn test_corrupt_blob_is_a_miss() {
        let (cache, _clock, store) = cache_at(T0);
        let family = CacheFamily::asset(Duration::from_secs(60));
        store.set("asset:1", "{not json").await.unwrap();

        assert_eq!(cache.get::<u32>(&family, "1").await, None);
        assert!(store.get("asset:1").await.unwrap().is_none());
        assert_eq!(cache.stats().corrupt, 1);
    }

    #[tokio::test]
    async fn test_payload_shape_change_is_a_miss() {
        let (cache, _clock, _) = cache_at(T0);
        let family = CacheFamily::asset(Duration::from_secs(60));
        cache.set(&family, "1", &"text").await;
        assert_eq!(cache.get::<u64>(&family, "1").await, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let (cache, _clock, _) = cache_at(T0);
        let family = CacheFamily::search(Duration::from_secs(60));
        cache.set(&family, "q", &vec![1u64]).await;
        cache.set(&family, "q", &vec![2u64, 3]).await;
        assert_eq!(cache.get::<Vec<u64>>(&family, "q").await, Some(vec![2, 3]));
    }

    struct FailingStore;

    #[async_trait]
    impl KvStore for FailingStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(ImpactError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }
        async fn set(&self, _key: &str, _blob: &str) -> Result<()> {
            Err(ImpactError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk gone")))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Ok(())
        }
        async fn keys(&self, _prefix: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_store_errors_degrade_to_miss() {
        let cache = TtlCache::new(Arc::new(FailingStore));
        let family = CacheFamily::identity(Duration::from_secs(60));
        cache.set(&family, "1", &"x").await;
        assert_eq!(cache.get::<String>(&family, "1").await, None);
        let stats = cache.stats();
        assert_eq!(stats.store_errors, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_invalid_entries() {
        let (cache, clock, _) = cache_at(T0);
        let family = CacheFamily::identity(Duration::from_secs(10));
        cache.set(&family, "old", &1u8).await;
        clock.advance(Duration::from_secs(8));
        cache.set(&family, "new", &2u8).await;
        clock.advance(Duration::from_secs(5));

        assert_eq!(cache.purge(&family).await, (1, 1));
        assert_eq!(cache.get::<u8>(&family, "new").await, Some(2));
    }

    #[test]
    fn test_digest_key_is_stable_hex() {
        let a = digest_key("name:'db'");
        assert_eq!(a.len(), 64);
        assert_eq!(a, digest_key("name:'db'"));
        assert_ne!(a, digest_key("name:'web'"));
    }

    #[test]
    fn test_families_from_config() {
        let config = CacheConfig {
            identity_ttl_secs: 5,
            ..CacheConfig::default()
        };
        let families = CacheFamilies::from_config(&config);
        assert_eq!(families.identity.ttl, Duration::from_secs(5));
        assert_eq!(families.identity.version, "2");
        assert_eq!(families.by_prefix("search").map(|f| f.version), Some("1"));
        assert!(families.by_prefix("unknown").is_none());
    }
}
