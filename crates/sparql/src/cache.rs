//! In-memory TTL caches for grounding lookups and query results.
//!
//! Entries are visible only while `now < inserted_at + ttl`; expired entries
//! read as absent and are evicted lazily on access. Concurrent writers race
//! with last-writer-wins semantics, which is fine because every entry is an
//! idempotent recomputation.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use kg_core::ExecutionResult;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_live(&self, now: Instant) -> bool {
        now < self.inserted_at + self.ttl
    }
}

/// Generic key → value store with per-entry expiration.
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self {
            name,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached value, or `None` if missing or expired.
    pub async fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: evict unless a concurrent writer refreshed it meanwhile.
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| !e.is_live(now)) {
            entries.remove(key);
            debug!(cache = self.name, key, "evicted expired entry");
        }
        None
    }

    /// Insert or overwrite with the cache's default TTL.
    pub async fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.ttl).await;
    }

    pub async fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let entry = CacheEntry {
            value,
            inserted_at: Instant::now(),
            ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Number of stored entries, expired ones included until they are touched.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

/// Cache key for free-text lookups: trimmed, lowercased, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Cache key for query text. Collapses whitespace only; SPARQL is
/// case-sensitive in literals and IRIs.
pub fn normalize_query(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A successful execution as the [`ResultCache`] keeps it: the result plus
/// the query that actually ran and the repairs that got it there, so a hit
/// reports the same thing the original run did.
#[derive(Debug, Clone)]
pub struct CachedRun {
    pub result: ExecutionResult,
    pub executed_query: String,
    pub repairs: Vec<String>,
}

/// Cache of successful query executions keyed by the normalized text of the
/// query the caller asked for.
pub struct ResultCache {
    inner: TtlCache<CachedRun>,
}

impl ResultCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: TtlCache::new("results", ttl),
        }
    }

    pub async fn get(&self, query: &str) -> Option<CachedRun> {
        self.inner.get(&normalize_query(query)).await
    }

    /// Store a run under `query`. Failed executions are never stored; returns
    /// whether the run was accepted.
    pub async fn put(&self, query: &str, run: CachedRun) -> bool {
        if !run.result.succeeded {
            return false;
        }
        self.inner.insert(normalize_query(query), run).await;
        true
    }

    pub async fn len(&self) -> usize {
        self.inner.len().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kg_core::{Classified, ErrorCode};

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(60));
        cache.insert("a", 1).await;
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(cache.get("a").await, Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_absent_and_evicted() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(60));
        cache.insert("a", 1).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_refreshes_timestamp() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(10));
        cache.insert("a", 1).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        cache.insert("a", 2).await;
        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(cache.get("a").await, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache: TtlCache<u32> = TtlCache::new("test", Duration::from_secs(10));
        cache.insert("old", 1).await;
        tokio::time::advance(Duration::from_secs(5)).await;
        cache.insert_with_ttl("new", 2, Duration::from_secs(30)).await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.get("new").await, Some(2));
    }

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_text("  Albert   EINSTEIN \n"), "albert einstein");
        assert_eq!(
            normalize_query("SELECT ?x\n  WHERE {  ?x ?p \"A  b\" }"),
            "SELECT ?x WHERE { ?x ?p \"A b\" }"
        );
    }

    #[tokio::test]
    async fn test_result_cache_rejects_failures() {
        let cache = ResultCache::new(Duration::from_secs(300));
        let run = |result| CachedRun {
            result,
            executed_query: "SELECT * WHERE {} LIMIT 100".into(),
            repairs: vec!["TIMEOUT: halved LIMIT to 100".into()],
        };
        let failed = ExecutionResult::failure(Classified::new(ErrorCode::RateLimit, "429"));
        assert!(!cache.put("SELECT * WHERE {}", run(failed)).await);
        assert!(cache.get("SELECT * WHERE {}").await.is_none());

        let ok = ExecutionResult::success(vec!["x".into()], vec![], None);
        assert!(cache.put("SELECT *  WHERE {}", run(ok)).await);
        let hit = cache.get("SELECT * WHERE {}").await.unwrap();
        assert_eq!(hit.executed_query, "SELECT * WHERE {} LIMIT 100");
        assert_eq!(hit.repairs.len(), 1);
    }
}
