//! Batch relationship check engine
//!
//! Resolves many `(object, relation, user)` checks in one pass: cache hits
//! are served directly, entries older than the invalidation marker are
//! demoted to live checks, and everything left over goes to the store's
//! batch-check endpoint in a single round trip whose results are written
//! back through the cache.

use bytes::{BufMut, Bytes, BytesMut};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::cache::RelationCache;
use crate::store::{BatchCheckItem, FgaClient};
use crate::tuple::{TupleKey, INVALIDATION_KEY};
use crate::types::{Result, WardenError};

/// Monotonic counters for the cache-lookup path. Shared process-wide as an
/// explicit dependency of the engine, and exposed on the metrics endpoint.
#[derive(Debug, Default)]
pub struct CheckMetrics {
    cache_hits: AtomicU64,
    cache_stale_hits: AtomicU64,
    cache_misses: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub cache_hits: u64,
    pub cache_stale_hits: u64,
    pub cache_misses: u64,
}

impl CheckMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_stale_hits: self.cache_stale_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// Engine that answers batched authorization checks.
pub struct CheckEngine {
    store: Arc<dyn FgaClient>,
    cache: Arc<dyn RelationCache>,
    metrics: Arc<CheckMetrics>,
    use_cache: bool,
}

impl CheckEngine {
    pub fn new(
        store: Arc<dyn FgaClient>,
        cache: Arc<dyn RelationCache>,
        metrics: Arc<CheckMetrics>,
        use_cache: bool,
    ) -> Self {
        Self {
            store,
            cache,
            metrics,
            use_cache,
        }
    }

    /// Creation time of the invalidation marker, if one exists within the
    /// cache TTL. Entries created at or before this instant are stale.
    async fn last_invalidation(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .cache
            .get(INVALIDATION_KEY)
            .await?
            .map(|entry| entry.created))
    }

    /// Resolve a batch of checks into the textual wire result: one
    /// `object#relation@user<TAB>true|false` line per input check, newline
    /// separated with no trailing newline. Empty input yields an empty
    /// result.
    pub async fn check_relationships(&self, checks: &[TupleKey]) -> Result<Bytes> {
        if checks.is_empty() {
            return Ok(Bytes::new());
        }

        // Preallocate on an expected relation line size of 80 bytes.
        let mut message = BytesMut::with_capacity(80 * checks.len());

        let mut to_check: Vec<TupleKey> = Vec::new();
        if self.use_cache {
            let last_invalidation = self.last_invalidation().await?;

            // Lookups run sequentially in index order so that the
            // degraded fallback below stays deterministic.
            for (i, tuple) in checks.iter().enumerate() {
                match self.cache.get(&tuple.cache_key()).await {
                    Ok(None) => {
                        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
                        to_check.push(tuple.clone());
                    }
                    Err(e) => {
                        // Unexpected after a successful invalidation read.
                        // Fall back to live checks for this and everything
                        // still unchecked; the store will answer.
                        error!(error = %e, "cache error; checking remaining relations live");
                        to_check.extend_from_slice(&checks[i..]);
                        break;
                    }
                    Ok(Some(entry)) => {
                        let stale = last_invalidation
                            .map(|inv| entry.created <= inv)
                            .unwrap_or(false);
                        if stale {
                            self.metrics.cache_stale_hits.fetch_add(1, Ordering::Relaxed);
                            to_check.push(tuple.clone());
                            continue;
                        }
                        self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                        message.put_slice(tuple.relation_key().as_bytes());
                        message.put_u8(b'\t');
                        message.put_slice(&entry.value);
                        message.put_u8(b'\n');
                    }
                }
            }
        } else {
            to_check = checks.to_vec();
        }

        if to_check.is_empty() {
            if message.is_empty() {
                // Unreachable for non-empty input unless every branch above
                // misbehaved; guard the trailing-newline trim anyway.
                return Err(WardenError::EmptyResponse(
                    "batch check cached-built message empty".to_string(),
                ));
            }
            message.truncate(message.len() - 1);
            return Ok(message.freeze());
        }

        debug!(count = to_check.len(), "checking relations against the store");

        // Correlation ids are the decimal indexes starting at 1; the store
        // echoes them back verbatim.
        let items: Vec<BatchCheckItem> = to_check
            .into_iter()
            .enumerate()
            .map(|(idx, tuple)| BatchCheckItem {
                tuple,
                correlation_id: (idx + 1).to_string(),
            })
            .collect();

        let result = self.store.batch_check(&items).await?;
        if result.is_empty() {
            return Err(WardenError::EmptyResponse(
                "batch check response was nil or empty".to_string(),
            ));
        }

        // Merge in correlation-id order, which is input order, and cache
        // each live result on the way out.
        for item in &items {
            let Some(outcome) = result.get(&item.correlation_id) else {
                warn!(
                    correlation_id = %item.correlation_id,
                    "batch check response missing correlation id"
                );
                continue;
            };

            let allowed = if outcome.allowed { "true" } else { "false" };
            message.put_slice(item.tuple.relation_key().as_bytes());
            message.put_u8(b'\t');
            message.put_slice(allowed.as_bytes());
            message.put_u8(b'\n');

            if self.use_cache {
                if let Err(e) = self.cache.put_string(&item.tuple.cache_key(), allowed).await {
                    error!(error = %e, "failed to cache relation");
                }
            }
        }

        if message.is_empty() {
            return Err(WardenError::EmptyResponse(
                "batch check response message empty".to_string(),
            ));
        }

        message.truncate(message.len() - 1);
        Ok(message.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryCache, MemoryStore};
    use crate::tuple::parse_check_line;

    fn engine(
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        metrics: Arc<CheckMetrics>,
    ) -> CheckEngine {
        CheckEngine::new(store, cache, metrics, true)
    }

    fn check(line: &str) -> TupleKey {
        parse_check_line(line.as_bytes()).unwrap()
    }

    fn text(bytes: &Bytes) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_empty_input_is_empty_output() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(store, cache, metrics);

        let result = engine.check_relationships(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn test_single_check_cache_miss() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:123#writer@user:456", true);
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&metrics));

        let result = engine
            .check_relationships(&[check("project:123#writer@user:456")])
            .await
            .unwrap();

        assert_eq!(text(&result), "project:123#writer@user:456\ttrue");

        // One store call with correlation id "1".
        let calls = store.batch_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].correlation_id, "1");

        // The result was written through to the cache.
        let key = check("project:123#writer@user:456").cache_key();
        assert_eq!(cache.value_of(&key).as_deref(), Some("true"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_hits, 0);
    }

    #[tokio::test]
    async fn test_fresh_hit_skips_store() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());

        let tuple = check("project:1#viewer@user:a");
        cache.put_at(&tuple.cache_key(), "true", MemoryCache::at(10));
        // No invalidation marker: nothing is ever stale.

        let engine = engine(Arc::clone(&store), cache, Arc::clone(&metrics));
        let result = engine.check_relationships(&[tuple]).await.unwrap();

        assert_eq!(text(&result), "project:1#viewer@user:a\ttrue");
        assert!(store.batch_calls.lock().unwrap().is_empty());
        assert_eq!(metrics.snapshot().cache_hits, 1);
    }

    #[tokio::test]
    async fn test_one_fresh_one_stale() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#writer@user:b", true);
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());

        let fresh = check("project:1#viewer@user:a");
        let stale = check("project:1#writer@user:b");
        // inv sits between the stale entry and the fresh one.
        cache.put_at(&stale.cache_key(), "false", MemoryCache::at(0));
        cache.put_at(INVALIDATION_KEY, "1", MemoryCache::at(5));
        cache.put_at(&fresh.cache_key(), "true", MemoryCache::at(10));

        let engine = engine(Arc::clone(&store), Arc::clone(&cache), Arc::clone(&metrics));
        let result = engine
            .check_relationships(&[fresh.clone(), stale.clone()])
            .await
            .unwrap();

        // Two lines, input order, no trailing newline.
        assert_eq!(
            text(&result),
            "project:1#viewer@user:a\ttrue\nproject:1#writer@user:b\ttrue"
        );

        // Only the stale entry went to the store.
        let calls = store.batch_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].len(), 1);
        assert_eq!(calls[0][0].tuple, stale);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 1);
        assert_eq!(snapshot.cache_stale_hits, 1);
        assert_eq!(snapshot.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_entry_created_at_invalidation_instant_is_stale() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());

        let tuple = check("project:1#viewer@user:a");
        cache.put_at(&tuple.cache_key(), "true", MemoryCache::at(5));
        cache.put_at(INVALIDATION_KEY, "1", MemoryCache::at(5));

        let engine = engine(Arc::clone(&store), cache, Arc::clone(&metrics));
        engine.check_relationships(&[tuple]).await.unwrap();

        assert_eq!(metrics.snapshot().cache_stale_hits, 1);
        assert_eq!(store.batch_calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_correlation_ids_are_decimal_indexes() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(Arc::clone(&store), cache, metrics);

        let checks: Vec<TupleKey> = (0..3)
            .map(|i| check(&format!("project:1#viewer@user:{}", i)))
            .collect();
        engine.check_relationships(&checks).await.unwrap();

        let calls = store.batch_calls.lock().unwrap();
        let ids: Vec<&str> = calls[0].iter().map(|c| c.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        // Each id maps to a distinct check.
        assert_eq!(calls[0][0].tuple, checks[0]);
        assert_eq!(calls[0][2].tuple, checks[2]);
    }

    #[tokio::test]
    async fn test_invalidation_read_failure_aborts() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#viewer@user:a", true);
        store.set_check_result("project:1#viewer@user:b", false);
        let cache = Arc::new(MemoryCache::new());
        cache.fail_gets("cache down");
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(Arc::clone(&store), cache, Arc::clone(&metrics));

        let checks = [
            check("project:1#viewer@user:a"),
            check("project:1#viewer@user:b"),
        ];
        let err = engine.check_relationships(&checks).await.unwrap_err();

        // The invalidation read itself failed, which aborts the batch.
        assert!(matches!(err, WardenError::Transport(_)));
    }

    #[tokio::test]
    async fn test_lookup_error_after_invalidation_read_falls_back() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#viewer@user:a", true);
        store.set_check_result("project:1#viewer@user:b", false);
        let cache = Arc::new(FlakyCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = CheckEngine::new(
            Arc::clone(&store) as Arc<dyn FgaClient>,
            cache,
            Arc::clone(&metrics),
            true,
        );

        let checks = [
            check("project:1#viewer@user:a"),
            check("project:1#viewer@user:b"),
        ];
        let result = engine.check_relationships(&checks).await.unwrap();

        assert_eq!(
            text(&result),
            "project:1#viewer@user:a\ttrue\nproject:1#viewer@user:b\tfalse"
        );

        // Both checks went live; no counters were bumped on the error path.
        assert_eq!(store.batch_calls.lock().unwrap()[0].len(), 2);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits + snapshot.cache_stale_hits + snapshot.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_empty_batch_result_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.return_empty_batch_result();
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(store, cache, metrics);

        let err = engine
            .check_relationships(&[check("project:1#viewer@user:a")])
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::EmptyResponse(_)));
    }

    #[tokio::test]
    async fn test_use_cache_disabled_bypasses_cache() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#viewer@user:a", true);
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());
        let engine = CheckEngine::new(
            Arc::clone(&store) as Arc<dyn FgaClient>,
            Arc::clone(&cache) as Arc<dyn RelationCache>,
            Arc::clone(&metrics),
            false,
        );

        let tuple = check("project:1#viewer@user:a");
        // Even a fresh entry is ignored when the cache is off.
        cache.put_at(&tuple.cache_key(), "false", MemoryCache::at(10));

        let result = engine.check_relationships(&[tuple]).await.unwrap();
        assert_eq!(text(&result), "project:1#viewer@user:a\ttrue");

        // No lookups, no population, no counters.
        assert!(cache.put_calls.lock().unwrap().is_empty());
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits + snapshot.cache_stale_hits + snapshot.cache_misses, 0);
    }

    #[tokio::test]
    async fn test_output_line_count_matches_input() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let metrics = Arc::new(CheckMetrics::new());

        let checks: Vec<TupleKey> = (0..4)
            .map(|i| check(&format!("project:1#viewer@user:{}", i)))
            .collect();
        // Two fresh hits, two misses.
        cache.put_at(&checks[1].cache_key(), "true", MemoryCache::at(10));
        cache.put_at(&checks[3].cache_key(), "false", MemoryCache::at(10));

        let engine = engine(store, cache, metrics);
        let result = engine.check_relationships(&checks).await.unwrap();

        let body = text(&result);
        assert_eq!(body.lines().count(), 4);
        assert!(!body.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_cache_population_failure_does_not_fail_batch() {
        let store = Arc::new(MemoryStore::new());
        store.set_check_result("project:1#viewer@user:a", true);
        let cache = Arc::new(MemoryCache::new());
        cache.fail_puts("cache down");
        let metrics = Arc::new(CheckMetrics::new());
        let engine = engine(store, cache, metrics);

        let result = engine
            .check_relationships(&[check("project:1#viewer@user:a")])
            .await
            .unwrap();
        assert_eq!(text(&result), "project:1#viewer@user:a\ttrue");
    }

    /// Cache double whose invalidation read succeeds but whose relation
    /// lookups fail, to exercise the mid-batch fallback.
    struct FlakyCache;

    impl FlakyCache {
        fn new() -> Self {
            Self
        }
    }

    #[async_trait::async_trait]
    impl RelationCache for FlakyCache {
        async fn get(&self, key: &str) -> Result<Option<crate::cache::CacheEntry>> {
            if key == INVALIDATION_KEY {
                return Ok(None);
            }
            Err(WardenError::Transport("cache down".to_string()))
        }

        async fn put(&self, _key: &str, _value: Bytes) -> Result<u64> {
            Err(WardenError::Transport("cache down".to_string()))
        }
    }
}
