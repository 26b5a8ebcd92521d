//! Two-tier result cache with single-flight computation.
//!
//! Tier one is a bounded in-process LRU map; tier two is an optional shared
//! key/value backend with TTL (a Redis-shaped collaborator). Lookups check
//! the local tier first, then the shared tier, repopulating the local tier
//! on a shared hit.
//!
//! Concurrent requests for the same fingerprint are serialized through a
//! per-key gate (wait-and-share): the first request computes, later arrivals
//! wait on the gate and then find the written entry on re-check. A failed
//! computation writes nothing; the next waiter in line computes instead.

use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::pipeline::AnalysisResult;
use crate::providers::SharedCacheBackend;
use async_trait::async_trait;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

struct CacheEntry {
    value: AnalysisResult,
    created_at: Instant,
    expires_at: Instant,
    hit_count: u64,
}

pub struct ResultCache {
    local: Mutex<LruCache<Fingerprint, CacheEntry>>,
    shared: Option<Arc<dyn SharedCacheBackend>>,
    in_flight: Mutex<HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration, shared: Option<Arc<dyn SharedCacheBackend>>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            shared,
            in_flight: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Look up a previously computed result. Expired entries are dropped
    /// silently; a miss is not an error.
    pub async fn get(&self, key: &Fingerprint) -> Option<AnalysisResult> {
        if let Some(value) = self.get_local(key) {
            return Some(value);
        }

        let shared = self.shared.as_ref()?;
        match shared.get(key.as_str()).await {
            Ok(Some(raw)) => match serde_json::from_str::<AnalysisResult>(&raw) {
                Ok(value) => {
                    debug!(fingerprint = %key, "cache hit (shared)");
                    self.put_local(key.clone(), value.clone());
                    Some(value)
                }
                Err(e) => {
                    warn!(fingerprint = %key, error = %e, "discarding undecodable shared cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                // A flaky shared tier degrades to recomputation, never to failure.
                warn!(fingerprint = %key, error = %e, "shared cache lookup failed");
                None
            }
        }
    }

    /// Write a result to both tiers: shared first (with TTL), then local,
    /// subject to the local capacity bound.
    pub async fn put(&self, key: &Fingerprint, value: &AnalysisResult) {
        if let Some(shared) = &self.shared {
            match serde_json::to_string(value) {
                Ok(raw) => {
                    if let Err(e) = shared.put(key.as_str(), raw, self.ttl).await {
                        warn!(fingerprint = %key, error = %e, "shared cache write failed");
                    }
                }
                Err(e) => warn!(fingerprint = %key, error = %e, "failed to serialize cache value"),
            }
        }
        self.put_local(key.clone(), value.clone());
    }

    /// At-most-one concurrent computation per fingerprint (wait-and-share).
    pub async fn get_or_compute<F, Fut>(&self, key: &Fingerprint, compute: F) -> Result<AnalysisResult>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AnalysisResult>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let gate = {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight
                .entry(key.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };

        let _guard = gate.lock().await;

        // Whoever held the gate before us may have written the entry.
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }

        let outcome = compute().await;

        // The gate stays registered until the entry is written; a request
        // arriving mid-write must wait here, not start a fresh computation.
        let outcome = match outcome {
            Ok(value) => {
                self.put(key, &value).await;
                Ok(value)
            }
            // Failed runs are never cached.
            Err(e) => Err(e),
        };

        {
            let mut in_flight = self.in_flight.lock().unwrap();
            in_flight.remove(key);
        }

        outcome
    }

    fn get_local(&self, key: &Fingerprint) -> Option<AnalysisResult> {
        let mut local = self.local.lock().unwrap();
        let expired = match local.get_mut(key) {
            Some(entry) => {
                if Instant::now() < entry.expires_at {
                    entry.hit_count += 1;
                    debug!(fingerprint = %key, hits = entry.hit_count, "cache hit (local)");
                    return Some(entry.value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            local.pop(key);
        }
        None
    }

    fn put_local(&self, key: Fingerprint, value: AnalysisResult) {
        let now = Instant::now();
        let entry = CacheEntry {
            value,
            created_at: now,
            expires_at: now + self.ttl,
            hit_count: 0,
        };
        let mut local = self.local.lock().unwrap();
        local.put(key, entry);
    }

    /// Age of a cached entry, exposed for observability.
    pub fn entry_age(&self, key: &Fingerprint) -> Option<Duration> {
        let mut local = self.local.lock().unwrap();
        local.get(key).map(|e| e.created_at.elapsed())
    }
}

/// In-process stand-in for the external shared cache backend. Used in tests
/// and single-node deployments; production wires a real distributed store
/// behind the same trait.
pub struct InMemorySharedCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemorySharedCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCacheBackend for InMemorySharedCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires_at)) if Instant::now() < *expires_at => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::ContextIdentity;
    use crate::pipeline::AnalysisResult;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fp(question: &str) -> Fingerprint {
        Fingerprint::compute(question, &ContextIdentity::default())
    }

    fn result(marker: &str) -> AnalysisResult {
        AnalysisResult::empty_with_insight(marker)
    }

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let cache = ResultCache::new(10, Duration::from_secs(60), None);
        let key = fp("total sales");
        assert!(cache.get(&key).await.is_none());

        cache.put(&key, &result("hello")).await;
        let hit = cache.get(&key).await.expect("entry present");
        assert_eq!(hit.insights, vec!["hello".to_string()]);
    }

    #[tokio::test]
    async fn never_computed_is_always_a_miss() {
        let cache = ResultCache::new(10, Duration::from_secs(60), None);
        assert!(cache.get(&fp("never asked")).await.is_none());
    }

    #[tokio::test]
    async fn ttl_expiry_is_a_silent_miss() {
        let cache = ResultCache::new(10, Duration::from_millis(20), None);
        let key = fp("ephemeral");
        cache.put(&key, &result("x")).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn capacity_bound_evicts_least_recently_used() {
        let cache = ResultCache::new(2, Duration::from_secs(60), None);
        let (a, b, c) = (fp("a"), fp("b"), fp("c"));
        cache.put(&a, &result("a")).await;
        cache.put(&b, &result("b")).await;
        // Touch `a` so `b` becomes the eviction candidate.
        assert!(cache.get(&a).await.is_some());
        cache.put(&c, &result("c")).await;

        assert!(cache.get(&a).await.is_some());
        assert!(cache.get(&b).await.is_none());
        assert!(cache.get(&c).await.is_some());
    }

    #[tokio::test]
    async fn shared_tier_repopulates_local() {
        let shared = Arc::new(InMemorySharedCache::new());
        let writer = ResultCache::new(10, Duration::from_secs(60), Some(shared.clone()));
        let reader = ResultCache::new(10, Duration::from_secs(60), Some(shared));

        let key = fp("cross process");
        writer.put(&key, &result("shared")).await;

        let hit = reader.get(&key).await.expect("shared tier hit");
        assert_eq!(hit.insights, vec!["shared".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_identical_requests_compute_once() {
        let cache = Arc::new(ResultCache::new(10, Duration::from_secs(60), None));
        let key = fp("expensive question");
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let key = key.clone();
            let computations = computations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        Ok(result("computed"))
                    })
                    .await
            }));
        }

        for handle in handles {
            let value = handle.await.unwrap().unwrap();
            assert_eq!(value.insights, vec!["computed".to_string()]);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_arriving_during_a_slow_cache_write_shares_the_result() {
        struct SlowWriteCache {
            inner: InMemorySharedCache,
            put_delay: Duration,
        }

        #[async_trait]
        impl SharedCacheBackend for SlowWriteCache {
            async fn get(&self, key: &str) -> Result<Option<String>> {
                self.inner.get(key).await
            }
            async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
                tokio::time::sleep(self.put_delay).await;
                self.inner.put(key, value, ttl).await
            }
        }

        let shared = Arc::new(SlowWriteCache {
            inner: InMemorySharedCache::new(),
            put_delay: Duration::from_millis(150),
        });
        let cache = Arc::new(ResultCache::new(10, Duration::from_secs(60), Some(shared)));
        let key = fp("slow write");
        let computations = Arc::new(AtomicUsize::new(0));

        let first = {
            let cache = cache.clone();
            let key = key.clone();
            let computations = computations.clone();
            tokio::spawn(async move {
                cache
                    .get_or_compute(&key, || async {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(result("shared"))
                    })
                    .await
            })
        };

        // Land after the first computation finished but while its result
        // is still being written to the shared tier.
        tokio::time::sleep(Duration::from_millis(60)).await;
        let second = cache
            .get_or_compute(&key, || async {
                computations.fetch_add(1, Ordering::SeqCst);
                Ok(result("shared"))
            })
            .await
            .unwrap();

        first.await.unwrap().unwrap();
        assert_eq!(second.insights, vec!["shared".to_string()]);
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_computation_is_not_cached() {
        let cache = ResultCache::new(10, Duration::from_secs(60), None);
        let key = fp("failing question");

        let outcome = cache
            .get_or_compute(&key, || async {
                Err(crate::error::DatasightError::Analysis("boom".into()))
            })
            .await;
        assert!(outcome.is_err());
        assert!(cache.get(&key).await.is_none());
    }
}
