//! Bounded, coalescing memo of pipeline results.
//!
//! Keys move through two states. A key is `Pending` while its computation
//! runs on a spawned task, and every concurrent request for it waits on the
//! same watch channel. It becomes `Resolved` once the task publishes the
//! result, and then lives in an LRU table until evicted.
//!
//! ## Metrics
//!
//! Counters are kept as atomics and mirrored to the `metrics` facade:
//! - `pipeline_cache_hits_total`
//! - `pipeline_cache_misses_total`
//! - `pipeline_cache_coalesced_total`
//! - `pipeline_cache_evictions_total`
//! - `pipeline_cache_errors_total`
//! - `pipeline_cache_entries` (gauge)

use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use fusion_core::{FailureKind, Pipeline, PipelineKey, PipelineResult};
use lru::LruCache;
use metrics::{counter, gauge};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

/// Default number of resolved results kept.
pub const DEFAULT_CAPACITY: usize = 32;

/// Whether error-shaped results are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorCachePolicy {
    /// Errors are returned to their waiters and forgotten; the next
    /// request recomputes.
    #[default]
    DoNotCache,
    /// Errors are kept for a fixed time.
    CacheFor(Duration),
    /// Errors are kept like successes, until evicted.
    CacheForever,
}

impl FromStr for ErrorCachePolicy {
    type Err = String;

    /// Accepts `never`, `forever`, or a number of seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" | "none" | "off" => Ok(Self::DoNotCache),
            "forever" => Ok(Self::CacheForever),
            other => other
                .trim_end_matches('s')
                .parse::<u64>()
                .map(|secs| Self::CacheFor(Duration::from_secs(secs)))
                .map_err(|_| format!("invalid error cache policy: {}", s)),
        }
    }
}

impl fmt::Display for ErrorCachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DoNotCache => write!(f, "never"),
            Self::CacheFor(ttl) => write!(f, "{}s", ttl.as_secs()),
            Self::CacheForever => write!(f, "forever"),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Maximum number of resolved entries
    pub capacity: usize,
    pub error_policy: ErrorCachePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            error_policy: ErrorCachePolicy::default(),
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PIPELINE_CACHE_CAPACITY") {
            if let Ok(capacity) = val.parse() {
                config.capacity = capacity;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_CACHE_ERRORS") {
            match val.parse() {
                Ok(policy) => config.error_policy = policy,
                Err(e) => warn!(error = %e, "Ignoring PIPELINE_CACHE_ERRORS"),
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("cache capacity must be > 0".to_string());
        }
        if self.error_policy == ErrorCachePolicy::CacheFor(Duration::ZERO) {
            return Err("error cache ttl must be > 0".to_string());
        }
        Ok(())
    }
}

/// Statistics for the pipeline cache.
///
/// All fields are atomic for lock-free reads.
#[derive(Default)]
pub struct PipelineCacheStats {
    /// Requests answered from a resolved entry
    pub hits: AtomicU64,
    /// Requests that started a computation
    pub misses: AtomicU64,
    /// Requests that joined an in-flight computation
    pub coalesced: AtomicU64,
    /// Entries dropped for capacity
    pub evictions: AtomicU64,
    /// Computations that resolved to an error-shaped result
    pub errors: AtomicU64,
    /// Current number of resolved entries
    pub entry_count: AtomicU64,
}

impl PipelineCacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count.load(Ordering::Relaxed)
    }

    /// Calculate cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses() + self.coalesced();
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_cache_hits_total").increment(1);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_cache_misses_total").increment(1);
    }

    fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_cache_coalesced_total").increment(1);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_cache_evictions_total").increment(1);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        counter!("pipeline_cache_errors_total").increment(1);
    }

    fn set_entry_count(&self, count: usize) {
        self.entry_count.store(count as u64, Ordering::Relaxed);
        gauge!("pipeline_cache_entries").set(count as f64);
    }
}

type Slot = Option<Arc<PipelineResult>>;

struct ResolvedEntry {
    result: Arc<PipelineResult>,
    expires_at: Option<Instant>,
}

impl ResolvedEntry {
    /// Entry for a fresh result, or `None` when the policy drops it.
    fn new(result: Arc<PipelineResult>, policy: ErrorCachePolicy) -> Option<Self> {
        let expires_at = match (result.is_success(), policy) {
            (true, _) | (false, ErrorCachePolicy::CacheForever) => None,
            (false, ErrorCachePolicy::CacheFor(ttl)) => Some(Instant::now() + ttl),
            (false, ErrorCachePolicy::DoNotCache) => return None,
        };
        Some(Self { result, expires_at })
    }

    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

struct CacheTable {
    resolved: LruCache<PipelineKey, ResolvedEntry>,
    pending: HashMap<PipelineKey, watch::Receiver<Slot>>,
}

impl CacheTable {
    /// Live resolved entry, refreshing its recency. Expired entries are dropped.
    fn lookup(&mut self, key: &PipelineKey) -> Option<Arc<PipelineResult>> {
        let expired = self.resolved.peek(key)?.is_expired();
        if expired {
            self.resolved.pop(key);
            return None;
        }
        self.resolved.get(key).map(|entry| entry.result.clone())
    }

    /// Receiver of an in-flight computation, if its task is still alive.
    fn in_flight(&mut self, key: &PipelineKey) -> Option<watch::Receiver<Slot>> {
        if self.remove_dead(key) {
            return None;
        }
        self.pending.get(key).cloned()
    }

    /// Drop the pending slot of a task that ended without publishing.
    /// Returns whether a slot was removed.
    fn remove_dead(&mut self, key: &PipelineKey) -> bool {
        let dead = self
            .pending
            .get(key)
            .is_some_and(|rx| rx.has_changed().is_err());
        if dead {
            self.pending.remove(key);
        }
        dead
    }
}

/// Memoizes `Pipeline::run` per key with bounded capacity and coalescing.
///
/// Distinct keys compute in parallel. The table lock is only held for map
/// operations, never across a computation.
pub struct PipelineCache<P> {
    pipeline: Arc<P>,
    config: CacheConfig,
    table: Arc<Mutex<CacheTable>>,
    stats: Arc<PipelineCacheStats>,
}

impl<P: Pipeline + 'static> PipelineCache<P> {
    pub fn new(pipeline: P, config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pipeline: Arc::new(pipeline),
            table: Arc::new(Mutex::new(CacheTable {
                resolved: LruCache::new(capacity),
                pending: HashMap::new(),
            })),
            stats: Arc::new(PipelineCacheStats::default()),
            config,
        }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Result for `key`, computing it at most once per miss.
    pub async fn get_or_compute(&self, key: &PipelineKey) -> Arc<PipelineResult> {
        let mut rx = {
            let mut table = self.table.lock().await;

            if let Some(result) = table.lookup(key) {
                self.stats.record_hit();
                debug!(key = %key, "Pipeline cache hit");
                return result;
            }

            match table.in_flight(key) {
                Some(rx) => {
                    self.stats.record_coalesced();
                    debug!(key = %key, "Joining in-flight computation");
                    rx
                }
                None => {
                    self.stats.record_miss();
                    let (tx, rx) = watch::channel(None);
                    table.pending.insert(key.clone(), rx.clone());
                    self.spawn_compute(key.clone(), tx);
                    rx
                }
            }
        };

        let resolved = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };

        match resolved {
            Some(result) => result,
            None => {
                // Waiters of one aborted task share a single error count.
                if self.table.lock().await.remove_dead(key) {
                    warn!(key = %key, "Pipeline computation ended without a result");
                    self.stats.record_error();
                }
                Arc::new(PipelineResult::failure(
                    FailureKind::Aborted,
                    format!("computation for {} was aborted", key),
                ))
            }
        }
    }

    fn spawn_compute(&self, key: PipelineKey, tx: watch::Sender<Slot>) {
        let pipeline = self.pipeline.clone();
        let table = self.table.clone();
        let stats = self.stats.clone();
        let policy = self.config.error_policy;

        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = pipeline.run(&key).await;
            let elapsed = start.elapsed();
            let result = Arc::new(PipelineResult::from_outcome(outcome, elapsed));

            info!(
                key = %key,
                elapsed_ms = elapsed.as_millis() as u64,
                success = result.is_success(),
                "Pipeline computed"
            );

            let mut table = table.lock().await;
            table.pending.remove(&key);

            if !result.is_success() {
                stats.record_error();
            }

            if let Some(entry) = ResolvedEntry::new(result.clone(), policy) {
                if let Some((evicted, _)) = table.resolved.push(key.clone(), entry) {
                    if evicted != key {
                        stats.record_eviction();
                        info!(evicted = %evicted, "Pipeline cache evicted least recently used entry");
                    }
                }
            }
            stats.set_entry_count(table.resolved.len());

            // All waiters may have gone away.
            let _ = tx.send(Some(result));
        });
    }

    /// Resolved result for `key` without refreshing its recency.
    pub async fn peek(&self, key: &PipelineKey) -> Option<Arc<PipelineResult>> {
        let table = self.table.lock().await;
        table
            .resolved
            .peek(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.result.clone())
    }

    /// Drop the resolved entry for `key`. In-flight computations are unaffected.
    pub async fn invalidate(&self, key: &PipelineKey) -> bool {
        let mut table = self.table.lock().await;
        let removed = table.resolved.pop(key).is_some();
        self.stats.set_entry_count(table.resolved.len());
        removed
    }

    /// Drop every resolved entry.
    pub async fn clear(&self) {
        let mut table = self.table.lock().await;
        table.resolved.clear();
        self.stats.set_entry_count(0);
    }

    /// Current number of resolved entries.
    pub async fn len(&self) -> usize {
        self.table.lock().await.resolved.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> Arc<PipelineCacheStats> {
        self.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fusion_core::{LayerTile, PipelineError, PipelineOutput};
    use std::sync::atomic::AtomicBool;
    use thermal_common::TileTemplate;

    /// Pipeline counting its runs, optionally slow or failing.
    #[derive(Default)]
    struct CountingPipeline {
        runs: AtomicU64,
        failing: AtomicBool,
        panicking: AtomicBool,
        delay: Duration,
    }

    impl CountingPipeline {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }

        fn runs(&self) -> u64 {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Pipeline for CountingPipeline {
        async fn run(&self, key: &PipelineKey) -> fusion_core::Result<PipelineOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.panicking.load(Ordering::SeqCst) {
                panic!("pipeline task crashed");
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(PipelineError::data_unavailable(format!("no data for {}", key)));
            }
            Ok(PipelineOutput {
                layers: vec![LayerTile {
                    name: "lst".to_string(),
                    template: TileTemplate::new(format!("https://tiles/{}/{{z}}/{{x}}/{{y}}", key))
                        .unwrap(),
                }],
                stats: [("LST".to_string(), key.year as f64)].into_iter().collect(),
            })
        }
    }

    fn cache(pipeline: CountingPipeline, capacity: usize) -> PipelineCache<CountingPipeline> {
        PipelineCache::new(
            pipeline,
            CacheConfig {
                capacity,
                ..CacheConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_hit_does_not_recompute() {
        let cache = cache(CountingPipeline::default(), 4);
        let key = PipelineKey::year(2023);

        let first = cache.get_or_compute(&key).await;
        let second = cache.get_or_compute(&key).await;

        assert!(first.is_success());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.pipeline().runs(), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = cache(CountingPipeline::default(), 2);
        let (a, b, c) = (
            PipelineKey::year(2021),
            PipelineKey::year(2022),
            PipelineKey::year(2023),
        );

        cache.get_or_compute(&a).await;
        cache.get_or_compute(&b).await;
        // Touch `a` so `b` becomes the least recently used.
        cache.get_or_compute(&a).await;
        cache.get_or_compute(&c).await;

        assert_eq!(cache.len().await, 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert!(cache.peek(&b).await.is_none());
        assert!(cache.peek(&a).await.is_some());

        cache.get_or_compute(&b).await;
        assert_eq!(cache.pipeline().runs(), 4);
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_coalesced() {
        let cache = Arc::new(cache(CountingPipeline::slow(Duration::from_millis(50)), 4));
        let key = PipelineKey::with_model(2023, "ACCESS-CM2");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.get_or_compute(&key).await })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let first = results[0].as_ref().unwrap().clone();
        for result in &results {
            assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
        }

        assert_eq!(cache.pipeline().runs(), 1);
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().coalesced() + cache.stats().hits(), 7);
    }

    #[tokio::test]
    async fn test_distinct_keys_compute_independently() {
        let cache = Arc::new(cache(CountingPipeline::slow(Duration::from_millis(20)), 8));
        let handles: Vec<_> = (2020..2024)
            .map(|year| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get_or_compute(&PipelineKey::year(year)).await })
            })
            .collect();

        for handle in futures::future::join_all(handles).await {
            assert!(handle.unwrap().is_success());
        }
        assert_eq!(cache.pipeline().runs(), 4);
        assert_eq!(cache.len().await, 4);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached_by_default() {
        let cache = cache(CountingPipeline::default(), 4);
        let key = PipelineKey::year(1999);

        cache.pipeline().failing.store(true, Ordering::SeqCst);
        let failed = cache.get_or_compute(&key).await;
        assert_eq!(failed.failure_kind(), Some(FailureKind::DataUnavailable));
        assert!(cache.peek(&key).await.is_none());
        assert_eq!(cache.stats().errors(), 1);

        // The backend recovers; a retry succeeds.
        cache.pipeline().failing.store(false, Ordering::SeqCst);
        assert!(cache.get_or_compute(&key).await.is_success());
        assert_eq!(cache.pipeline().runs(), 2);
    }

    #[tokio::test]
    async fn test_errors_cached_forever() {
        let cache = PipelineCache::new(
            CountingPipeline::default(),
            CacheConfig {
                capacity: 4,
                error_policy: ErrorCachePolicy::CacheForever,
            },
        );
        let key = PipelineKey::year(1999);

        cache.pipeline().failing.store(true, Ordering::SeqCst);
        cache.get_or_compute(&key).await;
        cache.pipeline().failing.store(false, Ordering::SeqCst);

        assert!(!cache.get_or_compute(&key).await.is_success());
        assert_eq!(cache.pipeline().runs(), 1);

        assert!(cache.invalidate(&key).await);
        assert!(cache.get_or_compute(&key).await.is_success());
        assert_eq!(cache.pipeline().runs(), 2);
    }

    #[tokio::test]
    async fn test_errors_cached_for_ttl() {
        let cache = PipelineCache::new(
            CountingPipeline::default(),
            CacheConfig {
                capacity: 4,
                error_policy: ErrorCachePolicy::CacheFor(Duration::from_millis(50)),
            },
        );
        let key = PipelineKey::year(1999);

        cache.pipeline().failing.store(true, Ordering::SeqCst);
        cache.get_or_compute(&key).await;
        assert!(cache.peek(&key).await.is_some());
        cache.get_or_compute(&key).await;
        assert_eq!(cache.pipeline().runs(), 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(cache.peek(&key).await.is_none());
        cache.get_or_compute(&key).await;
        assert_eq!(cache.pipeline().runs(), 2);
    }

    #[tokio::test]
    async fn test_crashed_computation_yields_aborted_result() {
        let cache = cache(CountingPipeline::default(), 4);
        let key = PipelineKey::year(2023);

        cache.pipeline().panicking.store(true, Ordering::SeqCst);
        let result = cache.get_or_compute(&key).await;
        assert_eq!(result.failure_kind(), Some(FailureKind::Aborted));

        cache.pipeline().panicking.store(false, Ordering::SeqCst);
        assert!(cache.get_or_compute(&key).await.is_success());
        assert_eq!(cache.pipeline().runs(), 2);
    }

    #[tokio::test]
    async fn test_crash_counts_one_error_for_all_waiters() {
        let cache = Arc::new(cache(CountingPipeline::slow(Duration::from_millis(30)), 4));
        let key = PipelineKey::year(2023);
        cache.pipeline().panicking.store(true, Ordering::SeqCst);

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                tokio::spawn(async move { cache.get_or_compute(&key).await })
            })
            .collect();
        for waiter in waiters {
            let result = waiter.await.unwrap();
            assert_eq!(result.failure_kind(), Some(FailureKind::Aborted));
        }

        assert_eq!(cache.pipeline().runs(), 1);
        assert_eq!(cache.stats().coalesced(), 3);
        assert_eq!(cache.stats().errors(), 1);
    }

    #[tokio::test]
    async fn test_hit_is_not_held_up_by_other_computation() {
        let cache = Arc::new(cache(CountingPipeline::slow(Duration::from_millis(300)), 4));
        let ready = PipelineKey::year(2022);
        cache.get_or_compute(&ready).await;

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get_or_compute(&PipelineKey::year(2023)).await })
        };
        tokio::task::yield_now().await;

        let hit = tokio::time::timeout(Duration::from_millis(100), cache.get_or_compute(&ready))
            .await
            .unwrap();
        assert!(hit.is_success());
        assert!(pending.await.unwrap().is_success());
        assert_eq!(cache.pipeline().runs(), 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let cache = cache(CountingPipeline::default(), 4);
        cache.get_or_compute(&PipelineKey::year(2022)).await;
        cache.get_or_compute(&PipelineKey::year(2023)).await;
        assert_eq!(cache.stats().entry_count(), 2);

        cache.clear().await;
        assert!(cache.is_empty().await);
        assert_eq!(cache.stats().entry_count(), 0);
    }

    #[test]
    fn test_error_policy_parsing() {
        assert_eq!("never".parse::<ErrorCachePolicy>(), Ok(ErrorCachePolicy::DoNotCache));
        assert_eq!("Forever".parse::<ErrorCachePolicy>(), Ok(ErrorCachePolicy::CacheForever));
        assert_eq!(
            "300".parse::<ErrorCachePolicy>(),
            Ok(ErrorCachePolicy::CacheFor(Duration::from_secs(300)))
        );
        assert_eq!(
            "60s".parse::<ErrorCachePolicy>(),
            Ok(ErrorCachePolicy::CacheFor(Duration::from_secs(60)))
        );
        assert!("sometimes".parse::<ErrorCachePolicy>().is_err());
        assert_eq!(ErrorCachePolicy::CacheFor(Duration::from_secs(60)).to_string(), "60s");
    }

    #[test]
    fn test_config_validation() {
        assert!(CacheConfig::default().validate().is_ok());
        assert_eq!(CacheConfig::default().capacity, 32);

        let zero = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        assert!(zero.validate().is_err());
    }
}
