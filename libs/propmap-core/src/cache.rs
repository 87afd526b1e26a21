//! Mapping Cache
//!
//! Per-device cache of resolved mapping details in front of a [`MappingLoader`].
//!
//! ## Single-flight loading
//!
//! A miss stores a `Loading` slot holding a shared load future. Concurrent
//! `get` calls for the same device find that slot and await the same future,
//! so one resolution serves all of them, success or failure.
//!
//! Loads run as spawned tasks gated by a semaphore (`max_concurrent_loads`).
//! A caller that gives up does not cancel the load; the result still lands in
//! the cache for later requests.
//!
//! ## Bounds and invalidation
//!
//! - Entries expire `expire_after_write` after being loaded, and optionally
//!   `expire_after_access` after their last read.
//! - Past `max_capacity`, expired entries are purged first, then the least
//!   recently read entries are evicted.
//! - `invalidate_all` drops everything. Rule change signals carry no scope, so
//!   every signal clears the whole cache. A load that was in flight during
//!   the invalidation still answers its waiters but is not stored.

use crate::config::CacheConfig;
use crate::error::{MappingError, Result};
use crate::resolver::MappingLoader;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use propmap_model::ResolvedMappingDetail;
use propmap_store::RuleChange;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Resolved details of one device, shared between cache and callers
pub type MappingSet = Arc<Vec<ResolvedMappingDetail>>;

type LoadResult = std::result::Result<MappingSet, MappingError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

enum Slot {
    Loading { load_id: u64, load: SharedLoad },
    Ready(Cached),
}

struct Cached {
    value: MappingSet,
    written_at: Instant,
    accessed_at: Instant,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub invalidations: u64,
    pub evictions: u64,
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    invalidations: AtomicU64,
    evictions: AtomicU64,
}

struct Inner<L> {
    loader: L,
    config: CacheConfig,
    entries: DashMap<String, Slot>,
    load_permits: Semaphore,
    next_load_id: AtomicU64,
    counters: Counters,
}

pub struct MappingCache<L: MappingLoader> {
    inner: Arc<Inner<L>>,
}

impl<L: MappingLoader> Clone for MappingCache<L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<L: MappingLoader> MappingCache<L> {
    pub fn new(loader: L, config: CacheConfig) -> Self {
        let permits = config.max_concurrent_loads.max(1);
        Self {
            inner: Arc::new(Inner {
                loader,
                config,
                entries: DashMap::new(),
                load_permits: Semaphore::new(permits),
                next_load_id: AtomicU64::new(0),
                counters: Counters::default(),
            }),
        }
    }

    pub fn loader(&self) -> &L {
        &self.inner.loader
    }

    /// Cached details of `device_id`, loading them on a miss
    ///
    /// A load failure is returned to every caller that waited on that load
    /// and is not cached; the next call retries.
    pub async fn get(&self, device_id: &str) -> Result<MappingSet> {
        let now = Instant::now();
        let load = match self.inner.entries.entry(device_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let pending = match occupied.get_mut() {
                    Slot::Ready(cached) if !self.inner.is_expired(cached, now) => {
                        cached.accessed_at = now;
                        self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(Arc::clone(&cached.value));
                    }
                    Slot::Loading { load, .. } => Some(load.clone()),
                    Slot::Ready(_) => None,
                };
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);

                match pending {
                    Some(load) => load,
                    None => {
                        debug!("Mapping cache entry for {} expired", device_id);
                        let (load_id, load) = Inner::start_load(&self.inner, device_id);
                        occupied.insert(Slot::Loading {
                            load_id,
                            load: load.clone(),
                        });
                        load
                    }
                }
            }
            Entry::Vacant(vacant) => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                let (load_id, load) = Inner::start_load(&self.inner, device_id);
                vacant.insert(Slot::Loading {
                    load_id,
                    load: load.clone(),
                });
                load
            }
        };

        load.await
    }

    /// Cached details without loading; `None` when absent, loading or expired
    pub fn get_if_present(&self, device_id: &str) -> Option<MappingSet> {
        let now = Instant::now();
        let mut slot = self.inner.entries.get_mut(device_id)?;
        match slot.value_mut() {
            Slot::Ready(cached) if !self.inner.is_expired(cached, now) => {
                cached.accessed_at = now;
                Some(Arc::clone(&cached.value))
            }
            _ => None,
        }
    }

    /// Drop every entry, including in-flight loads
    pub fn invalidate_all(&self) {
        self.inner.entries.clear();
        self.inner.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        info!("Mapping cache invalidated");
    }

    /// Remove expired entries now instead of on next access
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of slots, in-flight loads included
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        CacheStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            loads: c.loads.load(Ordering::Relaxed),
            load_failures: c.load_failures.load(Ordering::Relaxed),
            invalidations: c.invalidations.load(Ordering::Relaxed),
            evictions: c.evictions.load(Ordering::Relaxed),
            entries: self.inner.entries.len(),
        }
    }

    /// Invalidate the whole cache on every rule change signal
    ///
    /// A lagged receiver missed signals and invalidates too. The task ends
    /// when the feed closes.
    pub fn spawn_invalidation_listener(
        &self,
        mut changes: broadcast::Receiver<RuleChange>,
    ) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        debug!("Rule change {:?}, invalidating mapping cache", change);
                        cache.invalidate_all();
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Mapping cache listener lagged by {} rule changes", missed);
                        cache.invalidate_all();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Rule change feed closed, stopping cache listener");
                        break;
                    }
                }
            }
        })
    }
}

impl<L: MappingLoader> Inner<L> {
    fn is_expired(&self, cached: &Cached, now: Instant) -> bool {
        if now.duration_since(cached.written_at) >= self.config.expire_after_write() {
            return true;
        }
        self.config
            .expire_after_access()
            .is_some_and(|idle| now.duration_since(cached.accessed_at) >= idle)
    }

    /// Spawn the load task; the caller stores the returned slot
    fn start_load(this: &Arc<Self>, device_id: &str) -> (u64, SharedLoad) {
        let load_id = this.next_load_id.fetch_add(1, Ordering::Relaxed);
        this.counters.loads.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(this);
        let key = device_id.to_string();
        let task = tokio::spawn(async move {
            let result = inner.run_load(&key).await;
            inner.complete_load(&key, load_id, &result);
            result
        });

        let inner = Arc::clone(this);
        let key = device_id.to_string();
        let load = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => {
                    let err = MappingError::cache_load(format!("load task for {} failed: {}", key, e));
                    inner.complete_load(&key, load_id, &Err(err.clone()));
                    Err(err)
                }
            }
        }
        .boxed()
        .shared();

        (load_id, load)
    }

    async fn run_load(&self, device_id: &str) -> LoadResult {
        let _permit = self
            .load_permits
            .acquire()
            .await
            .map_err(|_| MappingError::cache_load("load pool closed"))?;
        debug!("Loading mapping details for {}", device_id);
        self.loader.load(device_id).await.map(Arc::new)
    }

    /// Store a successful load unless it was superseded, drop a failed one
    fn complete_load(&self, device_id: &str, load_id: u64, result: &LoadResult) {
        let is_this_load =
            |slot: &Slot| matches!(slot, Slot::Loading { load_id: id, .. } if *id == load_id);

        match result {
            Ok(value) => {
                let stored = match self.entries.get_mut(device_id) {
                    Some(mut slot) if is_this_load(slot.value()) => {
                        let now = Instant::now();
                        *slot = Slot::Ready(Cached {
                            value: Arc::clone(value),
                            written_at: now,
                            accessed_at: now,
                        });
                        true
                    }
                    _ => false,
                };
                if stored {
                    self.enforce_capacity();
                } else {
                    debug!("Discarding superseded mapping load for {}", device_id);
                }
            }
            Err(e) => {
                self.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                self.entries.remove_if(device_id, |_, slot| is_this_load(slot));
                warn!("Failed to load mapping details for {}: {}", device_id, e);
            }
        }
    }

    fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, slot| match slot {
            Slot::Ready(cached) => !self.is_expired(cached, now),
            Slot::Loading { .. } => true,
        });
        before.saturating_sub(self.entries.len())
    }

    fn enforce_capacity(&self) {
        if self.entries.len() <= self.config.max_capacity {
            return;
        }
        self.purge_expired();

        while self.entries.len() > self.config.max_capacity {
            let victim = self
                .entries
                .iter()
                .filter_map(|entry| match entry.value() {
                    Slot::Ready(cached) => Some((entry.key().clone(), cached.accessed_at)),
                    Slot::Loading { .. } => None,
                })
                .min_by_key(|(_, accessed_at)| *accessed_at)
                .map(|(key, _)| key);

            let Some(key) = victim else {
                break;
            };
            if self
                .entries
                .remove_if(&key, |_, slot| matches!(slot, Slot::Ready(_)))
                .is_some()
            {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Evicted mapping cache entry for {}", key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use propmap_model::PropertyMetadata;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Counts resolutions; `fail` makes every load fail
    struct CountingLoader {
        calls: AtomicUsize,
        delay: Duration,
        fail: bool,
    }

    impl CountingLoader {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::new(Duration::from_millis(10))
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MappingLoader for CountingLoader {
        async fn load(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(MappingError::not_found(format!("device {}", device_id)));
            }
            let property = PropertyMetadata::new(format!("load-{}", n));
            Ok(vec![ResolvedMappingDetail::of_device("p", device_id).with_property(&property)])
        }
    }

    fn config() -> CacheConfig {
        CacheConfig {
            max_capacity: 100,
            expire_after_write_secs: 300,
            expire_after_access_secs: None,
            max_concurrent_loads: 4,
        }
    }

    #[tokio::test]
    async fn test_concurrent_gets_share_one_load() {
        let cache = MappingCache::new(CountingLoader::new(Duration::from_millis(50)), config());

        let results =
            futures::future::join_all((0..32).map(|_| cache.get("dev-1"))).await;

        assert_eq!(cache.loader().calls(), 1);
        let first = results[0].as_ref().unwrap();
        for result in &results {
            assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
        }
        assert_eq!(cache.stats().loads, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_gets_across_tasks_share_one_load() {
        let cache = MappingCache::new(CountingLoader::new(Duration::from_millis(50)), config());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("dev-1").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(cache.loader().calls(), 1);
    }

    #[tokio::test]
    async fn test_hit_after_load() {
        let cache = MappingCache::new(CountingLoader::new(Duration::ZERO), config());

        cache.get("dev-1").await.unwrap();
        cache.get("dev-1").await.unwrap();
        cache.get("dev-2").await.unwrap();

        assert_eq!(cache.loader().calls(), 2);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 2);
    }

    #[tokio::test]
    async fn test_failure_reaches_all_waiters_and_is_not_cached() {
        let cache = MappingCache::new(CountingLoader::failing(), config());

        let (a, b) = tokio::join!(cache.get("ghost"), cache.get("ghost"));
        assert!(a.unwrap_err().is_not_found());
        assert!(b.unwrap_err().is_not_found());
        assert_eq!(cache.loader().calls(), 1);
        assert!(cache.is_empty());

        assert!(cache.get("ghost").await.is_err());
        assert_eq!(cache.loader().calls(), 2);
        assert_eq!(cache.stats().load_failures, 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_forces_reload_for_every_device() {
        let cache = MappingCache::new(CountingLoader::new(Duration::ZERO), config());
        cache.get("dev-1").await.unwrap();
        let before = cache.get("dev-2").await.unwrap();

        cache.invalidate_all();
        assert!(cache.get_if_present("dev-2").is_none());

        let after = cache.get("dev-2").await.unwrap();
        assert_eq!(cache.loader().calls(), 3);
        assert_ne!(before[0].metadata_id, after[0].metadata_id);
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_load_is_not_stored() {
        let cache = MappingCache::new(CountingLoader::new(Duration::from_millis(50)), config());

        let pending = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get("dev-1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        cache.invalidate_all();

        // The waiter still gets its answer
        assert!(pending.await.unwrap().is_ok());
        assert!(cache.get_if_present("dev-1").is_none());

        cache.get("dev-1").await.unwrap();
        assert_eq!(cache.loader().calls(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_caller_still_populates() {
        let cache = MappingCache::new(CountingLoader::new(Duration::from_millis(30)), config());

        let timed_out =
            tokio::time::timeout(Duration::from_millis(5), cache.get("dev-1")).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get_if_present("dev-1").is_some());
        assert_eq!(cache.loader().calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_after_write() {
        let cache = MappingCache::new(CountingLoader::new(Duration::ZERO), config());

        cache.get("dev-1").await.unwrap();
        tokio::time::advance(Duration::from_secs(299)).await;
        cache.get("dev-1").await.unwrap();
        assert_eq!(cache.loader().calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        cache.get("dev-1").await.unwrap();
        assert_eq!(cache.loader().calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_after_access() {
        let cache = MappingCache::new(
            CountingLoader::new(Duration::ZERO),
            CacheConfig {
                expire_after_access_secs: Some(10),
                ..config()
            },
        );

        cache.get("dev-1").await.unwrap();
        for _ in 0..3 {
            tokio::time::advance(Duration::from_secs(9)).await;
            cache.get("dev-1").await.unwrap();
        }
        assert_eq!(cache.loader().calls(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_least_recently_read() {
        let cache = MappingCache::new(
            CountingLoader::new(Duration::ZERO),
            CacheConfig {
                max_capacity: 2,
                ..config()
            },
        );

        cache.get("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get("b").await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get("a").await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        cache.get("c").await.unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get_if_present("a").is_some());
        assert!(cache.get_if_present("b").is_none());
        assert!(cache.get_if_present("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_listener_invalidates_on_change() {
        let feed = propmap_store::ChangeFeed::default();
        let cache = MappingCache::new(CountingLoader::new(Duration::ZERO), config());
        let listener = cache.spawn_invalidation_listener(feed.subscribe());

        cache.get("dev-1").await.unwrap();
        feed.publish(RuleChange::Modified);

        for _ in 0..100 {
            if cache.stats().invalidations > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(cache.is_empty());

        drop(feed);
        listener.await.unwrap();
    }
}
