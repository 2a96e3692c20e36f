//! Per-repository negative cache.
//!
//! Remembers recent "not found" answers from the origin so repeated requests
//! for absent resources are answered locally. The cache is bound to its
//! repository when constructed; it stays disabled until the repository starts
//! with the negative cache enabled, and drops its region handle on stop.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::{CacheError, CacheKey, CacheManager, CacheRegion, RegionConfig, TierConfig};

/// What the origin said when the resource could not be served.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NegativeOutcome {
    pub status: u16,
    pub message: String,
}

impl NegativeOutcome {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(404, message)
    }
}

type Region = CacheRegion<CacheKey, NegativeOutcome>;

/// Entry bound when the tier config does not set one.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

#[derive(Default)]
enum State {
    #[default]
    Disabled,
    Enabled(Arc<Region>),
}

/// Negative cache facet of one repository.
///
/// Every operation is a no-op (or reports empty) while disabled.
pub struct NegativeCache {
    repository: String,
    state: RwLock<State>,
}

impl NegativeCache {
    /// Creates a disabled cache bound to `repository`.
    pub fn for_repository(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            state: RwLock::new(State::Disabled),
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Name of the backing region in the [`CacheManager`].
    pub fn region_name(&self) -> String {
        format!("{}#negative-cache", self.repository)
    }

    /// Creates (or reattaches to) the backing region when `config` enables it.
    ///
    /// # Errors
    ///
    /// [`CacheError::NegativeTtl`] for a negative TTL, or a region type clash.
    pub fn start(&self, manager: &CacheManager, config: &TierConfig) -> Result<(), CacheError> {
        if config.ttl_seconds < 0 {
            return Err(CacheError::NegativeTtl {
                ttl_seconds: config.ttl_seconds,
            });
        }
        if !config.enabled {
            *self.write() = State::Disabled;
            debug!(repository = %self.repository, "negative cache disabled");
            return Ok(());
        }

        let region_config = RegionConfig {
            ttl: Some(Duration::from_secs(config.ttl_seconds.unsigned_abs())),
            max_entries: Some(config.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES)),
        };
        let region = manager.create_region(&self.region_name(), region_config)?;
        *self.write() = State::Enabled(region);
        info!(
            repository = %self.repository,
            ttl_seconds = config.ttl_seconds,
            "negative cache enabled"
        );
        Ok(())
    }

    /// Drops the region handle. The region itself is left to the
    /// [`CacheManager`]; destroying it is a separate decision.
    pub fn stop(&self) {
        *self.write() = State::Disabled;
        debug!(repository = %self.repository, "negative cache detached");
    }

    pub fn is_enabled(&self) -> bool {
        self.region().is_some()
    }

    pub fn get(&self, key: &CacheKey) -> Option<NegativeOutcome> {
        self.region()?.get(key)
    }

    pub fn put(&self, key: CacheKey, outcome: NegativeOutcome) {
        if let Some(region) = self.region() {
            debug!(repository = %self.repository, %key, status = outcome.status, "negative cache put");
            region.put(key, outcome);
        }
    }

    /// Removes exactly `key`.
    pub fn invalidate(&self, key: &CacheKey) {
        if let Some(region) = self.region() {
            region.remove(key);
        }
    }

    /// Removes `key` and every entry that `key` is a parent of.
    pub fn invalidate_subset(&self, key: &CacheKey) {
        if let Some(region) = self.region() {
            region.remove(key);
            region.retain(|entry| !key.is_parent_of(entry));
            debug!(repository = %self.repository, %key, "negative cache subset invalidated");
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(region) = self.region() {
            region.remove_all();
            debug!(repository = %self.repository, "negative cache cleared");
        }
    }

    /// Number of entries currently held; zero when disabled.
    pub fn len(&self) -> usize {
        self.region().map_or(0, |region| region.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn region(&self) -> Option<Arc<Region>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            State::Enabled(region) => Some(Arc::clone(region)),
            State::Disabled => None,
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> (CacheManager, NegativeCache) {
        let manager = CacheManager::new();
        let cache = NegativeCache::for_repository("maven-central");
        cache.start(&manager, &TierConfig::default()).unwrap();
        (manager, cache)
    }

    fn nf() -> NegativeOutcome {
        NegativeOutcome::not_found("gone")
    }

    #[test]
    fn disabled_cache_is_inert() {
        let manager = CacheManager::new();
        let cache = NegativeCache::for_repository("r");
        cache.start(&manager, &TierConfig::disabled()).unwrap();

        let key = CacheKey::path("/a");
        cache.put(key.clone(), nf());
        assert_eq!(cache.get(&key), None);
        cache.invalidate(&key);
        cache.invalidate_subset(&key);
        cache.invalidate_all();
        assert!(!cache.is_enabled());
        assert!(manager.region_names().is_empty());
    }

    #[test]
    fn never_started_cache_is_inert() {
        let cache = NegativeCache::for_repository("r");
        cache.put(CacheKey::path("/a"), nf());
        assert!(cache.get(&CacheKey::path("/a")).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn put_overwrites_and_invalidate_removes_exactly_one() {
        let (_manager, cache) = enabled();
        let a = CacheKey::path("/a");
        let b = CacheKey::path("/b");
        cache.put(a.clone(), nf());
        cache.put(a.clone(), NegativeOutcome::new(410, "gone for good"));
        cache.put(b.clone(), nf());
        assert_eq!(cache.get(&a).unwrap().status, 410);

        cache.invalidate(&a);
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
    }

    #[test]
    fn invalidate_subset_removes_key_and_children_only() {
        let (_manager, cache) = enabled();
        let key = CacheKey::path("/foo/");
        let key1 = CacheKey::path("/bar/baz.jar");
        let key2 = CacheKey::path("/foo/bar.jar");
        let query = CacheKey::query("/foo/search", "q=x");
        for k in [&key, &key1, &key2, &query] {
            cache.put(k.clone(), nf());
        }

        cache.invalidate_subset(&key);

        assert!(cache.get(&key).is_none());
        assert!(cache.get(&key2).is_none());
        assert!(cache.get(&key1).is_some());
        assert!(cache.get(&query).is_some());
    }

    #[test]
    fn invalidate_subset_without_separator_removes_only_itself() {
        let (_manager, cache) = enabled();
        let key = CacheKey::path("/foo");
        let child = CacheKey::path("/foo/bar.jar");
        cache.put(key.clone(), nf());
        cache.put(child.clone(), nf());

        cache.invalidate_subset(&key);

        assert!(cache.get(&key).is_none());
        assert!(cache.get(&child).is_some());
    }

    #[test]
    fn invalidate_all_clears() {
        let (_manager, cache) = enabled();
        for i in 0..10 {
            cache.put(CacheKey::path(format!("/{i}")), nf());
        }
        assert_eq!(cache.len(), 10);
        cache.invalidate_all();
        assert!(cache.is_empty());
    }

    #[test]
    fn stop_detaches_without_destroying_region() {
        let (manager, cache) = enabled();
        cache.put(CacheKey::path("/a"), nf());
        cache.stop();

        assert!(!cache.is_enabled());
        assert!(cache.get(&CacheKey::path("/a")).is_none());
        assert!(manager.contains(&cache.region_name()));

        // restarting reattaches to the surviving region
        cache.start(&manager, &TierConfig::default()).unwrap();
        assert!(cache.get(&CacheKey::path("/a")).is_some());
    }

    #[test]
    fn entry_bound_limits_remembered_misses() {
        let manager = CacheManager::new();
        let cache = NegativeCache::for_repository("r");
        let config = TierConfig {
            max_entries: Some(3),
            ..TierConfig::default()
        };
        cache.start(&manager, &config).unwrap();

        for i in 0..50 {
            cache.put(CacheKey::path(format!("/missing/{i}")), nf());
        }

        assert_eq!(cache.len(), 3);
        assert!(cache.get(&CacheKey::path("/missing/49")).is_some());
    }

    #[test]
    fn negative_ttl_fails_at_start() {
        let cache = NegativeCache::for_repository("r");
        assert!(matches!(
            cache.start(&CacheManager::new(), &TierConfig::with_ttl(-1)),
            Err(CacheError::NegativeTtl { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_put_and_invalidate_converge() {
        let (_manager, cache) = enabled();
        let cache = Arc::new(cache);

        let tasks: Vec<_> = (0..16)
            .map(|worker| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    for i in 0..250 {
                        let key = CacheKey::path(format!("/w{worker}/{i}"));
                        cache.put(key.clone(), NegativeOutcome::not_found("x"));
                        if i % 2 == 0 {
                            cache.invalidate(&key);
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(cache.len(), 16 * 125);
        for worker in 0..16 {
            for i in 0..250 {
                let present = cache
                    .get(&CacheKey::path(format!("/w{worker}/{i}")))
                    .is_some();
                assert_eq!(present, i % 2 == 1);
            }
        }
    }
}
