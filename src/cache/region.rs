//! Named cache regions and the manager that hands them out.
//!
//! Regions are concurrent maps: every `get`/`put`/`remove` is atomic for its
//! key without callers taking locks. Iteration works on a live view, so a
//! racing `put` may or may not be observed by a sweep in progress.

use std::any::Any;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use super::CacheError;

/// Puts between sweeps of expired entries.
const SWEEP_INTERVAL: usize = 1024;

/// Eviction settings for a region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegionConfig {
    /// Entries older than this read as absent; they are purged on read and
    /// swept periodically on write.
    pub ttl: Option<Duration>,
    /// Upper bound on entries; the oldest entry is evicted on overflow.
    pub max_entries: Option<usize>,
}

#[derive(Debug, Clone)]
struct Slot<V> {
    value: V,
    inserted: Instant,
}

/// A keyed, concurrently mutable cache region.
#[derive(Debug)]
pub struct CacheRegion<K, V>
where
    K: Eq + Hash,
{
    name: String,
    config: RegionConfig,
    entries: DashMap<K, Slot<V>>,
    puts: AtomicUsize,
}

impl<K, V> CacheRegion<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(name: impl Into<String>, config: RegionConfig) -> Self {
        Self {
            name: name.into(),
            config,
            entries: DashMap::new(),
            puts: AtomicUsize::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn is_expired(&self, slot: &Slot<V>) -> bool {
        self.config
            .ttl
            .is_some_and(|ttl| slot.inserted.elapsed() >= ttl)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if !self.is_expired(entry.value()) => return Some(entry.value().value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, slot| self.is_expired(slot));
        }
        None
    }

    /// Inserts or overwrites `key`.
    pub fn put(&self, key: K, value: V) {
        let puts = self.puts.fetch_add(1, Ordering::Relaxed) + 1;
        if puts % SWEEP_INTERVAL == 0 {
            self.purge_expired();
        }
        if let Some(max) = self.config.max_entries {
            if self.entries.len() >= max && !self.entries.contains_key(&key) {
                self.purge_expired();
                if self.entries.len() >= max {
                    self.evict_oldest();
                }
            }
        }
        self.entries.insert(
            key,
            Slot {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, slot)| slot.value)
    }

    pub fn remove_all(&self) {
        self.entries.clear();
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&self, mut keep: impl FnMut(&K) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    /// Snapshot of the live (unexpired) keys.
    pub fn keys(&self) -> Vec<K> {
        self.entries
            .iter()
            .filter(|entry| !self.is_expired(entry.value()))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of live (unexpired) entries.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| !self.is_expired(entry.value()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every expired entry.
    pub fn purge_expired(&self) {
        if self.config.ttl.is_none() {
            return;
        }
        let before = self.entries.len();
        self.entries.retain(|_, slot| !self.is_expired(slot));
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!(region = %self.name, purged, "expired entries swept");
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().inserted)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            debug!(region = %self.name, "evicted oldest entry");
        }
    }
}

type ErasedRegion = Arc<dyn Any + Send + Sync>;

/// Creates and destroys named regions.
///
/// Creation is idempotent: asking again for an existing name with the same
/// key and value types returns the region already in place. Destruction only
/// happens through [`destroy_region`](Self::destroy_region); repositories
/// stopping never destroy regions on their own.
#[derive(Default)]
pub struct CacheManager {
    regions: DashMap<String, ErasedRegion>,
}

impl CacheManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`CacheError::RegionTypeMismatch`] if `name` is taken by a region of
    /// different key/value types.
    pub fn create_region<K, V>(
        &self,
        name: &str,
        config: RegionConfig,
    ) -> Result<Arc<CacheRegion<K, V>>, CacheError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        match self.regions.entry(name.to_owned()) {
            Entry::Occupied(existing) => Arc::clone(existing.get())
                .downcast::<CacheRegion<K, V>>()
                .map_err(|_| CacheError::RegionTypeMismatch {
                    name: name.to_owned(),
                }),
            Entry::Vacant(slot) => {
                let region = Arc::new(CacheRegion::<K, V>::new(name, config));
                slot.insert(Arc::clone(&region) as ErasedRegion);
                info!(region = name, "cache region created");
                Ok(region)
            }
        }
    }

    /// Forgets the region. Handles still held elsewhere keep working but are
    /// no longer shared with future `create_region` callers.
    pub fn destroy_region(&self, name: &str) -> bool {
        let destroyed = self.regions.remove(name).is_some();
        if destroyed {
            info!(region = name, "cache region destroyed");
        }
        destroyed
    }

    pub fn contains(&self, name: &str) -> bool {
        self.regions.contains_key(name)
    }

    pub fn region_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.regions.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
