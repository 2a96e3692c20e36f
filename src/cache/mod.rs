//! Cache primitives behind the proxy protocol.
//!
//! - [`CacheController`] — per-tier freshness arbiter with O(1) bulk invalidation.
//! - [`CacheKey`] — the key shared by the positive and negative caches.
//! - [`NegativeCache`] — per-repository memory of "not found" outcomes.
//! - [`CacheManager`] / [`CacheRegion`] — named concurrent regions backing the caches.
//! - [`Content`] / [`ContentCacheStore`] — fetched bytes plus their attributes.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod content;
pub mod controller;
pub mod key;
pub mod negative;
pub mod region;
pub mod store;

pub use content::{Content, ContentAttributes};
pub use controller::{CacheControllers, CacheController, CacheInfo, CacheTier, Snapshot};
pub use key::CacheKey;
pub use negative::{NegativeCache, NegativeOutcome};
pub use region::{CacheManager, CacheRegion, RegionConfig};
pub use store::{ContentCacheStore, MemoryContentStore, StoreError};

/// Errors raised while building caches. All of them surface at construction or
/// start time, never while serving a request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache TTL must not be negative (got {ttl_seconds}s)")]
    NegativeTtl { ttl_seconds: i64 },

    #[error("cache region `{name}` already exists with different key/value types")]
    RegionTypeMismatch { name: String },
}

/// Options for one cache tier, read once when a repository starts.
///
/// The default (enabled, 24 hours) applies to every tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    /// Entry bound; only the negative cache keeps entries of its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_entries: Option<usize>,
}

impl TierConfig {
    pub const DEFAULT_TTL_SECONDS: i64 = 24 * 60 * 60;

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ttl_seconds: Self::DEFAULT_TTL_SECONDS,
            max_entries: None,
        }
    }

    pub fn with_ttl(ttl_seconds: i64) -> Self {
        Self {
            enabled: true,
            ttl_seconds,
            max_entries: None,
        }
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::with_ttl(Self::DEFAULT_TTL_SECONDS)
    }
}

fn default_enabled() -> bool {
    true
}

fn default_ttl_seconds() -> i64 {
    TierConfig::DEFAULT_TTL_SECONDS
}
