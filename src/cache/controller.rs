//! Freshness arbitration for cached content.
//!
//! A [`CacheController`] owns an epoch counter and a TTL for one tier. Every
//! stored item carries a [`CacheInfo`] stamped with the epoch that was current
//! when it was verified. Bumping the epoch stales every older stamp at once,
//! without touching the stored bytes.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheError, TierConfig};

/// A named cache category with its own TTL and invalidation epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTier {
    /// Immutable payloads: packages, charts, module zips.
    Content,
    /// Indexes and descriptors that change in place upstream.
    Metadata,
}

impl CacheTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Content => "content",
            Self::Metadata => "metadata",
        }
    }
}

/// Freshness stamp attached to stored content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub last_verified: DateTime<Utc>,
    pub epoch: u64,
}

/// Point-in-time view of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub epoch: u64,
    pub ttl: TimeDelta,
}

/// Decides whether a [`CacheInfo`] is still usable without asking the origin.
///
/// # Examples
///
/// ```
/// use artiproxy::cache::{CacheController, CacheTier};
/// use chrono::{TimeDelta, Utc};
///
/// let controller = CacheController::new(CacheTier::Metadata, TimeDelta::hours(1)).unwrap();
/// let info = controller.stamp(Utc::now());
/// assert!(!controller.is_stale(&info));
///
/// controller.invalidate();
/// assert!(controller.is_stale(&info));
/// ```
#[derive(Debug)]
pub struct CacheController {
    tier: CacheTier,
    epoch: AtomicU64,
    ttl: TimeDelta,
}

impl CacheController {
    /// Creates a controller starting at epoch 0.
    ///
    /// # Errors
    ///
    /// [`CacheError::NegativeTtl`] when `ttl` is below zero.
    pub fn new(tier: CacheTier, ttl: TimeDelta) -> Result<Self, CacheError> {
        if ttl < TimeDelta::zero() {
            return Err(CacheError::NegativeTtl {
                ttl_seconds: ttl.num_seconds(),
            });
        }
        Ok(Self {
            tier,
            epoch: AtomicU64::new(0),
            ttl,
        })
    }

    /// Builds a controller from tier options. A disabled tier gets a zero TTL,
    /// so every lookup revalidates against the origin.
    pub fn from_config(tier: CacheTier, config: &TierConfig) -> Result<Self, CacheError> {
        if config.ttl_seconds < 0 {
            return Err(CacheError::NegativeTtl {
                ttl_seconds: config.ttl_seconds,
            });
        }
        let ttl = if config.enabled {
            TimeDelta::seconds(config.ttl_seconds)
        } else {
            TimeDelta::zero()
        };
        Self::new(tier, ttl)
    }

    pub fn tier(&self) -> CacheTier {
        self.tier
    }

    pub fn current(&self) -> Snapshot {
        Snapshot {
            epoch: self.epoch.load(Ordering::Acquire),
            ttl: self.ttl,
        }
    }

    /// Produces a stamp for content verified at `now` under the current epoch.
    pub fn stamp(&self, now: DateTime<Utc>) -> CacheInfo {
        CacheInfo {
            last_verified: now,
            epoch: self.epoch.load(Ordering::Acquire),
        }
    }

    pub fn is_stale(&self, info: &CacheInfo) -> bool {
        self.is_stale_at(info, Utc::now())
    }

    /// Stale when stamped under an older epoch, or when `ttl` has elapsed since
    /// the last verification.
    pub fn is_stale_at(&self, info: &CacheInfo, now: DateTime<Utc>) -> bool {
        info.epoch != self.epoch.load(Ordering::Acquire)
            || now.signed_duration_since(info.last_verified) >= self.ttl
    }

    /// Bumps the epoch and returns the new value.
    pub fn invalidate(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(tier = self.tier.as_str(), epoch, "cache tier invalidated");
        epoch
    }
}

/// The two tier controllers a proxy repository consults.
#[derive(Debug)]
pub struct CacheControllers {
    content: CacheController,
    metadata: CacheController,
}

impl CacheControllers {
    pub fn new(content: CacheController, metadata: CacheController) -> Self {
        Self { content, metadata }
    }

    pub fn from_config(content: &TierConfig, metadata: &TierConfig) -> Result<Self, CacheError> {
        Ok(Self::new(
            CacheController::from_config(CacheTier::Content, content)?,
            CacheController::from_config(CacheTier::Metadata, metadata)?,
        ))
    }

    pub fn get(&self, tier: CacheTier) -> &CacheController {
        match tier {
            CacheTier::Content => &self.content,
            CacheTier::Metadata => &self.metadata,
        }
    }

    pub fn content(&self) -> &CacheController {
        &self.content
    }

    pub fn metadata(&self) -> &CacheController {
        &self.metadata
    }
}
