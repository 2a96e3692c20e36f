//! Proxy repositories and their lifecycle.
//!
//! A [`Repository`] binds one configured origin to its format adapter, its two
//! tier controllers, its negative cache and a content store. It must be
//! started against a [`CacheManager`] before it serves anything; stopping it
//! detaches the negative cache but leaves the region for the manager to keep
//! or destroy.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::cache::{
    CacheControllers, CacheError, CacheKey, CacheManager, CacheTier, ContentCacheStore,
    NegativeCache,
};
use crate::config::RepositoryConfig;
use crate::format::{Format, FormatAdapter, ProxyRequest};
use crate::proxy::{ProxyError, ProxyProtocol, ProxyResponse, UpstreamClient};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("repository `{name}` is already started")]
    AlreadyStarted { name: String },

    #[error("repository `{name}` is not started")]
    NotStarted { name: String },

    #[error("repository `{name}` is already registered")]
    Duplicate { name: String },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// Which cache an administrative invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidateScope {
    Content,
    Metadata,
    /// The whole negative cache, or the subset under a path.
    Negative(Option<String>),
}

impl InvalidateScope {
    /// Parses a `scope` query value, with an optional `path` for the negative cache.
    pub fn parse(scope: &str, path: Option<&str>) -> Option<Self> {
        match scope {
            "content" => Some(Self::Content),
            "metadata" => Some(Self::Metadata),
            "negative" => Some(Self::Negative(path.map(str::to_owned))),
            _ => None,
        }
    }
}

/// Point-in-time view of a repository, for the status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryStatus {
    pub name: String,
    pub format: Format,
    pub remote_url: String,
    pub started: bool,
    pub content_epoch: u64,
    pub metadata_epoch: u64,
    pub negative_cache_enabled: bool,
    pub negative_cache_entries: usize,
}

pub struct Repository {
    config: RepositoryConfig,
    controllers: Arc<CacheControllers>,
    negative: Arc<NegativeCache>,
    protocol: ProxyProtocol,
    started: AtomicBool,
}

impl Repository {
    /// Builds a stopped repository.
    ///
    /// # Errors
    ///
    /// [`CacheError::NegativeTtl`] when a tier TTL is negative.
    pub fn new(
        config: RepositoryConfig,
        upstream: Arc<dyn UpstreamClient>,
        store: Arc<dyn ContentCacheStore>,
    ) -> Result<Self, RepositoryError> {
        let controllers = Arc::new(CacheControllers::from_config(
            &config.content,
            &config.metadata,
        )?);
        let negative = Arc::new(NegativeCache::for_repository(config.name.as_str()));
        let protocol = ProxyProtocol::new(
            config.name.as_str(),
            config.remote_url.as_str(),
            config.format.adapter(),
            Arc::clone(&controllers),
            Arc::clone(&negative),
            store,
            upstream,
        );
        Ok(Self {
            config,
            controllers,
            negative,
            protocol,
            started: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn FormatAdapter> {
        self.protocol.adapter()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn start(&self, manager: &CacheManager) -> Result<(), RepositoryError> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RepositoryError::AlreadyStarted {
                name: self.config.name.clone(),
            });
        }
        if let Err(e) = self.negative.start(manager, &self.config.negative_cache) {
            self.started.store(false, Ordering::Release);
            return Err(e.into());
        }
        info!(
            repository = %self.config.name,
            format = %self.config.format,
            remote = %self.config.remote_url,
            "repository started"
        );
        Ok(())
    }

    /// Stops serving. Returns `false` if the repository was not started.
    pub fn stop(&self) -> bool {
        if !self.started.swap(false, Ordering::AcqRel) {
            return false;
        }
        self.negative.stop();
        info!(repository = %self.config.name, "repository stopped");
        true
    }

    pub async fn fetch(&self, request: &ProxyRequest) -> Result<ProxyResponse, RepositoryError> {
        if !self.is_started() {
            return Err(RepositoryError::NotStarted {
                name: self.config.name.clone(),
            });
        }
        Ok(self.protocol.handle(request).await?)
    }

    pub fn invalidate(&self, scope: &InvalidateScope) {
        match scope {
            InvalidateScope::Content => {
                self.controllers.get(CacheTier::Content).invalidate();
            }
            InvalidateScope::Metadata => {
                self.controllers.get(CacheTier::Metadata).invalidate();
            }
            InvalidateScope::Negative(None) => self.negative.invalidate_all(),
            InvalidateScope::Negative(Some(path)) => {
                let path = if path.starts_with('/') {
                    path.clone()
                } else {
                    format!("/{path}")
                };
                self.negative.invalidate_subset(&CacheKey::path(path));
            }
        }
        info!(repository = %self.config.name, ?scope, "cache invalidated");
    }

    pub fn status(&self) -> RepositoryStatus {
        RepositoryStatus {
            name: self.config.name.clone(),
            format: self.config.format,
            remote_url: self.config.remote_url.clone(),
            started: self.is_started(),
            content_epoch: self.controllers.content().current().epoch,
            metadata_epoch: self.controllers.metadata().current().epoch,
            negative_cache_enabled: self.negative.is_enabled(),
            negative_cache_entries: self.negative.len(),
        }
    }
}

/// Every configured repository, by name.
#[derive(Default)]
pub struct Repositories {
    by_name: BTreeMap<String, Arc<Repository>>,
}

impl Repositories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, repository: Repository) -> Result<Arc<Repository>, RepositoryError> {
        let name = repository.name().to_owned();
        if self.by_name.contains_key(&name) {
            return Err(RepositoryError::Duplicate { name });
        }
        let repository = Arc::new(repository);
        self.by_name.insert(name, Arc::clone(&repository));
        Ok(repository)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Repository>> {
        self.by_name.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Repository>> {
        self.by_name.values()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Starts every repository, stopping the ones already started if one fails.
    pub fn start_all(&self, manager: &CacheManager) -> Result<(), RepositoryError> {
        for repository in self.iter() {
            if let Err(e) = repository.start(manager) {
                warn!(repository = repository.name(), error = %e, "start failed");
                self.stop_all();
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn stop_all(&self) {
        for repository in self.iter() {
            repository.stop();
        }
    }
}
