//! The proxy-cache state machine.
//!
//! For every request:
//!
//! 1. resolve the cache key through the format adapter;
//! 2. answer a remembered "not found" from the negative cache;
//! 3. serve stored content whose stamp is still fresh for its tier;
//! 4. otherwise fetch from the origin, conditionally when something is stored;
//! 5. classify the origin's answer and update both caches.
//!
//! Callers see content, "not found", or an error. Whether content was a hit, a
//! revalidation or a fresh fetch stays inside this module.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::upstream::{ConditionalHeaders, UpstreamClient, UpstreamError, UpstreamResponse};
use crate::cache::{
    CacheControllers, CacheKey, Content, ContentAttributes, ContentCacheStore, NegativeCache,
    NegativeOutcome, StoreError,
};
use crate::format::{FormatAdapter, FormatError, ProxyRequest};
use crate::http::StatusCode;

/// Errors surfaced by [`ProxyProtocol::handle`].
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The origin is unavailable or challenged us (401/402/407/5xx).
    #[error("upstream answered {status}")]
    Upstream { status: u16 },

    /// The origin answered with a status the protocol does not act on.
    #[error("upstream answered unexpected status {status}")]
    UnexpectedStatus { status: u16 },

    /// No status line was received.
    #[error(transparent)]
    Transport(#[from] UpstreamError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a caller gets back from the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyResponse {
    Content(Content),
    NotFound(NegativeOutcome),
}

impl ProxyResponse {
    pub fn content(&self) -> Option<&Content> {
        match self {
            Self::Content(content) => Some(content),
            Self::NotFound(_) => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Everything the protocol needs for one proxy repository.
pub struct ProxyProtocol {
    repository: String,
    remote_url: String,
    adapter: Arc<dyn FormatAdapter>,
    controllers: Arc<CacheControllers>,
    negative: Arc<NegativeCache>,
    store: Arc<dyn ContentCacheStore>,
    upstream: Arc<dyn UpstreamClient>,
}

impl ProxyProtocol {
    pub fn new(
        repository: impl Into<String>,
        remote_url: impl Into<String>,
        adapter: Arc<dyn FormatAdapter>,
        controllers: Arc<CacheControllers>,
        negative: Arc<NegativeCache>,
        store: Arc<dyn ContentCacheStore>,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            repository: repository.into(),
            remote_url: remote_url.into(),
            adapter,
            controllers,
            negative,
            store,
            upstream,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn FormatAdapter> {
        &self.adapter
    }

    /// Absolute origin URI for `key`.
    pub fn remote_uri(&self, key: &CacheKey) -> String {
        format!(
            "{}{}",
            self.remote_url.trim_end_matches('/'),
            key.request_target()
        )
    }

    pub async fn handle(&self, request: &ProxyRequest) -> Result<ProxyResponse, ProxyError> {
        let key = self.adapter.cache_key(request)?;

        if let Some(outcome) = self.negative.get(&key) {
            debug!(repository = %self.repository, %key, status = outcome.status, "negative cache hit");
            return Ok(ProxyResponse::NotFound(outcome));
        }

        let tier = self.adapter.cache_tier(&key);
        let controller = self.controllers.get(tier);
        let existing = self.store.get(&key).await?;

        if let Some(content) = &existing {
            let fresh = content
                .cache_info()
                .is_some_and(|info| !controller.is_stale(info));
            if fresh {
                debug!(repository = %self.repository, %key, tier = tier.as_str(), "cache hit");
                return Ok(ProxyResponse::Content(content.clone()));
            }
        }

        let conditional = ConditionalHeaders::from_content(existing.as_ref());
        let uri = self.remote_uri(&key);
        debug!(
            repository = %self.repository,
            %key,
            %uri,
            conditional = !conditional.is_empty(),
            "fetching from upstream"
        );
        let response = self.upstream.fetch(&uri, &conditional).await?;

        self.classify(key, existing, response).await
    }

    async fn classify(
        &self,
        key: CacheKey,
        existing: Option<Content>,
        response: UpstreamResponse,
    ) -> Result<ProxyResponse, ProxyError> {
        let status = response.status;
        match status {
            200 => self.store_fetched(key, response).await,
            304 => self.revalidated(key, existing).await,
            401 | 402 | 407 | 500.. => {
                warn!(repository = %self.repository, %key, status, "upstream unavailable");
                Err(ProxyError::Upstream { status })
            }
            400..=499 => {
                let reason = StatusCode::from_u16(status)
                    .map_or("Client Error", StatusCode::canonical_reason);
                let outcome =
                    NegativeOutcome::new(status, format!("upstream answered {status} {reason}"));
                self.negative.put(key, outcome.clone());
                Ok(ProxyResponse::NotFound(outcome))
            }
            _ => {
                warn!(repository = %self.repository, %key, status, "unexpected upstream status");
                Err(ProxyError::UnexpectedStatus { status })
            }
        }
    }

    async fn store_fetched(
        &self,
        key: CacheKey,
        response: UpstreamResponse,
    ) -> Result<ProxyResponse, ProxyError> {
        if self.adapter.is_top_level_descriptor(&key) {
            // bump first so the descriptor itself is stamped with the new epoch
            let epoch = self.controllers.metadata().invalidate();
            info!(repository = %self.repository, %key, epoch, "descriptor refreshed, metadata invalidated");
        }

        let controller = self.controllers.get(self.adapter.cache_tier(&key));
        let attributes = ContentAttributes::from_upstream(
            &response.headers,
            self.adapter.default_content_type(&key),
            controller.stamp(Utc::now()),
        );
        let content = self.store.put(&key, response.body, attributes).await?;
        self.negative.invalidate(&key);
        debug!(repository = %self.repository, %key, size = content.size(), "stored upstream content");
        Ok(ProxyResponse::Content(content))
    }

    async fn revalidated(
        &self,
        key: CacheKey,
        existing: Option<Content>,
    ) -> Result<ProxyResponse, ProxyError> {
        if existing.is_none() {
            error!(
                repository = %self.repository,
                %key,
                "upstream answered 304 to a request without validators"
            );
            return Ok(ProxyResponse::NotFound(not_modified_without_content()));
        }

        let info = self
            .controllers
            .get(self.adapter.cache_tier(&key))
            .stamp(Utc::now());
        match self.store.mark_verified(&key, info).await? {
            Some(content) => {
                debug!(repository = %self.repository, %key, "revalidated cached content");
                Ok(ProxyResponse::Content(content))
            }
            None => {
                warn!(repository = %self.repository, %key, "cached content vanished during revalidation");
                Ok(ProxyResponse::NotFound(not_modified_without_content()))
            }
        }
    }
}

fn not_modified_without_content() -> NegativeOutcome {
    NegativeOutcome::not_found("upstream answered 304 without cached content")
}
