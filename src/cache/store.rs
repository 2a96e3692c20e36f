//! Content cache store: where fetched bytes and their attributes live.
//!
//! [`ContentCacheStore`] is the seam to persistence. [`MemoryContentStore`]
//! keeps everything in process, with bytes addressed by SHA-256 so identical
//! artifacts under different keys share one blob.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{CacheInfo, CacheKey, Content, ContentAttributes};
use crate::BoxFuture;

/// Errors from a content store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("blob {sha256} referenced by `{key}` is missing")]
    MissingBlob { key: String, sha256: String },

    #[error("content store unavailable: {0}")]
    Unavailable(String),
}

/// Persists fetched bytes plus attributes under a [`CacheKey`].
pub trait ContentCacheStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Content>, StoreError>>;

    /// Stores `body` under `key`, replacing whatever was there.
    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        body: Bytes,
        attributes: ContentAttributes,
    ) -> BoxFuture<'a, Result<Content, StoreError>>;

    /// Restamps existing content as verified without touching its bytes.
    /// Resolves to `None` when nothing is stored under `key`.
    fn mark_verified<'a>(
        &'a self,
        key: &'a CacheKey,
        info: CacheInfo,
    ) -> BoxFuture<'a, Result<Option<Content>, StoreError>>;
}

#[derive(Debug, Clone)]
struct AssetRecord {
    sha256: String,
    attributes: ContentAttributes,
}

#[derive(Debug)]
struct Blob {
    bytes: Bytes,
    refs: usize,
}

/// In-process content store.
#[derive(Debug, Default)]
pub struct MemoryContentStore {
    assets: DashMap<CacheKey, AssetRecord>,
    blobs: DashMap<String, Blob>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored assets.
    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Number of distinct blobs backing those assets.
    pub fn blob_count(&self) -> usize {
        self.blobs.len()
    }

    /// Last-verified time of the asset at `key`, if any.
    pub fn last_verified(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        self.assets
            .get(key)
            .and_then(|asset| asset.attributes.cache_info.map(|info| info.last_verified))
    }

    fn load(&self, key: &CacheKey, record: AssetRecord) -> Result<Content, StoreError> {
        let bytes = self
            .blobs
            .get(&record.sha256)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| StoreError::MissingBlob {
                key: key.to_string(),
                sha256: record.sha256.clone(),
            })?;
        Ok(Content::new(bytes, record.sha256, record.attributes))
    }

    fn retain_blob(&self, sha256: &str, body: Bytes) {
        self.blobs
            .entry(sha256.to_owned())
            .and_modify(|blob| blob.refs += 1)
            .or_insert(Blob {
                bytes: body,
                refs: 1,
            });
    }

    fn release_blob(&self, sha256: &str) {
        if let Some(mut blob) = self.blobs.get_mut(sha256) {
            blob.refs = blob.refs.saturating_sub(1);
        }
        self.blobs.remove_if(sha256, |_, blob| blob.refs == 0);
    }
}

impl ContentCacheStore for MemoryContentStore {
    fn get<'a>(&'a self, key: &'a CacheKey) -> BoxFuture<'a, Result<Option<Content>, StoreError>> {
        Box::pin(async move {
            let Some(record) = self.assets.get(key).map(|r| r.clone()) else {
                return Ok(None);
            };
            self.load(key, record).map(Some)
        })
    }

    fn put<'a>(
        &'a self,
        key: &'a CacheKey,
        body: Bytes,
        attributes: ContentAttributes,
    ) -> BoxFuture<'a, Result<Content, StoreError>> {
        Box::pin(async move {
            let sha256 = hex::encode(Sha256::digest(&body));
            self.retain_blob(&sha256, body.clone());

            let record = AssetRecord {
                sha256: sha256.clone(),
                attributes: attributes.clone(),
            };
            if let Some(previous) = self.assets.insert(key.clone(), record) {
                self.release_blob(&previous.sha256);
            }
            Ok(Content::new(body, sha256, attributes))
        })
    }

    fn mark_verified<'a>(
        &'a self,
        key: &'a CacheKey,
        info: CacheInfo,
    ) -> BoxFuture<'a, Result<Option<Content>, StoreError>> {
        Box::pin(async move {
            let record = match self.assets.get_mut(key) {
                Some(mut asset) => {
                    asset.attributes.cache_info = Some(info);
                    asset.clone()
                }
                None => return Ok(None),
            };
            self.load(key, record).map(Some)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(epoch: u64) -> ContentAttributes {
        ContentAttributes {
            content_type: "application/gzip".into(),
            last_modified: None,
            etag: Some("v1".into()),
            cache_info: Some(CacheInfo {
                last_verified: Utc::now(),
                epoch,
            }),
        }
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryContentStore::new();
        let key = CacheKey::path("/charts/nginx-1.0.0.tgz");
        let stored = store
            .put(&key, Bytes::from_static(b"chart"), attrs(0))
            .await
            .unwrap();
        assert_eq!(stored.size(), 5);

        let loaded = store.get(&key).await.unwrap().unwrap();
        assert_eq!(loaded, stored);
        assert_eq!(loaded.sha256(), hex::encode(Sha256::digest(b"chart")));
    }

    #[tokio::test]
    async fn identical_bytes_share_a_blob() {
        let store = MemoryContentStore::new();
        let a = CacheKey::path("/a.deb");
        let b = CacheKey::path("/mirror/a.deb");
        store.put(&a, Bytes::from_static(b"same"), attrs(0)).await.unwrap();
        store.put(&b, Bytes::from_static(b"same"), attrs(0)).await.unwrap();
        assert_eq!(store.asset_count(), 2);
        assert_eq!(store.blob_count(), 1);

        store.put(&a, Bytes::from_static(b"new"), attrs(0)).await.unwrap();
        assert_eq!(store.blob_count(), 2);
        store.put(&b, Bytes::from_static(b"newer"), attrs(0)).await.unwrap();
        assert_eq!(store.blob_count(), 2);
    }

    #[tokio::test]
    async fn overwrite_with_same_bytes_keeps_blob() {
        let store = MemoryContentStore::new();
        let key = CacheKey::path("/index.yaml");
        store.put(&key, Bytes::from_static(b"x"), attrs(0)).await.unwrap();
        store.put(&key, Bytes::from_static(b"x"), attrs(1)).await.unwrap();
        assert_eq!(store.blob_count(), 1);
        assert!(store.get(&key).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn mark_verified_restamps_only() {
        let store = MemoryContentStore::new();
        let key = CacheKey::path("/dists/stable/Release");
        let before = store
            .put(&key, Bytes::from_static(b"release"), attrs(0))
            .await
            .unwrap();

        let info = CacheInfo {
            last_verified: Utc::now(),
            epoch: 9,
        };
        let after = store.mark_verified(&key, info).await.unwrap().unwrap();

        assert_eq!(after.body(), before.body());
        assert_eq!(after.etag(), before.etag());
        assert_eq!(after.cache_info(), Some(&info));
        assert_eq!(store.last_verified(&key), Some(info.last_verified));
    }

    #[tokio::test]
    async fn mark_verified_missing_key() {
        let store = MemoryContentStore::new();
        let info = CacheInfo {
            last_verified: Utc::now(),
            epoch: 0,
        };
        assert!(store
            .mark_verified(&CacheKey::path("/nope"), info)
            .await
            .unwrap()
            .is_none());
    }
}
