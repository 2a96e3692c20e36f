//! Stored content: bytes plus the attributes needed to serve and revalidate them.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use super::CacheInfo;
use crate::http::Headers;
use crate::http::conditional::{parse_http_date, unquote_etag};

/// Attributes persisted alongside the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentAttributes {
    pub content_type: String,
    pub last_modified: Option<DateTime<Utc>>,
    /// Entity tag without surrounding quotes.
    pub etag: Option<String>,
    pub cache_info: Option<CacheInfo>,
}

impl ContentAttributes {
    /// Reads `Content-Type`, `Last-Modified` and `ETag` from an origin response,
    /// falling back to `default_content_type`.
    pub fn from_upstream(
        headers: &Headers,
        default_content_type: &str,
        cache_info: CacheInfo,
    ) -> Self {
        Self {
            content_type: headers
                .get("content-type")
                .unwrap_or(default_content_type)
                .to_owned(),
            last_modified: headers.get("last-modified").and_then(parse_http_date),
            etag: headers.get("etag").map(unquote_etag),
            cache_info: Some(cache_info),
        }
    }
}

/// A stored artifact as handed back by a [`ContentCacheStore`](super::ContentCacheStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    body: Bytes,
    sha256: String,
    attributes: ContentAttributes,
}

impl Content {
    pub fn new(body: Bytes, sha256: impl Into<String>, attributes: ContentAttributes) -> Self {
        Self {
            body,
            sha256: sha256.into(),
            attributes,
        }
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }

    /// Hex-encoded SHA-256 of the body.
    pub fn sha256(&self) -> &str {
        &self.sha256
    }

    pub fn attributes(&self) -> &ContentAttributes {
        &self.attributes
    }

    pub fn content_type(&self) -> &str {
        &self.attributes.content_type
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.attributes.last_modified
    }

    pub fn etag(&self) -> Option<&str> {
        self.attributes.etag.as_deref()
    }

    pub fn cache_info(&self) -> Option<&CacheInfo> {
        self.attributes.cache_info.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn attributes_from_origin_headers() {
        let headers: Headers = [
            ("Content-Type", "application/x-debian-package"),
            ("Last-Modified", "Tue, 15 Nov 1994 12:45:26 GMT"),
            ("ETag", "\"5f-abc\""),
        ]
        .into_iter()
        .collect();
        let info = CacheInfo {
            last_verified: Utc::now(),
            epoch: 3,
        };

        let attrs = ContentAttributes::from_upstream(&headers, "application/octet-stream", info);

        assert_eq!(attrs.content_type, "application/x-debian-package");
        assert_eq!(
            attrs.last_modified,
            Some(Utc.with_ymd_and_hms(1994, 11, 15, 12, 45, 26).unwrap())
        );
        assert_eq!(attrs.etag.as_deref(), Some("5f-abc"));
        assert_eq!(attrs.cache_info, Some(info));
    }

    #[test]
    fn missing_headers_fall_back() {
        let info = CacheInfo {
            last_verified: Utc::now(),
            epoch: 0,
        };
        let attrs = ContentAttributes::from_upstream(&Headers::new(), "text/plain", info);
        assert_eq!(attrs.content_type, "text/plain");
        assert!(attrs.last_modified.is_none());
        assert!(attrs.etag.is_none());
    }
}
