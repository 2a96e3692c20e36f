//! Package-format adapters.
//!
//! The proxy protocol is written once against [`FormatAdapter`]; each
//! ecosystem only contributes its path grammar: how a request maps to a
//! [`CacheKey`], which tier the key belongs to, which keys are top-level
//! descriptors whose change forces every dependent artifact to revalidate,
//! and how stored content goes back on the wire.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::{CacheKey, CacheTier, Content};
use crate::http::conditional::{format_http_date, quote_etag};
use crate::http::{Headers, Request, Response, StatusCode};

pub mod apt;
pub mod golang;
pub mod helm;
pub mod r;

pub use apt::AptAdapter;
pub use golang::GoAdapter;
pub use helm::HelmAdapter;
pub use r::RAdapter;

/// Raised when a request path does not fit a format's grammar.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("path `{path}` is not valid for {format} repositories")]
    UnsupportedPath { format: Format, path: String },
}

/// The package ecosystems the proxy understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Apt,
    Helm,
    Go,
    R,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Apt => "apt",
            Self::Helm => "helm",
            Self::Go => "go",
            Self::R => "r",
        }
    }

    /// The adapter implementing this format.
    pub fn adapter(self) -> Arc<dyn FormatAdapter> {
        match self {
            Self::Apt => Arc::new(AptAdapter),
            Self::Helm => Arc::new(HelmAdapter),
            Self::Go => Arc::new(GoAdapter),
            Self::R => Arc::new(RAdapter),
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request as seen by the proxy: the path inside the repository plus what
/// the client sent alongside it.
#[derive(Debug, Clone, Default)]
pub struct ProxyRequest {
    path: String,
    query: Option<String>,
    headers: Headers,
}

impl ProxyRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    /// Builds a proxy request from an incoming HTTP request whose
    /// repository-relative path is `path`.
    pub fn from_http(request: &Request, path: &str) -> Self {
        Self {
            path: path.to_owned(),
            query: request
                .query_string()
                .filter(|q| !q.is_empty())
                .map(str::to_owned),
            headers: request.headers().clone(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

/// Format-specific hooks used by [`ProxyProtocol`](crate::proxy::ProxyProtocol).
pub trait FormatAdapter: Send + Sync {
    fn format(&self) -> Format;

    /// Maps a request onto the key used by both caches.
    ///
    /// # Errors
    ///
    /// [`FormatError::UnsupportedPath`] when the path is outside the format's grammar.
    fn cache_key(&self, request: &ProxyRequest) -> Result<CacheKey, FormatError>;

    /// Which tier's controller decides freshness for `key`.
    fn cache_tier(&self, key: &CacheKey) -> CacheTier;

    /// `true` for index/release files whose refresh must force every
    /// metadata-tier item to revalidate.
    fn is_top_level_descriptor(&self, key: &CacheKey) -> bool;

    /// Content type stored when the origin sends none.
    fn default_content_type(&self, _key: &CacheKey) -> &'static str {
        "application/octet-stream"
    }

    fn to_wire_response(&self, content: &Content) -> Response {
        content_response(content)
    }
}

/// `200 OK` carrying `content` with its validators.
pub fn content_response(content: &Content) -> Response {
    let mut response = Response::new(StatusCode::Ok).header("Content-Type", content.content_type());
    if let Some(modified) = content.last_modified() {
        response.add_header("Last-Modified", format_http_date(modified));
    }
    if let Some(etag) = content.etag() {
        response.add_header("ETag", quote_etag(etag));
    }
    response.body_bytes(content.body().clone())
}

/// Validates a repository-relative path and produces its key.
///
/// Paths get a leading `/`; empty, `.` and `..` segments are refused, except
/// for one trailing `/` marking a directory. Percent-encoded dots count as
/// dots and backslashes as separators, as URL resolution treats them.
pub(crate) fn key_for(format: Format, request: &ProxyRequest) -> Result<CacheKey, FormatError> {
    let raw = request.path();
    let path = if raw.starts_with('/') {
        raw.to_owned()
    } else {
        format!("/{raw}")
    };

    let unsupported = || FormatError::UnsupportedPath {
        format,
        path: raw.to_owned(),
    };
    let body = path.strip_prefix('/').ok_or_else(unsupported)?;
    let body = body.strip_suffix('/').unwrap_or(body);
    let refused = |segment: &str| {
        segment.is_empty() || segment.contains('\\') || is_dot_segment(segment)
    };
    if body.is_empty() || body.split('/').any(refused) {
        return Err(unsupported());
    }

    Ok(match request.query() {
        Some(query) => CacheKey::query(path, query),
        None => CacheKey::path(path),
    })
}

fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Last path segment of a key.
pub(crate) fn file_name(key: &CacheKey) -> &str {
    key.as_path().rsplit('/').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheInfo, ContentAttributes};
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    #[test]
    fn key_normalization() {
        let key = key_for(Format::Helm, &ProxyRequest::new("charts/index.yaml")).unwrap();
        assert_eq!(key, CacheKey::path("/charts/index.yaml"));

        let key = key_for(Format::Helm, &ProxyRequest::new("/charts/")).unwrap();
        assert_eq!(key, CacheKey::path("/charts/"));

        let key = key_for(Format::Go, &ProxyRequest::new("/m/@v/list").with_query("x=1")).unwrap();
        assert_eq!(key, CacheKey::query("/m/@v/list", "x=1"));
    }

    #[test]
    fn traversal_and_empty_segments_are_refused() {
        for bad in ["", "/", "/a/../b", "/a//b", "/./a", ".."] {
            assert!(
                key_for(Format::Apt, &ProxyRequest::new(bad)).is_err(),
                "{bad:?} should be refused"
            );
        }
    }

    #[test]
    fn encoded_traversal_is_refused() {
        for bad in [
            "/a/%2e%2e/%2e%2e/secret",
            "/a/%2E%2E/secret",
            "/a/.%2e/secret",
            "/a/%2e./secret",
            "/%2e/a",
            "/a/..\\..\\secret",
        ] {
            assert!(
                key_for(Format::Helm, &ProxyRequest::new(bad)).is_err(),
                "{bad:?} should be refused"
            );
        }

        let key = key_for(Format::Helm, &ProxyRequest::new("/charts/v1.%2e.tgz")).unwrap();
        assert_eq!(key, CacheKey::path("/charts/v1.%2e.tgz"));
    }

    #[test]
    fn wire_response_carries_validators() {
        let modified = Utc.with_ymd_and_hms(2022, 5, 6, 7, 8, 9).unwrap();
        let content = Content::new(
            Bytes::from_static(b"payload"),
            "00",
            ContentAttributes {
                content_type: "application/gzip".into(),
                last_modified: Some(modified),
                etag: Some("e1".into()),
                cache_info: Some(CacheInfo {
                    last_verified: modified,
                    epoch: 0,
                }),
            },
        );
        let response = HelmAdapter.to_wire_response(&content);
        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(response.headers().get("content-type"), Some("application/gzip"));
        assert_eq!(
            response.headers().get("last-modified"),
            Some("Fri, 06 May 2022 07:08:09 GMT")
        );
        assert_eq!(response.headers().get("etag"), Some("\"e1\""));
        assert_eq!(response.body_ref().as_ref(), b"payload");
    }

    #[test]
    fn format_names_roundtrip_through_serde() {
        #[derive(Deserialize)]
        struct Wrapper {
            format: Format,
        }
        let parsed: Wrapper = toml::from_str("format = \"go\"").unwrap();
        assert_eq!(parsed.format, Format::Go);
        assert_eq!(Format::Go.adapter().format(), Format::Go);
    }
}
