//! Conditional fetches against a repository's origin.
//!
//! [`UpstreamClient`] is the seam the protocol talks to. [`HttpUpstreamClient`]
//! sits on a shared `reqwest` client: redirects followed up to a limit, the
//! whole exchange bounded by a deadline, bodies capped while they stream in.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use reqwest::redirect::Policy;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::BoxFuture;
use crate::cache::Content;
use crate::http::Headers;
use crate::http::conditional::{format_http_date, quote_etag};

/// Errors raised before an origin produced a usable status line and body.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to build the upstream client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("invalid upstream URI `{uri}`: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unsupported upstream scheme `{scheme}`")]
    UnsupportedScheme { scheme: String },

    #[error("failed to connect to `{uri}`: {source}")]
    Connect {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream did not answer `{uri}` within {after:?}")]
    Timeout { uri: String, after: Duration },

    #[error("too many redirects fetching `{uri}`")]
    TooManyRedirects { uri: String },

    #[error("upstream body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("upstream request for `{uri}` failed: {source}")]
    Request {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Validators taken from previously cached content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalHeaders {
    pub if_modified_since: Option<DateTime<Utc>>,
    /// Unquoted entity tag; quoted when written.
    pub if_none_match: Option<String>,
}

impl ConditionalHeaders {
    /// Validators for revalidating `existing`; empty when there is nothing cached.
    pub fn from_content(existing: Option<&Content>) -> Self {
        match existing {
            Some(content) => Self {
                if_modified_since: content.last_modified(),
                if_none_match: content.etag().map(str::to_owned),
            },
            None => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.if_modified_since.is_none() && self.if_none_match.is_none()
    }

    /// Request headers carrying the validators, in wire form.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(2);
        if let Some(since) = self.if_modified_since {
            pairs.push(("If-Modified-Since", format_http_date(since)));
        }
        if let Some(etag) = &self.if_none_match {
            pairs.push(("If-None-Match", quote_etag(etag)));
        }
        pairs
    }
}

/// A complete origin response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// Performs conditional GETs against an origin.
pub trait UpstreamClient: Send + Sync {
    fn fetch<'a>(
        &'a self,
        uri: &'a str,
        conditional: &'a ConditionalHeaders,
    ) -> BoxFuture<'a, Result<UpstreamResponse, UpstreamError>>;
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// HTTP and HTTPS origin client.
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpUpstreamClient {
    pub fn new(timeout: Duration, max_body_bytes: usize) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .user_agent(format!("artiproxy/{}", env!("CARGO_PKG_VERSION")))
            .redirect(Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            client,
            timeout,
            max_body_bytes,
        })
    }

    async fn fetch_inner(
        &self,
        uri: &str,
        conditional: &ConditionalHeaders,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let target = Url::parse(uri).map_err(|source| UpstreamError::InvalidUri {
            uri: uri.to_owned(),
            source,
        })?;
        if !matches!(target.scheme(), "http" | "https") {
            return Err(UpstreamError::UnsupportedScheme {
                scheme: target.scheme().to_owned(),
            });
        }

        let mut request = self.client.get(target.as_str()).header("Accept", "*/*");
        for (name, value) in conditional.header_pairs() {
            request = request.header(name, value);
        }

        let mut response = request.send().await.map_err(|e| self.classify(uri, e))?;
        let status = response.status().as_u16();
        if response.url() != &target {
            debug!(from = %target, to = %response.url(), "followed upstream redirect");
        }
        let headers = convert_headers(response.headers());

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(UpstreamError::BodyTooLarge {
                limit: self.max_body_bytes,
            });
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.classify(uri, e))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(UpstreamError::BodyTooLarge {
                    limit: self.max_body_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(UpstreamResponse {
            status,
            headers,
            body: body.freeze(),
        })
    }

    fn classify(&self, uri: &str, source: reqwest::Error) -> UpstreamError {
        let uri = uri.to_owned();
        if source.is_timeout() {
            UpstreamError::Timeout {
                uri,
                after: self.timeout,
            }
        } else if source.is_redirect() {
            UpstreamError::TooManyRedirects { uri }
        } else if source.is_connect() {
            UpstreamError::Connect { uri, source }
        } else {
            UpstreamError::Request { uri, source }
        }
    }
}

impl UpstreamClient for HttpUpstreamClient {
    fn fetch<'a>(
        &'a self,
        uri: &'a str,
        conditional: &'a ConditionalHeaders,
    ) -> BoxFuture<'a, Result<UpstreamResponse, UpstreamError>> {
        Box::pin(self.fetch_inner(uri, conditional))
    }
}

// Values that are not visible ASCII cannot be carried in `Headers`.
fn convert_headers(raw: &reqwest::header::HeaderMap) -> Headers {
    let mut headers = Headers::with_capacity(raw.len());
    for (name, value) in raw {
        match value.to_str() {
            Ok(value) => headers.insert(name.as_str(), value),
            Err(_) => debug!(header = %name, "dropping upstream header with a non-ASCII value"),
        }
    }
    headers
}
