//! Cache keys shared by the content store and the negative cache.

use std::fmt;

use serde::Serialize;

/// Identifies one cacheable resource within a repository.
///
/// Plain paths form a hierarchy: a path ending in `/` is the parent of every
/// path it prefixes. Requests carrying a query string are keyed separately and
/// never take part in that hierarchy.
///
/// ```
/// use artiproxy::cache::CacheKey;
///
/// let dir = CacheKey::path("/foo/");
/// assert!(dir.is_parent_of(&CacheKey::path("/foo/bar.jar")));
/// assert!(!CacheKey::path("/foo").is_parent_of(&CacheKey::path("/foo/bar.jar")));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CacheKey {
    Path { path: String },
    Query { path: String, query: String },
}

impl CacheKey {
    pub fn path(path: impl Into<String>) -> Self {
        Self::Path { path: path.into() }
    }

    pub fn query(path: impl Into<String>, query: impl Into<String>) -> Self {
        Self::Query {
            path: path.into(),
            query: query.into(),
        }
    }

    /// The path component, without any query.
    pub fn as_path(&self) -> &str {
        match self {
            Self::Path { path } | Self::Query { path, .. } => path,
        }
    }

    /// The request target to send upstream: path plus `?query` when present.
    pub fn request_target(&self) -> String {
        self.to_string()
    }

    /// `true` only when `self` is a path ending in `/` that literally prefixes
    /// `other`, and both keys are plain paths.
    pub fn is_parent_of(&self, other: &CacheKey) -> bool {
        match (self, other) {
            (Self::Path { path: parent }, Self::Path { path: child }) => {
                parent.ends_with('/') && child.starts_with(parent.as_str())
            }
            _ => false,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Path { path } => f.write_str(path),
            Self::Query { path, query } => write!(f, "{path}?{query}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_separator_parents_every_prefixed_path() {
        let parent = CacheKey::path("/dists/bookworm/");
        for child in [
            "/dists/bookworm/Release",
            "/dists/bookworm/main/binary-amd64/Packages.gz",
            "/dists/bookworm/",
        ] {
            assert!(parent.is_parent_of(&CacheKey::path(child)), "{child}");
        }
        for other in ["/dists/bookworm", "/dists/bullseye/Release", "/pool/main/"] {
            assert!(!parent.is_parent_of(&CacheKey::path(other)), "{other}");
        }
    }

    #[test]
    fn no_trailing_separator_parents_nothing() {
        let key = CacheKey::path("/foo");
        assert!(!key.is_parent_of(&CacheKey::path("/foo/bar.jar")));
        assert!(!key.is_parent_of(&CacheKey::path("/foobar")));
        assert!(!key.is_parent_of(&CacheKey::path("/foo")));
    }

    #[test]
    fn different_kinds_never_relate() {
        let dir = CacheKey::path("/mod/");
        let query = CacheKey::query("/mod/@v/list", "go-get=1");
        assert!(!dir.is_parent_of(&query));
        assert!(!CacheKey::query("/mod/", "x").is_parent_of(&CacheKey::path("/mod/a")));
    }

    #[test]
    fn request_target_includes_query() {
        assert_eq!(CacheKey::path("/a/b").request_target(), "/a/b");
        assert_eq!(CacheKey::query("/a", "x=1").request_target(), "/a?x=1");
    }
}
