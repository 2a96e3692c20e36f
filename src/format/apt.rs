//! APT (Debian/Ubuntu) repositories.
//!
//! `dists/<dist>/{Release,InRelease,Release.gpg}` describe a distribution and
//! are the top-level descriptors; everything else under `dists/` is index
//! metadata; `pool/` holds the packages themselves.

use super::{Format, FormatAdapter, FormatError, ProxyRequest, file_name, key_for};
use crate::cache::{CacheKey, CacheTier};

const RELEASE_FILES: [&str; 3] = ["Release", "InRelease", "Release.gpg"];

#[derive(Debug, Clone, Copy, Default)]
pub struct AptAdapter;

impl AptAdapter {
    fn is_under_dists(key: &CacheKey) -> bool {
        key.as_path().starts_with("/dists/")
    }
}

impl FormatAdapter for AptAdapter {
    fn format(&self) -> Format {
        Format::Apt
    }

    fn cache_key(&self, request: &ProxyRequest) -> Result<CacheKey, FormatError> {
        key_for(Format::Apt, request)
    }

    fn cache_tier(&self, key: &CacheKey) -> CacheTier {
        if Self::is_under_dists(key) {
            CacheTier::Metadata
        } else {
            CacheTier::Content
        }
    }

    fn is_top_level_descriptor(&self, key: &CacheKey) -> bool {
        // dists/<dist>/Release only; component-level Release files are plain metadata
        let segments: Vec<_> = key.as_path().trim_start_matches('/').split('/').collect();
        Self::is_under_dists(key)
            && segments.len() == 3
            && RELEASE_FILES.contains(&file_name(key))
    }

    fn default_content_type(&self, key: &CacheKey) -> &'static str {
        let name = file_name(key);
        if name.ends_with(".deb") || name.ends_with(".udeb") {
            "application/vnd.debian.binary-package"
        } else if name.ends_with(".gz") {
            "application/gzip"
        } else if name.ends_with(".xz") {
            "application/x-xz"
        } else if name.ends_with(".gpg") {
            "application/pgp-signature"
        } else if Self::is_under_dists(key) {
            "text/plain"
        } else {
            "application/octet-stream"
        }
    }
}
