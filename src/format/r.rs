//! R package repositories (CRAN layout).
//!
//! Each `src/contrib/` or `bin/<platform>/contrib/<rversion>/` directory is
//! described by a `PACKAGES` index (plain, gzip or rds); the archives beside
//! it are immutable package builds.

use super::{Format, FormatAdapter, FormatError, ProxyRequest, file_name, key_for};
use crate::cache::{CacheKey, CacheTier};

const PACKAGES_FILES: [&str; 3] = ["PACKAGES", "PACKAGES.gz", "PACKAGES.rds"];
const ARCHIVE_SUFFIXES: [&str; 3] = [".tar.gz", ".tgz", ".zip"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RAdapter;

impl FormatAdapter for RAdapter {
    fn format(&self) -> Format {
        Format::R
    }

    fn cache_key(&self, request: &ProxyRequest) -> Result<CacheKey, FormatError> {
        key_for(Format::R, request)
    }

    fn cache_tier(&self, key: &CacheKey) -> CacheTier {
        let name = file_name(key);
        if ARCHIVE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            CacheTier::Content
        } else {
            CacheTier::Metadata
        }
    }

    fn is_top_level_descriptor(&self, key: &CacheKey) -> bool {
        PACKAGES_FILES.contains(&file_name(key))
    }

    fn default_content_type(&self, key: &CacheKey) -> &'static str {
        let name = file_name(key);
        if name.ends_with(".gz") || name.ends_with(".tgz") {
            "application/x-gzip"
        } else if name.ends_with(".zip") {
            "application/zip"
        } else if name == "PACKAGES" {
            "text/plain"
        } else {
            "application/octet-stream"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(path: &str) -> CacheKey {
        RAdapter.cache_key(&ProxyRequest::new(path)).unwrap()
    }

    #[test]
    fn packages_indexes_are_descriptors() {
        for path in [
            "/src/contrib/PACKAGES",
            "/src/contrib/PACKAGES.gz",
            "/bin/windows/contrib/4.3/PACKAGES.rds",
        ] {
            let key = key(path);
            assert!(RAdapter.is_top_level_descriptor(&key), "{path}");
            assert_eq!(RAdapter.cache_tier(&key), CacheTier::Metadata);
        }
    }

    #[test]
    fn archives_are_content() {
        for path in [
            "/src/contrib/ggplot2_3.4.4.tar.gz",
            "/src/contrib/Archive/ggplot2/ggplot2_3.4.0.tar.gz",
            "/bin/windows/contrib/4.3/ggplot2_3.4.4.zip",
        ] {
            let key = key(path);
            assert_eq!(RAdapter.cache_tier(&key), CacheTier::Content, "{path}");
            assert!(!RAdapter.is_top_level_descriptor(&key));
        }
    }
}
