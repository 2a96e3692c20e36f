//! Helm chart repositories: an `index.yaml` listing charts, plus packaged
//! chart archives and their provenance files.

use super::{Format, FormatAdapter, FormatError, ProxyRequest, file_name, key_for};
use crate::cache::{CacheKey, CacheTier};

#[derive(Debug, Clone, Copy, Default)]
pub struct HelmAdapter;

fn is_chart_artifact(name: &str) -> bool {
    name.ends_with(".tgz") || name.ends_with(".prov")
}

impl FormatAdapter for HelmAdapter {
    fn format(&self) -> Format {
        Format::Helm
    }

    fn cache_key(&self, request: &ProxyRequest) -> Result<CacheKey, FormatError> {
        key_for(Format::Helm, request)
    }

    fn cache_tier(&self, key: &CacheKey) -> CacheTier {
        if is_chart_artifact(file_name(key)) {
            CacheTier::Content
        } else {
            CacheTier::Metadata
        }
    }

    fn is_top_level_descriptor(&self, key: &CacheKey) -> bool {
        file_name(key) == "index.yaml"
    }

    fn default_content_type(&self, key: &CacheKey) -> &'static str {
        let name = file_name(key);
        if name.ends_with(".tgz") {
            "application/x-tar"
        } else if name.ends_with(".yaml") || name.ends_with(".prov") {
            "text/x-yaml"
        } else {
            "application/octet-stream"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_descriptor() {
        let key = HelmAdapter
            .cache_key(&ProxyRequest::new("/stable/index.yaml"))
            .unwrap();
        assert!(HelmAdapter.is_top_level_descriptor(&key));
        assert_eq!(HelmAdapter.cache_tier(&key), CacheTier::Metadata);
        assert_eq!(HelmAdapter.default_content_type(&key), "text/x-yaml");
    }

    #[test]
    fn charts_are_content() {
        for path in ["/nginx-15.1.0.tgz", "/nginx-15.1.0.tgz.prov"] {
            let key = HelmAdapter.cache_key(&ProxyRequest::new(path)).unwrap();
            assert_eq!(HelmAdapter.cache_tier(&key), CacheTier::Content, "{path}");
            assert!(!HelmAdapter.is_top_level_descriptor(&key));
        }
    }
}
