//! Service configuration, loaded from TOML.
//!
//! Tier options are read once when a repository starts; changing them means a
//! restart of that repository.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::cache::TierConfig;
use crate::format::Format;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("repository `{0}` is configured more than once")]
    DuplicateRepository(String),
}

impl ConfigError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_max_artifact_bytes")]
    pub max_artifact_bytes: usize,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

/// One proxy repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    pub format: Format,
    pub remote_url: String,
    #[serde(default)]
    pub content: TierConfig,
    #[serde(default)]
    pub metadata: TierConfig,
    #[serde(default)]
    pub negative_cache: TierConfig,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, format: Format, remote_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format,
            remote_url: remote_url.into(),
            content: TierConfig::default(),
            metadata: TierConfig::default(),
            negative_cache: TierConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("repositories.name", "must not be empty"));
        }
        if self.name.contains('/') {
            return Err(ConfigError::invalid(
                format!("repositories.{}.name", self.name),
                "must not contain '/'",
            ));
        }

        let remote = Url::parse(&self.remote_url).map_err(|e| {
            ConfigError::invalid(format!("repositories.{}.remote_url", self.name), e.to_string())
        })?;
        if !matches!(remote.scheme(), "http" | "https") {
            return Err(ConfigError::invalid(
                format!("repositories.{}.remote_url", self.name),
                format!("unsupported scheme `{}`", remote.scheme()),
            ));
        }

        for (tier, config) in [
            ("content", &self.content),
            ("metadata", &self.metadata),
            ("negative_cache", &self.negative_cache),
        ] {
            if config.ttl_seconds < 0 {
                return Err(ConfigError::invalid(
                    format!("repositories.{}.{tier}.ttl_seconds", self.name),
                    "must not be negative",
                ));
            }
            if config.max_entries == Some(0) {
                return Err(ConfigError::invalid(
                    format!("repositories.{}.{tier}.max_entries", self.name),
                    "must be at least 1",
                ));
            }
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            max_artifact_bytes: default_max_artifact_bytes(),
            repositories: Vec::new(),
        }
    }
}

impl ServiceConfig {
    /// Reads, parses and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::invalid("listen", "must not be empty"));
        }
        if self.upstream_timeout_secs == 0 {
            return Err(ConfigError::invalid("upstream_timeout_secs", "must be positive"));
        }
        if self.max_artifact_bytes == 0 {
            return Err(ConfigError::invalid("max_artifact_bytes", "must be positive"));
        }

        let mut seen = HashSet::new();
        for repository in &self.repositories {
            repository.validate()?;
            if !seen.insert(repository.name.as_str()) {
                return Err(ConfigError::DuplicateRepository(repository.name.clone()));
            }
        }
        Ok(())
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

fn default_listen() -> String {
    "127.0.0.1:8081".to_string()
}

fn default_upstream_timeout_secs() -> u64 {
    30
}

fn default_max_artifact_bytes() -> usize {
    512 * 1024 * 1024
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FULL: &str = r#"
        listen = "0.0.0.0:9000"
        upstream_timeout_secs = 5

        [[repositories]]
        name = "debian"
        format = "apt"
        remote_url = "http://deb.debian.org/debian"

        [repositories.metadata]
        ttl_seconds = 600

        [repositories.negative_cache]
        enabled = false

        [[repositories]]
        name = "charts"
        format = "helm"
        remote_url = "http://charts.example.com/stable/"

        [repositories.negative_cache]
        max_entries = 5000
    "#;

    #[test]
    fn parses_full_document_with_defaults() {
        let config = ServiceConfig::from_toml_str(FULL).unwrap();

        assert_eq!(config.listen, "0.0.0.0:9000");
        assert_eq!(config.upstream_timeout(), Duration::from_secs(5));
        assert_eq!(config.max_artifact_bytes, 512 * 1024 * 1024);
        assert_eq!(config.repositories.len(), 2);

        let debian = &config.repositories[0];
        assert_eq!(debian.format, Format::Apt);
        assert_eq!(debian.content, TierConfig::default());
        assert_eq!(debian.metadata, TierConfig::with_ttl(600));
        assert!(!debian.negative_cache.enabled);

        let charts = &config.repositories[1];
        assert_eq!(charts.format, Format::Helm);
        assert!(charts.negative_cache.enabled);
        assert_eq!(charts.negative_cache.max_entries, Some(5000));
    }

    #[test]
    fn empty_document_is_valid() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert_eq!(config, ServiceConfig::default());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.repositories[0].name, "debian");
    }

    #[test]
    fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServiceConfig::load(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result = ServiceConfig::from_toml_str("listn = \"x\"");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn unknown_format_is_rejected() {
        let doc = r#"
            [[repositories]]
            name = "npm"
            format = "npm"
            remote_url = "http://registry.example.com"
        "#;
        assert!(matches!(
            ServiceConfig::from_toml_str(doc),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn negative_ttl_fails_fast() {
        let doc = r#"
            [[repositories]]
            name = "r"
            format = "r"
            remote_url = "http://cran.example.com"

            [repositories.content]
            ttl_seconds = -1
        "#;
        let err = ServiceConfig::from_toml_str(doc).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "repositories.r.content.ttl_seconds"));
    }

    #[test]
    fn zero_entry_bound_fails_fast() {
        let mut repository = RepositoryConfig::new("r", Format::R, "http://cran.example.com");
        repository.negative_cache.max_entries = Some(0);
        assert!(matches!(
            repository.validate(),
            Err(ConfigError::InvalidValue { ref field, .. })
                if field == "repositories.r.negative_cache.max_entries"
        ));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut config = ServiceConfig::default();
        config
            .repositories
            .push(RepositoryConfig::new("go", Format::Go, "http://proxy.golang.org"));
        config
            .repositories
            .push(RepositoryConfig::new("go", Format::Go, "http://goproxy.io"));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicateRepository(name)) if name == "go"
        ));
    }

    #[test]
    fn bad_names_and_remotes_are_rejected() {
        for repository in [
            RepositoryConfig::new("", Format::Helm, "http://a"),
            RepositoryConfig::new("a/b", Format::Helm, "http://a"),
            RepositoryConfig::new("a", Format::Helm, "not a url"),
            RepositoryConfig::new("a", Format::Helm, "ftp://charts.example.com"),
        ] {
            assert!(
                matches!(repository.validate(), Err(ConfigError::InvalidValue { .. })),
                "{repository:?}"
            );
        }
    }

    #[test]
    fn https_remotes_are_accepted() {
        RepositoryConfig::new("a", Format::Helm, "https://charts.example.com")
            .validate()
            .unwrap();
    }
}
