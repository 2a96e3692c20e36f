//! Go module proxies (GOPROXY protocol).
//!
//! ```text
//! <module>/@v/list            versions        metadata
//! <module>/@latest            latest version  metadata
//! <module>/@v/<ver>.info      version info    content
//! <module>/@v/<ver>.mod       go.mod          content
//! <module>/@v/<ver>.zip       module zip      content
//! sumdb/<name>/...            checksum db     metadata
//! ```
//!
//! Version lists change as modules publish, but nothing in the protocol acts
//! as a descriptor for the others, so no key forces a metadata flush.

use super::{Format, FormatAdapter, FormatError, ProxyRequest, key_for};
use crate::cache::{CacheKey, CacheTier};

#[derive(Debug, Clone, Copy, Default)]
pub struct GoAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GoPath {
    List,
    Latest,
    Info,
    Mod,
    Zip,
    SumDb,
}

fn classify(path: &str) -> Option<GoPath> {
    if path.starts_with("/sumdb/") {
        return Some(GoPath::SumDb);
    }
    if let Some(module) = path.strip_suffix("/@latest") {
        return (!module.is_empty()).then_some(GoPath::Latest);
    }
    let (module, rest) = path.split_once("/@v/")?;
    if module.is_empty() || rest.contains('/') {
        return None;
    }
    if rest == "list" {
        return Some(GoPath::List);
    }
    let (version, extension) = rest.rsplit_once('.')?;
    if version.is_empty() {
        return None;
    }
    match extension {
        "info" => Some(GoPath::Info),
        "mod" => Some(GoPath::Mod),
        "zip" => Some(GoPath::Zip),
        _ => None,
    }
}

impl FormatAdapter for GoAdapter {
    fn format(&self) -> Format {
        Format::Go
    }

    fn cache_key(&self, request: &ProxyRequest) -> Result<CacheKey, FormatError> {
        let key = key_for(Format::Go, request)?;
        match classify(key.as_path()) {
            Some(_) => Ok(key),
            None => Err(FormatError::UnsupportedPath {
                format: Format::Go,
                path: request.path().to_owned(),
            }),
        }
    }

    fn cache_tier(&self, key: &CacheKey) -> CacheTier {
        match classify(key.as_path()) {
            Some(GoPath::Info | GoPath::Mod | GoPath::Zip) => CacheTier::Content,
            _ => CacheTier::Metadata,
        }
    }

    fn is_top_level_descriptor(&self, _key: &CacheKey) -> bool {
        false
    }

    fn default_content_type(&self, key: &CacheKey) -> &'static str {
        match classify(key.as_path()) {
            Some(GoPath::Info | GoPath::Latest) => "application/json",
            Some(GoPath::Zip) => "application/zip",
            _ => "text/plain; charset=utf-8",
        }
    }
}
