//! Background work: bulk refresh of repository paths.
//!
//! A [`RefreshJob`] walks a list of paths through a repository, in order, and
//! checks its [`CancelFlag`] between items. A fetch already in flight always
//! completes; cancellation only prevents the next one from starting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::format::ProxyRequest;
use crate::proxy::ProxyResponse;
use crate::repository::Repository;

/// Shared cancellation signal. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome counts of one refresh run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub fetched: usize,
    pub not_found: usize,
    pub failed: usize,
    /// Set when the flag stopped the run before every path was visited.
    pub cancelled: bool,
}

pub struct RefreshJob {
    repository: Arc<Repository>,
    paths: Vec<String>,
    cancel: CancelFlag,
}

impl RefreshJob {
    pub fn new(repository: Arc<Repository>, paths: Vec<String>, cancel: CancelFlag) -> Self {
        Self {
            repository,
            paths,
            cancel,
        }
    }

    pub async fn run(self) -> RefreshReport {
        let mut report = RefreshReport::default();
        let name = self.repository.name().to_owned();

        for path in &self.paths {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let request = match path.split_once('?') {
                Some((path, query)) => ProxyRequest::new(path).with_query(query),
                None => ProxyRequest::new(path.as_str()),
            };
            match self.repository.fetch(&request).await {
                Ok(ProxyResponse::Content(content)) => {
                    debug!(repository = %name, %path, size = content.size(), "refreshed");
                    report.fetched += 1;
                }
                Ok(ProxyResponse::NotFound(outcome)) => {
                    debug!(repository = %name, %path, status = outcome.status, "not found");
                    report.not_found += 1;
                }
                Err(e) => {
                    warn!(repository = %name, %path, error = %e, "refresh failed");
                    report.failed += 1;
                }
            }
        }

        info!(
            repository = %name,
            fetched = report.fetched,
            not_found = report.not_found,
            failed = report.failed,
            cancelled = report.cancelled,
            "refresh finished"
        );
        report
    }
}
