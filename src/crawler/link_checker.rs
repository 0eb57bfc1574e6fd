//! Link health probing
//!
//! One HEAD probe per link, bound to the crawl scope. A probe that gets no
//! response records status 0, which is never counted as broken.

use super::fetcher::Fetcher;
use super::scope::CrawlScope;
use std::sync::Arc;

/// Status recorded when a probe could not complete
pub const UNREACHABLE_STATUS: u16 = 0;

/// True iff the probe got a client or server error response
pub fn is_broken(status: u16) -> bool {
    status >= 400
}

/// Probes links through a shared [`Fetcher`]
#[derive(Clone)]
pub struct LinkChecker {
    fetcher: Arc<dyn Fetcher>,
}

impl LinkChecker {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        Self { fetcher }
    }

    /// Returns the probe status for `url`, or [`UNREACHABLE_STATUS`]
    pub async fn check(&self, url: &str, scope: &CrawlScope) -> u16 {
        match self.fetcher.probe(url, scope).await {
            Ok(status) => status,
            Err(e) => {
                tracing::debug!("Probe of {} failed: {}", url, e);
                UNREACHABLE_STATUS
            }
        }
    }
}

/// Running internal/external/broken counts for one crawl
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkTally {
    pub internal: u32,
    pub external: u32,
    pub broken: u32,
}

impl LinkTally {
    pub fn record(&mut self, is_internal: bool, status: u16) {
        if is_internal {
            self.internal += 1;
        } else {
            self.external += 1;
        }
        if is_broken(status) {
            self.broken += 1;
        }
    }
}
