//! Cancellation scope for one crawl attempt
//!
//! Every network call made on behalf of a crawl runs inside the attempt's
//! `CrawlScope`: it is interrupted as soon as the scope is cancelled or its
//! deadline passes, whichever comes first.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a scoped operation did not run to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScopeExit {
    #[error("crawl was cancelled")]
    Cancelled,

    #[error("crawl deadline exceeded")]
    DeadlineExceeded,
}

/// A bounded-lifetime context governing all I/O for one crawl attempt
#[derive(Debug, Clone)]
pub struct CrawlScope {
    token: CancellationToken,
    deadline: Instant,
}

impl CrawlScope {
    /// Creates a scope that expires `timeout` from now
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: Instant::now() + timeout,
        }
    }

    /// The handle an external stop request triggers
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Runs `fut` until it completes, the scope is cancelled, or the deadline passes
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, ScopeExit>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ScopeExit::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(ScopeExit::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}
