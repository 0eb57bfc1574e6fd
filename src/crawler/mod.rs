//! Crawler module for single-page crawl orchestration
//!
//! This module contains the crawl engine, including:
//! - The bounded job queue and worker pool
//! - Per-job cancellation and progress fan-out
//! - HTTP fetching and link probing
//! - HTML analysis
//! - Per-job crawl coordination

mod analyzer;
mod cancel;
mod coordinator;
mod engine;
mod fetcher;
mod link_checker;
mod progress;
mod queue;
mod scope;

pub use analyzer::{
    analyze_page, detect_html_version, ExtractedLink, HeadingCounts, HtmlVersion, PageAnalysis,
    PageDocument,
};
pub use cancel::{CancellationRegistry, Registration};
pub use coordinator::{link_progress, Coordinator, CrawlFailure, CrawlOutcome};
pub use engine::{CrawlEngine, ProgressWatch, Submission};
pub use fetcher::{
    build_http_client, is_html_content_type, FetchError, FetchedPage, Fetcher, HttpFetcher,
};
pub use link_checker::{is_broken, LinkChecker, LinkTally, UNREACHABLE_STATUS};
pub use progress::{Progress, ProgressHub, ProgressReceiver, Unsubscribe, MIN_SUBSCRIBER_BUFFER};
pub use queue::{JobQueue, DEFAULT_QUEUE_CAPACITY};
pub use scope::{CrawlScope, ScopeExit};
