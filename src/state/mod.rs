//! State module for tracking crawl jobs
//!
//! - `CrawlStatus`: the per-job lifecycle (queued, running, done, error)

mod crawl_status;

pub use crawl_status::CrawlStatus;
