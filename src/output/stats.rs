//! Statistics generation from the job database
//!
//! This module provides functionality for extracting and displaying job
//! counts per crawl status.

use crate::state::CrawlStatus;
use crate::storage::JobStore;
use crate::LinkscopeError;
use std::collections::HashMap;
use std::fmt::Write;

/// Job statistics summary
#[derive(Debug, Clone)]
pub struct JobStatistics {
    /// Total number of jobs
    pub total_jobs: u64,

    /// Count of jobs by status
    pub jobs_by_status: HashMap<CrawlStatus, u64>,
}

impl JobStatistics {
    pub fn count(&self, status: CrawlStatus) -> u64 {
        self.jobs_by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Loads statistics from storage
///
/// # Arguments
///
/// * `store` - The storage backend to query
///
/// # Returns
///
/// * `Ok(JobStatistics)` - Successfully loaded statistics
/// * `Err(LinkscopeError)` - Failed to query statistics
pub fn load_statistics(store: &dyn JobStore) -> Result<JobStatistics, LinkscopeError> {
    let jobs_by_status = store.count_jobs_by_status()?;
    let total_jobs = jobs_by_status.values().sum();

    Ok(JobStatistics {
        total_jobs,
        jobs_by_status,
    })
}

/// Formats statistics for display
pub fn render_statistics(stats: &JobStatistics) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== Job Statistics ===\n");
    let _ = writeln!(out, "Total jobs: {}\n", stats.total_jobs);

    let _ = writeln!(out, "Jobs by Status:");
    for status in CrawlStatus::all() {
        let count = stats.count(status);
        let percentage = if stats.total_jobs > 0 {
            (count as f64 / stats.total_jobs as f64) * 100.0
        } else {
            0.0
        };
        let _ = writeln!(out, "  {:<8} {} ({:.1}%)", status, count, percentage);
    }

    let finished = stats.count(CrawlStatus::Done) + stats.count(CrawlStatus::Error);
    if finished > 0 {
        let success_rate = stats.count(CrawlStatus::Done) as f64 / finished as f64 * 100.0;
        let _ = writeln!(
            out,
            "\nSuccess Rate: {:.1}% ({} / {} finished jobs done)",
            success_rate,
            stats.count(CrawlStatus::Done),
            finished
        );
    }

    out
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &JobStatistics) {
    print!("{}", render_statistics(stats));
}
