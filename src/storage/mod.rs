//! Storage module for persisting crawl jobs
//!
//! This module handles all database operations for the engine, including:
//! - SQLite database initialization and schema management
//! - Job records and their crawl status
//! - Wholesale replacement of a job's link set
//! - Listing, restarting and deleting jobs for the surrounding service

mod schema;
mod sqlite;
mod traits;

pub use sqlite::{init_database, SqliteStorage};
pub use traits::{JobStore, StorageError, StorageResult};

use crate::crawler::HeadingCounts;
use crate::state::CrawlStatus;
use crate::LinkscopeError;

use std::path::Path;

/// Opaque job identifier assigned by persistence
pub type JobId = i64;

/// Identifies one crawl attempt of a job; handed out by `begin_attempt`
pub type AttemptId = i64;

/// Default page size for job listings
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size accepted for job listings
pub const MAX_PAGE_SIZE: u32 = 100;

/// Initializes or opens a storage database
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(SqliteStorage)` - Successfully initialized storage
/// * `Err(LinkscopeError)` - Failed to initialize storage
pub fn open_storage(path: &Path) -> Result<SqliteStorage, LinkscopeError> {
    SqliteStorage::new(path)
}

/// Represents a crawl job in the database
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub target_url: String,
    pub status: CrawlStatus,
    pub html_version: Option<String>,
    pub title: Option<String>,
    pub headings: HeadingCounts,
    pub internal_links: u32,
    pub external_links: u32,
    pub broken_links: u32,
    pub has_login_form: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Represents one outbound link found by the most recent crawl of a job
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub id: i64,
    pub job_id: JobId,
    pub href: String,
    pub is_internal: bool,
    /// `None` until probed; `Some(0)` when the probe got no response
    pub http_status: Option<u16>,
    pub checked_at: Option<String>,
}

/// A checked link about to be written for a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLink {
    pub href: String,
    pub is_internal: bool,
    pub http_status: u16,
}

/// Metrics written when a crawl attempt completes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub html_version: String,
    pub title: Option<String>,
    pub headings: HeadingCounts,
    pub internal_links: u32,
    pub external_links: u32,
    pub broken_links: u32,
    pub has_login_form: bool,
}

/// Filter and pagination for job listings
#[derive(Debug, Clone)]
pub struct JobQuery {
    /// Substring matched against the target URL
    pub search: Option<String>,
    /// 1-based page number
    pub page: u32,
    pub size: u32,
}

impl Default for JobQuery {
    fn default() -> Self {
        Self {
            search: None,
            page: 1,
            size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl JobQuery {
    /// Clamps out-of-range values to the defaults
    pub fn normalized(&self) -> Self {
        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let size = if self.size < 1 || self.size > MAX_PAGE_SIZE {
            DEFAULT_PAGE_SIZE
        } else {
            self.size
        };
        Self {
            search,
            page: self.page.max(1),
            size,
        }
    }
}

/// One page of jobs plus the total matching count
#[derive(Debug, Clone)]
pub struct JobListing {
    pub jobs: Vec<JobRecord>,
    pub total: u64,
}
