//! Storage traits and error types
//!
//! This module defines the persistence contract the crawl engine consumes and
//! the operations the surrounding service layer needs on top of it.

use crate::state::CrawlStatus;
use crate::storage::{AttemptId, JobId, JobListing, JobQuery, JobRecord, JobStats, LinkRecord, NewLink};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Invalid status transition for job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: CrawlStatus,
        to: CrawlStatus,
    },

    #[error("Attempt {attempt} of job {job_id} was superseded by a restart")]
    StaleAttempt { job_id: JobId, attempt: AttemptId },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StorageError {
    /// Returns true if the error means the job does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::JobNotFound(_))
    }

    /// Returns true if a newer attempt owns the job
    pub fn is_stale_attempt(&self) -> bool {
        matches!(self, Self::StaleAttempt { .. })
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for job persistence backends
///
/// Implementations must be safe to call from several workers at once.
pub trait JobStore: Send + Sync {
    // ===== Crawl lifecycle (consumed by the coordinator) =====

    /// Loads a job by ID
    ///
    /// Returns `StorageError::JobNotFound` when no such job exists, distinct
    /// from any transient database failure.
    fn load_job(&self, job_id: JobId) -> StorageResult<JobRecord>;

    /// Moves a queued job to running, zeroes its metrics and starts a new attempt
    ///
    /// The returned attempt must be passed to every later write of this crawl;
    /// once the job is requeued those writes fail with `StaleAttempt`.
    fn begin_attempt(&self, job_id: JobId) -> StorageResult<AttemptId>;

    /// Moves a running job to error
    fn mark_failed(&self, job_id: JobId, attempt: AttemptId) -> StorageResult<()>;

    /// Writes final metrics and moves a running job to done
    fn complete_job(&self, job_id: JobId, attempt: AttemptId, stats: &JobStats)
        -> StorageResult<()>;

    /// Replaces the job's link set: deletes every existing row, then inserts `links`
    fn replace_links(
        &self,
        job_id: JobId,
        attempt: AttemptId,
        links: &[NewLink],
    ) -> StorageResult<()>;

    // ===== Job management (service layer) =====

    /// Creates a queued job for `target_url`, or returns the existing one
    ///
    /// # Returns
    ///
    /// The job ID and whether it was newly created
    fn create_job(&self, target_url: &str) -> StorageResult<(JobId, bool)>;

    /// Resets the given jobs to queued with zeroed metrics
    ///
    /// Any attempt still in flight for these jobs becomes stale.
    ///
    /// Returns the IDs that exist and were reset, in input order.
    fn requeue_jobs(&self, job_ids: &[JobId]) -> StorageResult<Vec<JobId>>;

    /// Deletes jobs and their links, returning how many jobs were removed
    fn delete_jobs(&self, job_ids: &[JobId]) -> StorageResult<usize>;

    /// Gets all links recorded for a job by its latest crawl
    fn get_links(&self, job_id: JobId) -> StorageResult<Vec<LinkRecord>>;

    /// Lists jobs newest first with optional search and pagination
    fn list_jobs(&self, query: &JobQuery) -> StorageResult<JobListing>;

    /// Counts jobs by status
    fn count_jobs_by_status(&self) -> StorageResult<HashMap<CrawlStatus, u64>>;

    /// Moves every job still marked running to error
    ///
    /// Used at startup to settle attempts cut short by a crash.
    fn fail_interrupted_jobs(&self) -> StorageResult<usize>;
}
