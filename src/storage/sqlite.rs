//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the JobStore trait.

use crate::crawler::HeadingCounts;
use crate::state::CrawlStatus;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{JobStore, StorageError, StorageResult};
use crate::storage::{AttemptId, JobId, JobListing, JobQuery, JobRecord, JobStats, LinkRecord, NewLink};
use crate::LinkscopeError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const JOB_COLUMNS: &str = "id, target_url, status, html_version, title, h1, h2, h3, \
     internal_links, external_links, broken_links, has_login_form, created_at, updated_at";

/// SQLite storage backend
///
/// The connection sits behind a mutex so one store can be shared by every
/// worker; each call holds the lock for the duration of its statements.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Creates a new SqliteStorage instance
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStorage)` - Successfully opened/created database
    /// * `Err(LinkscopeError)` - Failed to open database
    pub fn new(path: &Path) -> Result<Self, LinkscopeError> {
        let conn = init_database(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Creates an in-memory database (for tests and dry runs)
    pub fn new_in_memory() -> Result<Self, LinkscopeError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Explains why a guarded status update touched no rows
    ///
    /// `attempt` is the attempt the caller believes it owns, if any.
    fn missed_transition(
        conn: &Connection,
        job_id: JobId,
        attempt: Option<AttemptId>,
        to: CrawlStatus,
    ) -> StorageError {
        let current: Result<Option<(String, AttemptId)>, rusqlite::Error> = conn
            .query_row(
                "SELECT status, attempt FROM jobs WHERE id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional();

        let (status, current_attempt) = match current {
            Ok(Some(row)) => row,
            Ok(None) => return StorageError::JobNotFound(job_id),
            Err(e) => return StorageError::Sqlite(e),
        };

        let from = match CrawlStatus::from_db_string(&status) {
            Some(from) => from,
            None => {
                return StorageError::Corrupt(format!("job {} has status '{}'", job_id, status))
            }
        };

        match attempt {
            Some(attempt) if attempt != current_attempt => {
                StorageError::StaleAttempt { job_id, attempt }
            }
            _ if from.can_transition_to(to) => StorageError::Corrupt(format!(
                "job {} allows {} -> {} but the update matched no row",
                job_id, from, to
            )),
            _ => StorageError::InvalidTransition { job_id, from, to },
        }
    }

    /// Fails unless `attempt` is the running attempt of `job_id`
    fn ensure_current_attempt(
        conn: &Connection,
        job_id: JobId,
        attempt: AttemptId,
    ) -> StorageResult<()> {
        let owned = conn
            .query_row(
                "SELECT 1 FROM jobs WHERE id = ?1 AND status = ?2 AND attempt = ?3",
                params![job_id, CrawlStatus::Running.to_db_string(), attempt],
                |_| Ok(()),
            )
            .optional()?;

        match owned {
            Some(()) => Ok(()),
            None => Err(Self::missed_transition(
                conn,
                job_id,
                Some(attempt),
                CrawlStatus::Done,
            )),
        }
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    Ok(JobRecord {
        id: row.get(0)?,
        target_url: row.get(1)?,
        status: CrawlStatus::from_db_string(&row.get::<_, String>(2)?)
            .unwrap_or(CrawlStatus::Error),
        html_version: row.get(3)?,
        title: row.get(4)?,
        headings: HeadingCounts {
            h1: row.get(5)?,
            h2: row.get(6)?,
            h3: row.get(7)?,
        },
        internal_links: row.get(8)?,
        external_links: row.get(9)?,
        broken_links: row.get(10)?,
        has_login_form: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl JobStore for SqliteStorage {
    // ===== Crawl lifecycle =====

    fn load_job(&self, job_id: JobId) -> StorageResult<JobRecord> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS),
            params![job_id],
            job_from_row,
        )
        .optional()?
        .ok_or(StorageError::JobNotFound(job_id))
    }

    fn begin_attempt(&self, job_id: JobId) -> StorageResult<AttemptId> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, attempt = attempt + 1, h1 = 0, h2 = 0, h3 = 0,
                 internal_links = 0, external_links = 0, broken_links = 0,
                 has_login_form = 0, updated_at = ?2
             WHERE id = ?3 AND status = ?4",
            params![
                CrawlStatus::Running.to_db_string(),
                now,
                job_id,
                CrawlStatus::Queued.to_db_string()
            ],
        )?;

        if changed == 0 {
            return Err(Self::missed_transition(&conn, job_id, None, CrawlStatus::Running));
        }

        let attempt = conn.query_row(
            "SELECT attempt FROM jobs WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        Ok(attempt)
    }

    fn mark_failed(&self, job_id: JobId, attempt: AttemptId) -> StorageResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2
             WHERE id = ?3 AND status = ?4 AND attempt = ?5",
            params![
                CrawlStatus::Error.to_db_string(),
                now,
                job_id,
                CrawlStatus::Running.to_db_string(),
                attempt
            ],
        )?;

        if changed == 0 {
            return Err(Self::missed_transition(
                &conn,
                job_id,
                Some(attempt),
                CrawlStatus::Error,
            ));
        }
        Ok(())
    }

    fn complete_job(
        &self,
        job_id: JobId,
        attempt: AttemptId,
        stats: &JobStats,
    ) -> StorageResult<()> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, html_version = ?2, title = ?3,
                 h1 = ?4, h2 = ?5, h3 = ?6,
                 internal_links = ?7, external_links = ?8, broken_links = ?9,
                 has_login_form = ?10, updated_at = ?11
             WHERE id = ?12 AND status = ?13 AND attempt = ?14",
            params![
                CrawlStatus::Done.to_db_string(),
                stats.html_version,
                stats.title,
                stats.headings.h1,
                stats.headings.h2,
                stats.headings.h3,
                stats.internal_links,
                stats.external_links,
                stats.broken_links,
                stats.has_login_form,
                now,
                job_id,
                CrawlStatus::Running.to_db_string(),
                attempt
            ],
        )?;

        if changed == 0 {
            return Err(Self::missed_transition(
                &conn,
                job_id,
                Some(attempt),
                CrawlStatus::Done,
            ));
        }
        Ok(())
    }

    fn replace_links(
        &self,
        job_id: JobId,
        attempt: AttemptId,
        links: &[NewLink],
    ) -> StorageResult<()> {
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;

        Self::ensure_current_attempt(&tx, job_id, attempt)?;

        tx.execute("DELETE FROM links WHERE job_id = ?1", params![job_id])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO links (job_id, href, is_internal, http_status, checked_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for link in links {
                stmt.execute(params![
                    job_id,
                    link.href,
                    link.is_internal,
                    link.http_status,
                    now
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    // ===== Job management =====

    fn create_job(&self, target_url: &str) -> StorageResult<(JobId, bool)> {
        let conn = self.conn()?;

        let existing: Option<JobId> = conn
            .query_row(
                "SELECT id FROM jobs WHERE target_url = ?1",
                params![target_url],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok((id, false));
        }

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO jobs (target_url, status, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![target_url, CrawlStatus::Queued.to_db_string(), now],
        )?;

        Ok((conn.last_insert_rowid(), true))
    }

    fn requeue_jobs(&self, job_ids: &[JobId]) -> StorageResult<Vec<JobId>> {
        let mut conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        let mut requeued = Vec::with_capacity(job_ids.len());

        {
            let mut stmt = tx.prepare(
                "UPDATE jobs SET status = ?1, attempt = attempt + 1, h1 = 0, h2 = 0, h3 = 0,
                     internal_links = 0, external_links = 0, broken_links = 0,
                     has_login_form = 0, updated_at = ?2
                 WHERE id = ?3",
            )?;
            for &job_id in job_ids {
                if stmt.execute(params![CrawlStatus::Queued.to_db_string(), now, job_id])? > 0 {
                    requeued.push(job_id);
                }
            }
        }

        tx.commit()?;
        Ok(requeued)
    }

    fn delete_jobs(&self, job_ids: &[JobId]) -> StorageResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = 0;

        for &job_id in job_ids {
            tx.execute("DELETE FROM links WHERE job_id = ?1", params![job_id])?;
            deleted += tx.execute("DELETE FROM jobs WHERE id = ?1", params![job_id])?;
        }

        tx.commit()?;
        Ok(deleted)
    }

    fn get_links(&self, job_id: JobId) -> StorageResult<Vec<LinkRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, href, is_internal, http_status, checked_at
             FROM links WHERE job_id = ?1 ORDER BY id",
        )?;

        let links = stmt
            .query_map(params![job_id], |row| {
                Ok(LinkRecord {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    href: row.get(2)?,
                    is_internal: row.get(3)?,
                    http_status: row.get(4)?,
                    checked_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(links)
    }

    fn list_jobs(&self, query: &JobQuery) -> StorageResult<JobListing> {
        let query = query.normalized();
        let conn = self.conn()?;
        let pattern = query.search.as_ref().map(|s| format!("%{}%", s));
        let offset = i64::from(query.page - 1) * i64::from(query.size);

        let (jobs, total) = match &pattern {
            Some(pattern) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs WHERE target_url LIKE ?1
                     ORDER BY created_at DESC, id DESC LIMIT ?2 OFFSET ?3",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map(params![pattern, query.size, offset], job_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM jobs WHERE target_url LIKE ?1",
                    params![pattern],
                    |row| row.get(0),
                )?;
                (jobs, total)
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM jobs ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
                    JOB_COLUMNS
                ))?;
                let jobs = stmt
                    .query_map(params![query.size, offset], job_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                let total: i64 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |row| row.get(0))?;
                (jobs, total)
            }
        };

        Ok(JobListing {
            jobs,
            total: total as u64,
        })
    }

    fn count_jobs_by_status(&self) -> StorageResult<HashMap<CrawlStatus, u64>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;

        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            if let Some(status) = CrawlStatus::from_db_string(&status) {
                counts.insert(status, count as u64);
            }
        }

        Ok(counts)
    }

    fn fail_interrupted_jobs(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE status = ?3",
            params![
                CrawlStatus::Error.to_db_string(),
                now,
                CrawlStatus::Running.to_db_string()
            ],
        )?;
        Ok(changed)
    }
}

/// Initializes or opens a database at the given path
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully opened/created database
/// * `Err(rusqlite::Error)` - Failed to open database
pub fn init_database(path: &Path) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA busy_timeout = 5000;
    ",
    )?;

    initialize_schema(&conn)?;

    Ok(conn)
}
