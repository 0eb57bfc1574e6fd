//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Linkscope database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per submitted target URL
CREATE TABLE IF NOT EXISTS jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    target_url TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'queued',
    -- bumped by every begin and requeue; stale attempts cannot write
    attempt INTEGER NOT NULL DEFAULT 0,
    html_version TEXT,
    title TEXT,
    h1 INTEGER NOT NULL DEFAULT 0,
    h2 INTEGER NOT NULL DEFAULT 0,
    h3 INTEGER NOT NULL DEFAULT 0,
    internal_links INTEGER NOT NULL DEFAULT 0,
    external_links INTEGER NOT NULL DEFAULT 0,
    broken_links INTEGER NOT NULL DEFAULT 0,
    has_login_form INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
CREATE INDEX IF NOT EXISTS idx_jobs_created ON jobs(created_at);

-- Outbound links from the most recent crawl of each job
CREATE TABLE IF NOT EXISTS links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id INTEGER NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    href TEXT NOT NULL,
    is_internal INTEGER NOT NULL,
    http_status INTEGER,
    checked_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_links_job ON links(job_id);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
