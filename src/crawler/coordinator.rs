//! Crawl coordinator - per-job orchestration logic
//!
//! This module runs one crawl attempt for one job, including:
//! - Status transitions (`queued → running → done | error`)
//! - Registering the attempt's scope for external cancellation
//! - Fetching, analysing and link-checking the target page
//! - Publishing progress in a fixed, non-decreasing schedule
//! - Persisting the link set and final metrics

use super::analyzer::{detect_html_version, PageDocument};
use super::cancel::CancellationRegistry;
use super::fetcher::{is_html_content_type, FetchError, Fetcher};
use super::link_checker::{LinkChecker, LinkTally};
use super::progress::{Progress, ProgressHub};
use super::scope::CrawlScope;
use crate::storage::{AttemptId, JobId, JobRecord, JobStats, JobStore, NewLink, StorageError};
use crate::LinkscopeError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Progress after heading counts
const HEADINGS_PROGRESS: Progress = 10;

/// Progress after the login-form check
const LOGIN_CHECK_PROGRESS: Progress = 15;

const DONE_PROGRESS: Progress = 100;

/// Page-level reasons a crawl ends in `error`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrawlFailure {
    #[error("invalid target URL: {0}")]
    InvalidTarget(String),

    #[error("fetch failed: {0}")]
    Fetch(FetchError),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("unsupported content type: {0:?}")]
    UnsupportedContent(String),
}

/// How one call to [`Coordinator::crawl`] ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlOutcome {
    /// The job reached `done`
    Done,
    /// The job reached `error`
    Failed(CrawlFailure),
    /// No such job; nothing was written
    NotFound,
    /// The job was not queued, so no attempt was started
    Skipped,
    /// The job was restarted while this attempt ran; its results were discarded
    Superseded,
}

/// Progress value published after checking link `index` of `count`
///
/// `floor((index + 16) * 100 / (count + 18))`, with integer arithmetic.
///
/// # Example
///
/// ```
/// use linkscope::crawler::link_progress;
///
/// assert_eq!(link_progress(0, 2), 80);
/// assert_eq!(link_progress(1, 2), 85);
/// ```
pub fn link_progress(index: usize, count: usize) -> Progress {
    let total = count + 18;
    if total == 0 {
        return DONE_PROGRESS;
    }
    ((index + 16) * 100 / total).min(100) as Progress
}

/// Publishes one job's progress, never going backwards
struct ProgressTracker<'a> {
    hub: &'a ProgressHub,
    job_id: JobId,
    last: Option<Progress>,
}

impl<'a> ProgressTracker<'a> {
    fn new(hub: &'a ProgressHub, job_id: JobId) -> Self {
        Self {
            hub,
            job_id,
            last: None,
        }
    }

    fn publish(&mut self, pct: Progress) {
        let pct = self.last.map_or(pct, |last| pct.max(last));
        self.last = Some(pct);
        self.hub.publish(self.job_id, pct);
    }

    fn finish(&mut self) {
        self.publish(DONE_PROGRESS);
    }
}

/// Result of a successful fetch-and-analyse pass
struct PageReport {
    stats: JobStats,
    links: Vec<NewLink>,
}

/// Runs crawl attempts against shared engine state
#[derive(Clone)]
pub struct Coordinator {
    store: Arc<dyn JobStore>,
    fetcher: Arc<dyn Fetcher>,
    checker: LinkChecker,
    hub: Arc<ProgressHub>,
    registry: Arc<CancellationRegistry>,
    crawl_timeout: Duration,
}

impl Coordinator {
    /// Creates a new coordinator
    ///
    /// # Arguments
    ///
    /// * `store` - Persistence for job records and links
    /// * `fetcher` - Network access for the page fetch and link probes
    /// * `hub` - Where progress is published
    /// * `registry` - Where each attempt's scope is registered for cancellation
    /// * `crawl_timeout` - Deadline for one attempt, covering every request
    pub fn new(
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn Fetcher>,
        hub: Arc<ProgressHub>,
        registry: Arc<CancellationRegistry>,
        crawl_timeout: Duration,
    ) -> Self {
        Self {
            store,
            checker: LinkChecker::new(Arc::clone(&fetcher)),
            fetcher,
            hub,
            registry,
            crawl_timeout,
        }
    }

    /// Crawls one job to a terminal status
    ///
    /// Every started attempt publishes 100 as its last progress value and
    /// leaves no entry in the cancellation registry, whatever the outcome.
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlOutcome)` - How the attempt ended
    /// * `Err(LinkscopeError)` - Persistence failed; the record may be stale
    pub async fn crawl(&self, job_id: JobId) -> Result<CrawlOutcome, LinkscopeError> {
        let job = match self.store.load_job(job_id) {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                tracing::debug!("Job {} not found, skipping", job_id);
                return Ok(CrawlOutcome::NotFound);
            }
            Err(e) => return Err(e.into()),
        };

        let attempt = match self.store.begin_attempt(job_id) {
            Ok(attempt) => attempt,
            Err(StorageError::JobNotFound(_)) => {
                tracing::debug!("Job {} deleted before its crawl started", job_id);
                return Ok(CrawlOutcome::NotFound);
            }
            Err(StorageError::InvalidTransition { from, .. }) => {
                tracing::warn!("Job {} is {}, not queued; skipping", job_id, from);
                return Ok(CrawlOutcome::Skipped);
            }
            Err(e) => return Err(e.into()),
        };

        let scope = CrawlScope::new(self.crawl_timeout);
        let _registration = self.registry.register(job_id, scope.token().clone());

        let mut progress = ProgressTracker::new(&self.hub, job_id);
        progress.publish(0);

        tracing::debug!("Crawling job {}: {}", job_id, job.target_url);

        let report = match self.inspect(&job, &scope, &mut progress).await {
            Ok(report) => report,
            Err(failure) => {
                tracing::warn!("Job {} failed: {}", job_id, failure);
                let marked = self.store.mark_failed(job_id, attempt);
                progress.finish();
                return match marked {
                    Ok(()) => Ok(CrawlOutcome::Failed(failure)),
                    Err(e) => superseded_or(job_id, e),
                };
            }
        };

        let persisted = self.persist(job_id, attempt, &report);
        progress.finish();
        if let Err(e) = persisted {
            return superseded_or(job_id, e);
        }

        tracing::info!(
            "Job {} done: {} internal, {} external, {} broken links",
            job_id,
            report.stats.internal_links,
            report.stats.external_links,
            report.stats.broken_links
        );

        Ok(CrawlOutcome::Done)
    }

    /// Fetches, analyses and link-checks the target page
    async fn inspect(
        &self,
        job: &JobRecord,
        scope: &CrawlScope,
        progress: &mut ProgressTracker<'_>,
    ) -> Result<PageReport, CrawlFailure> {
        let target = Url::parse(&job.target_url)
            .map_err(|e| CrawlFailure::InvalidTarget(e.to_string()))?;

        let page = self
            .fetcher
            .get(target.as_str(), scope)
            .await
            .map_err(CrawlFailure::Fetch)?;

        if page.status_code >= 400 {
            return Err(CrawlFailure::HttpStatus(page.status_code));
        }
        if !is_html_content_type(&page.content_type) {
            return Err(CrawlFailure::UnsupportedContent(page.content_type));
        }

        let html_version = detect_html_version(&page.body);

        // the parsed tree must be gone before the first probe is awaited
        let (headings, has_login_form, title, extracted) = {
            let document = PageDocument::parse(&page.body);

            let headings = document.heading_counts();
            progress.publish(HEADINGS_PROGRESS);

            let has_login_form = document.has_login_form();
            progress.publish(LOGIN_CHECK_PROGRESS);

            (headings, has_login_form, document.title(), document.links(&target))
        };

        tracing::debug!(
            "Job {}: {} links to check on {}",
            job.id,
            extracted.len(),
            target
        );

        let count = extracted.len();
        let mut tally = LinkTally::default();
        let mut links = Vec::with_capacity(count);

        for (index, link) in extracted.into_iter().enumerate() {
            let status = self.checker.check(&link.url, scope).await;
            tally.record(link.is_internal, status);
            links.push(NewLink {
                href: link.url,
                is_internal: link.is_internal,
                http_status: status,
            });
            progress.publish(link_progress(index, count));
        }

        Ok(PageReport {
            stats: JobStats {
                html_version: html_version.label().to_string(),
                title,
                headings,
                internal_links: tally.internal,
                external_links: tally.external,
                broken_links: tally.broken,
                has_login_form,
            },
            links,
        })
    }

    /// Replaces the link set, then writes final metrics and `done`
    fn persist(
        &self,
        job_id: JobId,
        attempt: AttemptId,
        report: &PageReport,
    ) -> Result<(), StorageError> {
        self.store.replace_links(job_id, attempt, &report.links)?;
        self.store.complete_job(job_id, attempt, &report.stats)
    }
}

/// Maps a write rejected because of a restart to `Superseded`
fn superseded_or(job_id: JobId, e: StorageError) -> Result<CrawlOutcome, LinkscopeError> {
    if e.is_stale_attempt() {
        tracing::info!("Job {} was restarted mid-crawl; discarding this attempt", job_id);
        Ok(CrawlOutcome::Superseded)
    } else {
        Err(e.into())
    }
}
