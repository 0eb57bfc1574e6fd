//! Crawl engine: worker pool plus the public job-control surface
//!
//! The engine owns the job queue, the progress hub and the cancellation
//! registry, and runs a fixed number of workers that pull job ids from the
//! queue and hand them to a [`Coordinator`].

use super::cancel::CancellationRegistry;
use super::coordinator::{Coordinator, CrawlOutcome};
use super::fetcher::Fetcher;
use super::progress::{ProgressHub, ProgressReceiver, Unsubscribe};
use super::queue::JobQueue;
use crate::config::EngineConfig;
use crate::state::CrawlStatus;
use crate::storage::{JobId, JobStore};
use crate::LinkscopeError;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use url::Url;

/// Result of [`CrawlEngine::submit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    pub job_id: JobId,
    /// False when the URL already had a job, which was left untouched
    pub enqueued: bool,
}

/// Result of [`CrawlEngine::watch`]
#[derive(Debug)]
pub enum ProgressWatch {
    /// The job had already reached this terminal status
    Finished(CrawlStatus),
    /// Live progress for a queued or running job
    Live(ProgressReceiver, Unsubscribe),
}

/// A running worker pool
pub struct CrawlEngine {
    store: Arc<dyn JobStore>,
    queue: Arc<JobQueue>,
    hub: Arc<ProgressHub>,
    registry: Arc<CancellationRegistry>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
}

impl CrawlEngine {
    /// Starts the worker pool
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - Worker count, queue capacity, crawl timeout and progress buffer
    /// * `store` - Persistence for job records and links
    /// * `fetcher` - Network access shared by every worker
    pub fn start(
        config: &EngineConfig,
        store: Arc<dyn JobStore>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(config.queue_capacity));
        let hub = Arc::new(ProgressHub::new(config.progress_buffer));
        let registry = Arc::new(CancellationRegistry::new());

        let coordinator = Coordinator::new(
            Arc::clone(&store),
            fetcher,
            Arc::clone(&hub),
            Arc::clone(&registry),
            config.crawl_timeout(),
        );

        let worker_count = config.worker_count().max(1);
        let workers: Vec<JoinHandle<()>> = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(run_worker(
                    worker_id,
                    Arc::clone(&queue),
                    coordinator.clone(),
                ))
            })
            .collect();

        tracing::info!(
            "Crawl engine started with {} workers (queue capacity {})",
            worker_count,
            queue.capacity()
        );

        Self {
            store,
            queue,
            hub,
            registry,
            workers: Mutex::new(workers),
            worker_count,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CancellationRegistry> {
        &self.registry
    }

    /// Queues an existing job for crawling, waiting while the queue is full
    pub async fn enqueue(&self, job_id: JobId) -> Result<(), LinkscopeError> {
        self.queue.enqueue(job_id).await?;
        tracing::debug!("Job {} enqueued", job_id);
        Ok(())
    }

    /// Best-effort abort of the crawl running for `job_id`
    ///
    /// Returns whether a running crawl was signalled.
    pub fn cancel(&self, job_id: JobId) -> bool {
        self.registry.cancel(job_id)
    }

    /// Cancels each listed job, returning how many were running
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        self.registry.cancel_many(job_ids)
    }

    /// Cancels every in-flight crawl
    pub fn cancel_all(&self) -> usize {
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            tracing::info!("Cancelled {} running crawls", cancelled);
        }
        cancelled
    }

    /// Subscribes to live progress for `job_id`
    pub fn subscribe(&self, job_id: JobId) -> (ProgressReceiver, Unsubscribe) {
        self.hub.subscribe(job_id)
    }

    /// Subscribes, then checks whether the job has already finished
    ///
    /// Subscribing first means a crawl that completes between the two steps
    /// is still observed through the live channel.
    pub fn watch(&self, job_id: JobId) -> Result<ProgressWatch, LinkscopeError> {
        let (receiver, unsubscribe) = self.hub.subscribe(job_id);
        let job = self.store.load_job(job_id)?;

        if job.status.is_terminal() {
            unsubscribe.unsubscribe();
            return Ok(ProgressWatch::Finished(job.status));
        }

        Ok(ProgressWatch::Live(receiver, unsubscribe))
    }

    /// Creates a job for `url` and queues it
    ///
    /// A URL that already has a job returns that job without re-queueing it.
    pub async fn submit(&self, url: &str) -> Result<Submission, LinkscopeError> {
        let url = url.trim();
        validate_target(url)?;

        let (job_id, created) = self.store.create_job(url)?;
        if created {
            self.enqueue(job_id).await?;
        } else {
            tracing::debug!("{} already has job {}", url, job_id);
        }

        Ok(Submission {
            job_id,
            enqueued: created,
        })
    }

    /// Queues `job_id` again if its stored status is still queued
    ///
    /// A job left queued by an interrupted run is in no queue, so nothing
    /// would ever crawl it. Returns whether it was queued.
    pub async fn resume(&self, job_id: JobId) -> Result<bool, LinkscopeError> {
        let job = self.store.load_job(job_id)?;
        if job.status != CrawlStatus::Queued {
            return Ok(false);
        }

        self.enqueue(job_id).await?;
        tracing::info!("Resumed queued job {}", job_id);
        Ok(true)
    }

    /// Resets the given jobs to queued and queues each one
    ///
    /// A crawl still running for one of them is cancelled first, and its
    /// results are discarded. Unknown ids are skipped. Returns the ids that
    /// were queued.
    pub async fn restart(&self, job_ids: &[JobId]) -> Result<Vec<JobId>, LinkscopeError> {
        self.registry.cancel_many(job_ids);
        let requeued = self.store.requeue_jobs(job_ids)?;
        for &job_id in &requeued {
            self.enqueue(job_id).await?;
        }
        tracing::info!("Restarted {} of {} jobs", requeued.len(), job_ids.len());
        Ok(requeued)
    }

    /// Closes the queue and waits for every worker to drain it
    ///
    /// Jobs already buffered are still crawled. Calling it twice is harmless.
    pub async fn shutdown(&self) {
        self.queue.close();

        let workers: Vec<_> = self
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        tracing::info!("Crawl engine stopped");
    }
}

/// Accepts absolute http(s) URLs with a host
fn validate_target(url: &str) -> Result<(), LinkscopeError> {
    let invalid = |reason: &str| LinkscopeError::InvalidTarget {
        url: url.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(url).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

/// Pulls job ids until the queue is closed and drained
async fn run_worker(worker_id: usize, queue: Arc<JobQueue>, coordinator: Coordinator) {
    tracing::debug!("Worker {} started", worker_id);

    while let Some(job_id) = queue.dequeue().await {
        // a panicking crawl must not take the worker down with it
        let crawl = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.crawl(job_id).await })
        };

        match crawl.await {
            Ok(Ok(CrawlOutcome::Done)) => {}
            Ok(Ok(CrawlOutcome::Failed(failure))) => {
                tracing::debug!("Worker {}: job {} ended in error: {}", worker_id, job_id, failure);
            }
            Ok(Ok(CrawlOutcome::NotFound | CrawlOutcome::Skipped | CrawlOutcome::Superseded)) => {}
            Ok(Err(e)) => {
                tracing::error!("Job {} could not be persisted: {}", job_id, e);
            }
            Err(e) => {
                tracing::error!("Crawl task for job {} panicked: {}", job_id, e);
            }
        }
    }

    tracing::debug!("Worker {} stopped", worker_id);
}
