//! Cancellation registry for in-flight crawls
//!
//! Maps a job id to the cancellation token of the crawl currently running for
//! it. A crawl registers through [`CancellationRegistry::register`] and holds
//! the returned [`Registration`] for its whole lifetime; dropping it cancels
//! the token and removes the entry, so the registry never retains handles for
//! finished jobs.

use crate::storage::JobId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

/// Registry of cancellation handles keyed by job id
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: Mutex<HashMap<JobId, Entry>>,
    next_generation: AtomicU64,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<JobId, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers the handle of a crawl that is starting
    ///
    /// A previous entry for the same id is replaced; its guard will no longer
    /// remove anything when dropped.
    pub fn register(self: &Arc<Self>, job_id: JobId, token: CancellationToken) -> Registration {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self.entries().insert(
            job_id,
            Entry {
                generation,
                token: token.clone(),
            },
        );
        if replaced.is_some() {
            tracing::warn!("Job {} was already registered; replacing its handle", job_id);
        }

        Registration {
            registry: Arc::clone(self),
            job_id,
            generation,
            token,
        }
    }

    /// Cancels the crawl running for `job_id`
    ///
    /// Returns false (and does nothing) when no crawl is registered for the id.
    pub fn cancel(&self, job_id: JobId) -> bool {
        match self.entries().get(&job_id) {
            Some(entry) => {
                entry.token.cancel();
                tracing::info!("Cancellation requested for job {}", job_id);
                true
            }
            None => {
                tracing::debug!("Cancel for job {} ignored: not running", job_id);
                false
            }
        }
    }

    /// Cancels each listed job, returning how many were running
    pub fn cancel_many(&self, job_ids: &[JobId]) -> usize {
        job_ids.iter().filter(|&&id| self.cancel(id)).count()
    }

    /// Cancels every registered crawl, returning how many were signalled
    pub fn cancel_all(&self) -> usize {
        let entries = self.entries();
        for entry in entries.values() {
            entry.token.cancel();
        }
        entries.len()
    }

    /// Removes any entry for `job_id` without cancelling it
    pub fn unregister(&self, job_id: JobId) {
        self.entries().remove(&job_id);
    }

    pub fn is_registered(&self, job_id: JobId) -> bool {
        self.entries().contains_key(&job_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Removes the entry only if it still belongs to `generation`
    fn release(&self, job_id: JobId, generation: u64) {
        let mut entries = self.entries();
        if entries
            .get(&job_id)
            .is_some_and(|entry| entry.generation == generation)
        {
            entries.remove(&job_id);
        }
    }
}

/// Guard for one registered crawl
///
/// Dropping it cancels the crawl's token and unregisters it.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    job_id: JobId,
    generation: u64,
    token: CancellationToken,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.token.cancel();
        self.registry.release(self.job_id, self.generation);
    }
}
