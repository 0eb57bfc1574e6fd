//! Progress fan-out for live crawl observers
//!
//! Each subscriber gets its own small bounded channel. Publishing never waits:
//! when a subscriber's buffer is full the value is dropped for that subscriber
//! only. Progress is best-effort live data; a slow observer may miss
//! intermediate percentages, and values it does receive keep publish order.

use crate::storage::JobId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, error::TrySendError};

/// Smallest buffer handed to a subscriber
pub const MIN_SUBSCRIBER_BUFFER: usize = 4;

/// Completion percentage, 0 to 100
pub type Progress = u8;

#[derive(Debug)]
struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Progress>,
}

/// Per-job publish/subscribe registry
#[derive(Debug)]
pub struct ProgressHub {
    buffer: usize,
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<JobId, Vec<Subscriber>>>,
}

impl ProgressHub {
    /// Creates a hub whose subscriber channels hold `buffer` values
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer: buffer.max(MIN_SUBSCRIBER_BUFFER),
            next_id: AtomicU64::new(0),
            subscribers: Mutex::new(HashMap::new()),
        }
    }

    fn subscribers(&self) -> MutexGuard<'_, HashMap<JobId, Vec<Subscriber>>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Adds a subscriber for `job_id`
    ///
    /// The returned [`Unsubscribe`] removes and closes exactly this channel
    /// when consumed or dropped.
    pub fn subscribe(self: &Arc<Self>, job_id: JobId) -> (ProgressReceiver, Unsubscribe) {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers()
            .entry(job_id)
            .or_default()
            .push(Subscriber { id, sender });

        (
            ProgressReceiver { job_id, receiver },
            Unsubscribe {
                hub: Arc::clone(self),
                job_id,
                subscriber_id: id,
            },
        )
    }

    /// Delivers `pct` to every current subscriber of `job_id` without waiting
    pub fn publish(&self, job_id: JobId, pct: Progress) {
        let mut subscribers = self.subscribers();
        let Some(list) = subscribers.get_mut(&job_id) else {
            return;
        };

        list.retain(|sub| match sub.sender.try_send(pct) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::trace!(
                    "Dropped progress {} for job {} (subscriber {} is full)",
                    pct,
                    job_id,
                    sub.id
                );
                true
            }
            // receiver went away without unsubscribing
            Err(TrySendError::Closed(_)) => false,
        });

        if list.is_empty() {
            subscribers.remove(&job_id);
        }
    }

    /// Number of live subscribers for `job_id`
    pub fn subscriber_count(&self, job_id: JobId) -> usize {
        self.subscribers().get(&job_id).map_or(0, Vec::len)
    }

    fn remove(&self, job_id: JobId, subscriber_id: u64) {
        let mut subscribers = self.subscribers();
        if let Some(list) = subscribers.get_mut(&job_id) {
            // dropping the sender closes the channel
            list.retain(|sub| sub.id != subscriber_id);
            if list.is_empty() {
                subscribers.remove(&job_id);
            }
        }
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(MIN_SUBSCRIBER_BUFFER)
    }
}

/// Receiving side of a progress subscription
#[derive(Debug)]
pub struct ProgressReceiver {
    job_id: JobId,
    receiver: mpsc::Receiver<Progress>,
}

impl ProgressReceiver {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Waits for the next value; `None` once the subscription is closed
    pub async fn recv(&mut self) -> Option<Progress> {
        self.receiver.recv().await
    }

    /// Takes a buffered value without waiting
    pub fn try_recv(&mut self) -> Option<Progress> {
        self.receiver.try_recv().ok()
    }
}

/// Releases one subscription
///
/// Consuming it with [`Unsubscribe::unsubscribe`] or dropping it removes the
/// channel from the hub exactly once.
#[derive(Debug)]
pub struct Unsubscribe {
    hub: Arc<ProgressHub>,
    job_id: JobId,
    subscriber_id: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.hub.remove(self.job_id, self.subscriber_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = Arc::new(ProgressHub::new(4));
        let (mut a, _ua) = hub.subscribe(1);
        let (mut b, _ub) = hub.subscribe(1);

        hub.publish(1, 10);
        hub.publish(1, 15);

        assert_eq!(a.recv().await, Some(10));
        assert_eq!(a.recv().await, Some(15));
        assert_eq!(b.recv().await, Some(10));
        assert_eq!(b.recv().await, Some(15));
    }

    #[tokio::test]
    async fn test_publish_is_scoped_to_job() {
        let hub = Arc::new(ProgressHub::new(4));
        let (mut other, _u) = hub.subscribe(2);

        hub.publish(1, 50);
        assert_eq!(other.try_recv(), None);
    }

    #[test]
    fn test_full_buffer_drops_values() {
        let hub = Arc::new(ProgressHub::new(4));
        let (mut rx, _u) = hub.subscribe(1);

        for pct in [0, 10, 15, 40, 60, 100] {
            hub.publish(1, pct);
        }

        let received: Vec<_> = std::iter::from_fn(|| rx.try_recv()).collect();
        assert_eq!(received, vec![0, 10, 15, 40]);
    }

    #[test]
    fn test_buffer_has_minimum_capacity() {
        let hub = Arc::new(ProgressHub::new(1));
        let (mut rx, _u) = hub.subscribe(1);

        for pct in [0, 10, 15, 20] {
            hub.publish(1, pct);
        }
        assert_eq!(std::iter::from_fn(|| rx.try_recv()).count(), 4);
    }

    #[tokio::test]
    async fn test_unsubscribe_closes_channel() {
        let hub = Arc::new(ProgressHub::new(4));
        let (mut rx, unsubscribe) = hub.subscribe(1);

        unsubscribe.unsubscribe();
        assert_eq!(hub.subscriber_count(1), 0);

        // publishing afterwards neither blocks nor panics
        hub.publish(1, 100);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_only_own_channel() {
        let hub = Arc::new(ProgressHub::new(4));
        let (_a, ua) = hub.subscribe(1);
        let (mut b, _ub) = hub.subscribe(1);

        drop(ua);
        assert_eq!(hub.subscriber_count(1), 1);

        hub.publish(1, 30);
        assert_eq!(b.recv().await, Some(30));
    }

    #[test]
    fn test_dropped_receiver_is_pruned() {
        let hub = Arc::new(ProgressHub::new(4));
        let (rx, _unsubscribe) = hub.subscribe(1);
        drop(rx);

        hub.publish(1, 10);
        assert_eq!(hub.subscriber_count(1), 0);
    }
}
