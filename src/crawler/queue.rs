//! Bounded job queue shared by the worker pool
//!
//! Producers wait while the buffer is full. Closing the queue stops new
//! enqueues; ids already buffered are still handed out before `dequeue`
//! reports end-of-stream.

use crate::storage::JobId;
use crate::LinkscopeError;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Default number of buffered job ids
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A FIFO of job ids with multiple consumers
pub struct JobQueue {
    sender: Mutex<Option<mpsc::Sender<JobId>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<JobId>>,
    capacity: usize,
}

impl JobQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(tx)),
            receiver: tokio::sync::Mutex::new(rx),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Adds a job id, waiting for space if the buffer is full
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The id was buffered
    /// * `Err(LinkscopeError::QueueClosed)` - The queue was closed
    pub async fn enqueue(&self, job_id: JobId) -> Result<(), LinkscopeError> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(LinkscopeError::QueueClosed)?;

        sender
            .send(job_id)
            .await
            .map_err(|_| LinkscopeError::QueueClosed)
    }

    /// Takes the next job id, or `None` once the queue is closed and drained
    pub async fn dequeue(&self) -> Option<JobId> {
        self.receiver.lock().await.recv().await
    }

    /// Stops accepting new ids; safe to call more than once
    pub fn close(&self) {
        let taken = self
            .sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if taken.is_some() {
            tracing::debug!("Job queue closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = JobQueue::new(10);
        for id in 1..=3 {
            queue.enqueue(id).await.unwrap();
        }
        assert_eq!(queue.dequeue().await, Some(1));
        assert_eq!(queue.dequeue().await, Some(2));
        assert_eq!(queue.dequeue().await, Some(3));
    }

    #[tokio::test]
    async fn test_close_drains_buffered_ids() {
        let queue = JobQueue::new(10);
        queue.enqueue(1).await.unwrap();
        queue.enqueue(2).await.unwrap();
        queue.close();

        assert_eq!(queue.dequeue().await, Some(1));
        assert_eq!(queue.dequeue().await, Some(2));
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let queue = JobQueue::new(10);
        queue.close();
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test]
    async fn test_enqueue_after_close_fails() {
        let queue = JobQueue::new(10);
        queue.close();
        assert!(matches!(
            queue.enqueue(1).await,
            Err(LinkscopeError::QueueClosed)
        ));
    }

    #[tokio::test]
    async fn test_enqueue_waits_when_full() {
        let queue = Arc::new(JobQueue::new(1));
        queue.enqueue(1).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.dequeue().await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.dequeue().await, Some(2));
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_work() {
        let queue = Arc::new(JobQueue::new(4));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(9).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Some(9));
    }
}
