//! In-process queue for tests and single-process deployments.
//!
//! Not durable: items are lost when the process exits.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{QueueError, WorkQueue};

/// Mutex-guarded FIFO queues with a [`Notify`] wakeup for blocked
/// consumers.
#[derive(Default)]
pub struct MemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl MemoryQueue {
    /// Creates an empty set of queues.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting in `queue`.
    #[must_use]
    pub fn len(&self, queue: &str) -> usize {
        self.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Returns `true` if `queue` has nothing waiting.
    #[must_use]
    pub fn is_empty(&self, queue: &str) -> bool {
        self.len(queue) == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, VecDeque<String>>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pop(&self, queue: &str) -> Option<String> {
        self.lock().get_mut(queue).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        self.lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.notify.notify_waiters();
        Ok(())
    }

    async fn dequeue(&self, queue: &str, cancel: &CancellationToken) -> Result<String, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            // Register for wakeups before checking so an enqueue between the
            // check and the await is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(payload) = self.pop(queue) {
                return Ok(payload);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QueueError::Cancelled),
                () = notified.as_mut() => {}
            }
        }
    }
}
