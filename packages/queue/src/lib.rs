#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Named work queues carrying serialized match events from the producer
//! (the audit recorder) to the consumer (the delivery worker).
//!
//! [`WorkQueue::dequeue`] blocks until an item is available and returns
//! [`QueueError::Cancelled`] as soon as the caller's [`CancellationToken`]
//! fires. Ordering is FIFO for a single consumer. Delivery is at-least-once
//! end to end, so consumers running concurrently may observe reordering.

pub mod memory;
pub mod postgres;

pub use memory::MemoryQueue;
pub use postgres::PostgresQueue;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Default queue name for webhook delivery tasks.
pub const DEFAULT_QUEUE_NAME: &str = "webhook_tasks";

/// Errors raised by queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The dequeue was interrupted by its cancellation token.
    #[error("Dequeue cancelled")]
    Cancelled,

    /// The payload could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The database backing the queue failed.
    #[error("Queue database error: {0}")]
    Database(#[from] switchy_database::DatabaseError),

    /// Any other backend failure.
    #[error("Queue backend error: {message}")]
    Backend {
        /// Description of what went wrong.
        message: String,
    },
}

impl QueueError {
    /// Returns `true` for [`QueueError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A set of named FIFO queues of string payloads.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Appends `payload` to `queue`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError`] if the backend rejects the write.
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<(), QueueError>;

    /// Removes and returns the oldest payload in `queue`, waiting as long as
    /// necessary for one to arrive.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Cancelled`] once `cancel` fires, or another
    /// [`QueueError`] if the backend fails.
    async fn dequeue(&self, queue: &str, cancel: &CancellationToken) -> Result<String, QueueError>;
}

/// Serializes `payload` as JSON and appends it to `queue`.
///
/// # Errors
///
/// Returns [`QueueError::Serialization`] if encoding fails, or the
/// backend's error if the write fails.
pub async fn enqueue_json<T: Serialize + Sync>(
    queue: &dyn WorkQueue,
    name: &str,
    payload: &T,
) -> Result<(), QueueError> {
    let data = serde_json::to_string(payload)?;
    queue.enqueue(name, &data).await
}
