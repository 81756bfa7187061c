//! Durable queue stored in the `work_queue` table.
//!
//! Each dequeue deletes the oldest row for the queue name inside a single
//! statement using `FOR UPDATE SKIP LOCKED`, so concurrent consumers never
//! receive the same row. Consumers poll at a fixed interval while waiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use tokio_util::sync::CancellationToken;

use crate::{QueueError, WorkQueue};

/// Default delay between polls while a queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Postgres-backed [`WorkQueue`].
pub struct PostgresQueue {
    db: Arc<dyn Database>,
    poll_interval: Duration,
}

impl PostgresQueue {
    /// Creates a queue over `db` polling every [`DEFAULT_POLL_INTERVAL`].
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Overrides the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Removes and returns the oldest payload without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Database`] if the statement fails.
    pub async fn try_dequeue(&self, queue: &str) -> Result<Option<String>, QueueError> {
        let rows = self
            .db
            .query_raw_params(
                "DELETE FROM work_queue
                 WHERE id = (
                     SELECT id FROM work_queue
                     WHERE queue_name = $1
                     ORDER BY id
                     LIMIT 1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING payload",
                &[DatabaseValue::String(queue.to_string())],
            )
            .await?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let payload: String = row.to_value("payload").map_err(|e| QueueError::Backend {
            message: format!("Failed to read queued payload: {e}"),
        })?;

        Ok(Some(payload))
    }
}

#[async_trait]
impl WorkQueue for PostgresQueue {
    async fn enqueue(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        self.db
            .exec_raw_params(
                "INSERT INTO work_queue (queue_name, payload) VALUES ($1, $2)",
                &[
                    DatabaseValue::String(queue.to_string()),
                    DatabaseValue::String(payload.to_string()),
                ],
            )
            .await?;

        log::debug!("Enqueued {} byte payload on '{queue}'", payload.len());
        Ok(())
    }

    async fn dequeue(&self, queue: &str, cancel: &CancellationToken) -> Result<String, QueueError> {
        loop {
            if cancel.is_cancelled() {
                return Err(QueueError::Cancelled);
            }

            // A committed DELETE must reach the caller, so it is not raced
            // against cancellation.
            if let Some(payload) = self.try_dequeue(queue).await? {
                return Ok(payload);
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(QueueError::Cancelled),
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
