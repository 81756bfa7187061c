//! Persistence and event production for a single location check.

use std::sync::Arc;

use chrono::Utc;
use geocore_database::AuditStore;
use geocore_incident_models::{Coordinate, Incident, WebhookEvent};
use geocore_queue::{WorkQueue, enqueue_json};

/// What one side-effect run managed to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditReport {
    /// ID of the persisted location check, `None` if persisting it failed.
    pub location_check_id: Option<i64>,
    /// Matches persisted against the check.
    pub matches_recorded: usize,
    /// Webhook events accepted by the queue.
    pub events_enqueued: usize,
    /// Matches whose insert failed; their events were skipped.
    pub failed_matches: usize,
    /// Events the queue rejected.
    pub failed_enqueues: usize,
    /// The run was abandoned at its deadline.
    pub timed_out: bool,
}

impl AuditReport {
    /// Report for a run cut short by its deadline.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Self::default()
        }
    }
}

/// Records location checks and produces webhook events onto a named queue.
pub struct AuditRecorder {
    store: Arc<dyn AuditStore>,
    queue: Arc<dyn WorkQueue>,
    queue_name: String,
}

impl AuditRecorder {
    /// Creates a recorder writing to `store` and producing onto the queue
    /// named `queue_name`.
    #[must_use]
    pub fn new(
        store: Arc<dyn AuditStore>,
        queue: Arc<dyn WorkQueue>,
        queue_name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            queue,
            queue_name: queue_name.into(),
        }
    }

    /// Queue that receives webhook events.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    /// Persists the check, then records and enqueues each match in order.
    ///
    /// Never fails: a failed check insert aborts the run, a failed match
    /// insert skips that incident's event, and a failed enqueue is dropped.
    /// Everything is logged and tallied in the returned [`AuditReport`].
    pub async fn record(
        &self,
        user_id: &str,
        position: Coordinate,
        matches: &[Incident],
    ) -> AuditReport {
        let check = match self.store.create_location_check(user_id, position).await {
            Ok(check) => check,
            Err(e) => {
                log::error!(
                    "Failed to persist location check for user {user_id}, skipping {} matches: {e}",
                    matches.len()
                );
                return AuditReport::default();
            }
        };

        let mut report = AuditReport {
            location_check_id: Some(check.id),
            ..AuditReport::default()
        };

        for incident in matches {
            if let Err(e) = self.store.record_match(check.id, incident.id).await {
                log::error!(
                    "Failed to record match of check {} with incident {}: {e}",
                    check.id,
                    incident.id
                );
                report.failed_matches += 1;
                continue;
            }
            report.matches_recorded += 1;

            let event = WebhookEvent::danger_zone_detected(user_id, incident, Utc::now());
            match enqueue_json(self.queue.as_ref(), &self.queue_name, &event).await {
                Ok(()) => report.events_enqueued += 1,
                Err(e) => {
                    log::error!(
                        "Failed to enqueue event for incident {} on '{}': {e}",
                        incident.id,
                        self.queue_name
                    );
                    report.failed_enqueues += 1;
                }
            }
        }

        log::debug!(
            "Location check {} for user {user_id}: {} matches recorded, {} events enqueued",
            check.id,
            report.matches_recorded,
            report.events_enqueued
        );

        report
    }
}
