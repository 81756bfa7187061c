//! Cache-aside zone lookup and point-in-zone matching.

use std::sync::Arc;
use std::time::Duration;

use geocore_cache::SnapshotCache;
use geocore_database::IncidentStore;
use geocore_geo::incident_contains;
use geocore_incident_models::{Coordinate, Incident};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::audit::{AuditRecorder, AuditReport};
use crate::{DEFAULT_SIDE_EFFECT_DEADLINE, MatchError};

/// Result of [`MatchEngine::evaluate`].
pub struct Evaluation {
    /// Zones containing the position.
    pub matches: Vec<Incident>,
    /// The detached side-effect task. Dropping it does not cancel the task.
    pub audit: JoinHandle<AuditReport>,
}

/// Answers location checks against the active zones and hands each check
/// to an [`AuditRecorder`] in the background.
pub struct MatchEngine {
    incidents: Arc<dyn IncidentStore>,
    cache: SnapshotCache,
    recorder: Arc<AuditRecorder>,
    side_effect_deadline: Duration,
    runtime: Option<Handle>,
}

impl MatchEngine {
    /// Creates an engine reading zones through `cache`, falling back to
    /// `incidents` on a miss. Side effects use
    /// [`DEFAULT_SIDE_EFFECT_DEADLINE`].
    #[must_use]
    pub fn new(
        incidents: Arc<dyn IncidentStore>,
        cache: SnapshotCache,
        recorder: AuditRecorder,
    ) -> Self {
        Self {
            incidents,
            cache,
            recorder: Arc::new(recorder),
            side_effect_deadline: DEFAULT_SIDE_EFFECT_DEADLINE,
            runtime: None,
        }
    }

    /// Overrides the deadline applied to each side-effect task.
    #[must_use]
    pub const fn with_side_effect_deadline(mut self, deadline: Duration) -> Self {
        self.side_effect_deadline = deadline;
        self
    }

    /// Spawns side-effect tasks on `runtime` instead of the caller's runtime.
    #[must_use]
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Returns the zones containing `position`.
    ///
    /// Audit and event production run in the background; see
    /// [`Self::evaluate`] to observe them.
    ///
    /// # Errors
    ///
    /// * [`MatchError::InvalidInput`] if `user_id` is empty or the position
    ///   is out of range
    /// * [`MatchError::Store`] if the cache misses and the store cannot be
    ///   read
    pub async fn check_location(
        &self,
        user_id: &str,
        position: Coordinate,
    ) -> Result<Vec<Incident>, MatchError> {
        Ok(self.evaluate(user_id, position).await?.matches)
    }

    /// Matches `position` against the active zones and spawns the
    /// side-effect task, returning both.
    ///
    /// # Errors
    ///
    /// Same as [`Self::check_location`].
    pub async fn evaluate(
        &self,
        user_id: &str,
        position: Coordinate,
    ) -> Result<Evaluation, MatchError> {
        validate(user_id, position)?;

        let active = self.active_incidents().await?;
        let matches: Vec<Incident> = active
            .into_iter()
            .filter(|incident| incident_contains(incident, position))
            .collect();

        log::debug!(
            "User {user_id} at ({}, {}) is inside {} zone(s)",
            position.latitude,
            position.longitude,
            matches.len()
        );

        let audit = self.spawn_audit(user_id.to_string(), position, matches.clone());

        Ok(Evaluation { matches, audit })
    }

    async fn active_incidents(&self) -> Result<Vec<Incident>, MatchError> {
        if let Some(incidents) = self.cache.get().await {
            log::trace!("Incident snapshot cache hit ({} zones)", incidents.len());
            return Ok(incidents);
        }

        let incidents = self.incidents.get_all_active_incidents().await?;
        log::debug!(
            "Incident snapshot cache miss, loaded {} zones from store",
            incidents.len()
        );
        self.cache.set(&incidents).await;

        Ok(incidents)
    }

    fn spawn_audit(
        &self,
        user_id: String,
        position: Coordinate,
        matches: Vec<Incident>,
    ) -> JoinHandle<AuditReport> {
        let recorder = Arc::clone(&self.recorder);
        let deadline = self.side_effect_deadline;

        let task = async move {
            match tokio::time::timeout(deadline, recorder.record(&user_id, position, &matches))
                .await
            {
                Ok(report) => report,
                Err(_) => {
                    log::error!(
                        "Side effects for user {user_id} abandoned after {deadline:?} ({} matches)",
                        matches.len()
                    );
                    AuditReport::timed_out()
                }
            }
        };

        match &self.runtime {
            Some(runtime) => runtime.spawn(task),
            None => tokio::spawn(task),
        }
    }
}

fn validate(user_id: &str, position: Coordinate) -> Result<(), MatchError> {
    if user_id.trim().is_empty() {
        return Err(MatchError::InvalidInput {
            message: "user_id must not be empty".to_string(),
        });
    }
    if !position.is_valid() {
        return Err(MatchError::InvalidInput {
            message: format!(
                "coordinate ({}, {}) is out of range",
                position.latitude, position.longitude
            ),
        });
    }
    Ok(())
}
