//! Storage traits used by the match engine and the management API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geocore_incident_models::{Coordinate, Incident, IncidentStat, LocationCheck, NewIncident};
use switchy_database::Database;

use crate::{DbError, queries};

/// Authoritative source of danger zones.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Returns every currently active incident.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be read.
    async fn get_all_active_incidents(&self) -> Result<Vec<Incident>, DbError>;

    /// Inserts a new incident.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn create_incident(&self, incident: &NewIncident) -> Result<Incident, DbError>;

    /// Fetches one incident by ID.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be read.
    async fn get_incident(&self, id: i64) -> Result<Option<Incident>, DbError>;

    /// Lists incidents newest first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be read.
    async fn list_incidents(&self, limit: u32, offset: u32) -> Result<Vec<Incident>, DbError>;

    /// Replaces an incident's fields. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    async fn update_incident(
        &self,
        id: i64,
        incident: &NewIncident,
    ) -> Result<Option<Incident>, DbError>;

    /// Deletes an incident. `Ok(false)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    async fn delete_incident(&self, id: i64) -> Result<bool, DbError>;

    /// Distinct users per incident over the trailing `window`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the store cannot be read.
    async fn incident_stats(&self, window: Duration) -> Result<Vec<IncidentStat>, DbError>;
}

/// Append-only audit trail of location checks and their matches.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persists a location check, assigning its ID and timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn create_location_check(
        &self,
        user_id: &str,
        position: Coordinate,
    ) -> Result<LocationCheck, DbError>;

    /// Records that a check fell within an incident.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    async fn record_match(&self, location_check_id: i64, incident_id: i64) -> Result<(), DbError>;
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PostgresStore {
    db: Arc<dyn Database>,
}

impl PostgresStore {
    /// Wraps an existing connection.
    #[must_use]
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// The underlying connection.
    #[must_use]
    pub fn database(&self) -> &dyn Database {
        self.db.as_ref()
    }
}

#[async_trait]
impl IncidentStore for PostgresStore {
    async fn get_all_active_incidents(&self) -> Result<Vec<Incident>, DbError> {
        queries::get_all_active_incidents(self.db.as_ref()).await
    }

    async fn create_incident(&self, incident: &NewIncident) -> Result<Incident, DbError> {
        queries::create_incident(self.db.as_ref(), incident).await
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>, DbError> {
        queries::get_incident(self.db.as_ref(), id).await
    }

    async fn list_incidents(&self, limit: u32, offset: u32) -> Result<Vec<Incident>, DbError> {
        queries::list_incidents(self.db.as_ref(), limit, offset).await
    }

    async fn update_incident(
        &self,
        id: i64,
        incident: &NewIncident,
    ) -> Result<Option<Incident>, DbError> {
        queries::update_incident(self.db.as_ref(), id, incident).await
    }

    async fn delete_incident(&self, id: i64) -> Result<bool, DbError> {
        queries::delete_incident(self.db.as_ref(), id).await
    }

    async fn incident_stats(&self, window: Duration) -> Result<Vec<IncidentStat>, DbError> {
        let window = chrono::Duration::from_std(window).map_err(|e| DbError::Conversion {
            message: format!("Stats window out of range: {e}"),
        })?;
        queries::incident_stats(self.db.as_ref(), Utc::now() - window).await
    }
}

#[async_trait]
impl AuditStore for PostgresStore {
    async fn create_location_check(
        &self,
        user_id: &str,
        position: Coordinate,
    ) -> Result<LocationCheck, DbError> {
        queries::create_location_check(self.db.as_ref(), user_id, position).await
    }

    async fn record_match(&self, location_check_id: i64, incident_id: i64) -> Result<(), DbError> {
        queries::record_match(self.db.as_ref(), location_check_id, incident_id).await
    }
}
