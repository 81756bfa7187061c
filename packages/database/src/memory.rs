//! In-process store for tests and database-less local runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geocore_incident_models::{
    Coordinate, Incident, IncidentMatch, IncidentStat, LocationCheck, NewIncident,
};

use crate::DbError;
use crate::store::{AuditStore, IncidentStore};

#[derive(Default)]
struct State {
    next_incident_id: i64,
    next_check_id: i64,
    incidents: BTreeMap<i64, Incident>,
    checks: Vec<LocationCheck>,
    matches: Vec<IncidentMatch>,
}

/// Mutex-guarded store that never fails.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-populated with `incidents`, keeping their IDs.
    #[must_use]
    pub fn with_incidents(incidents: Vec<Incident>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for incident in incidents {
                state.next_incident_id = state.next_incident_id.max(incident.id);
                state.incidents.insert(incident.id, incident);
            }
        }
        store
    }

    /// Snapshot of all recorded location checks, oldest first.
    #[must_use]
    pub fn location_checks(&self) -> Vec<LocationCheck> {
        self.lock().checks.clone()
    }

    /// Snapshot of all recorded incident matches, oldest first.
    #[must_use]
    pub fn incident_matches(&self) -> Vec<IncidentMatch> {
        self.lock().matches.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl IncidentStore for MemoryStore {
    async fn get_all_active_incidents(&self) -> Result<Vec<Incident>, DbError> {
        Ok(self.lock().incidents.values().cloned().collect())
    }

    async fn create_incident(&self, incident: &NewIncident) -> Result<Incident, DbError> {
        let mut state = self.lock();
        state.next_incident_id += 1;
        let created = incident
            .clone()
            .into_incident(state.next_incident_id, Utc::now());
        state.incidents.insert(created.id, created.clone());
        drop(state);
        Ok(created)
    }

    async fn get_incident(&self, id: i64) -> Result<Option<Incident>, DbError> {
        Ok(self.lock().incidents.get(&id).cloned())
    }

    async fn list_incidents(&self, limit: u32, offset: u32) -> Result<Vec<Incident>, DbError> {
        let state = self.lock();
        let mut incidents: Vec<Incident> = state.incidents.values().cloned().collect();
        drop(state);
        incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(incidents
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn update_incident(
        &self,
        id: i64,
        incident: &NewIncident,
    ) -> Result<Option<Incident>, DbError> {
        let mut state = self.lock();
        let Some(existing) = state.incidents.get_mut(&id) else {
            return Ok(None);
        };
        *existing = incident.clone().into_incident(id, existing.created_at);
        Ok(Some(existing.clone()))
    }

    async fn delete_incident(&self, id: i64) -> Result<bool, DbError> {
        Ok(self.lock().incidents.remove(&id).is_some())
    }

    async fn incident_stats(&self, window: Duration) -> Result<Vec<IncidentStat>, DbError> {
        let window = chrono::Duration::from_std(window).map_err(|e| DbError::Conversion {
            message: format!("Stats window out of range: {e}"),
        })?;
        let since = Utc::now() - window;

        let state = self.lock();
        let mut users: BTreeMap<i64, Vec<&str>> = BTreeMap::new();
        for m in &state.matches {
            let Some(check) = state.checks.iter().find(|c| c.id == m.location_check_id) else {
                continue;
            };
            if check.checked_at < since {
                continue;
            }
            let seen = users.entry(m.incident_id).or_default();
            if !seen.contains(&check.user_id.as_str()) {
                seen.push(check.user_id.as_str());
            }
        }

        Ok(users
            .into_iter()
            .map(|(incident_id, seen)| IncidentStat {
                incident_id,
                user_count: i64::try_from(seen.len()).unwrap_or(i64::MAX),
            })
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn create_location_check(
        &self,
        user_id: &str,
        position: Coordinate,
    ) -> Result<LocationCheck, DbError> {
        let mut state = self.lock();
        state.next_check_id += 1;
        let check = LocationCheck {
            id: state.next_check_id,
            user_id: user_id.to_string(),
            latitude: position.latitude,
            longitude: position.longitude,
            checked_at: Utc::now(),
        };
        state.checks.push(check.clone());
        drop(state);
        Ok(check)
    }

    async fn record_match(&self, location_check_id: i64, incident_id: i64) -> Result<(), DbError> {
        let mut state = self.lock();
        let m = IncidentMatch {
            location_check_id,
            incident_id,
        };
        if !state.matches.contains(&m) {
            state.matches.push(m);
        }
        drop(state);
        Ok(())
    }
}
