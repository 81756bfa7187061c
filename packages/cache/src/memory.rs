//! Process-local snapshot cache with a fixed TTL.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geocore_incident_models::Incident;

use crate::{CacheError, IncidentCache};

struct Entry {
    incidents: Arc<[Incident]>,
    stored_at: Instant,
}

/// In-memory [`IncidentCache`] holding at most one snapshot.
///
/// Expired snapshots are dropped lazily on the next read.
pub struct MemoryIncidentCache {
    ttl: Duration,
    entry: Mutex<Option<Entry>>,
}

impl MemoryIncidentCache {
    /// Creates an empty cache whose snapshots live for `ttl`.
    #[must_use]
    pub const fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// The configured time-to-live.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, Option<Entry>> {
        self.entry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryIncidentCache {
    fn default() -> Self {
        Self::new(crate::DEFAULT_TTL)
    }
}

#[async_trait]
impl IncidentCache for MemoryIncidentCache {
    async fn get(&self) -> Result<Option<Vec<Incident>>, CacheError> {
        let mut entry = self.lock();
        let expired = entry
            .as_ref()
            .is_some_and(|e| e.stored_at.elapsed() >= self.ttl);
        if expired {
            log::debug!("Incident snapshot expired after {:?}", self.ttl);
            *entry = None;
        }
        Ok(entry.as_ref().map(|e| e.incidents.to_vec()))
    }

    async fn set(&self, incidents: &[Incident]) -> Result<(), CacheError> {
        *self.lock() = Some(Entry {
            incidents: incidents.into(),
            stored_at: Instant::now(),
        });
        Ok(())
    }

    async fn invalidate(&self) -> Result<(), CacheError> {
        *self.lock() = None;
        Ok(())
    }
}
