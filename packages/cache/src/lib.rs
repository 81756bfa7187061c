#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Read-through cache of the active danger zone set.
//!
//! The cache holds one complete snapshot of all active incidents under a
//! single key. It is a pure performance optimization: [`SnapshotCache`]
//! turns every backend failure into a miss (on read) or a log line (on
//! write), so match results are identical whether the cache is present,
//! empty, or failing.

pub mod memory;

pub use memory::MemoryIncidentCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use geocore_incident_models::Incident;

/// Default time-to-live of a cached snapshot.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Errors raised by cache backends.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backend could not be reached or refused the operation.
    #[error("Cache backend unavailable: {message}")]
    Unavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// The stored snapshot could not be decoded.
    #[error("Corrupt cache entry: {message}")]
    Corrupt {
        /// Description of what went wrong.
        message: String,
    },
}

/// Storage backend for the incident snapshot.
#[async_trait]
pub trait IncidentCache: Send + Sync {
    /// Returns the cached snapshot, or `None` if absent or expired.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend fails.
    async fn get(&self) -> Result<Option<Vec<Incident>>, CacheError>;

    /// Replaces the snapshot wholesale and restarts its TTL.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend fails.
    async fn set(&self, incidents: &[Incident]) -> Result<(), CacheError>;

    /// Drops the snapshot so the next read misses.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError`] if the backend fails.
    async fn invalidate(&self) -> Result<(), CacheError>;
}

/// Infallible front for an [`IncidentCache`] backend.
#[derive(Clone)]
pub struct SnapshotCache {
    backend: Arc<dyn IncidentCache>,
}

impl SnapshotCache {
    /// Wraps a backend.
    #[must_use]
    pub fn new(backend: Arc<dyn IncidentCache>) -> Self {
        Self { backend }
    }

    /// Returns the snapshot on a hit. Backend failures are reported as a
    /// miss.
    pub async fn get(&self) -> Option<Vec<Incident>> {
        match self.backend.get().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Incident cache read failed, treating as miss: {e}");
                None
            }
        }
    }

    /// Stores a fresh snapshot. Failures are logged and swallowed.
    pub async fn set(&self, incidents: &[Incident]) {
        if let Err(e) = self.backend.set(incidents).await {
            log::warn!(
                "Incident cache write failed ({} incidents): {e}",
                incidents.len()
            );
        }
    }

    /// Drops the snapshot. Failures are logged and swallowed.
    pub async fn invalidate(&self) {
        if let Err(e) = self.backend.invalidate().await {
            log::warn!("Incident cache invalidation failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenCache;

    #[async_trait]
    impl IncidentCache for BrokenCache {
        async fn get(&self) -> Result<Option<Vec<Incident>>, CacheError> {
            Err(CacheError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        async fn set(&self, _incidents: &[Incident]) -> Result<(), CacheError> {
            Err(CacheError::Unavailable {
                message: "connection refused".to_string(),
            })
        }

        async fn invalidate(&self) -> Result<(), CacheError> {
            Err(CacheError::Corrupt {
                message: "bad bytes".to_string(),
            })
        }
    }

    fn incident(id: i64) -> Incident {
        Incident {
            id,
            title: format!("zone {id}"),
            description: String::new(),
            latitude: 10.0,
            longitude: 10.0,
            radius_meters: 100,
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn backend_failure_reads_as_miss() {
        let cache = SnapshotCache::new(Arc::new(BrokenCache));
        assert!(cache.get().await.is_none());
        cache.set(&[incident(1)]).await;
        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }

    #[tokio::test]
    async fn hit_returns_full_snapshot() {
        let cache = SnapshotCache::new(Arc::new(MemoryIncidentCache::new(DEFAULT_TTL)));
        assert!(cache.get().await.is_none());

        cache.set(&[incident(1), incident(2)]).await;
        let hit = cache.get().await.unwrap();
        assert_eq!(hit.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

        cache.set(&[incident(3)]).await;
        let hit = cache.get().await.unwrap();
        assert_eq!(hit.iter().map(|i| i.id).collect::<Vec<_>>(), vec![3]);

        cache.invalidate().await;
        assert!(cache.get().await.is_none());
    }
}
