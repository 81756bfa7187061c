#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the geocore server.
//!
//! Field names are `snake_case` on the wire. Incidents and stats are
//! returned as their model types from `geocore_incident_models`.

use geocore_incident_models::Coordinate;
use serde::{Deserialize, Serialize};

/// Default page size for the incident list.
pub const DEFAULT_LIST_LIMIT: u32 = 10;

/// Body of `POST /api/v1/location/check`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckLocationRequest {
    /// Reporting user.
    pub user_id: String,
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
}

impl CheckLocationRequest {
    /// The reported position.
    #[must_use]
    pub const fn position(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Query parameters for `GET /api/v1/incidents`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQueryParams {
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl ListQueryParams {
    /// Requested limit, or [`DEFAULT_LIST_LIMIT`].
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIST_LIMIT)
    }

    /// Requested offset, or zero.
    #[must_use]
    pub fn offset(&self) -> u32 {
        self.offset.unwrap_or_default()
    }
}

/// Query parameters for `GET /api/v1/incidents/stats`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StatsQueryParams {
    /// Trailing window in minutes. Falls back to the server default.
    pub minutes: Option<u32>,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealth {
    /// Whether the service and its database are reachable.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}

/// Response to a successful delete.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiDeleted {
    /// Always `"deleted"`.
    pub status: String,
}

impl ApiDeleted {
    /// The `{"status":"deleted"}` body.
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: "deleted".to_string(),
        }
    }
}

impl Default for ApiDeleted {
    fn default() -> Self {
        Self::new()
    }
}

/// Error body returned with every non-2xx response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    /// Human-readable reason.
    pub error: String,
}

impl ApiError {
    /// Wraps a message.
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
