#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Danger zone ("incident") types shared across the geocore system.
//!
//! Incidents are owned by the management API and read by the match engine
//! as immutable snapshots. Location checks, incident matches, and webhook
//! events are append-only records produced by each match evaluation.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Event name carried by every [`WebhookEvent`].
pub const DANGER_ZONE_DETECTED: &str = "danger_zone_detected";

/// A WGS84 position in signed decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    /// Latitude, -90 to 90.
    pub latitude: f64,
    /// Longitude, -180 to 180.
    pub longitude: f64,
}

impl Coordinate {
    /// Creates a new coordinate.
    #[must_use]
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Returns `true` if both components are finite and within their valid
    /// ranges.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A registered danger zone: a circle around a center coordinate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Primary key.
    pub id: i64,
    /// Short human-readable title.
    pub title: String,
    /// Free-form description.
    pub description: String,
    /// Center latitude.
    pub latitude: f64,
    /// Center longitude.
    pub longitude: f64,
    /// Zone radius in meters. Always positive.
    pub radius_meters: i32,
    /// When the incident was registered.
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Returns the center of the zone.
    #[must_use]
    pub const fn center(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

/// Client-supplied fields used to create or replace an [`Incident`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIncident {
    /// Short human-readable title.
    pub title: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Center latitude.
    pub latitude: f64,
    /// Center longitude.
    pub longitude: f64,
    /// Zone radius in meters.
    pub radius_meters: i32,
}

impl NewIncident {
    /// Validates the incident fields.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidIncidentError`] if the title is blank, the center is
    /// out of range, or the radius is not positive.
    pub fn validate(&self) -> Result<(), InvalidIncidentError> {
        if self.title.trim().is_empty() {
            return Err(InvalidIncidentError::EmptyTitle);
        }
        if !Coordinate::new(self.latitude, self.longitude).is_valid() {
            return Err(InvalidIncidentError::InvalidCenter {
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }
        if self.radius_meters <= 0 {
            return Err(InvalidIncidentError::NonPositiveRadius {
                radius_meters: self.radius_meters,
            });
        }
        Ok(())
    }

    /// Builds a full [`Incident`] from these fields.
    #[must_use]
    pub fn into_incident(self, id: i64, created_at: DateTime<Utc>) -> Incident {
        Incident {
            id,
            title: self.title,
            description: self.description,
            latitude: self.latitude,
            longitude: self.longitude,
            radius_meters: self.radius_meters,
            created_at,
        }
    }
}

/// Reasons a [`NewIncident`] can be rejected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InvalidIncidentError {
    /// The title was empty or whitespace.
    EmptyTitle,
    /// The center coordinate was not a valid WGS84 position.
    InvalidCenter {
        /// Supplied latitude.
        latitude: f64,
        /// Supplied longitude.
        longitude: f64,
    },
    /// The radius was zero or negative.
    NonPositiveRadius {
        /// Supplied radius.
        radius_meters: i32,
    },
}

impl std::fmt::Display for InvalidIncidentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "incident title must not be empty"),
            Self::InvalidCenter {
                latitude,
                longitude,
            } => write!(f, "invalid incident center ({latitude}, {longitude})"),
            Self::NonPositiveRadius { radius_meters } => {
                write!(f, "incident radius must be positive, got {radius_meters}")
            }
        }
    }
}

impl std::error::Error for InvalidIncidentError {}

/// A recorded evaluation of one user position against the active zones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationCheck {
    /// Primary key assigned by the store.
    pub id: i64,
    /// Identifier of the reporting user.
    pub user_id: String,
    /// Reported latitude.
    pub latitude: f64,
    /// Reported longitude.
    pub longitude: f64,
    /// When the check was recorded.
    pub checked_at: DateTime<Utc>,
}

/// Link between a [`LocationCheck`] and an [`Incident`] it fell within.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentMatch {
    /// The location check.
    pub location_check_id: i64,
    /// The matched incident.
    pub incident_id: i64,
}

/// Number of distinct users that matched an incident in a time window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentStat {
    /// The incident.
    pub incident_id: i64,
    /// Distinct users seen inside it.
    pub user_count: i64,
}

/// Outbound notification describing one user entering one zone.
///
/// This is the exact JSON body POSTed to the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    /// Always [`DANGER_ZONE_DETECTED`].
    pub event: String,
    /// Identifier of the user inside the zone.
    pub user_id: String,
    /// Matched incident.
    pub incident_id: i64,
    /// Incident center latitude at match time.
    pub incident_latitude: f64,
    /// Incident center longitude at match time.
    pub incident_longitude: f64,
    /// Incident radius at match time.
    pub incident_radius_meters: i32,
    /// Detection time, RFC 3339 in UTC.
    pub detected_at: String,
}

impl WebhookEvent {
    /// Snapshots `incident` into a new danger-zone event for `user_id`.
    #[must_use]
    pub fn danger_zone_detected(
        user_id: &str,
        incident: &Incident,
        detected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event: DANGER_ZONE_DETECTED.to_string(),
            user_id: user_id.to_string(),
            incident_id: incident.id,
            incident_latitude: incident.latitude,
            incident_longitude: incident.longitude,
            incident_radius_meters: incident.radius_meters,
            detected_at: detected_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}
