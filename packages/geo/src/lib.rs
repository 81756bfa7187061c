#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Spherical-earth geometry for danger zone containment.
//!
//! Distances use the haversine formula on a sphere of radius
//! [`EARTH_RADIUS_METERS`]. Accuracy is within ~0.5% of the ellipsoidal
//! distance, which is well below typical GPS error for zone-sized radii.

use geocore_incident_models::{Coordinate, Incident};

/// Mean Earth radius used for all distance calculations.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Great-circle distance between two coordinates, in meters.
///
/// Symmetric, non-negative, and exactly zero for identical inputs.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    // Rounding can push `h` just past 1.0 for antipodal points.
    let h = h.clamp(0.0, 1.0);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Returns `true` if `point` lies within `radius_meters` of `center`.
///
/// The boundary is inclusive.
#[must_use]
pub fn within_radius(point: Coordinate, center: Coordinate, radius_meters: f64) -> bool {
    distance_meters(point, center) <= radius_meters
}

/// Returns `true` if `point` lies inside the incident's zone.
#[must_use]
pub fn incident_contains(incident: &Incident, point: Coordinate) -> bool {
    within_radius(point, incident.center(), f64::from(incident.radius_meters))
}
