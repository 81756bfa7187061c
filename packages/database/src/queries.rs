//! Raw SQL queries for incidents, location checks, and match statistics.
//!
//! Every function takes a `&dyn Database` so callers can share one
//! connection handle across the server and the background tasks.

use chrono::{DateTime, NaiveDateTime, Utc};
use geocore_incident_models::{Coordinate, Incident, IncidentStat, LocationCheck, NewIncident};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue, Row};

use crate::DbError;

const INCIDENT_COLUMNS: &str =
    "id, title, description, latitude, longitude, radius_meters, created_at";

/// Returns every incident that is currently active.
///
/// All registered incidents are considered active; there is no expiry
/// column.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_all_active_incidents(db: &dyn Database) -> Result<Vec<Incident>, DbError> {
    let rows = db
        .query_raw_params(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents ORDER BY id"),
            &[],
        )
        .await?;

    rows.iter().map(row_to_incident).collect()
}

/// Inserts a new incident and returns it with its assigned ID and creation
/// time.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn create_incident(db: &dyn Database, incident: &NewIncident) -> Result<Incident, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "INSERT INTO incidents (title, description, latitude, longitude, radius_meters)
                 VALUES ($1, $2, $3, $4, $5)
                 RETURNING {INCIDENT_COLUMNS}"
            ),
            &incident_params(incident),
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "INSERT INTO incidents returned no row".to_string(),
    })?;

    row_to_incident(row)
}

/// Fetches a single incident by ID.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn get_incident(db: &dyn Database, id: i64) -> Result<Option<Incident>, DbError> {
    let rows = db
        .query_raw_params(
            &format!("SELECT {INCIDENT_COLUMNS} FROM incidents WHERE id = $1"),
            &[DatabaseValue::Int64(id)],
        )
        .await?;

    rows.first().map(row_to_incident).transpose()
}

/// Lists incidents newest first.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn list_incidents(
    db: &dyn Database,
    limit: u32,
    offset: u32,
) -> Result<Vec<Incident>, DbError> {
    let rows = db
        .query_raw_params(
            &format!(
                "SELECT {INCIDENT_COLUMNS} FROM incidents
                 ORDER BY created_at DESC, id DESC
                 LIMIT $1 OFFSET $2"
            ),
            &[
                DatabaseValue::Int64(i64::from(limit)),
                DatabaseValue::Int64(i64::from(offset)),
            ],
        )
        .await?;

    rows.iter().map(row_to_incident).collect()
}

/// Replaces the mutable fields of an incident.
///
/// Returns `None` if no incident has the given ID.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn update_incident(
    db: &dyn Database,
    id: i64,
    incident: &NewIncident,
) -> Result<Option<Incident>, DbError> {
    let mut params = incident_params(incident);
    params.push(DatabaseValue::Int64(id));

    let rows = db
        .query_raw_params(
            &format!(
                "UPDATE incidents
                 SET title = $1, description = $2, latitude = $3, longitude = $4, radius_meters = $5
                 WHERE id = $6
                 RETURNING {INCIDENT_COLUMNS}"
            ),
            &params,
        )
        .await?;

    rows.first().map(row_to_incident).transpose()
}

/// Deletes an incident. Returns `false` if it did not exist.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn delete_incident(db: &dyn Database, id: i64) -> Result<bool, DbError> {
    let affected = db
        .exec_raw_params(
            "DELETE FROM incidents WHERE id = $1",
            &[DatabaseValue::Int64(id)],
        )
        .await?;

    Ok(affected > 0)
}

/// Records that `user_id` reported `position`. The store assigns the ID and
/// timestamp.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn create_location_check(
    db: &dyn Database,
    user_id: &str,
    position: Coordinate,
) -> Result<LocationCheck, DbError> {
    let rows = db
        .query_raw_params(
            "INSERT INTO location_checks (user_id, latitude, longitude)
             VALUES ($1, $2, $3)
             RETURNING id, checked_at",
            &[
                DatabaseValue::String(user_id.to_string()),
                DatabaseValue::Real64(position.latitude),
                DatabaseValue::Real64(position.longitude),
            ],
        )
        .await?;

    let row = rows.first().ok_or_else(|| DbError::Conversion {
        message: "INSERT INTO location_checks returned no row".to_string(),
    })?;

    let id: i64 = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse location check id: {e}"),
    })?;
    let checked_at: NaiveDateTime = row.to_value("checked_at").unwrap_or_default();

    Ok(LocationCheck {
        id,
        user_id: user_id.to_string(),
        latitude: position.latitude,
        longitude: position.longitude,
        checked_at: DateTime::<Utc>::from_naive_utc_and_offset(checked_at, Utc),
    })
}

/// Links a location check to an incident it fell within.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn record_match(
    db: &dyn Database,
    location_check_id: i64,
    incident_id: i64,
) -> Result<(), DbError> {
    db.exec_raw_params(
        "INSERT INTO location_check_incidents (location_check_id, incident_id)
         VALUES ($1, $2)
         ON CONFLICT DO NOTHING",
        &[
            DatabaseValue::Int64(location_check_id),
            DatabaseValue::Int64(incident_id),
        ],
    )
    .await?;

    Ok(())
}

/// Counts distinct users per incident among checks made at or after `since`.
///
/// Incidents with no matches in the window are omitted.
///
/// # Errors
///
/// Returns [`DbError`] if the database operation fails.
pub async fn incident_stats(
    db: &dyn Database,
    since: DateTime<Utc>,
) -> Result<Vec<IncidentStat>, DbError> {
    let rows = db
        .query_raw_params(
            "SELECT lci.incident_id, COUNT(DISTINCT lc.user_id) AS user_count
             FROM location_check_incidents lci
             JOIN location_checks lc ON lci.location_check_id = lc.id
             WHERE lc.checked_at >= $1
             GROUP BY lci.incident_id
             ORDER BY lci.incident_id",
            &[DatabaseValue::DateTime(since.naive_utc())],
        )
        .await?;

    rows.iter()
        .map(|row| {
            Ok(IncidentStat {
                incident_id: row.to_value("incident_id").map_err(|e| DbError::Conversion {
                    message: format!("Failed to parse stat incident id: {e}"),
                })?,
                user_count: row.to_value("user_count").unwrap_or(0),
            })
        })
        .collect()
}

fn incident_params(incident: &NewIncident) -> Vec<DatabaseValue> {
    vec![
        DatabaseValue::String(incident.title.clone()),
        DatabaseValue::String(incident.description.clone()),
        DatabaseValue::Real64(incident.latitude),
        DatabaseValue::Real64(incident.longitude),
        DatabaseValue::Int32(incident.radius_meters),
    ]
}

/// Converts a database row into an [`Incident`].
///
/// The identity, center, and radius must decode and the radius must be
/// positive.
fn row_to_incident(row: &Row) -> Result<Incident, DbError> {
    let id: i64 = row.to_value("id").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse incident id: {e}"),
    })?;
    let latitude: f64 = row.to_value("latitude").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse latitude of incident {id}: {e}"),
    })?;
    let longitude: f64 = row.to_value("longitude").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse longitude of incident {id}: {e}"),
    })?;
    let radius: i32 = row.to_value("radius_meters").map_err(|e| DbError::Conversion {
        message: format!("Failed to parse radius of incident {id}: {e}"),
    })?;
    let created_at: NaiveDateTime = row.to_value("created_at").unwrap_or_default();

    Ok(Incident {
        id,
        title: row.to_value("title").unwrap_or_default(),
        description: row.to_value("description").unwrap_or_default(),
        latitude,
        longitude,
        radius_meters: positive_radius(id, radius)?,
        created_at: DateTime::<Utc>::from_naive_utc_and_offset(created_at, Utc),
    })
}

fn positive_radius(id: i64, radius_meters: i32) -> Result<i32, DbError> {
    if radius_meters > 0 {
        Ok(radius_meters)
    } else {
        Err(DbError::Conversion {
            message: format!("Incident {id} has non-positive radius {radius_meters}"),
        })
    }
}
