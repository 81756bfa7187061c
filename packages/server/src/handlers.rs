//! HTTP handler functions for the geocore API.

use std::time::Duration;

use actix_web::{HttpRequest, HttpResponse, web};
use geocore_database::db;
use geocore_incident_models::NewIncident;
use geocore_matcher::MatchError;
use geocore_server_models::{
    ApiDeleted, ApiError, ApiHealth, CheckLocationRequest, ListQueryParams, StatsQueryParams,
};

use crate::AppState;

const API_KEY_HEADER: &str = "X-API-Key";

/// Returns a 401 response unless the request carries the configured key.
fn unauthorized(req: &HttpRequest, state: &AppState) -> Option<HttpResponse> {
    let expected = state.api_key.as_deref()?;
    let provided = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if provided == Some(expected) {
        None
    } else {
        Some(HttpResponse::Unauthorized().json(ApiError::new("Unauthorized")))
    }
}

fn parse_id(raw: &str) -> Result<i64, HttpResponse> {
    raw.parse()
        .map_err(|_| HttpResponse::BadRequest().json(ApiError::new("invalid id")))
}

fn internal_error(context: &str, e: &dyn std::fmt::Display) -> HttpResponse {
    log::error!("{context}: {e}");
    HttpResponse::InternalServerError().json(ApiError::new(e.to_string()))
}

fn not_found(id: i64) -> HttpResponse {
    HttpResponse::NotFound().json(ApiError::new(format!("incident {id} not found")))
}

/// `GET /api/v1/system/health`
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let version = env!("CARGO_PKG_VERSION").to_string();

    if let Some(database) = &state.db
        && let Err(e) = db::ping(database.as_ref()).await
    {
        log::error!("Health check database ping failed: {e}");
        return HttpResponse::ServiceUnavailable().json(ApiHealth {
            healthy: false,
            version,
        });
    }

    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version,
    })
}

/// `POST /api/v1/location/check`
///
/// Returns the incidents containing the reported position. Audit and
/// webhook dispatch happen after the response.
pub async fn check_location(
    state: web::Data<AppState>,
    body: web::Json<CheckLocationRequest>,
) -> HttpResponse {
    match state
        .engine
        .check_location(&body.user_id, body.position())
        .await
    {
        Ok(matches) => HttpResponse::Ok().json(matches),
        Err(MatchError::InvalidInput { message }) => {
            HttpResponse::BadRequest().json(ApiError::new(message))
        }
        Err(e @ MatchError::Store(_)) => internal_error("Location check failed", &e),
    }
}

/// `POST /api/v1/incidents`
pub async fn create_incident(
    req: HttpRequest,
    state: web::Data<AppState>,
    body: web::Json<NewIncident>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }
    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest().json(ApiError::new(e.to_string()));
    }

    match state.incidents.create_incident(&body).await {
        Ok(incident) => {
            state.cache.invalidate().await;
            log::info!("Created incident {} ({})", incident.id, incident.title);
            HttpResponse::Ok().json(incident)
        }
        Err(e) => internal_error("Failed to create incident", &e),
    }
}

/// `GET /api/v1/incidents?limit&offset`
pub async fn list_incidents(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<ListQueryParams>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }

    match state
        .incidents
        .list_incidents(params.limit(), params.offset())
        .await
    {
        Ok(incidents) => HttpResponse::Ok().json(incidents),
        Err(e) => internal_error("Failed to list incidents", &e),
    }
}

/// `GET /api/v1/incidents/stats?minutes`
///
/// Distinct users per incident over the trailing window.
pub async fn incident_stats(
    req: HttpRequest,
    state: web::Data<AppState>,
    params: web::Query<StatsQueryParams>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }

    let minutes = params.minutes.unwrap_or(state.stats_window_minutes);
    let window = Duration::from_secs(u64::from(minutes) * 60);

    match state.incidents.incident_stats(window).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => internal_error("Failed to compute incident stats", &e),
    }
}

/// `GET /api/v1/incidents/{id}`
pub async fn get_incident(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.incidents.get_incident(id).await {
        Ok(Some(incident)) => HttpResponse::Ok().json(incident),
        Ok(None) => not_found(id),
        Err(e) => internal_error("Failed to load incident", &e),
    }
}

/// `PUT /api/v1/incidents/{id}`
pub async fn update_incident(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<NewIncident>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };
    if let Err(e) = body.validate() {
        return HttpResponse::BadRequest().json(ApiError::new(e.to_string()));
    }

    match state.incidents.update_incident(id, &body).await {
        Ok(Some(incident)) => {
            state.cache.invalidate().await;
            HttpResponse::Ok().json(incident)
        }
        Ok(None) => not_found(id),
        Err(e) => internal_error("Failed to update incident", &e),
    }
}

/// `DELETE /api/v1/incidents/{id}`
pub async fn delete_incident(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> HttpResponse {
    if let Some(response) = unauthorized(&req, &state) {
        return response;
    }
    let id = match parse_id(&path) {
        Ok(id) => id,
        Err(response) => return response,
    };

    match state.incidents.delete_incident(id).await {
        Ok(true) => {
            state.cache.invalidate().await;
            HttpResponse::Ok().json(ApiDeleted::new())
        }
        Ok(false) => not_found(id),
        Err(e) => internal_error("Failed to delete incident", &e),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use chrono::Utc;
    use geocore_database::MemoryStore;
    use geocore_incident_models::{Incident, IncidentStat};
    use geocore_queue::MemoryQueue;

    use crate::{ServerConfig, Services};

    use super::*;

    struct Harness {
        state: web::Data<AppState>,
        store: Arc<MemoryStore>,
        queue: Arc<MemoryQueue>,
    }

    fn harness(api_key: Option<&str>, incidents: Vec<Incident>) -> Harness {
        let config = ServerConfig {
            api_key: api_key.map(str::to_string),
            ..ServerConfig::default()
        };
        let store = Arc::new(MemoryStore::with_incidents(incidents));
        let queue = Arc::new(MemoryQueue::new());
        let services =
            Services::from_parts(&config, store.clone(), store.clone(), queue.clone(), None);
        Harness {
            state: web::Data::new(services.state),
            store,
            queue,
        }
    }

    fn zone(id: i64, latitude: f64, longitude: f64, radius_meters: i32) -> Incident {
        Incident {
            id,
            title: format!("zone {id}"),
            description: String::new(),
            latitude,
            longitude,
            radius_meters,
            created_at: Utc::now(),
        }
    }

    fn new_incident(title: &str, radius_meters: i32) -> serde_json::Value {
        serde_json::json!({
            "title": title,
            "description": "flooded underpass",
            "latitude": 10.0,
            "longitude": 10.0,
            "radius_meters": radius_meters,
        })
    }

    async fn wait_for_queue(queue: &MemoryQueue, len: usize) {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            while queue.len("webhook_tasks") < len {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[actix_web::test]
    async fn health_reports_version() {
        let h = harness(None, Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/system/health").to_request();
        let health: ApiHealth = test::call_and_read_body_json(&app, req).await;

        assert!(health.healthy);
        assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
    }

    #[actix_web::test]
    async fn location_check_returns_matches_and_enqueues_events() {
        let h = harness(
            None,
            vec![zone(1, 10.0, 10.0, 1000), zone(2, 10.0, 10.0, 100)],
        );
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/location/check")
            .set_json(serde_json::json!({
                "user_id": "user-1",
                "latitude": 10.001,
                "longitude": 10.001,
            }))
            .to_request();
        let matches: Vec<Incident> = test::call_and_read_body_json(&app, req).await;

        assert_eq!(matches.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1]);
        wait_for_queue(&h.queue, 1).await;
        assert_eq!(h.store.location_checks().len(), 1);
        assert_eq!(h.store.incident_matches().len(), 1);
    }

    #[actix_web::test]
    async fn location_check_rejects_bad_input() {
        let h = harness(None, Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let missing_field = test::TestRequest::post()
            .uri("/api/v1/location/check")
            .set_json(serde_json::json!({ "user_id": "user-1", "latitude": 10.0 }))
            .to_request();
        let resp = test::call_service(&app, missing_field).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let out_of_range = test::TestRequest::post()
            .uri("/api/v1/location/check")
            .set_json(serde_json::json!({
                "user_id": "user-1",
                "latitude": 120.0,
                "longitude": 10.0,
            }))
            .to_request();
        let resp = test::call_service(&app, out_of_range).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: ApiError = test::read_body_json(resp).await;
        assert!(body.error.contains("out of range"));
    }

    #[actix_web::test]
    async fn incident_crud_round_trip() {
        let h = harness(None, Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/incidents")
            .set_json(new_incident("Flood", 250))
            .to_request();
        let created: Incident = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.title, "Flood");
        assert_eq!(created.radius_meters, 250);

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/incidents/{}", created.id))
            .to_request();
        let fetched: Incident = test::call_and_read_body_json(&app, req).await;
        assert_eq!(fetched, created);

        let req = test::TestRequest::put()
            .uri(&format!("/api/v1/incidents/{}", created.id))
            .set_json(new_incident("Flood (receding)", 100))
            .to_request();
        let updated: Incident = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated.title, "Flood (receding)");
        assert_eq!(updated.created_at, created.created_at);

        let req = test::TestRequest::get()
            .uri("/api/v1/incidents?limit=5")
            .to_request();
        let listed: Vec<Incident> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(listed, vec![updated]);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/incidents/{}", created.id))
            .to_request();
        let deleted: ApiDeleted = test::call_and_read_body_json(&app, req).await;
        assert_eq!(deleted.status, "deleted");

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/incidents/{}", created.id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn invalid_incidents_and_ids_are_rejected() {
        let h = harness(None, Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/v1/incidents")
            .set_json(new_incident("", 100))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::post()
            .uri("/api/v1/incidents")
            .set_json(new_incident("Fire", 0))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );

        let req = test::TestRequest::get()
            .uri("/api/v1/incidents/abc")
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[actix_web::test]
    async fn mutations_invalidate_cached_zones() {
        let h = harness(None, Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;
        let check = || {
            test::TestRequest::post()
                .uri("/api/v1/location/check")
                .set_json(serde_json::json!({
                    "user_id": "user-1",
                    "latitude": 10.0,
                    "longitude": 10.0,
                }))
                .to_request()
        };

        // Warms the cache with an empty snapshot.
        let matches: Vec<Incident> = test::call_and_read_body_json(&app, check()).await;
        assert!(matches.is_empty());

        let req = test::TestRequest::post()
            .uri("/api/v1/incidents")
            .set_json(new_incident("Gas leak", 500))
            .to_request();
        let created: Incident = test::call_and_read_body_json(&app, req).await;

        let matches: Vec<Incident> = test::call_and_read_body_json(&app, check()).await;
        assert_eq!(matches, vec![created]);
    }

    #[actix_web::test]
    async fn api_key_guards_incident_routes_only() {
        let h = harness(Some("secret"), Vec::new());
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        let req = test::TestRequest::get().uri("/api/v1/incidents").to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let req = test::TestRequest::get()
            .uri("/api/v1/incidents")
            .insert_header(("X-API-Key", "wrong"))
            .to_request();
        assert_eq!(
            test::call_service(&app, req).await.status(),
            StatusCode::UNAUTHORIZED
        );

        let req = test::TestRequest::get()
            .uri("/api/v1/incidents")
            .insert_header(("X-API-Key", "secret"))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::post()
            .uri("/api/v1/location/check")
            .set_json(serde_json::json!({
                "user_id": "user-1",
                "latitude": 10.0,
                "longitude": 10.0,
            }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn stats_count_distinct_users_per_incident() {
        let h = harness(None, vec![zone(7, 10.0, 10.0, 1000)]);
        let app = test::init_service(
            App::new()
                .app_data(h.state.clone())
                .configure(crate::configure),
        )
        .await;

        for user in ["alice", "bob", "alice"] {
            let req = test::TestRequest::post()
                .uri("/api/v1/location/check")
                .set_json(serde_json::json!({
                    "user_id": user,
                    "latitude": 10.0,
                    "longitude": 10.0,
                }))
                .to_request();
            test::call_service(&app, req).await;
        }
        wait_for_queue(&h.queue, 3).await;

        let req = test::TestRequest::get()
            .uri("/api/v1/incidents/stats?minutes=5")
            .to_request();
        let stats: Vec<IncidentStat> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(
            stats,
            vec![IncidentStat {
                incident_id: 7,
                user_count: 2,
            }]
        );
    }
}
