#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Stand-in webhook endpoint for local testing.
//!
//! `POST /` records the request body with its arrival time and answers
//! `200 OK`. `GET /` returns every recorded event in arrival order.

use std::sync::{Mutex, PoisonError};

use actix_web::{HttpResponse, web};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// One received webhook.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedEvent {
    /// The posted body, or the raw text as a JSON string if it was not
    /// valid JSON.
    pub body: serde_json::Value,
    /// RFC 3339 arrival time.
    pub received_at: String,
}

/// In-memory log of received events.
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ReceivedEvent>>,
}

impl EventLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event.
    pub fn push(&self, event: ReceivedEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Snapshot of every event in arrival order.
    #[must_use]
    pub fn events(&self) -> Vec<ReceivedEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// `POST /`
pub async fn receive(events: web::Data<EventLog>, body: String) -> HttpResponse {
    log::info!("Received webhook: {body}");

    let body = match serde_json::from_str::<serde_json::Value>(&body) {
        Ok(json) => json,
        Err(e) => {
            log::warn!("Webhook body is not valid JSON: {e}");
            serde_json::Value::String(body)
        }
    };

    events.push(ReceivedEvent {
        body,
        received_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    });

    HttpResponse::Ok().body("OK")
}

/// `GET /`
pub async fn list(events: web::Data<EventLog>) -> HttpResponse {
    HttpResponse::Ok().json(events.events())
}

/// Registers the receiver routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::post().to(receive))
        .route("/", web::get().to(list));
}
