#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for geocore.
//!
//! Serves incident management, location checks, and stats under
//! `/api/v1`, and runs the webhook delivery worker alongside the HTTP
//! server or on its own. Storage and the work queue are backed by Postgres
//! by default; either can be switched to an in-process backend for local
//! runs.

pub mod config;
mod handlers;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpResponse, HttpServer, middleware, web};
use geocore_cache::{MemoryIncidentCache, SnapshotCache};
use geocore_database::{
    AuditStore, DbError, IncidentStore, MemoryStore, PostgresStore, db, run_migrations,
};
use geocore_matcher::{AuditRecorder, MatchEngine};
use geocore_queue::{MemoryQueue, PostgresQueue, WorkQueue};
use geocore_server_models::ApiError;
use geocore_webhook::{DeliveryError, DeliveryWorker, HttpWebhookSink, WorkerConfig};
use switchy_database::Database;
use tokio_util::sync::CancellationToken;

pub use config::{Backend, ServerConfig};

/// Errors that stop the server or worker from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// A configuration value was invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the invalid setting.
        message: String,
    },

    /// The database could not be reached or migrated.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The webhook client could not be built.
    #[error(transparent)]
    Webhook(#[from] DeliveryError),

    /// The HTTP server failed to bind or crashed.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state.
pub struct AppState {
    /// Authoritative incident storage.
    pub incidents: Arc<dyn IncidentStore>,
    /// Location check pipeline.
    pub engine: MatchEngine,
    /// Snapshot cache shared with `engine`, invalidated on mutation.
    pub cache: SnapshotCache,
    /// Database connection for health checks, if any backend uses one.
    pub db: Option<Arc<dyn Database>>,
    /// Required `X-API-Key` value for incident management.
    pub api_key: Option<String>,
    /// Default stats window in minutes.
    pub stats_window_minutes: u32,
}

/// Everything the HTTP server and the delivery worker share.
pub struct Services {
    /// State handed to the HTTP handlers.
    pub state: AppState,
    /// Queue the match pipeline produces onto and the worker consumes.
    pub queue: Arc<dyn WorkQueue>,
}

impl Services {
    /// Connects the configured backends and wires the match pipeline.
    ///
    /// Side-effect tasks are spawned on the runtime that calls this.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Database`] if a Postgres backend is selected
    /// and the connection or migrations fail.
    pub async fn build(config: &ServerConfig) -> Result<Self, ServerError> {
        let db = if config.store_backend == Backend::Postgres
            || config.queue_backend == Backend::Postgres
        {
            Some(open_database(&config.database_url).await?)
        } else {
            None
        };

        let (incidents, audit): (Arc<dyn IncidentStore>, Arc<dyn AuditStore>) =
            match (&db, config.store_backend) {
                (Some(db), Backend::Postgres) => {
                    let store = Arc::new(PostgresStore::new(Arc::clone(db)));
                    (store.clone(), store)
                }
                _ => {
                    log::warn!("Using in-memory incident store; data is lost on exit");
                    let store = Arc::new(MemoryStore::new());
                    (store.clone(), store)
                }
            };

        let queue: Arc<dyn WorkQueue> = match (&db, config.queue_backend) {
            (Some(db), Backend::Postgres) => Arc::new(PostgresQueue::new(Arc::clone(db))),
            _ => {
                log::warn!("Using in-memory work queue; queued events are lost on exit");
                Arc::new(MemoryQueue::new())
            }
        };

        Ok(Self::from_parts(config, incidents, audit, queue, db))
    }

    /// Wires the match pipeline over already-constructed backends.
    #[must_use]
    pub fn from_parts(
        config: &ServerConfig,
        incidents: Arc<dyn IncidentStore>,
        audit: Arc<dyn AuditStore>,
        queue: Arc<dyn WorkQueue>,
        db: Option<Arc<dyn Database>>,
    ) -> Self {
        let cache = SnapshotCache::new(Arc::new(MemoryIncidentCache::new(config.cache_ttl)));
        let recorder = AuditRecorder::new(audit, Arc::clone(&queue), config.queue_name.clone());
        let engine = MatchEngine::new(Arc::clone(&incidents), cache.clone(), recorder)
            .with_runtime(tokio::runtime::Handle::current());

        Self {
            state: AppState {
                incidents,
                engine,
                cache,
                db,
                api_key: config.api_key.clone(),
                stats_window_minutes: config.stats_window_minutes,
            },
            queue,
        }
    }
}

async fn open_database(url: &str) -> Result<Arc<dyn Database>, ServerError> {
    log::info!("Connecting to database...");
    let db: Arc<dyn Database> = Arc::from(db::connect(url).await?);

    log::info!("Running migrations...");
    run_migrations(db.as_ref()).await?;

    Ok(db)
}

/// Builds a delivery worker posting to the configured webhook URL.
///
/// # Errors
///
/// Returns [`ServerError::Webhook`] if the HTTP client cannot be built.
pub fn build_worker(
    config: &ServerConfig,
    queue: Arc<dyn WorkQueue>,
) -> Result<DeliveryWorker, ServerError> {
    let sink = HttpWebhookSink::new(config.webhook_url.clone(), config.retry.attempt_timeout)?;
    log::info!(
        "Delivering webhooks from '{}' to {}",
        config.queue_name,
        sink.url()
    );

    Ok(DeliveryWorker::new(
        queue,
        Arc::new(sink),
        WorkerConfig {
            queue_name: config.queue_name.clone(),
            retry: config.retry,
            error_backoff: geocore_webhook::worker::DEFAULT_ERROR_BACKOFF,
            dead_letter_queue: config.dead_letter_queue.clone(),
        },
    ))
}

/// Registers the `/api/v1` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(|err, _req| {
        let response = HttpResponse::BadRequest().json(ApiError::new(err.to_string()));
        actix_web::error::InternalError::from_response(err, response).into()
    }))
    .service(
        web::scope("/api/v1")
            .route("/system/health", web::get().to(handlers::health))
            .route("/location/check", web::post().to(handlers::check_location))
            .service(
                web::scope("/incidents")
                    .route("", web::post().to(handlers::create_incident))
                    .route("", web::get().to(handlers::list_incidents))
                    .route("/stats", web::get().to(handlers::incident_stats))
                    .route("/{id}", web::get().to(handlers::get_incident))
                    .route("/{id}", web::put().to(handlers::update_incident))
                    .route("/{id}", web::delete().to(handlers::delete_incident)),
            ),
    );
}

/// Runs the HTTP server with an embedded delivery worker until the server
/// shuts down, then stops the worker and waits for in-flight deliveries.
///
/// # Errors
///
/// Returns [`ServerError`] if startup fails or the server cannot bind.
#[allow(clippy::future_not_send)]
pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let services = Services::build(&config).await?;
    let worker = build_worker(&config, Arc::clone(&services.queue))?;

    let cancel = CancellationToken::new();
    let worker_task = {
        let worker = worker.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { worker.run(cancel).await })
    };

    let state = web::Data::new(services.state);

    log::info!("Starting server on {}:{}", config.bind_addr, config.port);

    let result = HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((config.bind_addr.as_str(), config.port))?
    .run()
    .await;

    log::info!("HTTP server stopped, stopping delivery worker");
    cancel.cancel();
    if let Err(e) = worker_task.await {
        log::error!("Delivery worker task failed: {e}");
    }

    Ok(result?)
}

/// Runs only the delivery worker until Ctrl-C.
///
/// # Errors
///
/// Returns [`ServerError`] if the queue backend or webhook client cannot be
/// set up.
pub async fn run_worker(config: ServerConfig) -> Result<(), ServerError> {
    let queue: Arc<dyn WorkQueue> = match config.queue_backend {
        Backend::Postgres => Arc::new(PostgresQueue::new(
            open_database(&config.database_url).await?,
        )),
        Backend::Memory => {
            log::warn!("Standalone worker on an in-memory queue will never receive events");
            Arc::new(MemoryQueue::new())
        }
    };
    let worker = build_worker(&config, queue)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Shutdown signal received");
                    cancel.cancel();
                }
                Err(e) => log::error!("Failed to listen for shutdown signal: {e}"),
            }
        });
    }

    worker.run(cancel).await;
    Ok(())
}

/// Applies pending migrations and exits.
///
/// # Errors
///
/// Returns [`ServerError::Database`] if the connection or a migration
/// fails.
pub async fn run_migrate(config: &ServerConfig) -> Result<(), ServerError> {
    open_database(&config.database_url).await?;
    Ok(())
}
