//! HTTP server assembly.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::AppConfig;
use crate::error::ApiError;
use crate::github::RateLimiter;
use crate::handlers;
use crate::scheduler::SyncScheduler;
use crate::store::Store;
use crate::sync::SyncRunner;

/// Shared state for every handler.
pub struct AppState {
    pub db: DatabaseConnection,
    pub store: Arc<dyn Store>,
    pub runner: Arc<SyncRunner>,
    pub limiter: Arc<RateLimiter>,
    /// Serializes API-triggered runs; held for the duration of a run.
    pub run_guard: Mutex<()>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::root,
        handlers::health,
        handlers::trigger_sync,
        handlers::list_syncs,
        handlers::get_sync,
        handlers::rate_limit,
    ),
    components(schemas(
        crate::models::ServiceInfo,
        crate::store::SyncLogRecord,
        crate::store::SyncType,
        crate::store::SyncStatus,
        crate::github::RateLimitSnapshot,
        handlers::TriggerSyncRequest,
        handlers::TriggerSyncResponse,
        ApiError,
    )),
    info(
        title = "orgpulse",
        description = "GitHub organization analytics sync service"
    )
)]
pub struct ApiDoc;

pub fn create_app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/syncs", post(handlers::trigger_sync).get(handlers::list_syncs))
        .route("/syncs/{id}", get(handlers::get_sync))
        .route("/rate-limit", get(handlers::rate_limit))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the listener, optionally start the scheduler, and serve until
/// ctrl-c. Shutdown cancels the scheduler and any in-flight run.
pub async fn run_server(config: AppConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = config.socket_addr()?;
    let shutdown = CancellationToken::new();

    if config.scheduler.enabled {
        let scheduler = SyncScheduler::new(
            Arc::clone(&state.runner),
            config.scheduler.interval_seconds,
        );
        tokio::spawn(scheduler.run(shutdown.clone()));
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await?;

    shutdown.cancel();
    Ok(())
}
