//! Dossier API Gateway
//!
//! The HTTP surface of the submission service.
//! Handles:
//! - Multipart submission intake and background hand-off
//! - Status polling
//! - Health and readiness checks
//! - Process bootstrap and graceful shutdown

mod handlers;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use dossier_common::{
    config::{AppConfig, ObservabilityConfig},
    crm::WebhookCrmClient,
    db::{DbPool, InMemorySubmissionStore, Repository, SubmissionStore},
    metrics::{self, METRICS_PREFIX, SUBMISSION_BUCKETS},
    storage::DriveClient,
};
use dossier_processing::{
    ProcessorSettings, StaleSweeper, SubmissionProcessor, SubmissionSupervisor,
};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::{signal, sync::watch};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SubmissionStore>,
    pub supervisor: Arc<SubmissionSupervisor>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let mut config = AppConfig::load().context("Failed to load configuration")?;

    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting Dossier API Gateway v{}",
        dossier_common::VERSION
    );

    // Repair env-mangled credentials or refuse to start
    if let Err(e) = config.storage.normalize() {
        error!(error = %e, "Invalid storage credentials");
        return Err(e).context("Invalid storage credentials");
    }

    let config = Arc::new(config);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_submission_duration_seconds", METRICS_PREFIX)),
                SUBMISSION_BUCKETS,
            )?
            .install()
            .context("Failed to start metrics exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let store = connect_store(&config).await?;
    let storage = Arc::new(DriveClient::new(&config.storage)?);
    let crm = Arc::new(WebhookCrmClient::new(&config.crm)?);

    let processor = Arc::new(SubmissionProcessor::new(
        store.clone(),
        storage,
        crm,
        ProcessorSettings::from_config(&config),
    ));
    let supervisor = Arc::new(SubmissionSupervisor::new(processor));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Arc::new(StaleSweeper::new(
        store.clone(),
        supervisor.clone(),
        Duration::from_secs(config.pipeline.stale_after_secs),
        Duration::from_secs(config.pipeline.sweep_interval_secs),
    ));
    let sweeper_handle = sweeper.spawn(shutdown_rx);

    // Create app state
    let state = AppState {
        config: config.clone(),
        store,
        supervisor: supervisor.clone(),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop accepting work, then give running submissions a chance to finish
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        warn!(error = %e, "Stale sweep task ended abnormally");
    }

    let in_flight = supervisor.in_flight_count().await;
    if in_flight > 0 {
        info!(in_flight, "Waiting for in-flight submissions");
    }
    if !supervisor.drain(config.shutdown_timeout()).await {
        warn!(
            remaining = supervisor.in_flight_count().await,
            "Shutdown timeout reached with submissions still running"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(observability: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn connect_store(config: &AppConfig) -> anyhow::Result<Arc<dyn SubmissionStore>> {
    if config.database.is_memory() {
        warn!("Using in-memory submission store; records will not survive a restart");
        return Ok(Arc::new(InMemorySubmissionStore::new()));
    }

    info!("Connecting to database...");
    let pool = DbPool::new(&config.database).await?;
    Ok(Arc::new(Repository::new(pool)))
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let body_limit = DefaultBodyLimit::max(state.config.uploads.max_request_bytes);

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Submission endpoints
        .route(
            "/submissions",
            post(handlers::submissions::create_submission).layer(body_limit),
        )
        .route(
            "/submissions/{id}/status",
            get(handlers::submissions::get_status),
        )
        .layer(TimeoutLayer::new(state.config.request_timeout()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
