//! HTTP surface for agentloom.
//!
//! Read-only `/health`, `/version`, and `/metrics` at the root, the run,
//! checkpoint, step, and subagent API under `/v1`. Built on Axum; every
//! request is traced through `tower-http`.

pub mod api_v1;
pub mod runtime;

use agentloom_core::error::StoreError;
use agentloom_telemetry::prometheus::CONTENT_TYPE;
use axum::{
    Router,
    extract::State,
    http::header,
    response::{IntoResponse, Json},
    routing::get,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub use runtime::{Backends, Runtime};

/// Startup and wiring failures.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SharedRuntime = Arc<Runtime>;

/// Build the full router: ambient endpoints plus the v1 API.
pub fn build_router(runtime: SharedRuntime) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(runtime.clone())
        .nest("/v1", api_v1::v1_router(runtime))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Bind `host:port` and serve until the process is stopped.
pub async fn serve(runtime: Runtime, host: &str, port: u16) -> Result<(), ServerError> {
    let addr = format!("{host}:{port}");
    let app = build_router(Arc::new(runtime));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, "agentloom server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VersionResponse {
    name: &'static str,
    version: &'static str,
    default_model: String,
    store: String,
    executor: String,
}

async fn version_handler(State(runtime): State<SharedRuntime>) -> Json<VersionResponse> {
    Json(VersionResponse {
        name: "agentloom",
        version: env!("CARGO_PKG_VERSION"),
        default_model: runtime.agent.model().to_string(),
        store: runtime.config.store.backend.clone(),
        executor: runtime.config.executor.kind.clone(),
    })
}

async fn metrics_handler(State(runtime): State<SharedRuntime>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, CONTENT_TYPE)],
        runtime.metrics.render_prometheus(),
    )
}
