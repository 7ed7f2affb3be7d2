//! HTTP API
//!
//! - `GET  /queries`                  query summaries in catalog order
//! - `GET  /queries/{name}`           one summary
//! - `POST /queries/{name}/execute`   JSON object arguments
//! - `POST /queries/{name}/form`      URL-encoded text arguments
//! - `POST /admin/reload`             reread the catalog and swap the registry
//! - `GET  /health`, `GET /metrics`
//!
//! Failures are rendered as [`ErrorResponse`] bodies.

use crate::aql::graph::GraphView;
use crate::client::RemoteError;
use crate::engine::QueryEngine;
use crate::error::{ErrorKind, ErrorResponse, ExecutionError};
use crate::logging::reload_span;
use crate::metrics::METRICS;
use crate::model::{ArgumentSet, ExecutionResponse, QuerySummary, Row};
use crate::registry::load_registry;
use anyhow::Result;
use axum::{
    Form, Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{FormRejection, QueryRejection},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};

/// Shared state behind every handler
pub struct AppState {
    engine: QueryEngine,
    catalog_path: PathBuf,
    shutdown: CancellationToken,
    reload_lock: Mutex<()>,
    started: Instant,
}

impl AppState {
    pub fn new(engine: QueryEngine, catalog_path: PathBuf) -> Self {
        Self {
            engine,
            catalog_path,
            shutdown: CancellationToken::new(),
            reload_lock: Mutex::new(()),
            started: Instant::now(),
        }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Fires when the server begins shutting down
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Reread the catalog file and swap the registry
    ///
    /// The database endpoint and credentials stay as they were at startup;
    /// only the query set is replaced. On failure the current registry is
    /// kept.
    pub async fn reload(&self) -> Result<ReloadReport, ApiError> {
        let _serialized = self.reload_lock.lock().await;
        let source = self.catalog_path.display().to_string();

        async {
            let bytes = tokio::fs::read(&self.catalog_path).await.map_err(|e| {
                METRICS.record_reload(false, 0);
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(
                        ErrorKind::CatalogError,
                        format!("failed to read catalog: {}", e),
                    ),
                )
            })?;

            let registry = match load_registry(&bytes) {
                Ok(registry) => registry,
                Err(err) => {
                    METRICS.record_reload(false, 0);
                    warn!(error = %err, "catalog reload rejected, keeping current registry");
                    return Err(ApiError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ErrorResponse::from_load(&err),
                    ));
                }
            };

            let query_count = registry.len();
            let handle = self.engine.registry();
            handle.swap(registry);
            METRICS.record_reload(true, query_count);

            Ok(ReloadReport {
                query_count,
                generation: handle.generation(),
            })
        }
        .instrument(reload_span(&source))
        .await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadReport {
    pub query_count: usize,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub version: String,
    pub query_count: usize,
    pub registry_generation: u64,
    pub available_slots: usize,
    pub uptime_secs: u64,
}

/// Result rendering for execute endpoints
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Rows,
    /// `{ vertices, edges }` split of a graph result
    Graph,
    /// Cytoscape.js elements JSON
    Cytoscape,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteOptions {
    #[serde(default)]
    pub format: OutputFormat,
}

/// Error response paired with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, body: ErrorResponse) -> Self {
        Self { status, body }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            ErrorResponse::new(ErrorKind::InvalidRequest, message),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ExecutionError> for ApiError {
    fn from(err: ExecutionError) -> Self {
        Self::new(status_for(&err), ErrorResponse::from(&err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// HTTP status for an execution failure
pub fn status_for(err: &ExecutionError) -> StatusCode {
    match err {
        ExecutionError::NotFound(_) => StatusCode::NOT_FOUND,
        ExecutionError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ExecutionError::Bind(_) => StatusCode::INTERNAL_SERVER_ERROR,
        ExecutionError::Remote(RemoteError::Timeout(_) | RemoteError::PoolTimeout(_)) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        ExecutionError::Remote(_) | ExecutionError::Normalize(_) => StatusCode::BAD_GATEWAY,
        ExecutionError::Cancelled { .. } => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/queries", get(list_queries))
        .route("/queries/{name}", get(describe_query))
        .route("/queries/{name}/execute", post(execute_json))
        .route("/queries/{name}/form", post(execute_form))
        .route("/admin/reload", post(reload_catalog))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn list_queries(State(state): State<Arc<AppState>>) -> Json<Vec<QuerySummary>> {
    Json(state.engine.list_queries())
}

async fn describe_query(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<QuerySummary>, ApiError> {
    Ok(Json(state.engine.describe(&name)?))
}

async fn execute_json(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    options: Result<Query<ExecuteOptions>, QueryRejection>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Query(options) = options.map_err(|r| ApiError::invalid_request(r.body_text()))?;
    let args = parse_arguments(&body)?;
    let rows = state
        .engine
        .execute_with_cancel(&name, &args, &state.shutdown.child_token())
        .await?;
    Ok(render(name, rows, options.format))
}

async fn execute_form(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    options: Result<Query<ExecuteOptions>, QueryRejection>,
    text_args: Result<Form<HashMap<String, String>>, FormRejection>,
) -> Result<Response, ApiError> {
    let Query(options) = options.map_err(|r| ApiError::invalid_request(r.body_text()))?;
    let Form(text_args) = text_args.map_err(|r| ApiError::invalid_request(r.body_text()))?;
    let rows = state
        .engine
        .execute_text(&name, &text_args, &state.shutdown.child_token())
        .await?;
    Ok(render(name, rows, options.format))
}

async fn reload_catalog(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ReloadReport>, ApiError> {
    Ok(Json(state.reload().await?))
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthReport> {
    let registry = state.engine.registry();
    Json(HealthReport {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        query_count: registry.snapshot().len(),
        registry_generation: registry.generation(),
        available_slots: state.engine.available_slots(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

async fn metrics_handler() -> Response {
    match METRICS.encode() {
        Ok(text) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// An empty body means no arguments; anything else must be a JSON object
fn parse_arguments(body: &[u8]) -> Result<ArgumentSet, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ArgumentSet::new());
    }
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Object(args)) => Ok(args),
        Ok(other) => Err(ApiError::invalid_request(format!(
            "arguments must be a JSON object, got {}",
            crate::aql::value::json_type_name(&other)
        ))),
        Err(e) => Err(ApiError::invalid_request(format!(
            "request body is not valid JSON: {}",
            e
        ))),
    }
}

/// Flat results render as a graph of vertices with no edges
fn render(query: String, rows: Vec<Row>, format: OutputFormat) -> Response {
    match format {
        OutputFormat::Rows => Json(ExecutionResponse {
            query,
            row_count: rows.len(),
            rows,
        })
        .into_response(),
        OutputFormat::Graph => Json(GraphView::from_rows(&rows)).into_response(),
        OutputFormat::Cytoscape => {
            Json(GraphView::from_rows(&rows).to_cytoscape(&query)).into_response()
        }
    }
}

/// Serve until SIGINT/SIGTERM, then cancel in-flight executions and drain
pub async fn serve(state: Arc<AppState>, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;
    let actual_addr = listener.local_addr()?;
    info!(
        bind = %actual_addr,
        queries = state.engine.registry().snapshot().len(),
        "listening"
    );

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received, cancelling in-flight queries");
            shutdown.cancel();
        })
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
