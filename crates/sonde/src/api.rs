//! HTTP surface over the orchestrator.
//!
//! Thin layer: multipart in, JSON envelopes out, typed errors mapped onto
//! status codes. All behavior lives in the orchestrator and status service.

use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use sonde_orchestrator::{Orchestrator, StatusService};
use sonde_protocol::{ScanError, ScanOptions};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Uploads above this size are rejected at the transport layer; the
/// per-scan `max_file_size_bytes` gate still applies underneath.
const MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

/// Application state shared across handlers.
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub status: StatusService,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Arc<Self> {
        let status = StatusService::new(orchestrator.clone());
        Arc::new(Self {
            orchestrator,
            status,
        })
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/engines", get(list_engines))
        .route("/api/v1/engines/status", get(engine_status))
        .route("/api/v1/scan/file", post(scan_file))
        .route("/api/v1/scan/batch", post(scan_batch))
        .route("/api/v1/scan/history", get(scan_history))
        .route("/api/v1/scan/:id/status", get(job_status))
        .route("/api/v1/system/metrics", get(system_metrics))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("cannot bind {}", bind))?;
    info!("listening on {}", bind);
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

// ----------------------------------------------------------------------
// Error mapping
// ----------------------------------------------------------------------

struct ApiError(ScanError);

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ScanError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
            ScanError::NotFound(_) => StatusCode::NOT_FOUND,
            ScanError::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ScanError::EngineTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ScanError::EngineFailure { .. } => StatusCode::BAD_GATEWAY,
            ScanError::EngineRegistryUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ScanError::Cancelled => StatusCode::CONFLICT,
            ScanError::StorageWriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({
            "success": false,
            "error": {
                "kind": self.0.kind(),
                "message": self.0.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}

// ----------------------------------------------------------------------
// Option parsing
// ----------------------------------------------------------------------

/// Scan options carried as query parameters, mirroring the upload form.
#[derive(Debug, Default, Deserialize)]
struct ScanParams {
    /// Comma-separated engine restriction.
    engines: Option<String>,
    deep_analysis: Option<bool>,
    generate_hashes: Option<bool>,
    extract_metadata: Option<bool>,
    validate_signatures: Option<bool>,
    skip_duplicates: Option<bool>,
    timeout_ms: Option<u64>,
    max_file_size_bytes: Option<u64>,
}

impl ScanParams {
    fn into_options(self, defaults: &ScanOptions) -> ScanOptions {
        let mut options = defaults.clone();
        if let Some(engines) = self.engines {
            options.engines = engines
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
        }
        if let Some(v) = self.deep_analysis {
            options.deep_analysis = v;
        }
        if let Some(v) = self.generate_hashes {
            options.generate_hashes = v;
        }
        if let Some(v) = self.extract_metadata {
            options.extract_metadata = v;
        }
        if let Some(v) = self.validate_signatures {
            options.validate_signatures = v;
        }
        if let Some(v) = self.skip_duplicates {
            options.skip_duplicates = v;
        }
        if let Some(v) = self.timeout_ms {
            options.timeout_ms = v;
        }
        if let Some(v) = self.max_file_size_bytes {
            options.max_file_size_bytes = v;
        }
        options
    }
}

/// Pull every uploaded file out of a multipart form.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<(String, Vec<u8>)>, ApiError> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError(ScanError::InvalidOptions(format!("malformed upload: {}", e)))
    })? {
        if field.file_name().is_none() {
            continue;
        }
        let filename = field
            .file_name()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "upload.bin".to_string());
        let bytes = field.bytes().await.map_err(|e| {
            ApiError(ScanError::InvalidOptions(format!("malformed upload: {}", e)))
        })?;
        files.push((filename, bytes.to_vec()));
    }
    if files.is_empty() {
        return Err(ApiError(ScanError::InvalidOptions(
            "no file field in upload".to_string(),
        )));
    }
    Ok(files)
}

// ----------------------------------------------------------------------
// Handlers
// ----------------------------------------------------------------------

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn list_engines(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let engines = state.orchestrator.registry().list();
    Json(json!({
        "success": true,
        "total": engines.len(),
        "engines": engines,
    }))
}

async fn engine_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    // Live status: re-probe on demand rather than serving the state from
    // process start.
    state.orchestrator.registry().refresh().await?;
    let engines = state.status.engine_status().await?;
    Ok(Json(json!({"success": true, "engines": engines})))
}

async fn scan_file(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let options = params.into_options(&state.orchestrator.config().default_options);
    let mut files = read_uploads(multipart).await?;
    let (filename, payload) = files.remove(0);

    let result = state
        .orchestrator
        .scan_single(&filename, &payload, Some(options))
        .await?;
    Ok(Json(json!({"success": true, "result": result})))
}

async fn scan_batch(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ScanParams>,
    multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let options = params.into_options(&state.orchestrator.config().default_options);
    let files = read_uploads(multipart).await?;
    let total_files = files.len();

    let batch_id = state
        .orchestrator
        .submit_batch(files, Some(options))
        .await?;
    Ok(Json(json!({
        "success": true,
        "batch_id": batch_id,
        "total_files": total_files,
    })))
}

async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state.status.job_status(&id).await?;
    Ok(Json(json!({"success": true, "job": job})))
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn scan_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit = params.limit.unwrap_or(100);
    let scans = state
        .orchestrator
        .store()
        .list(limit)
        .await
        .map_err(ScanError::from)?;
    let total = state
        .orchestrator
        .store()
        .count()
        .await
        .map_err(ScanError::from)?;
    Ok(Json(json!({
        "success": true,
        "scans": scans,
        "total": total,
    })))
}

async fn system_metrics(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let metrics = state.status.system_metrics().await?;
    Ok(Json(json!({"success": true, "metrics": metrics})))
}
