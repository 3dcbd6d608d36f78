//! JSON HTTP API over the scan engine.
//!
//! Routes (all under `/api`):
//! - `POST /scans`                start a scan, 202 `{jobId}`
//! - `GET  /scans`                history, newest first
//! - `GET  /scans/{id}`           `{state, progress, statusMessage}`
//! - `GET  /scans/{id}/job`       the full job
//! - `GET  /scans/{id}/results`   result entries of a Completed job
//! - `POST /scans/{id}/cancel`    request cancellation, 202
//! - `GET  /health`

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use lookout_core::{JobId, JobStatus, ScanError, ScanJob, ScanMode, ScanResultEntry};
use lookout_scan::ScanEngine;

#[derive(Clone)]
pub struct AppState {
    engine: Arc<ScanEngine>,
}

pub fn router(engine: Arc<ScanEngine>) -> Router {
    let api = Router::new()
        .route("/scans", post(start_scan).get(list_scans))
        .route("/scans/{id}", get(scan_status))
        .route("/scans/{id}/job", get(scan_job))
        .route("/scans/{id}/results", get(scan_results))
        .route("/scans/{id}/cancel", post(cancel_scan))
        .route("/health", get(health))
        .with_state(AppState { engine });

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanRequest {
    pub targets: String,
    pub mode: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartScanResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize)]
struct Acknowledgement {
    status: &'static str,
}

async fn start_scan(
    State(app): State<AppState>,
    body: Result<Json<StartScanRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = body.map_err(|e| ScanError::Validation(e.body_text()))?;
    let mode: ScanMode = req.mode.parse()?;
    let job_id = app.engine.start_scan(&req.targets, mode)?;
    Ok((StatusCode::ACCEPTED, Json(StartScanResponse { job_id })))
}

async fn list_scans(State(app): State<AppState>) -> Result<Json<Vec<ScanJob>>, ApiError> {
    Ok(Json(app.engine.get_history()?))
}

async fn scan_status(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    Ok(Json(app.engine.get_status(id.parse()?)?))
}

async fn scan_job(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ScanJob>, ApiError> {
    Ok(Json(app.engine.get_job(id.parse()?)?))
}

async fn scan_results(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ScanResultEntry>>, ApiError> {
    Ok(Json(app.engine.get_results(id.parse()?)?))
}

async fn cancel_scan(
    State(app): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    app.engine.cancel_scan(id.parse()?)?;
    Ok((StatusCode::ACCEPTED, Json(Acknowledgement { status: "accepted" })))
}

async fn health() -> Json<Acknowledgement> {
    Json(Acknowledgement { status: "ok" })
}

/// JSON error body: `{"error": <code>, "message": <text>}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError(ScanError);

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            ScanError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
            ScanError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ScanError::NotReady { .. } => (StatusCode::CONFLICT, "not_ready"),
            ScanError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            ScanError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "store"),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            error: code,
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
