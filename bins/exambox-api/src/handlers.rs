// HTTP route handlers for the Exambox API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json},
};
use exambox_common::types::{ExecutionRequest, ExecutionResult, Profile};
use exambox_engine::ExecutionEngine;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::metrics;
use crate::AppState;

/// Metrics label for requests rejected before a profile was known
const UNRESOLVED_PROFILE: &str = "unresolved";

/// Request body. Both fields are loose here so that a missing or null
/// `code`, or an unknown profile, still gets a `ValidationError` body.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default, alias = "language")]
    pub profile: Option<String>,
}

impl ExecuteRequest {
    /// The execution request, or the validation error to answer with
    pub fn into_request(self) -> Result<ExecutionRequest, ExecutionResult> {
        let profile = match self.profile.as_deref() {
            None => Profile::default(),
            Some(name) => Profile::from_str(name).ok_or_else(|| ExecutionResult::ValidationError {
                message: format!("Unsupported profile: {}", name),
            })?,
        };
        Ok(ExecutionRequest::new(self.code.unwrap_or_default(), profile))
    }
}

/// HTTP status for a verdict. Program failures are the caller's problem
/// (400); infrastructure trouble is ours (500/503).
pub fn status_for(result: &ExecutionResult) -> StatusCode {
    match result {
        ExecutionResult::Success { .. } => StatusCode::OK,
        ExecutionResult::Overloaded { .. } => StatusCode::SERVICE_UNAVAILABLE,
        ExecutionResult::LaunchFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// POST /api/code/execute - Run a submission and return its verdict
pub async fn execute_code<E: ExecutionEngine + 'static>(
    State(state): State<Arc<AppState<E>>>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> impl IntoResponse {
    let start = Instant::now();

    let request = match payload {
        Ok(Json(body)) => body.into_request(),
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected request body");
            Err(ExecutionResult::ValidationError {
                message: format!("Invalid request body: {}", rejection.body_text()),
            })
        }
    };

    let (profile, result) = match request {
        Ok(request) => {
            let profile = request.profile;
            (profile.as_str(), state.executor.execute(request).await)
        }
        Err(invalid) => (UNRESOLVED_PROFILE, invalid),
    };

    let elapsed = start.elapsed();
    metrics::record_execution(profile, result.outcome(), elapsed.as_secs_f64());
    info!(
        profile,
        outcome = result.outcome(),
        elapsed_ms = elapsed.as_millis() as u64,
        "Request served"
    );

    (status_for(&result), Json(result))
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
