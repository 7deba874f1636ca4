//! Health check handlers.
//!
//! - `/health`: liveness probe, no dependency checks
//! - `/ready`: readiness probe, checks database connectivity
//! - `/metrics`: Prometheus exposition

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// Liveness probe handler. Returns "OK" as long as the process can run a
/// handler at all; dependencies are deliberately not checked here.
pub async fn health_check() -> &'static str {
    "OK"
}

/// Readiness probe handler.
///
/// Runs a trivial query against the database. Returns 200 when the service
/// can take traffic, 503 otherwise. The actual error is logged server-side;
/// the response body stays generic.
#[tracing::instrument(skip_all, name = "cs.health.readiness")]
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                database: Some("healthy".to_string()),
            }),
        ),
        Err(e) => {
            tracing::warn!(
                target: "cs.health",
                error = %e,
                "Readiness check failed: database error"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    database: Some("unhealthy".to_string()),
                }),
            )
        }
    }
}

/// Handler for GET /metrics.
pub async fn metrics_handler(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
