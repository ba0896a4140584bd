//! Health Check API Handler

use axum::{Json, extract::State, http::StatusCode};
use drydock_core::dto::health::{HealthReport, HealthStatus};
use std::sync::Arc;

use crate::scheduler::ImagePollingJob;

/// GET /health
/// Polling health; 503 once the engine is unhealthy
pub async fn health_check(
    State(job): State<Arc<ImagePollingJob>>,
) -> (StatusCode, Json<HealthReport>) {
    let report = job.snapshot().await.health;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report))
}
