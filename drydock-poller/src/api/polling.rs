//! Polling Debug API Handlers
//!
//! Read access to the engine's state plus the operator's manual levers.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use drydock_core::domain::schedule::PollTarget;
use drydock_core::domain::workload::WorkloadId;
use drydock_core::dto::polling::{
    PollingSnapshot, RemoveEntryResponse, RescheduleResponse, TickResponse,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::scheduler::ImagePollingJob;

/// GET /debug/polling
/// Scheduler entries, queue depth, cache statistics and health
pub async fn get_snapshot(State(job): State<Arc<ImagePollingJob>>) -> Json<PollingSnapshot> {
    Json(job.snapshot().await)
}

/// POST /debug/polling/reschedule
/// Re-derive intervals from the current settings
pub async fn reschedule(
    State(job): State<Arc<ImagePollingJob>>,
) -> ApiResult<Json<RescheduleResponse>> {
    tracing::info!("Reschedule requested");

    let tick = job.reschedule().await?;
    Ok(Json(RescheduleResponse {
        tick_interval_secs: tick.map(|d| d.as_secs()),
    }))
}

/// POST /debug/polling/tick
/// Submit every due entry now instead of waiting for the next tick
pub async fn run_tick(State(job): State<Arc<ImagePollingJob>>) -> ApiResult<Json<TickResponse>> {
    tracing::info!("Manual poll tick requested");

    let submitted = job.run_tick().await?;
    Ok(Json(TickResponse { submitted }))
}

/// DELETE /debug/polling/entries/{workload}
/// Drop a workload's own schedule entry, e.g. after the workload was deleted
///
/// Settings win: a workload whose override is still enabled gets a fresh
/// entry back, which is reported as a reset rather than a removal.
pub async fn remove_entry(
    State(job): State<Arc<ImagePollingJob>>,
    Path(workload): Path<String>,
) -> ApiResult<Json<RemoveEntryResponse>> {
    if workload.trim().is_empty() {
        return Err(ApiError::BadRequest("Workload id is empty".to_string()));
    }
    tracing::info!("Removing schedule entry for workload {}", workload);

    let target = PollTarget::Workload(WorkloadId::new(workload));
    let existed = job.scheduler().remove(&target);
    let tick = job.reschedule().await?;
    let rescheduled = job.scheduler().get(&target).is_some();
    if existed && rescheduled {
        tracing::info!("Override for {} is still enabled, entry history reset", target);
    }

    Ok(Json(RemoveEntryResponse {
        removed: existed && !rescheduled,
        reset: existed && rescheduled,
        tick_interval_secs: tick.map(|d| d.as_secs()),
    }))
}

/// DELETE /debug/cache
/// Forget every cached digest
pub async fn clear_cache(State(job): State<Arc<ImagePollingJob>>) -> StatusCode {
    tracing::info!("Clearing digest cache ({} entries)", job.cache().size());
    job.cache().clear();
    StatusCode::NO_CONTENT
}
