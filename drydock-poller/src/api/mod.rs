//! API Module
//!
//! Debug HTTP surface of the poller: health plus a window into the polling
//! engine.

pub mod error;
pub mod health;
pub mod polling;

use axum::{
    Router,
    routing::{delete, get, post},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::scheduler::ImagePollingJob;

/// Create the debug router
pub fn create_router(job: Arc<ImagePollingJob>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Polling endpoints
        .route("/debug/polling", get(polling::get_snapshot))
        .route("/debug/polling/reschedule", post(polling::reschedule))
        .route("/debug/polling/tick", post(polling::run_tick))
        .route(
            "/debug/polling/entries/{workload}",
            delete(polling::remove_entry),
        )
        .route("/debug/cache", delete(polling::clear_cache))
        // Add state and middleware
        .with_state(job)
        .layer(TraceLayer::new_for_http())
}
