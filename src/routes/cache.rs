//! Grid cache diagnostics.

use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use crate::grid::CacheStats;
use crate::pipeline::CalibrationPipeline;

// ---

pub fn router() -> Router<CalibrationPipeline> {
    // ---
    Router::new().route("/cache", get(stats).delete(clear))
}

/// `GET /cache` returns the current counters.
async fn stats(State(pipeline): State<CalibrationPipeline>) -> Json<CacheStats> {
    Json(pipeline.store().stats())
}

/// `DELETE /cache` drops every resident month.
async fn clear(State(pipeline): State<CalibrationPipeline>) -> Json<CacheStats> {
    // ---
    info!("DELETE /cache");
    let store = pipeline.store();
    store.clear();
    Json(store.stats())
}
