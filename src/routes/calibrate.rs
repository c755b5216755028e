use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use tracing::{debug, info};

use crate::pipeline::{BatchInput, CalibrationPipeline};

// ---

pub fn router() -> Router<CalibrationPipeline> {
    // ---
    Router::new().route("/calibrate", post(handler))
}

/// Handle `POST /calibrate`.
///
/// Row-level problems never fail the request; they come back as statuses
/// on the affected rows or in the `rejected` list.
async fn handler(State(pipeline): State<CalibrationPipeline>, Json(input): Json<BatchInput>) -> impl IntoResponse {
    // ---
    info!("POST /calibrate - {} rows", input.rows.len());

    let report = pipeline.run(input).await;

    debug!(
        "POST /calibrate - run {} returning {} results",
        report.run_id,
        report.results.len()
    );
    (StatusCode::OK, Json(report))
}
