use axum::Router;

use crate::pipeline::CalibrationPipeline;

mod cache;
mod calibrate;
mod health;

// ---

pub fn router(pipeline: CalibrationPipeline) -> Router {
    // ---
    Router::new()
        .merge(calibrate::router())
        .merge(cache::router())
        .merge(health::router())
        .with_state(pipeline)
}
