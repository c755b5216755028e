// src/routes/health.rs
//! Liveness endpoint for the calibration service.
//!
//! Exports a subrouter with `GET /health` that the gateway (`mod.rs`) merges
//! into the top-level router. The integration tests poll it to know when the
//! service is accepting requests.

use axum::{routing::get, Json, Router};
use serde::Serialize;

/// JSON response body for the `/health` endpoint.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Handle `GET /health`. Touches neither the grid cache nor the models.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Create a subrouter containing the `/health` route.
///
/// Generic over the application state so it merges with any gateway router.
pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new().route("/health", get(health))
}
