//! Application entry point for the `codemetal-calibration` backend service.
//!
//! This binary orchestrates the full startup sequence for the calibration
//! API, including:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Loading the per-regime model bundle (fatal if incomplete)
//! - Wiring the gridded field store and the calibration pipeline
//! - Mounting all API routes via the `routes` gateway (EMBP pattern)
//! - Binding the Axum HTTP server and serving requests
//!
//! # Environment Variables
//! - `GRID_DATA_DIR` (**required**) – directory of monthly reanalysis files
//! - `MODEL_DIR` (**required**) – directory of per-regime model artifacts
//! - `CAL_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `CAL_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config` for the remaining tuning variables.
use std::{env, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use chrono::Duration;
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

mod calibration;
mod config;
mod error;
mod features;
mod grid;
mod models;
mod pipeline;
mod routes;

use calibration::{load_metadata, RegimeClassifier, RegimeThresholds, StratifiedCalibrator};
use features::FeatureSettings;
use grid::{DirectoryLoader, GriddedFieldStore};
use models::SensorContext;
use pipeline::{CalibrationPipeline, PipelineSettings};

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let calibrator = StratifiedCalibrator::from_dir(&cfg.model_dir, cfg.max_abs_correction)
        .with_context(|| format!("Failed to load models from {}", cfg.model_dir.display()))?;

    let thresholds = match load_metadata(&cfg.model_dir)?.and_then(|m| m.thresholds) {
        Some(t) => {
            let t = RegimeThresholds::new(t.low, t.high).context("Invalid thresholds in model metadata")?;
            tracing::info!("Using regime thresholds from model metadata: {} / {}", t.low, t.high);
            t
        }
        None => cfg.regime,
    };

    let store = Arc::new(GriddedFieldStore::new(
        DirectoryLoader::new(&cfg.grid_data_dir),
        cfg.grid_cache_months as usize,
        cfg.interpolation,
    ));

    let settings = PipelineSettings {
        features: FeatureSettings {
            regime: thresholds,
            lag_tolerance: Duration::minutes(cfg.lag_tolerance_minutes as i64),
            default_sensor_age_days: cfg.default_sensor_age_days,
        },
        default_context: SensorContext {
            persistence: cfg.persistence,
            deployed_at: None,
        },
        max_concurrent_sensors: cfg.max_concurrent_sensors as usize,
    };
    let pipeline = CalibrationPipeline::new(store, calibrator, RegimeClassifier::new(thresholds), settings);

    // Build app from routes gateway (EMBP)
    let app: Router = routes::router(pipeline);

    tracing::info!("Listening on {}", cfg.listen_addr);

    let listener = tokio::net::TcpListener::bind(cfg.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.listen_addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

/// Initialize the global tracing subscriber for structured logging.
///
/// This function configures the [`tracing_subscriber`] with:
/// - Log target, file, and line number output enabled
/// - Color output controlled by TTY detection and `FORCE_COLOR` env var:
///   - `FORCE_COLOR=1|true|yes`: force colors on
///   - `FORCE_COLOR=0|false|no`: force colors off
///   - unset or other values: auto-detect TTY
/// - Span event emission mode controlled by the `CAL_SPAN_EVENTS` env var:
///   - `"full"`       : emit ENTER, EXIT, and CLOSE events with timing
///   - `"enter_exit"` : emit ENTER and EXIT only
///   - unset or other values: emit CLOSE events only (default)
/// - Log level controlled by the `CAL_LOG_LEVEL` env var
///
/// Call once at startup, before any logging.
fn init_tracing() {
    // ---
    let span_events = match env::var("CAL_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") | Ok("yes") => true,
        Ok("0") | Ok("false") | Ok("no") => false,
        _ => std::io::stdout().is_terminal(),
    };

    // Use RUST_LOG if available, otherwise fall back to CAL_LOG_LEVEL
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let level = match env::var("CAL_LOG_LEVEL").ok().as_deref() {
            Some("trace") => "trace",
            Some("debug") => "debug",
            Some("info") => "info",
            Some("warn") => "warn",
            Some("error") => "error",
            _ => "debug",
        };
        EnvFilter::new(format!("{level},hyper=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
