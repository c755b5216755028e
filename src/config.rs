//! Configuration loader for the `codemetal-calibration` backend service.
//!
//! All runtime settings come from environment variables (with optional `.env`
//! file support provided by the caller) and are read once at startup into an
//! immutable [`Config`].
//!
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{anyhow, Result};

use crate::calibration::RegimeThresholds;
use crate::grid::Interpolation;
use crate::models::PersistenceThresholds;

/// Parse an optional integer environment variable with a default value.
macro_rules! parse_env_u32 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<u32>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse an optional floating point environment variable with a default value.
macro_rules! parse_env_f64 {
    ($var_name:expr, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.parse::<f64>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Strongly typed application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// Directory holding `YYYY-MM.json` reanalysis files.
    pub grid_data_dir: PathBuf,

    /// Directory holding `cold.json`, `moderate.json`, `hot.json` and an
    /// optional `metadata.json`.
    pub model_dir: PathBuf,

    pub listen_addr: SocketAddr,

    /// Maximum number of months resident in the grid cache.
    pub grid_cache_months: u32,

    pub interpolation: Interpolation,

    /// Configured regime boundaries; model metadata takes precedence.
    pub regime: RegimeThresholds,

    pub persistence: PersistenceThresholds,

    pub default_sensor_age_days: f64,

    pub lag_tolerance_minutes: u32,

    /// Largest correction a model may apply, in °C.
    pub max_abs_correction: f64,

    pub max_concurrent_sensors: u32,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `GRID_DATA_DIR` – directory of monthly reanalysis files
/// - `MODEL_DIR` – directory of per-regime model artifacts
///
/// Optional:
/// - `LISTEN_ADDR` – bind address (default: 0.0.0.0:8080)
/// - `GRID_CACHE_MONTHS` – resident month bound (default: 3)
/// - `GRID_INTERPOLATION` – `bilinear` or `nearest` (default: bilinear)
/// - `REGIME_LOW_THRESHOLD` / `REGIME_HIGH_THRESHOLD` – °C (default: 10 / 30)
/// - `CLIMATE_ZONE` – `arid`, `temperate` or `continental` persistence preset
/// - `PERSISTENCE_P25` / `PERSISTENCE_P75` – explicit persistence thresholds
///   (default: 10 / 25, override the zone preset)
/// - `DEFAULT_SENSOR_AGE_DAYS` – (default: 365)
/// - `LAG_TOLERANCE_MINUTES` – (default: 5)
/// - `MAX_ABS_CORRECTION` – °C (default: 10)
/// - `MAX_CONCURRENT_SENSORS` – (default: 8)
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let grid_data_dir = PathBuf::from(require_env!("GRID_DATA_DIR"));
    let model_dir = PathBuf::from(require_env!("MODEL_DIR"));

    let listen_addr = env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".into())
        .parse::<SocketAddr>()
        .map_err(|e| anyhow!("Invalid LISTEN_ADDR: {}", e))?;

    let grid_cache_months = parse_env_u32!("GRID_CACHE_MONTHS", 3);
    if grid_cache_months == 0 {
        return Err(anyhow!("GRID_CACHE_MONTHS must be at least 1"));
    }

    let interpolation = env::var("GRID_INTERPOLATION")
        .ok()
        .map(|v| v.parse::<Interpolation>())
        .transpose()
        .map_err(|e| anyhow!("Invalid GRID_INTERPOLATION: {}", e))?
        .unwrap_or(Interpolation::Bilinear);

    let regime = RegimeThresholds::new(
        parse_env_f64!("REGIME_LOW_THRESHOLD", 10.0),
        parse_env_f64!("REGIME_HIGH_THRESHOLD", 30.0),
    )?;

    let zone = match env::var("CLIMATE_ZONE") {
        Ok(name) => Some(
            PersistenceThresholds::for_climate_zone(&name)
                .ok_or_else(|| anyhow!("Unknown CLIMATE_ZONE '{}'", name))?,
        ),
        Err(_) => None,
    };
    let base = zone.unwrap_or(PersistenceThresholds { p25: 10.0, p75: 25.0 });
    let persistence = PersistenceThresholds {
        p25: parse_env_f64!("PERSISTENCE_P25", base.p25),
        p75: parse_env_f64!("PERSISTENCE_P75", base.p75),
    };
    if !persistence.p25.is_finite() || !persistence.p75.is_finite() || persistence.p25 > persistence.p75 {
        return Err(anyhow!(
            "PERSISTENCE_P25 ({}) and PERSISTENCE_P75 ({}) must be finite with P25 <= P75",
            persistence.p25,
            persistence.p75
        ));
    }

    let default_sensor_age_days = non_negative(
        "DEFAULT_SENSOR_AGE_DAYS",
        parse_env_f64!("DEFAULT_SENSOR_AGE_DAYS", 365.0),
    )?;
    let lag_tolerance_minutes = parse_env_u32!("LAG_TOLERANCE_MINUTES", 5);
    let max_abs_correction = non_negative("MAX_ABS_CORRECTION", parse_env_f64!("MAX_ABS_CORRECTION", 10.0))?;
    let max_concurrent_sensors = parse_env_u32!("MAX_CONCURRENT_SENSORS", 8).max(1);

    Ok(Config {
        grid_data_dir,
        model_dir,
        listen_addr,
        grid_cache_months,
        interpolation,
        regime,
        persistence,
        default_sensor_age_days,
        lag_tolerance_minutes,
        max_abs_correction,
        max_concurrent_sensors,
    })
}

/// Reject NaN, infinities and negative values.
fn non_negative(var_name: &str, value: f64) -> Result<f64> {
    // ---
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(anyhow!("{} must be a finite, non-negative number, got {}", var_name, value))
    }
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  GRID_DATA_DIR          : {}", self.grid_data_dir.display());
        tracing::info!("  MODEL_DIR              : {}", self.model_dir.display());
        tracing::info!("  LISTEN_ADDR            : {}", self.listen_addr);
        tracing::info!("  GRID_CACHE_MONTHS      : {}", self.grid_cache_months);
        tracing::info!("  GRID_INTERPOLATION     : {:?}", self.interpolation);
        tracing::info!("  REGIME THRESHOLDS      : {} / {}", self.regime.low, self.regime.high);
        tracing::info!(
            "  PERSISTENCE THRESHOLDS : {} / {}",
            self.persistence.p25,
            self.persistence.p75
        );
        tracing::info!("  DEFAULT_SENSOR_AGE_DAYS: {}", self.default_sensor_age_days);
        tracing::info!("  LAG_TOLERANCE_MINUTES  : {}", self.lag_tolerance_minutes);
        tracing::info!("  MAX_ABS_CORRECTION     : {}", self.max_abs_correction);
        tracing::info!("  MAX_CONCURRENT_SENSORS : {}", self.max_concurrent_sensors);
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_non_negative_accepts_plain_values() {
        // ---
        assert_eq!(non_negative("MAX_ABS_CORRECTION", 10.0).unwrap(), 10.0);
        assert_eq!(non_negative("DEFAULT_SENSOR_AGE_DAYS", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn test_non_negative_rejects_nan_infinite_and_negative() {
        // ---
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let err = non_negative("MAX_ABS_CORRECTION", bad).unwrap_err();
            assert!(err.to_string().contains("MAX_ABS_CORRECTION"), "{bad}: {err}");
        }
        // "NaN" parses as an f64, so it has to be caught after parsing.
        let parsed: f64 = "NaN".parse().unwrap();
        assert!(non_negative("MAX_ABS_CORRECTION", parsed).is_err());
    }
}
