//! Error taxonomy for the calibration core.
//!
//! Only `ModelLoad` and `InvalidThresholds` are fatal, and only at startup. Everything else is a
//! per-row condition that the pipeline converts into a status column.

use thiserror::Error;

use crate::models::{MonthKey, Regime};

// ---

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    // ---
    #[error("gridded field unavailable for {key}: {reason}")]
    GridUnavailable { key: MonthKey, reason: String },

    #[error("coordinates ({latitude}, {longitude}) outside grid domain")]
    OutOfDomain { latitude: f64, longitude: f64 },

    #[error("invalid regime thresholds low={low}, high={high}: need finite values with low <= high")]
    InvalidThresholds { low: f64, high: f64 },

    #[error("no model registered for regime {0}")]
    UnknownRegime(Regime),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("failed to load model artifact: {0}")]
    ModelLoad(String),
}

pub type Result<T> = std::result::Result<T, CalibrationError>;

impl CalibrationError {
    /// Shorthand used by loaders and validators.
    pub fn grid(key: MonthKey, reason: impl Into<String>) -> Self {
        CalibrationError::GridUnavailable {
            key,
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        CalibrationError::MalformedInput(reason.into())
    }
}
