//! Regime classification and the stratified per-regime calibrator.

mod calibrator;
mod model;
mod regime;

pub use calibrator::{CorrectionStatus, StratifiedCalibrator};
pub use model::load_metadata;
pub use regime::{RegimeClassifier, RegimeThresholds};

#[cfg(test)]
pub(crate) use model::ModelArtifact;
