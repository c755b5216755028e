//! Routes complete feature vectors to the model of their regime.

use std::path::Path;
use std::sync::Arc;

use super::model::{load_model, RegressionModel};
use crate::error::{CalibrationError, Result};
use crate::features::FeatureVector;
use crate::models::Regime;

// ---

/// How a correction was (or was not) produced.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionStatus {
    Corrected,
    /// Feature vector incomplete; the model was not invoked.
    Uncomputed,
    /// The model answered with something unusable.
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionResult {
    pub raw: f64,
    pub calibrated: f64,
    /// Signed `raw - calibrated`.
    pub correction: f64,
    pub status: CorrectionStatus,
}

impl CorrectionResult {
    fn pass_through(raw: f64, status: CorrectionStatus) -> Self {
        Self {
            raw,
            calibrated: raw,
            correction: 0.0,
            status,
        }
    }
}

/// One regression model per regime.
///
/// Each model predicts the sensor's bias, so `calibrated = raw - bias`.
#[derive(Debug, Clone)]
pub struct StratifiedCalibrator {
    models: [Option<Arc<dyn RegressionModel>>; 3],
    max_abs_correction: f64,
}

impl StratifiedCalibrator {
    pub fn new(max_abs_correction: f64) -> Self {
        Self {
            models: [None, None, None],
            max_abs_correction,
        }
    }

    pub fn with_model(mut self, regime: Regime, model: Arc<dyn RegressionModel>) -> Self {
        self.models[regime.index()] = Some(model);
        self
    }

    /// Load `cold.json`, `moderate.json` and `hot.json` from `dir`.
    pub fn from_dir(dir: &Path, max_abs_correction: f64) -> Result<Self> {
        // ---
        let mut calibrator = Self::new(max_abs_correction);
        for regime in Regime::ALL {
            let path = dir.join(format!("{}.json", regime.as_str()));
            if !path.is_file() {
                return Err(CalibrationError::ModelLoad(format!(
                    "model for regime {regime} not found at {}",
                    path.display()
                )));
            }
            let model = load_model(&path)?;
            tracing::info!("Loaded {} model: {}", regime, model.describe());
            calibrator = calibrator.with_model(regime, model);
        }
        Ok(calibrator)
    }

    pub fn model(&self, regime: Regime) -> Result<&Arc<dyn RegressionModel>> {
        self.models[regime.index()]
            .as_ref()
            .ok_or(CalibrationError::UnknownRegime(regime))
    }

    /// Correct `raw_temperature` using the model of `regime`.
    ///
    /// Incomplete vectors never reach the model; the raw value passes through.
    pub fn calibrate(&self, raw_temperature: f64, vector: &FeatureVector, regime: Regime) -> Result<CorrectionResult> {
        // ---
        let model = self.model(regime)?;

        if !vector.is_complete() {
            return Ok(CorrectionResult::pass_through(raw_temperature, CorrectionStatus::Uncomputed));
        }

        let bias = model.predict(vector);
        if !bias.is_finite() {
            return Ok(CorrectionResult::pass_through(
                raw_temperature,
                CorrectionStatus::Rejected(format!("{regime} model returned {bias}")),
            ));
        }
        if bias.abs() > self.max_abs_correction {
            return Ok(CorrectionResult::pass_through(
                raw_temperature,
                CorrectionStatus::Rejected(format!(
                    "{regime} model correction {bias:.2} exceeds ±{}",
                    self.max_abs_correction
                )),
            ));
        }

        let calibrated = raw_temperature - bias;
        Ok(CorrectionResult {
            raw: raw_temperature,
            calibrated,
            correction: raw_temperature - calibrated,
            status: CorrectionStatus::Corrected,
        })
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features::Feature;

    /// Constant-bias model that records whether it was consulted.
    #[derive(Debug)]
    struct Fixed {
        bias: f64,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Fixed {
        fn new(bias: f64) -> Arc<Self> {
            Arc::new(Self {
                bias,
                calls: Default::default(),
            })
        }
    }

    impl RegressionModel for Fixed {
        fn predict(&self, _features: &FeatureVector) -> f64 {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.bias
        }

        fn describe(&self) -> String {
            "fixed".into()
        }
    }

    fn complete() -> FeatureVector {
        let mut v = FeatureVector::default();
        for f in Feature::ALL {
            v.set(*f, 1.0);
        }
        v
    }

    fn calibrator(cold: f64, moderate: f64, hot: f64) -> StratifiedCalibrator {
        StratifiedCalibrator::new(10.0)
            .with_model(Regime::Cold, Fixed::new(cold))
            .with_model(Regime::Moderate, Fixed::new(moderate))
            .with_model(Regime::Hot, Fixed::new(hot))
    }

    #[test]
    fn test_dispatch_by_regime() {
        // ---
        let c = calibrator(-1.0, 0.5, 2.0);
        let v = complete();

        let cold = c.calibrate(5.0, &v, Regime::Cold).unwrap();
        assert_eq!(cold.calibrated, 6.0);
        assert_eq!(cold.correction, -1.0);

        let hot = c.calibrate(35.0, &v, Regime::Hot).unwrap();
        assert_eq!(hot.calibrated, 33.0);
        assert_eq!(hot.status, CorrectionStatus::Corrected);
    }

    #[test]
    fn test_incomplete_vector_skips_model() {
        // ---
        let model = Fixed::new(1.0);
        let c = StratifiedCalibrator::new(10.0).with_model(Regime::Moderate, model.clone());

        let result = c.calibrate(20.0, &FeatureVector::default(), Regime::Moderate).unwrap();

        assert_eq!(result.status, CorrectionStatus::Uncomputed);
        assert_eq!(result.calibrated, 20.0);
        assert_eq!(result.correction, 0.0);
        assert_eq!(model.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_regime() {
        // ---
        let c = StratifiedCalibrator::new(10.0).with_model(Regime::Moderate, Fixed::new(0.0));
        assert_eq!(
            c.calibrate(40.0, &complete(), Regime::Hot).unwrap_err(),
            CalibrationError::UnknownRegime(Regime::Hot)
        );
    }

    #[test]
    fn test_unusable_predictions_are_rejected() {
        // ---
        let c = calibrator(f64::NAN, 25.0, 0.0);
        let v = complete();

        let nan = c.calibrate(5.0, &v, Regime::Cold).unwrap();
        assert!(matches!(nan.status, CorrectionStatus::Rejected(_)));
        assert_eq!(nan.calibrated, 5.0);

        let huge = c.calibrate(20.0, &v, Regime::Moderate).unwrap();
        assert!(matches!(huge.status, CorrectionStatus::Rejected(_)));
        assert_eq!(huge.calibrated, 20.0);
    }

    #[test]
    fn test_from_dir_requires_every_regime() {
        // ---
        let dir = std::env::temp_dir().join(format!("calibration-models-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let linear = r#"{ "kind": "linear", "intercept": 0.3, "coefficients": {} }"#;
        std::fs::write(dir.join("cold.json"), linear).unwrap();
        std::fs::write(dir.join("moderate.json"), linear).unwrap();

        let err = StratifiedCalibrator::from_dir(&dir, 10.0).unwrap_err();
        assert!(err.to_string().contains("hot"));

        std::fs::write(dir.join("hot.json"), linear).unwrap();
        let c = StratifiedCalibrator::from_dir(&dir, 10.0).unwrap();
        let r = c.calibrate(31.0, &complete(), Regime::Hot).unwrap();
        assert!((r.calibrated - 30.7).abs() < 1e-12);

        std::fs::remove_dir_all(&dir).ok();
    }
}
