//! Thermal regime classification.

use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};
use crate::models::Regime;

// ---

/// Regime boundaries in °C. Tied to the fitted models, so injected rather
/// than hardcoded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegimeThresholds {
    #[serde(alias = "p25")]
    pub low: f64,
    #[serde(alias = "p75")]
    pub high: f64,
}

impl RegimeThresholds {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        // ---
        if !low.is_finite() || !high.is_finite() || low > high {
            return Err(CalibrationError::InvalidThresholds { low, high });
        }
        Ok(Self { low, high })
    }
}

/// Maps a temperature to exactly one regime.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegimeClassifier {
    thresholds: RegimeThresholds,
}

impl RegimeClassifier {
    pub fn new(thresholds: RegimeThresholds) -> Self {
        Self { thresholds }
    }

    pub fn classify(&self, temperature: f64) -> Regime {
        classify(temperature, self.thresholds)
    }
}

/// `Cold` below `low`, `Hot` above `high`, `Moderate` otherwise, boundaries
/// included.
pub fn classify(temperature: f64, thresholds: RegimeThresholds) -> Regime {
    // ---
    if temperature < thresholds.low {
        Regime::Cold
    } else if temperature > thresholds.high {
        Regime::Hot
    } else {
        Regime::Moderate
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn thresholds() -> RegimeThresholds {
        RegimeThresholds::new(10.0, 30.0).unwrap()
    }

    #[test]
    fn test_regimes() {
        // ---
        let c = RegimeClassifier::new(thresholds());
        assert_eq!(c.classify(-4.0), Regime::Cold);
        assert_eq!(c.classify(9.99), Regime::Cold);
        assert_eq!(c.classify(20.0), Regime::Moderate);
        assert_eq!(c.classify(30.01), Regime::Hot);
    }

    #[test]
    fn test_boundaries_belong_to_moderate() {
        // ---
        assert_eq!(classify(10.0, thresholds()), Regime::Moderate);
        assert_eq!(classify(30.0, thresholds()), Regime::Moderate);
    }

    #[test]
    fn test_threshold_validation() {
        // ---
        assert_eq!(
            RegimeThresholds::new(30.0, 10.0),
            Err(CalibrationError::InvalidThresholds { low: 30.0, high: 10.0 })
        );
        assert!(RegimeThresholds::new(f64::NAN, 10.0).is_err());
        assert!(RegimeThresholds::new(15.0, 15.0).is_ok());
    }
}
