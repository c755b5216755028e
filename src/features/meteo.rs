//! Derived meteorology.
//!
//! These formulas are a compatibility contract with the fitted models:
//!
//! - Dewpoint: Magnus form, `α = ln(RH/100) + a·T/(b+T)`, `Td = b·α/(a−α)`,
//!   with Alduchov–Eskridge parameters (a = 17.625, b = 243.04 °C) for
//!   T ≥ 0 °C and Buck parameters (a = 22.452, b = 272.55 °C) below zero.
//! - Vapour pressure deficit: FAO-56 saturation pressure
//!   `es = 0.6108·exp(17.27·T/(T+237.3))` kPa, `VPD = es·(1 − RH/100)`.

const MAGNUS_WARM: (f64, f64) = (17.625, 243.04);
const MAGNUS_COLD: (f64, f64) = (22.452, 272.55);

/// Dewpoint in °C. Non-finite for RH = 0.
pub fn dewpoint(temperature_c: f64, relative_humidity: f64) -> f64 {
    // ---
    let (a, b) = if temperature_c < 0.0 {
        MAGNUS_COLD
    } else {
        MAGNUS_WARM
    };
    let alpha = (relative_humidity / 100.0).ln() + a * temperature_c / (b + temperature_c);
    b * alpha / (a - alpha)
}

/// Saturation vapour pressure in kPa (FAO-56).
pub fn saturation_vapor_pressure(temperature_c: f64) -> f64 {
    0.6108 * (17.27 * temperature_c / (temperature_c + 237.3)).exp()
}

/// Vapour pressure deficit in kPa.
pub fn vapor_pressure_deficit(temperature_c: f64, relative_humidity: f64) -> f64 {
    saturation_vapor_pressure(temperature_c) * (1.0 - relative_humidity / 100.0)
}

pub fn wind_speed(u: f64, v: f64) -> f64 {
    u.hypot(v)
}

/// Mathematical wind angle `atan2(v, u)` in degrees on [0, 360).
pub fn wind_direction(u: f64, v: f64) -> f64 {
    let deg = v.atan2(u).to_degrees().rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if deg >= 360.0 {
        0.0
    } else {
        deg
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_dewpoint_saturated_equals_temperature() {
        // ---
        assert!(close(dewpoint(20.0, 100.0), 20.0, 1e-9));
        assert!(close(dewpoint(-5.0, 100.0), -5.0, 1e-9));
    }

    #[test]
    fn test_dewpoint_reference_value() {
        // ---
        // 25 °C at 60 % RH has a dewpoint near 16.7 °C
        let td = dewpoint(25.0, 60.0);
        assert!(close(td, 16.7, 0.1), "got {td}");
        assert!(!dewpoint(25.0, 0.0).is_finite());
    }

    #[test]
    fn test_vpd() {
        // ---
        assert!(close(saturation_vapor_pressure(20.0), 2.338, 0.001));
        assert!(close(vapor_pressure_deficit(20.0, 100.0), 0.0, 1e-12));
        assert!(close(vapor_pressure_deficit(20.0, 50.0), 1.169, 0.001));
    }

    #[test]
    fn test_wind_components() {
        // ---
        assert!(close(wind_speed(3.0, 4.0), 5.0, 1e-12));
        assert!(close(wind_direction(1.0, 0.0), 0.0, 1e-12));
        assert!(close(wind_direction(0.0, 1.0), 90.0, 1e-12));
        assert!(close(wind_direction(0.0, -1.0), 270.0, 1e-12));
        assert!(close(wind_direction(-1.0, 0.0), 180.0, 1e-12));
    }
}
