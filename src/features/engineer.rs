//! Per-reading feature computation over a sensor's own history.

use std::f64::consts::PI;

use chrono::{Datelike, Duration, Timelike};

use super::meteo;
use super::vector::{Feature, FeatureVector};
use super::window::{radiation_sum, LookBack, WindowStats};
use crate::calibration::RegimeThresholds;
use crate::models::{EnrichedReading, SensorContext};

// ---

/// Settings shared by every sensor in a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureSettings {
    /// Regime boundaries used for the `is_hot` / `is_cold` indicators.
    pub regime: RegimeThresholds,
    /// How far a past reading may sit from an exact hourly lag.
    pub lag_tolerance: Duration,
    /// Sensor age used when the deployment date is unknown.
    pub default_sensor_age_days: f64,
}

const TEMPERATURE_LAGS: [(i64, Feature); 6] = [
    (1, Feature::TemperatureLag1h),
    (2, Feature::TemperatureLag2h),
    (3, Feature::TemperatureLag3h),
    (4, Feature::TemperatureLag4h),
    (5, Feature::TemperatureLag5h),
    (6, Feature::TemperatureLag6h),
];

const HUMIDITY_LAGS: [(i64, Feature); 3] = [
    (1, Feature::HumidityLag1h),
    (2, Feature::HumidityLag2h),
    (3, Feature::HumidityLag3h),
];

const RADIATION_LAGS: [(i64, Feature); 2] = [
    (1, Feature::SolarRadiationLag1h),
    (2, Feature::SolarRadiationLag2h),
];

/// (window hours, mean, std, range, trend)
const ROLLING: [(i64, Feature, Feature, Feature, Feature); 3] = [
    (
        3,
        Feature::TemperatureMean3h,
        Feature::TemperatureStd3h,
        Feature::TemperatureRange3h,
        Feature::TemperatureTrend3h,
    ),
    (
        6,
        Feature::TemperatureMean6h,
        Feature::TemperatureStd6h,
        Feature::TemperatureRange6h,
        Feature::TemperatureTrend6h,
    ),
    (
        12,
        Feature::TemperatureMean12h,
        Feature::TemperatureStd12h,
        Feature::TemperatureRange12h,
        Feature::TemperatureTrend12h,
    ),
];

/// Computes feature vectors for one sensor.
#[derive(Debug, Clone)]
pub struct FeatureEngineer {
    settings: FeatureSettings,
    context: SensorContext,
}

impl FeatureEngineer {
    pub fn new(settings: FeatureSettings, context: SensorContext) -> Self {
        Self { settings, context }
    }

    /// Featurize `history[target_index]`.
    ///
    /// `history` is one sensor's readings sorted by timestamp; only entries up
    /// to `target_index` are consulted.
    pub fn compute(&self, history: &[EnrichedReading], target_index: usize) -> FeatureVector {
        // ---
        let lb = LookBack::new(history, target_index, self.settings.lag_tolerance);
        let mut v = FeatureVector::default();

        let age = self.instantaneous(&lb, &mut v);
        self.calendar(&lb, &mut v);
        self.meteorology(&lb, &mut v);
        self.interactions(&lb, age, &mut v);
        self.lags(&lb, &mut v);
        self.rolling(&lb, &mut v);
        self.changes(&lb, &mut v);
        self.radiation(&lb, &mut v);
        self.persistence(&lb, &mut v);
        self.indicators(&lb, &mut v);

        v
    }

    fn instantaneous(&self, lb: &LookBack<'_>, v: &mut FeatureVector) -> f64 {
        // ---
        let r = &lb.current().reading;
        let age = match self.context.deployed_at {
            Some(deployed) => {
                ((r.timestamp - deployed).num_seconds() as f64 / 86_400.0).max(0.0)
            }
            None => self.settings.default_sensor_age_days,
        };

        v.set(Feature::Temperature, r.raw_temperature);
        v.set(Feature::Humidity, r.relative_humidity);
        v.set(Feature::SensorAgeDays, age);
        v.set(Feature::Latitude, r.latitude);
        v.set(Feature::Longitude, r.longitude);
        v.set(Feature::Elevation, r.elevation.unwrap_or(0.0));
        v.set(Feature::CanopyFraction, r.tree_canopy_fraction.unwrap_or(0.0));
        v.set(Feature::HourOfDay, r.timestamp.hour() as f64);
        age
    }

    fn calendar(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        let t = lb.time();
        let hour_angle = 2.0 * PI * t.hour() as f64 / 24.0;
        let month_angle = 2.0 * PI * (t.month() - 1) as f64 / 12.0;

        v.set(Feature::DayOfMonth, t.day() as f64);
        v.set(Feature::Month, t.month() as f64);
        v.set(Feature::HourSin, hour_angle.sin());
        v.set(Feature::HourCos, hour_angle.cos());
        v.set(Feature::MonthSin, month_angle.sin());
        v.set(Feature::MonthCos, month_angle.cos());
    }

    fn meteorology(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        let e = lb.current();
        let r = &e.reading;
        let t = r.raw_temperature;
        let rh = r.relative_humidity;

        let td = meteo::dewpoint(t, rh);
        v.set(Feature::Dewpoint, td);
        v.set(Feature::DewpointDepression, t - td);
        v.set(Feature::VaporPressureDeficit, meteo::vapor_pressure_deficit(t, rh));

        let month = r.timestamp.month();
        let polar = r.latitude.abs() > 60.0
            && ((r.latitude > 0.0 && (6..=8).contains(&month))
                || (r.latitude < 0.0 && matches!(month, 12 | 1 | 2)));
        v.set(Feature::PolarDayNight, if polar { 1.0 } else { 0.0 });

        // Reanalysis-backed slots stay missing when the grid lookup failed.
        if let Some(m) = e.meteo {
            v.set(Feature::SensibleHeatFlux, m.sensible_heat_flux);
            v.set(Feature::SolarRadiationDown, m.solar_radiation_down);
            v.set(Feature::ThermalRadiationDown, m.thermal_radiation_down);
            v.set(Feature::Precipitation, m.precipitation);
            v.set(Feature::WindU, m.wind_u);
            v.set(Feature::WindV, m.wind_v);
            v.set(Feature::WindSpeed, meteo::wind_speed(m.wind_u, m.wind_v));
            v.set(Feature::WindDirection, meteo::wind_direction(m.wind_u, m.wind_v));

            let hour_angle = 2.0 * PI * r.timestamp.hour() as f64 / 24.0;
            v.set(Feature::DiurnalRadiation, m.solar_radiation_down * hour_angle.sin().abs());
        }
    }

    fn interactions(&self, lb: &LookBack<'_>, age: f64, v: &mut FeatureVector) {
        // ---
        let r = &lb.current().reading;
        let t = r.raw_temperature;
        let rh = r.relative_humidity;

        v.set(Feature::TemperatureSquared, t * t);
        v.set(Feature::HumiditySquared, rh * rh);
        v.set(Feature::TemperatureXHumidity, t * rh);
        v.set(Feature::TemperatureXAge, t * age);
    }

    fn lags(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        for (hours, feature) in TEMPERATURE_LAGS {
            v.set_opt(feature, lb.hours_ago(hours).map(|e| e.reading.raw_temperature));
        }
        for (hours, feature) in HUMIDITY_LAGS {
            v.set_opt(feature, lb.hours_ago(hours).map(|e| e.reading.relative_humidity));
        }
        for (hours, feature) in RADIATION_LAGS {
            let ssrd = lb
                .hours_ago(hours)
                .and_then(|e| e.meteo)
                .map(|m| m.solar_radiation_down);
            v.set_opt(feature, ssrd);
        }
    }

    fn rolling(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        for (hours, mean, std, range, trend) in ROLLING {
            let stats = WindowStats::of(lb.window(hours));
            v.set_opt(mean, stats.mean);
            v.set_opt(std, stats.std);
            v.set_opt(range, stats.range);
            v.set_opt(trend, stats.trend);
        }
    }

    fn changes(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        let t = lb.current().reading.raw_temperature;
        let lag = |h| lb.hours_ago(h).map(|e| e.reading.raw_temperature);
        let (t1, t2, t3) = (lag(1), lag(2), lag(3));

        v.set_opt(Feature::TemperatureChange1h, t1.map(|p| t - p));
        v.set_opt(Feature::TemperatureChange2h, t2.map(|p| t - p));
        v.set_opt(Feature::TemperatureChange3h, t3.map(|p| t - p));
        let accel = match (t1, t2) {
            (Some(t1), Some(t2)) => Some((t - t1) - (t1 - t2)),
            _ => None,
        };
        v.set_opt(Feature::TemperatureAcceleration, accel);
    }

    fn radiation(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        v.set_opt(Feature::SolarRadiationSum3h, radiation_sum(lb.window(3)));
        v.set_opt(Feature::SolarRadiationSum6h, radiation_sum(lb.window(6)));

        let now = lb.current().meteo.map(|m| m.solar_radiation_down);
        let before = lb
            .hours_ago(1)
            .and_then(|e| e.meteo)
            .map(|m| m.solar_radiation_down);
        let change = match (now, before) {
            (Some(now), Some(before)) => Some(now - before),
            _ => None,
        };
        v.set_opt(Feature::SolarRadiationChange1h, change);
    }

    fn persistence(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        let p = self.context.persistence;
        v.set(Feature::HotStreakHours, streak(lb, |t| t > p.p75) as f64);
        v.set(Feature::ColdStreakHours, streak(lb, |t| t < p.p25) as f64);
    }

    fn indicators(&self, lb: &LookBack<'_>, v: &mut FeatureVector) {
        // ---
        let t = lb.current().reading.raw_temperature;
        let regime = self.settings.regime;
        v.set(Feature::IsHot, if t > regime.high { 1.0 } else { 0.0 });
        v.set(Feature::IsCold, if t < regime.low { 1.0 } else { 0.0 });
    }
}

/// Consecutive hourly readings, ending at the anchor, that satisfy `holds`.
/// A missing hour ends the streak.
fn streak(lb: &LookBack<'_>, holds: impl Fn(f64) -> bool) -> u32 {
    // ---
    let mut count = 0;
    let mut cursor = *lb;
    loop {
        if !holds(cursor.current().reading.raw_temperature) {
            return count;
        }
        count += 1;
        match cursor.index_hours_ago(1) {
            Some(prev) => cursor = cursor.at(prev),
            None => return count,
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::features::window::tests::enriched;
    use crate::models::PersistenceThresholds;
    use chrono::{TimeZone, Utc};

    fn engineer() -> FeatureEngineer {
        // ---
        FeatureEngineer::new(
            FeatureSettings {
                regime: RegimeThresholds::new(10.0, 30.0).unwrap(),
                lag_tolerance: Duration::minutes(5),
                default_sensor_age_days: 365.0,
            },
            SensorContext {
                persistence: PersistenceThresholds { p25: 12.0, p75: 20.0 },
                deployed_at: None,
            },
        )
    }

    fn ramp(n: usize) -> Vec<EnrichedReading> {
        (0..n)
            .map(|i| enriched(i as i64 * 60, 15.0 + i as f64, Some(10.0 * i as f64)))
            .collect()
    }

    #[test]
    fn test_first_six_hours_are_incomplete() {
        // ---
        let history = ramp(10);
        let fe = engineer();
        for i in 0..6 {
            let v = fe.compute(&history, i);
            assert!(!v.is_complete(), "reading {i} should lack history");
        }
        for i in 6..10 {
            let v = fe.compute(&history, i);
            assert!(v.is_complete(), "reading {i} missing {:?}", v.missing());
        }
    }

    #[test]
    fn test_less_than_six_hours_of_history_is_incomplete() {
        // ---
        // Readings drift five minutes early, so the oldest lies inside the
        // lag tolerance of `t - 6h` while only 5h55m precede the target.
        let mut history = vec![enriched(0, 15.0, Some(0.0))];
        history.extend((1..=6).map(|h| enriched(h * 60 - 5, 15.0 + h as f64, Some(0.0))));
        let fe = engineer();

        let v = fe.compute(&history, 6);
        assert!(!v.is_complete());
        assert_eq!(v.missing(), vec!["temperature_lag_6h"]);

        history.push(enriched(7 * 60 - 5, 22.0, Some(0.0)));
        let v = fe.compute(&history, 7);
        assert!(v.is_complete(), "missing {:?}", v.missing());
        assert_eq!(v.get(Feature::TemperatureLag6h), Some(16.0));
    }

    #[test]
    fn test_lags_and_changes() {
        // ---
        let history = ramp(8);
        let v = engineer().compute(&history, 7);

        assert_eq!(v.get(Feature::Temperature), Some(22.0));
        assert_eq!(v.get(Feature::TemperatureLag1h), Some(21.0));
        assert_eq!(v.get(Feature::TemperatureLag6h), Some(16.0));
        assert_eq!(v.get(Feature::HumidityLag3h), Some(50.0));
        assert_eq!(v.get(Feature::SolarRadiationLag2h), Some(50.0));
        assert_eq!(v.get(Feature::TemperatureChange3h), Some(3.0));
        assert_eq!(v.get(Feature::TemperatureAcceleration), Some(0.0));
    }

    #[test]
    fn test_rolling_and_radiation() {
        // ---
        let history = ramp(8);
        let v = engineer().compute(&history, 7);

        assert_eq!(v.get(Feature::TemperatureMean3h), Some(21.0));
        assert_eq!(v.get(Feature::TemperatureRange6h), Some(5.0));
        assert_eq!(v.get(Feature::TemperatureMean12h), Some(18.5));
        assert!((v.get(Feature::TemperatureTrend12h).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(v.get(Feature::SolarRadiationSum3h), Some(50.0 + 60.0 + 70.0));
        assert_eq!(v.get(Feature::SolarRadiationChange1h), Some(10.0));
    }

    #[test]
    fn test_gap_in_series_marks_lag_missing() {
        // ---
        let mut history = ramp(10);
        history.remove(6); // drop hour 6
        let v = engineer().compute(&history, 8); // hour 9
        assert_eq!(v.get(Feature::TemperatureLag3h), None);
        assert_eq!(v.get(Feature::TemperatureLag2h), Some(22.0));
        assert!(!v.is_complete());
    }

    #[test]
    fn test_missing_reanalysis_only_blanks_dependent_slots() {
        // ---
        let mut history = ramp(8);
        history[7].meteo = None;
        let v = engineer().compute(&history, 7);

        assert_eq!(v.get(Feature::SolarRadiationDown), None);
        assert_eq!(v.get(Feature::WindSpeed), None);
        assert_eq!(v.get(Feature::SolarRadiationChange1h), None);
        assert_eq!(v.get(Feature::SolarRadiationSum3h), Some(50.0 + 60.0));
        assert_eq!(v.get(Feature::TemperatureLag1h), Some(21.0));
    }

    #[test]
    fn test_thermal_persistence_streaks() {
        // ---
        let temps = [22.0, 23.0, 10.0, 21.0, 22.0, 25.0];
        let history: Vec<_> = temps
            .iter()
            .enumerate()
            .map(|(i, t)| enriched(i as i64 * 60, *t, Some(0.0)))
            .collect();
        let fe = engineer();

        assert_eq!(fe.compute(&history, 5).get(Feature::HotStreakHours), Some(3.0));
        assert_eq!(fe.compute(&history, 1).get(Feature::HotStreakHours), Some(2.0));
        assert_eq!(fe.compute(&history, 2).get(Feature::HotStreakHours), Some(0.0));
        assert_eq!(fe.compute(&history, 2).get(Feature::ColdStreakHours), Some(1.0));
    }

    #[test]
    fn test_sensor_age_and_indicators() {
        // ---
        let history = ramp(1);
        let mut fe = engineer();
        fe.context.deployed_at = Some(Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap());
        let v = fe.compute(&history, 0);

        assert_eq!(v.get(Feature::SensorAgeDays), Some(10.0));
        assert_eq!(v.get(Feature::TemperatureXAge), Some(150.0));
        assert_eq!(v.get(Feature::IsHot), Some(0.0));
        assert_eq!(v.get(Feature::IsCold), Some(0.0));
        assert_eq!(v.get(Feature::HourOfDay), Some(0.0));
        assert_eq!(v.get(Feature::DayOfMonth), Some(15.0));
    }

    #[test]
    fn test_deterministic() {
        // ---
        let history = ramp(12);
        let fe = engineer();
        assert_eq!(fe.compute(&history, 11), fe.compute(&history, 11));
    }
}
