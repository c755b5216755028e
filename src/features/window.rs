//! Index-based look-back over one sensor's timestamp-sorted history.

use chrono::{DateTime, Duration, Utc};

use crate::models::EnrichedReading;

// ---

/// View of `history[..=target]` anchored at the target reading.
#[derive(Debug, Clone, Copy)]
pub struct LookBack<'a> {
    history: &'a [EnrichedReading],
    target: usize,
    tolerance: Duration,
}

impl<'a> LookBack<'a> {
    /// `history` must be sorted by timestamp and `target` in bounds.
    pub fn new(history: &'a [EnrichedReading], target: usize, tolerance: Duration) -> Self {
        debug_assert!(target < history.len());
        Self {
            history: &history[..=target],
            target,
            tolerance,
        }
    }

    pub fn current(&self) -> &'a EnrichedReading {
        &self.history[self.target]
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.current().reading.timestamp
    }

    /// Re-anchor at an earlier reading of the same history.
    pub fn at(&self, index: usize) -> LookBack<'a> {
        LookBack::new(self.history, index, self.tolerance)
    }

    /// Index of the reading closest to `hours` before the anchor, within tolerance.
    pub fn index_hours_ago(&self, hours: i64) -> Option<usize> {
        // ---
        let wanted = self.time() - Duration::hours(hours);
        let lo = wanted - self.tolerance;
        let hi = wanted + self.tolerance;
        let start = self.history.partition_point(|e| e.reading.timestamp < lo);

        self.history[start..self.target]
            .iter()
            .enumerate()
            .take_while(|(_, e)| e.reading.timestamp <= hi)
            .min_by_key(|(_, e)| (e.reading.timestamp - wanted).num_milliseconds().abs())
            .map(|(offset, _)| start + offset)
    }

    /// Lagged reading `hours` back, only when the history spans at least
    /// that long before the anchor.
    pub fn hours_ago(&self, hours: i64) -> Option<&'a EnrichedReading> {
        // ---
        if self.span() < Duration::hours(hours) {
            return None;
        }
        self.index_hours_ago(hours).map(|i| &self.history[i])
    }

    /// Time from the earliest reading to the anchor.
    pub fn span(&self) -> Duration {
        self.time() - self.history[0].reading.timestamp
    }

    /// Readings in the trailing window `(t − hours, t]`, anchor included.
    pub fn window(&self, hours: i64) -> &'a [EnrichedReading] {
        // ---
        let from = self.time() - Duration::hours(hours);
        let start = self.history.partition_point(|e| e.reading.timestamp <= from);
        &self.history[start..=self.target]
    }
}

/// Summary statistics of temperature over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub range: Option<f64>,
    pub trend: Option<f64>,
}

impl WindowStats {
    /// Present-only statistics; standard deviation and trend need two readings.
    ///
    /// `std` is the sample (n − 1) standard deviation; `trend` is the
    /// least-squares slope against elapsed hours.
    pub fn of(window: &[EnrichedReading]) -> Self {
        // ---
        let n = window.len();
        if n == 0 {
            return Self { mean: None, std: None, range: None, trend: None };
        }
        let temps = window.iter().map(|e| e.reading.raw_temperature);
        let mean = temps.clone().sum::<f64>() / n as f64;
        let (min, max) = temps
            .clone()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| (lo.min(t), hi.max(t)));

        if n < 2 {
            return Self { mean: Some(mean), std: None, range: Some(max - min), trend: None };
        }

        let var = temps.map(|t| (t - mean).powi(2)).sum::<f64>() / (n - 1) as f64;

        let origin = window[0].reading.timestamp;
        let xs: Vec<f64> = window
            .iter()
            .map(|e| (e.reading.timestamp - origin).num_milliseconds() as f64 / 3_600_000.0)
            .collect();
        let x_mean = xs.iter().sum::<f64>() / n as f64;
        let (sxy, sxx) = xs.iter().zip(window).fold((0.0, 0.0), |(sxy, sxx), (x, e)| {
            let dx = x - x_mean;
            (sxy + dx * (e.reading.raw_temperature - mean), sxx + dx * dx)
        });
        let trend = (sxx > 0.0).then(|| sxy / sxx);

        Self {
            mean: Some(mean),
            std: Some(var.sqrt()),
            range: Some(max - min),
            trend,
        }
    }
}

/// Sum of solar radiation over readings that carry reanalysis values.
pub fn radiation_sum(window: &[EnrichedReading]) -> Option<f64> {
    // ---
    let mut present = window
        .iter()
        .filter_map(|e| e.meteo.map(|m| m.solar_radiation_down))
        .peekable();
    present.peek()?;
    Some(present.sum())
}

#[cfg(test)]
pub(crate) mod tests {
    // ---
    use super::*;
    use crate::models::{MeteorologicalSample, SensorReading};
    use chrono::TimeZone;

    pub(crate) fn enriched(minutes: i64, temp: f64, ssrd: Option<f64>) -> EnrichedReading {
        // ---
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        EnrichedReading {
            reading: SensorReading {
                sensor_id: "s1".into(),
                timestamp: base + Duration::minutes(minutes),
                raw_temperature: temp,
                relative_humidity: 50.0,
                latitude: 37.5,
                longitude: -122.5,
                elevation: None,
                tree_canopy_fraction: None,
            },
            meteo: ssrd.map(|r| MeteorologicalSample {
                solar_radiation_down: r,
                ..Default::default()
            }),
        }
    }

    fn hourly(temps: &[f64]) -> Vec<EnrichedReading> {
        temps
            .iter()
            .enumerate()
            .map(|(i, t)| enriched(i as i64 * 60, *t, Some(0.0)))
            .collect()
    }

    #[test]
    fn test_hours_ago_exact_and_tolerant() {
        // ---
        let mut history = hourly(&[10.0, 11.0, 12.0]);
        history.push(enriched(3 * 60 + 2, 13.0, None));
        let lb = LookBack::new(&history, 3, Duration::minutes(5));

        assert_eq!(lb.hours_ago(1).unwrap().reading.raw_temperature, 12.0);
        assert_eq!(lb.hours_ago(3).unwrap().reading.raw_temperature, 10.0);
        assert!(lb.hours_ago(4).is_none());

        let strict = LookBack::new(&history, 3, Duration::zero());
        assert!(strict.hours_ago(1).is_none());
    }

    #[test]
    fn test_lag_needs_full_prior_span() {
        // ---
        let history = vec![enriched(0, 10.0, None), enriched(55, 11.0, None)];
        let lb = LookBack::new(&history, 1, Duration::minutes(5));

        assert_eq!(lb.span(), Duration::minutes(55));
        assert_eq!(lb.index_hours_ago(1), Some(0));
        assert!(lb.hours_ago(1).is_none());
    }

    #[test]
    fn test_gap_makes_lag_missing() {
        // ---
        let history = vec![enriched(0, 10.0, None), enriched(180, 13.0, None)];
        let lb = LookBack::new(&history, 1, Duration::minutes(5));
        assert!(lb.hours_ago(1).is_none());
        assert!(lb.hours_ago(2).is_none());
        assert_eq!(lb.hours_ago(3).unwrap().reading.raw_temperature, 10.0);
    }

    #[test]
    fn test_window_is_half_open() {
        // ---
        let history = hourly(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let lb = LookBack::new(&history, 4, Duration::minutes(5));
        let w = lb.window(3);
        let temps: Vec<f64> = w.iter().map(|e| e.reading.raw_temperature).collect();
        assert_eq!(temps, vec![3.0, 4.0, 5.0]);
        assert_eq!(lb.window(12).len(), 5);
    }

    #[test]
    fn test_window_stats() {
        // ---
        let history = hourly(&[10.0, 12.0, 14.0]);
        let stats = WindowStats::of(&history);
        assert_eq!(stats.mean, Some(12.0));
        assert_eq!(stats.std, Some(2.0));
        assert_eq!(stats.range, Some(4.0));
        assert!((stats.trend.unwrap() - 2.0).abs() < 1e-12);

        let single = WindowStats::of(&history[..1]);
        assert_eq!(single.mean, Some(10.0));
        assert_eq!(single.std, None);
        assert_eq!(single.trend, None);

        let empty = WindowStats::of(&[]);
        assert_eq!(empty.mean, None);
        assert_eq!(empty.range, None);
    }

    #[test]
    fn test_radiation_sum_present_only() {
        // ---
        let history = vec![
            enriched(0, 10.0, Some(100.0)),
            enriched(60, 10.0, None),
            enriched(120, 10.0, Some(50.0)),
        ];
        assert_eq!(radiation_sum(&history), Some(150.0));
        assert_eq!(radiation_sum(&history[1..2]), None);
    }
}
