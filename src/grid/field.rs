//! One month of hourly reanalysis fields and point interpolation over it.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, Result};
use crate::models::{MeteorologicalSample, MonthKey};

// ---

/// Short reanalysis names, in [`MeteorologicalSample`] field order.
pub const VARIABLES: [&str; 6] = ["sshf", "ssrd", "strd", "tp", "u10", "v10"];

/// Spatial interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
    Nearest,
    Bilinear,
}

impl std::str::FromStr for Interpolation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" => Ok(Interpolation::Nearest),
            "bilinear" => Ok(Interpolation::Bilinear),
            other => Err(format!("unknown interpolation '{other}'")),
        }
    }
}

/// On-disk layout of a `YYYY-MM.json` file.
///
/// Each variable is flattened `[hour][lat][lon]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldFile {
    // ---
    pub start: DateTime<Utc>,
    pub hours: usize,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub variables: HashMap<String, Vec<f32>>,
}

/// A sorted coordinate axis, ascending or descending.
#[derive(Debug, Clone)]
struct Axis {
    values: Vec<f64>,
    ascending: bool,
}

/// Bracketing pair of indices and the weight of the upper one.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Bracket {
    lo: usize,
    hi: usize,
    frac: f64,
}

impl Bracket {
    fn nearest(&self) -> usize {
        if self.frac < 0.5 {
            self.lo
        } else {
            self.hi
        }
    }
}

impl Axis {
    fn new(values: Vec<f64>, name: &str, key: MonthKey) -> Result<Self> {
        // ---
        if values.is_empty() {
            return Err(CalibrationError::grid(key, format!("empty {name} axis")));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::grid(key, format!("non-finite {name} coordinate")));
        }
        let ascending = values.len() < 2 || values[1] > values[0];
        let sorted = values
            .windows(2)
            .all(|w| if ascending { w[1] > w[0] } else { w[1] < w[0] });
        if !sorted {
            return Err(CalibrationError::grid(key, format!("{name} axis is not strictly monotonic")));
        }
        Ok(Self { values, ascending })
    }

    fn len(&self) -> usize {
        self.values.len()
    }

    fn min(&self) -> f64 {
        if self.ascending {
            self.values[0]
        } else {
            self.values[self.len() - 1]
        }
    }

    fn max(&self) -> f64 {
        if self.ascending {
            self.values[self.len() - 1]
        } else {
            self.values[0]
        }
    }

    /// Locate `x` between two nodes; `None` outside the axis span.
    fn locate(&self, x: f64) -> Option<Bracket> {
        // ---
        if x < self.min() || x > self.max() {
            return None;
        }
        if self.len() == 1 {
            return Some(Bracket { lo: 0, hi: 0, frac: 0.0 });
        }
        // First index whose value is past `x` in axis order.
        let upper = if self.ascending {
            self.values.partition_point(|&v| v <= x)
        } else {
            self.values.partition_point(|&v| v >= x)
        };
        let hi = upper.clamp(1, self.len() - 1);
        let lo = hi - 1;
        let frac = (x - self.values[lo]) / (self.values[hi] - self.values[lo]);
        Some(Bracket { lo, hi, frac: frac.clamp(0.0, 1.0) })
    }
}

/// Longitude axis with convention detection and seam wrapping.
#[derive(Debug, Clone)]
struct LonAxis {
    axis: Axis,
    zero_to_360: bool,
    global: bool,
}

impl LonAxis {
    fn new(values: Vec<f64>, key: MonthKey) -> Result<Self> {
        // ---
        let axis = Axis::new(values, "longitude", key)?;
        if !axis.ascending && axis.len() > 1 {
            return Err(CalibrationError::grid(key, "longitude axis must be ascending"));
        }
        let zero_to_360 = axis.max() > 180.0;
        let step = if axis.len() > 1 {
            axis.values[1] - axis.values[0]
        } else {
            0.0
        };
        let global = axis.len() > 1 && axis.max() - axis.min() + step >= 360.0 - 1e-6;
        Ok(Self { axis, zero_to_360, global })
    }

    fn normalize(&self, lon: f64) -> f64 {
        if self.zero_to_360 {
            lon.rem_euclid(360.0)
        } else {
            (lon + 180.0).rem_euclid(360.0) - 180.0
        }
    }

    fn locate(&self, lon: f64) -> Option<Bracket> {
        // ---
        let lon = self.normalize(lon);
        if let Some(b) = self.axis.locate(lon) {
            return Some(b);
        }
        if !self.global {
            return None;
        }
        // Between the last node and the first node one revolution later.
        let last = self.axis.len() - 1;
        let first_wrapped = self.axis.values[0] + 360.0;
        let x = if lon < self.axis.values[0] { lon + 360.0 } else { lon };
        let span = first_wrapped - self.axis.values[last];
        Some(Bracket {
            lo: last,
            hi: 0,
            frac: ((x - self.axis.values[last]) / span).clamp(0.0, 1.0),
        })
    }
}

/// A loaded, validated month of gridded fields. Read-only after load.
#[derive(Debug, Clone)]
pub struct GriddedField {
    // ---
    key: MonthKey,
    start: DateTime<Utc>,
    hours: usize,
    lat: Axis,
    lon: LonAxis,
    /// One flattened `[hour][lat][lon]` buffer per entry of [`VARIABLES`].
    data: Vec<Vec<f32>>,
}

impl GriddedField {
    /// Validate a decoded file into a field for `key`.
    pub fn from_file(key: MonthKey, file: FieldFile) -> Result<Self> {
        // ---
        if file.hours == 0 {
            return Err(CalibrationError::grid(key, "file has no hourly steps"));
        }
        let lat = Axis::new(file.latitudes, "latitude", key)?;
        let lon = LonAxis::new(file.longitudes, key)?;
        let expected = file.hours * lat.len() * lon.axis.len();

        let mut variables = file.variables;
        let mut data = Vec::with_capacity(VARIABLES.len());
        for name in VARIABLES {
            let values = variables
                .remove(name)
                .ok_or_else(|| CalibrationError::grid(key, format!("missing variable '{name}'")))?;
            if values.len() != expected {
                return Err(CalibrationError::grid(
                    key,
                    format!("variable '{name}' has {} values, expected {expected}", values.len()),
                ));
            }
            data.push(values);
        }

        Ok(Self {
            key,
            start: file.start,
            hours: file.hours,
            lat,
            lon,
            data,
        })
    }

    pub fn key(&self) -> MonthKey {
        self.key
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Timestamp of the final hourly step.
    pub fn last_step(&self) -> DateTime<Utc> {
        self.start + Duration::hours(self.hours as i64 - 1)
    }

    fn value(&self, var: usize, hour: usize, i: usize, j: usize) -> f64 {
        let idx = (hour * self.lat.len() + i) * self.lon.axis.len() + j;
        self.data[var][idx] as f64
    }

    fn temporal_bracket(&self, timestamp: DateTime<Utc>) -> Result<Bracket> {
        // ---
        let offset = (timestamp - self.start).num_milliseconds() as f64 / 3_600_000.0;
        let last = (self.hours - 1) as f64;
        if offset < 0.0 || offset > last + 1.0 {
            return Err(CalibrationError::grid(
                self.key,
                format!("timestamp {timestamp} not covered by {} hourly steps", self.hours),
            ));
        }
        if offset >= last {
            let hi = self.hours - 1;
            return Ok(Bracket { lo: hi, hi, frac: 0.0 });
        }
        let lo = offset.floor() as usize;
        Ok(Bracket {
            lo,
            hi: lo + 1,
            frac: offset - lo as f64,
        })
    }

    fn spatial(&self, var: usize, hour: usize, lat: Bracket, lon: Bracket, method: Interpolation) -> f64 {
        // ---
        match method {
            Interpolation::Nearest => self.value(var, hour, lat.nearest(), lon.nearest()),
            Interpolation::Bilinear => {
                let v00 = self.value(var, hour, lat.lo, lon.lo);
                let v01 = self.value(var, hour, lat.lo, lon.hi);
                let v10 = self.value(var, hour, lat.hi, lon.lo);
                let v11 = self.value(var, hour, lat.hi, lon.hi);
                let top = v00 + (v01 - v00) * lon.frac;
                let bottom = v10 + (v11 - v10) * lon.frac;
                top + (bottom - top) * lat.frac
            }
        }
    }

    /// Interpolate all variables at a point in space and time.
    pub fn sample(
        &self,
        latitude: f64,
        longitude: f64,
        timestamp: DateTime<Utc>,
        method: Interpolation,
    ) -> Result<MeteorologicalSample> {
        // ---
        let out_of_domain = || CalibrationError::OutOfDomain { latitude, longitude };
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(out_of_domain());
        }
        let lat = self.lat.locate(latitude).ok_or_else(out_of_domain)?;
        let lon = self.lon.locate(longitude).ok_or_else(out_of_domain)?;
        let time = self.temporal_bracket(timestamp)?;

        let mut values = [0.0; VARIABLES.len()];
        for (var, slot) in values.iter_mut().enumerate() {
            let a = self.spatial(var, time.lo, lat, lon, method);
            *slot = if time.frac == 0.0 {
                a
            } else {
                let b = self.spatial(var, time.hi, lat, lon, method);
                a + (b - a) * time.frac
            };
        }

        Ok(MeteorologicalSample {
            sensible_heat_flux: values[0],
            solar_radiation_down: values[1],
            thermal_radiation_down: values[2],
            precipitation: values[3],
            wind_u: values[4],
            wind_v: values[5],
        })
    }

    /// Last instant this field can answer for.
    pub fn end(&self) -> DateTime<Utc> {
        self.start + Duration::hours(self.hours as i64)
    }
}
