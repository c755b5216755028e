//! Data models for the calibration pipeline.
//!
//! Raw input rows arrive as loosely-typed JSON objects. `ColumnMapping` turns
//! them into validated [`SensorReading`]s; everything downstream works on the
//! typed structs in this module.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CalibrationError, Result};

// ---

/// One validated sensor observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    // ---
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw_temperature: f64,
    pub relative_humidity: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub tree_canopy_fraction: Option<f64>,
}

/// Identifies one monthly gridded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    pub fn of(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp.year(), timestamp.month())
    }

    /// File name under the grid data directory, e.g. `2024-01.json`.
    pub fn file_name(&self) -> String {
        format!("{self}.json")
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Reanalysis variables interpolated at one sensor location and time.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MeteorologicalSample {
    // ---
    pub sensible_heat_flux: f64,
    pub solar_radiation_down: f64,
    pub thermal_radiation_down: f64,
    pub precipitation: f64,
    pub wind_u: f64,
    pub wind_v: f64,
}

impl MeteorologicalSample {
    /// Linear blend towards `other`; `frac` 0 gives `self`.
    pub fn lerp(&self, other: &Self, frac: f64) -> Self {
        // ---
        let mix = |a: f64, b: f64| a + (b - a) * frac;
        Self {
            sensible_heat_flux: mix(self.sensible_heat_flux, other.sensible_heat_flux),
            solar_radiation_down: mix(self.solar_radiation_down, other.solar_radiation_down),
            thermal_radiation_down: mix(self.thermal_radiation_down, other.thermal_radiation_down),
            precipitation: mix(self.precipitation, other.precipitation),
            wind_u: mix(self.wind_u, other.wind_u),
            wind_v: mix(self.wind_v, other.wind_v),
        }
    }
}

/// A reading joined with its gridded covariates.
///
/// `meteo` is `None` when the grid lookup failed; the reading still provides
/// look-back context for its neighbours.
#[derive(Debug, Clone)]
pub struct EnrichedReading {
    pub reading: SensorReading,
    pub meteo: Option<MeteorologicalSample>,
}

/// Thermal regime, each served by its own model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    Cold,
    Moderate,
    Hot,
}

impl Regime {
    pub const ALL: [Regime; 3] = [Regime::Cold, Regime::Moderate, Regime::Hot];

    pub fn index(self) -> usize {
        match self {
            Regime::Cold => 0,
            Regime::Moderate => 1,
            Regime::Hot => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Regime::Cold => "cold",
            Regime::Moderate => "moderate",
            Regime::Hot => "hot",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Calibrated,
    IncompleteFeatures,
    GridUnavailable,
    OutOfDomain,
    ModelRejected,
    Internal,
}

/// One output row per validated input reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationResult {
    // ---
    pub sensor_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw_temperature: f64,
    pub calibrated_temperature: f64,
    pub regime: Regime,
    /// Signed `raw - calibrated`; zero for pass-through rows.
    pub correction_magnitude: f64,
    pub feature_completeness_flag: bool,
    pub status: RowStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CalibrationResult {
    /// Uncorrected row carrying the raw value through.
    pub fn pass_through(
        reading: &SensorReading,
        regime: Regime,
        complete: bool,
        status: RowStatus,
        detail: Option<String>,
    ) -> Self {
        // ---
        Self {
            sensor_id: reading.sensor_id.clone(),
            timestamp: reading.timestamp,
            raw_temperature: reading.raw_temperature,
            calibrated_temperature: reading.raw_temperature,
            regime,
            correction_magnitude: 0.0,
            feature_completeness_flag: complete,
            status,
            detail,
        }
    }
}

/// Hot/cold streak thresholds for one sensor's climate context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersistenceThresholds {
    pub p25: f64,
    pub p75: f64,
}

impl PersistenceThresholds {
    /// Köppen-zone presets used when no explicit thresholds are configured.
    pub fn for_climate_zone(zone: &str) -> Option<Self> {
        // ---
        let (p25, p75) = match zone.to_ascii_lowercase().as_str() {
            "arid" => (15.0, 30.0),
            "temperate" => (10.0, 25.0),
            "continental" => (5.0, 22.0),
            _ => return None,
        };
        Some(Self { p25, p75 })
    }
}

/// Externally supplied per-sensor parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorContext {
    pub persistence: PersistenceThresholds,
    #[serde(default)]
    pub deployed_at: Option<DateTime<Utc>>,
}

// ---

/// Explicit mapping from input column names to reading fields.
///
/// Each field lists accepted column names in priority order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    // ---
    pub sensor_id: Vec<String>,
    pub timestamp: Vec<String>,
    pub temperature: Vec<String>,
    pub humidity: Vec<String>,
    pub latitude: Vec<String>,
    pub longitude: Vec<String>,
    pub elevation: Vec<String>,
    pub tree_canopy_fraction: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

impl Default for ColumnMapping {
    fn default() -> Self {
        // ---
        Self {
            sensor_id: names(&["sensor_id", "sensor_index", "device_id"]),
            timestamp: names(&["timestamp", "time", "datetime"]),
            temperature: names(&["temperature", "temp", "sensor temperature"]),
            humidity: names(&["humidity", "relative_humidity", "rh"]),
            latitude: names(&["latitude", "lat"]),
            longitude: names(&["longitude", "lon", "lng"]),
            elevation: names(&["elevation"]),
            tree_canopy_fraction: names(&["tree_canopy_fraction", "tcc", "canopy"]),
        }
    }
}

impl ColumnMapping {
    /// Validate one raw row into a [`SensorReading`].
    ///
    /// Coordinates are only checked for being numeric; domain checks belong
    /// to the grid store so that out-of-range locations surface as
    /// `OutOfDomain` rows rather than rejections.
    pub fn parse_row(&self, row: &Map<String, Value>, default_sensor: &str) -> Result<SensorReading> {
        // ---
        let sensor_id = match lookup(row, &self.sensor_id) {
            Some((_, Value::String(s))) if !s.trim().is_empty() => s.trim().to_string(),
            Some((_, Value::Number(n))) => n.to_string(),
            Some((col, Value::Null)) | Some((col, Value::String(_))) => {
                tracing::trace!("empty {col}, using default sensor id");
                default_sensor.to_string()
            }
            Some((col, other)) => {
                return Err(CalibrationError::malformed(format!(
                    "column '{col}' is not a valid sensor id: {other}"
                )))
            }
            None => default_sensor.to_string(),
        };

        let timestamp = match lookup(row, &self.timestamp) {
            Some((col, Value::String(s))) => parse_timestamp(s)
                .ok_or_else(|| CalibrationError::malformed(format!("unparseable {col} '{s}'")))?,
            Some((col, other)) => {
                return Err(CalibrationError::malformed(format!(
                    "column '{col}' is not a timestamp: {other}"
                )))
            }
            None => return Err(missing("timestamp", &self.timestamp)),
        };

        let raw_temperature = required_number(row, "temperature", &self.temperature)?;
        let relative_humidity = required_number(row, "humidity", &self.humidity)?;
        // Dewpoint is undefined at zero humidity.
        if !(relative_humidity > 0.0 && relative_humidity <= 100.0) {
            return Err(CalibrationError::malformed(format!(
                "humidity {relative_humidity} outside (0, 100]"
            )));
        }
        let latitude = required_number(row, "latitude", &self.latitude)?;
        let longitude = required_number(row, "longitude", &self.longitude)?;
        let elevation = optional_number(row, &self.elevation)?;
        let tree_canopy_fraction = optional_number(row, &self.tree_canopy_fraction)?;

        Ok(SensorReading {
            sensor_id,
            timestamp,
            raw_temperature,
            relative_humidity,
            latitude,
            longitude,
            elevation,
            tree_canopy_fraction,
        })
    }
}

fn lookup<'a>(row: &'a Map<String, Value>, candidates: &'a [String]) -> Option<(&'a str, &'a Value)> {
    candidates
        .iter()
        .find_map(|c| row.get(c).map(|v| (c.as_str(), v)))
}

fn missing(field: &str, candidates: &[String]) -> CalibrationError {
    CalibrationError::malformed(format!(
        "missing {field} column (looked for {})",
        candidates.join(", ")
    ))
}

fn to_number(col: &str, value: &Value) -> Result<Option<f64>> {
    // ---
    let parsed = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(CalibrationError::malformed(format!(
            "column '{col}' is not numeric: {value}"
        ))),
    }
}

fn required_number(row: &Map<String, Value>, field: &str, candidates: &[String]) -> Result<f64> {
    let (col, value) = lookup(row, candidates).ok_or_else(|| missing(field, candidates))?;
    to_number(col, value)?.ok_or_else(|| CalibrationError::malformed(format!("column '{col}' is empty")))
}

fn optional_number(row: &Map<String, Value>, candidates: &[String]) -> Result<Option<f64>> {
    match lookup(row, candidates) {
        Some((col, value)) => to_number(col, value),
        None => Ok(None),
    }
}

/// Parse RFC 3339 or a naive `YYYY-MM-DD HH:MM[:SS]` timestamp taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    // ---
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::{TimeZone, Timelike};
    use serde_json::json;

    fn row(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test row must be an object"),
        }
    }

    #[test]
    fn test_parse_row_with_aliases() {
        // ---
        let mapping = ColumnMapping::default();
        let raw = row(json!({
            "time": "2024-01-15 12:00:00",
            "temp": "21.5",
            "rh": 48,
            "lat": 37.77,
            "lng": -122.42,
            "tcc": 0.3
        }));

        let reading = mapping.parse_row(&raw, "sensor-A").unwrap();

        assert_eq!(reading.sensor_id, "sensor-A");
        assert_eq!(reading.timestamp, Utc.with_ymd_and_hms(2024, 1, 15, 12, 0, 0).unwrap());
        assert_eq!(reading.raw_temperature, 21.5);
        assert_eq!(reading.relative_humidity, 48.0);
        assert_eq!(reading.tree_canopy_fraction, Some(0.3));
        assert_eq!(reading.elevation, None);
    }

    #[test]
    fn test_numeric_sensor_index_becomes_id() {
        // ---
        let raw = row(json!({
            "sensor_index": 131075,
            "timestamp": "2024-01-15T12:00:00Z",
            "temperature": 20.0, "humidity": 50.0,
            "latitude": 37.0, "longitude": -122.0
        }));
        let reading = ColumnMapping::default().parse_row(&raw, "default").unwrap();
        assert_eq!(reading.sensor_id, "131075");
    }

    #[test]
    fn test_malformed_rows_are_rejected_with_reason() {
        // ---
        let mapping = ColumnMapping::default();

        let bad_time = row(json!({
            "timestamp": "yesterday", "temperature": 20.0, "humidity": 50.0,
            "latitude": 37.0, "longitude": -122.0
        }));
        let err = mapping.parse_row(&bad_time, "s").unwrap_err();
        assert!(err.to_string().contains("unparseable timestamp"));

        let bad_lat = row(json!({
            "timestamp": "2024-01-15 12:00:00", "temperature": 20.0, "humidity": 50.0,
            "latitude": "north", "longitude": -122.0
        }));
        assert!(matches!(
            mapping.parse_row(&bad_lat, "s"),
            Err(CalibrationError::MalformedInput(_))
        ));

        let no_temp = row(json!({
            "timestamp": "2024-01-15 12:00:00", "humidity": 50.0,
            "latitude": 37.0, "longitude": -122.0
        }));
        assert!(mapping.parse_row(&no_temp, "s").unwrap_err().to_string().contains("missing temperature"));
    }

    #[test]
    fn test_out_of_range_latitude_is_not_malformed() {
        // ---
        let raw = row(json!({
            "timestamp": "2024-01-15 12:00:00", "temperature": 20.0, "humidity": 50.0,
            "latitude": 200.0, "longitude": -122.0
        }));
        let reading = ColumnMapping::default().parse_row(&raw, "s").unwrap();
        assert_eq!(reading.latitude, 200.0);
    }

    #[test]
    fn test_humidity_range_is_validated() {
        // ---
        let raw = row(json!({
            "timestamp": "2024-01-15 12:00:00", "temperature": 20.0, "humidity": 140.0,
            "latitude": 37.0, "longitude": -122.0
        }));
        assert!(ColumnMapping::default().parse_row(&raw, "s").is_err());

        let dry = row(json!({
            "timestamp": "2024-01-15 12:00:00", "temperature": 20.0, "humidity": 0,
            "latitude": 37.0, "longitude": -122.0
        }));
        let err = ColumnMapping::default().parse_row(&dry, "s").unwrap_err();
        assert!(matches!(err, CalibrationError::MalformedInput(_)));
        assert!(err.to_string().contains("outside (0, 100]"));

        let saturated = row(json!({
            "timestamp": "2024-01-15 12:00:00", "temperature": 20.0, "humidity": 100,
            "latitude": 37.0, "longitude": -122.0
        }));
        assert!(ColumnMapping::default().parse_row(&saturated, "s").is_ok());
    }

    #[test]
    fn test_timestamp_formats() {
        // ---
        let rfc = parse_timestamp("2024-03-01T05:00:00+02:00").unwrap();
        assert_eq!(rfc.hour(), 3);

        let naive = parse_timestamp("2024-03-01 05:30").unwrap();
        assert_eq!(naive.minute(), 30);

        assert!(parse_timestamp("03/01/2024").is_none());
    }

    #[test]
    fn test_month_key_file_name() {
        // ---
        let key = MonthKey::of(Utc.with_ymd_and_hms(2024, 2, 29, 23, 0, 0).unwrap());
        assert_eq!(key, MonthKey::new(2024, 2));
        assert_eq!(key.file_name(), "2024-02.json");
    }

    #[test]
    fn test_climate_zone_presets() {
        // ---
        let arid = PersistenceThresholds::for_climate_zone("Arid").unwrap();
        assert_eq!((arid.p25, arid.p75), (15.0, 30.0));
        assert!(PersistenceThresholds::for_climate_zone("tropical").is_none());
    }
}
