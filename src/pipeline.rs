//! Batch orchestration: validate, group by sensor, enrich, featurize,
//! classify, calibrate and report.
//!
//! Sensors are independent, so each sensor's full history is one tokio task.
//! Within a sensor, readings are processed strictly in timestamp order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::calibration::{CorrectionStatus, RegimeClassifier, StratifiedCalibrator};
use crate::error::CalibrationError;
use crate::features::{FeatureEngineer, FeatureSettings};
use crate::grid::{months_for, CacheStats, GriddedFieldStore, Reservation};
use crate::models::{
    CalibrationResult, ColumnMapping, EnrichedReading, Regime, RowStatus, SensorContext, SensorReading,
};

// ---

/// Sensor id used for rows that carry none.
pub const DEFAULT_SENSOR_ID: &str = "default";

/// One batch of raw rows as accepted by `POST /calibrate`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchInput {
    // ---
    pub rows: Vec<Value>,
    /// Sensor id for rows without one.
    #[serde(default)]
    pub sensor_id: Option<String>,
    #[serde(default)]
    pub columns: ColumnMapping,
    /// Per-sensor context overriding the configured defaults.
    #[serde(default)]
    pub sensors: HashMap<String, SensorContext>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub calibrated: usize,
    pub incomplete_features: usize,
    pub grid_unavailable: usize,
    pub out_of_domain: usize,
    pub model_rejected: usize,
    pub internal: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegimeCounts {
    pub cold: usize,
    pub moderate: usize,
    pub hot: usize,
}

/// Regime and quality diagnostics for one batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchSummary {
    // ---
    pub total_rows: usize,
    pub rejected_rows: usize,
    pub sensors: usize,
    pub status: StatusCounts,
    pub regimes: RegimeCounts,
    pub mean_abs_correction: Option<f64>,
    pub max_abs_correction: Option<f64>,
    pub cache: CacheStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub results: Vec<CalibrationResult>,
    pub rejected: Vec<RejectedRow>,
    pub summary: BatchSummary,
}

/// Batch-wide settings derived from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub features: FeatureSettings,
    /// Context for sensors the batch does not describe.
    pub default_context: SensorContext,
    pub max_concurrent_sensors: usize,
}

/// Shared, cheaply cloned handle over the calibration components.
#[derive(Clone)]
pub struct CalibrationPipeline {
    store: Arc<GriddedFieldStore>,
    calibrator: Arc<StratifiedCalibrator>,
    classifier: RegimeClassifier,
    settings: Arc<PipelineSettings>,
}

impl CalibrationPipeline {
    pub fn new(
        store: Arc<GriddedFieldStore>,
        calibrator: StratifiedCalibrator,
        classifier: RegimeClassifier,
        settings: PipelineSettings,
    ) -> Self {
        // ---
        Self {
            store,
            calibrator: Arc::new(calibrator),
            classifier,
            settings: Arc::new(settings),
        }
    }

    pub fn store(&self) -> &Arc<GriddedFieldStore> {
        &self.store
    }

    /// Validate and calibrate a raw batch. Never fails as a whole.
    pub async fn run(&self, input: BatchInput) -> BatchReport {
        // ---
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("calibrate_batch", %run_id);

        async move {
            let total_rows = input.rows.len();
            let default_sensor = input.sensor_id.as_deref().unwrap_or(DEFAULT_SENSOR_ID);

            let mut readings = Vec::with_capacity(total_rows);
            let mut rejected = Vec::new();
            for (index, row) in input.rows.iter().enumerate() {
                let parsed = match row {
                    Value::Object(map) => input.columns.parse_row(map, default_sensor),
                    other => Err(CalibrationError::malformed(format!("row is not an object: {other}"))),
                };
                match parsed {
                    Ok(reading) => readings.push(reading),
                    Err(e) => {
                        debug!("Rejected row {}: {}", index, e);
                        rejected.push(RejectedRow {
                            index,
                            reason: e.to_string(),
                        });
                    }
                }
            }
            info!(
                "Validated {} of {} rows ({} rejected)",
                readings.len(),
                total_rows,
                rejected.len()
            );

            let results = self.calibrate_readings(readings, &input.sensors).await;
            let summary = self.summarize(total_rows, &results, rejected.len());
            info!(
                "Batch complete: {} calibrated, {} incomplete, {} grid unavailable, {} out of domain, {} rejected by model",
                summary.status.calibrated,
                summary.status.incomplete_features,
                summary.status.grid_unavailable,
                summary.status.out_of_domain,
                summary.status.model_rejected
            );

            BatchReport {
                run_id,
                results,
                rejected,
                summary,
            }
        }
        .instrument(span)
        .await
    }

    /// Calibrate validated readings; one result per reading, in input order.
    pub async fn calibrate_readings(
        &self,
        readings: Vec<SensorReading>,
        contexts: &HashMap<String, SensorContext>,
    ) -> Vec<CalibrationResult> {
        // ---
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, r) in readings.iter().enumerate() {
            groups.entry(r.sensor_id.as_str()).or_default().push(i);
        }
        for indices in groups.values_mut() {
            // Stable, so duplicate timestamps keep input order.
            indices.sort_by_key(|&i| readings[i].timestamp);
        }
        debug!("Processing {} readings across {} sensors", readings.len(), groups.len());

        // Pin every month the batch needs before any task can trigger eviction.
        let mut work = Vec::with_capacity(groups.len());
        for (sensor_id, indices) in &groups {
            let series: Vec<(usize, SensorReading)> =
                indices.iter().map(|&i| (i, readings[i].clone())).collect();
            let pins = self
                .store
                .reserve_months(series.iter().flat_map(|(_, r)| months_for(r.timestamp)));
            let context = contexts
                .get(*sensor_id)
                .cloned()
                .unwrap_or_else(|| self.settings.default_context.clone());
            work.push((sensor_id.to_string(), series, context, pins));
        }

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_sensors.max(1)));
        let mut handles = Vec::with_capacity(work.len());
        for (sensor_id, series, context, pins) in work {
            let this = self.clone();
            let semaphore = semaphore.clone();
            let span = tracing::debug_span!("sensor", sensor_id = %sensor_id);
            let handle = tokio::spawn(
                async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    this.process_sensor(series, context, pins).await
                }
                .instrument(span),
            );
            handles.push((sensor_id, handle));
        }

        let mut slots: Vec<Option<CalibrationResult>> = vec![None; readings.len()];
        for (sensor_id, handle) in handles {
            match handle.await {
                Ok(rows) => {
                    for (i, row) in rows {
                        slots[i] = Some(row);
                    }
                }
                Err(e) => warn!("Sensor task for {} failed: {}", sensor_id, e),
            }
        }

        slots
            .into_iter()
            .zip(&readings)
            .map(|(slot, reading)| {
                slot.unwrap_or_else(|| {
                    let regime = self.classifier.classify(reading.raw_temperature);
                    CalibrationResult::pass_through(
                        reading,
                        regime,
                        false,
                        RowStatus::Internal,
                        Some("sensor task failed".into()),
                    )
                })
            })
            .collect()
    }

    /// Process one sensor's timestamp-ordered series.
    async fn process_sensor(
        &self,
        series: Vec<(usize, SensorReading)>,
        context: SensorContext,
        mut pins: Reservation,
    ) -> Vec<(usize, CalibrationResult)> {
        // ---
        let mut history = Vec::with_capacity(series.len());
        let mut grid_errors = Vec::with_capacity(series.len());
        for (_, reading) in &series {
            let sample = self
                .store
                .get(reading.latitude, reading.longitude, reading.timestamp)
                .await;
            for key in months_for(reading.timestamp) {
                pins.release(key);
            }

            let (meteo, error) = match sample {
                Ok(m) => (Some(m), None),
                Err(e) => {
                    debug!("No reanalysis for {} at {}: {}", reading.sensor_id, reading.timestamp, e);
                    (None, Some(e))
                }
            };
            history.push(EnrichedReading {
                reading: reading.clone(),
                meteo,
            });
            grid_errors.push(error);
        }
        drop(pins);

        let engineer = FeatureEngineer::new(self.settings.features, context);
        series
            .iter()
            .zip(grid_errors)
            .enumerate()
            .map(|(pos, ((index, reading), grid_error))| {
                let vector = engineer.compute(&history, pos);
                let regime = self.classifier.classify(reading.raw_temperature);
                let complete = vector.is_complete();

                let row = match grid_error {
                    Some(e) => {
                        let status = match e {
                            CalibrationError::OutOfDomain { .. } => RowStatus::OutOfDomain,
                            _ => RowStatus::GridUnavailable,
                        };
                        CalibrationResult::pass_through(reading, regime, complete, status, Some(e.to_string()))
                    }
                    None => self.correct(reading, &vector, regime),
                };
                (*index, row)
            })
            .collect()
    }

    fn correct(
        &self,
        reading: &SensorReading,
        vector: &crate::features::FeatureVector,
        regime: Regime,
    ) -> CalibrationResult {
        // ---
        let complete = vector.is_complete();
        match self.calibrator.calibrate(reading.raw_temperature, vector, regime) {
            Ok(c) => match c.status {
                CorrectionStatus::Corrected => CalibrationResult {
                    sensor_id: reading.sensor_id.clone(),
                    timestamp: reading.timestamp,
                    raw_temperature: c.raw,
                    calibrated_temperature: c.calibrated,
                    regime,
                    correction_magnitude: c.correction,
                    feature_completeness_flag: true,
                    status: RowStatus::Calibrated,
                    detail: None,
                },
                CorrectionStatus::Uncomputed => {
                    let missing = vector.missing();
                    let detail = if missing.len() > 3 {
                        format!("missing {} features: {}, ...", missing.len(), missing[..3].join(", "))
                    } else {
                        format!("missing features: {}", missing.join(", "))
                    };
                    CalibrationResult::pass_through(
                        reading,
                        regime,
                        complete,
                        RowStatus::IncompleteFeatures,
                        Some(detail),
                    )
                }
                CorrectionStatus::Rejected(reason) => {
                    warn!("{} at {}: {}", reading.sensor_id, reading.timestamp, reason);
                    CalibrationResult::pass_through(reading, regime, complete, RowStatus::ModelRejected, Some(reason))
                }
            },
            Err(e) => CalibrationResult::pass_through(
                reading,
                regime,
                complete,
                RowStatus::ModelRejected,
                Some(e.to_string()),
            ),
        }
    }

    fn summarize(&self, total_rows: usize, results: &[CalibrationResult], rejected_rows: usize) -> BatchSummary {
        // ---
        let mut status = StatusCounts::default();
        let mut regimes = RegimeCounts::default();
        let mut corrections = Vec::new();
        let mut sensors: Vec<&str> = Vec::new();

        for r in results {
            match r.status {
                RowStatus::Calibrated => {
                    status.calibrated += 1;
                    corrections.push(r.correction_magnitude.abs());
                }
                RowStatus::IncompleteFeatures => status.incomplete_features += 1,
                RowStatus::GridUnavailable => status.grid_unavailable += 1,
                RowStatus::OutOfDomain => status.out_of_domain += 1,
                RowStatus::ModelRejected => status.model_rejected += 1,
                RowStatus::Internal => status.internal += 1,
            }
            match r.regime {
                Regime::Cold => regimes.cold += 1,
                Regime::Moderate => regimes.moderate += 1,
                Regime::Hot => regimes.hot += 1,
            }
            sensors.push(&r.sensor_id);
        }
        sensors.sort_unstable();
        sensors.dedup();

        let mean_abs_correction =
            (!corrections.is_empty()).then(|| corrections.iter().sum::<f64>() / corrections.len() as f64);
        let max_abs_correction = corrections.iter().copied().reduce(f64::max);

        BatchSummary {
            total_rows,
            rejected_rows,
            sensors: sensors.len(),
            status,
            regimes,
            mean_abs_correction,
            max_abs_correction,
            cache: self.store.stats(),
        }
    }
}
