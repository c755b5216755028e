//! Bounded, concurrency-safe cache of monthly gridded fields.
//!
//! Months load lazily on first access. Each month owns a `OnceCell`, so when
//! several sensor tasks ask for the same missing month only one of them runs
//! the loader and the rest await its result. Cache bookkeeping lives behind a
//! short std `Mutex` that is never held across an await.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

use super::field::{FieldFile, GriddedField, Interpolation};
use crate::error::{CalibrationError, Result};
use crate::models::{MeteorologicalSample, MonthKey};

// ---

/// Source of monthly fields. Called from the blocking thread pool.
pub trait FieldLoader: Send + Sync + 'static {
    fn load(&self, key: MonthKey) -> Result<GriddedField>;
}

/// Reads `YYYY-MM.json` files from a local directory.
#[derive(Debug, Clone)]
pub struct DirectoryLoader {
    root: PathBuf,
}

impl DirectoryLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl FieldLoader for DirectoryLoader {
    fn load(&self, key: MonthKey) -> Result<GriddedField> {
        // ---
        let path = self.root.join(key.file_name());
        if !path.is_file() {
            return Err(CalibrationError::grid(key, format!("file not found: {}", path.display())));
        }
        let bytes = fs::read(&path)
            .map_err(|e| CalibrationError::grid(key, format!("failed to read {}: {e}", path.display())))?;
        let file: FieldFile = serde_json::from_slice(&bytes)
            .map_err(|e| CalibrationError::grid(key, format!("failed to parse {}: {e}", path.display())))?;
        GriddedField::from_file(key, file)
    }
}

/// Missing or broken months remembered at most, least recently used first out.
const REMEMBERED_FAILURES: usize = 12;

/// Months a lookup at `timestamp` may touch: its own, plus the following
/// month during the final hour, whose first step bounds the interpolation.
pub fn months_for(timestamp: DateTime<Utc>) -> Vec<MonthKey> {
    // ---
    let key = MonthKey::of(timestamp);
    let next = MonthKey::of(timestamp + Duration::hours(1));
    if next == key {
        vec![key]
    } else {
        vec![key, next]
    }
}

type LoadOutcome = std::result::Result<Arc<GriddedField>, CalibrationError>;

struct Slot {
    cell: Arc<OnceCell<LoadOutcome>>,
    last_used: u64,
}

impl Slot {
    /// Successfully loaded. Failed loads stay cached but take no capacity.
    fn is_loaded(&self) -> bool {
        matches!(self.cell.get(), Some(Ok(_)))
    }

    fn is_failed(&self) -> bool {
        matches!(self.cell.get(), Some(Err(_)))
    }
}

#[derive(Default)]
struct CacheState {
    slots: HashMap<MonthKey, Slot>,
    /// Readings still waiting on each month in the current batch.
    pending: HashMap<MonthKey, usize>,
    tick: u64,
    /// Bumped by `clear()`; reservations from an earlier generation no
    /// longer own any pins.
    generation: u64,
}

/// Snapshot of cache counters, reported with each batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub loads: u64,
    pub load_failures: u64,
    pub evictions: u64,
    pub resident_months: usize,
    pub failed_months: usize,
}

/// Lazily loading, LRU-bounded store of gridded fields.
pub struct GriddedFieldStore {
    // ---
    loader: Arc<dyn FieldLoader>,
    capacity: usize,
    method: Interpolation,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
    evictions: AtomicU64,
}

impl GriddedFieldStore {
    /// Create a store resident-bounded to `capacity` months (at least one).
    pub fn new(loader: impl FieldLoader, capacity: usize, method: Interpolation) -> Self {
        // ---
        Self {
            loader: Arc::new(loader),
            capacity: capacity.max(1),
            method,
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            loads: AtomicU64::new(0),
            load_failures: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // Bookkeeping stays consistent even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Interpolate the six reanalysis variables at a point.
    ///
    /// In the hour after a month's last step the value is blended with the
    /// first step of the following month, or held at the last step when that
    /// month is unavailable.
    pub async fn get(&self, latitude: f64, longitude: f64, timestamp: DateTime<Utc>) -> Result<MeteorologicalSample> {
        // ---
        let field = self.month(MonthKey::of(timestamp)).await?;
        let sample = field.sample(latitude, longitude, timestamp, self.method)?;

        let last = field.last_step();
        let boundary = last + Duration::hours(1);
        if timestamp <= last || timestamp >= boundary || MonthKey::of(boundary) == field.key() {
            return Ok(sample);
        }

        let next = match self.month(MonthKey::of(boundary)).await {
            Ok(next) if next.start() == boundary => next,
            _ => return Ok(sample),
        };
        match next.sample(latitude, longitude, boundary, self.method) {
            Ok(after) => {
                let frac = (timestamp - last).num_milliseconds() as f64 / 3_600_000.0;
                Ok(sample.lerp(&after, frac))
            }
            Err(_) => Ok(sample),
        }
    }

    /// Resolve a month, loading it if needed.
    pub async fn month(&self, key: MonthKey) -> Result<Arc<GriddedField>> {
        // ---
        let cell = {
            let mut state = self.lock();
            state.tick += 1;
            let tick = state.tick;
            let slot = state.slots.entry(key).or_insert_with(|| Slot {
                cell: Arc::new(OnceCell::new()),
                last_used: tick,
            });
            slot.last_used = tick;
            slot.cell.clone()
        };

        if let Some(outcome) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return outcome.clone();
        }

        let loaded_here = AtomicBool::new(false);
        let outcome = cell
            .get_or_init(|| async {
                loaded_here.store(true, Ordering::Relaxed);
                self.load(key).await
            })
            .await
            .clone();

        if loaded_here.load(Ordering::Relaxed) {
            self.evict_excess(key);
        } else {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    async fn load(&self, key: MonthKey) -> LoadOutcome {
        // ---
        tracing::debug!("Loading gridded field {}", key);
        let loader = self.loader.clone();
        let result = tokio::task::spawn_blocking(move || loader.load(key))
            .await
            .unwrap_or_else(|e| Err(CalibrationError::grid(key, format!("loader task failed: {e}"))));

        match result {
            Ok(field) => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                tracing::info!("Loaded gridded field {} (covers until {})", field.key(), field.end());
                Ok(Arc::new(field))
            }
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Gridded field {} unavailable: {}", key, e);
                Err(e)
            }
        }
    }

    /// Drop least-recently-used loaded months until within capacity.
    ///
    /// Never evicts `current`, a month still loading, or a month with
    /// pending reservations. Failed months are kept so they are not re-read,
    /// up to `REMEMBERED_FAILURES` of them.
    fn evict_excess(&self, current: MonthKey) {
        // ---
        let mut state = self.lock();
        loop {
            let failed: Vec<(u64, MonthKey)> = state
                .slots
                .iter()
                .filter(|(key, slot)| **key != current && slot.is_failed())
                .map(|(key, slot)| (slot.last_used, *key))
                .collect();
            if failed.len() < REMEMBERED_FAILURES {
                break;
            }
            if let Some((_, key)) = failed.into_iter().min() {
                state.slots.remove(&key);
                tracing::debug!("Forgot failed gridded field {}", key);
            }
        }
        loop {
            let resident = state.slots.values().filter(|s| s.is_loaded()).count();
            if resident <= self.capacity {
                return;
            }
            let victim = state
                .slots
                .iter()
                .filter(|(key, slot)| {
                    **key != current
                        && slot.is_loaded()
                        && state.pending.get(*key).copied().unwrap_or(0) == 0
                })
                .min_by_key(|(key, slot)| (slot.last_used, **key))
                .map(|(key, _)| *key);

            match victim {
                Some(key) => {
                    state.slots.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Evicted gridded field {}", key);
                }
                None => {
                    tracing::warn!(
                        "Grid cache holds {} months (capacity {}), all pinned by pending readings",
                        resident,
                        self.capacity
                    );
                    return;
                }
            }
        }
    }

    /// Pin `key` for `count` upcoming readings.
    #[cfg(test)]
    pub fn reserve(&self, key: MonthKey, count: usize) {
        if count > 0 {
            *self.lock().pending.entry(key).or_insert(0) += count;
        }
    }

    /// Release one reading's pin on `key`.
    #[cfg(test)]
    pub fn release(&self, key: MonthKey) {
        // ---
        let mut state = self.lock();
        Self::unpin(&mut state, key);
    }

    /// Release a pin taken in `generation`; no-op once the cache was cleared.
    fn release_from(&self, key: MonthKey, generation: u64) {
        // ---
        let mut state = self.lock();
        if state.generation == generation {
            Self::unpin(&mut state, key);
        }
    }

    fn unpin(state: &mut CacheState, key: MonthKey) {
        if let Some(n) = state.pending.get_mut(&key) {
            *n = n.saturating_sub(1);
            if *n == 0 {
                state.pending.remove(&key);
            }
        }
    }

    /// Pin every month in `keys` (one count per occurrence) until the
    /// returned reservation releases or drops them.
    pub fn reserve_months(self: &Arc<Self>, keys: impl IntoIterator<Item = MonthKey>) -> Reservation {
        // ---
        let mut remaining: HashMap<MonthKey, usize> = HashMap::new();
        for key in keys {
            *remaining.entry(key).or_insert(0) += 1;
        }
        let generation = {
            let mut state = self.lock();
            for (key, count) in &remaining {
                *state.pending.entry(*key).or_insert(0) += *count;
            }
            state.generation
        };
        Reservation {
            store: Arc::clone(self),
            remaining,
            generation,
        }
    }

    #[cfg(test)]
    pub fn pending(&self, key: MonthKey) -> usize {
        self.lock().pending.get(&key).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub fn is_resident(&self, key: MonthKey) -> bool {
        self.lock()
            .slots
            .get(&key)
            .map_or(false, Slot::is_loaded)
    }

    pub fn stats(&self) -> CacheStats {
        // ---
        let (resident_months, failed_months) = {
            let state = self.lock();
            let resident = state.slots.values().filter(|s| s.is_loaded()).count();
            let failed = state.slots.values().filter(|s| s.is_failed()).count();
            (resident, failed)
        };
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            resident_months,
            failed_months,
        }
    }

    /// Drop every cached month and reservation.
    ///
    /// Outstanding [`Reservation`]s are orphaned: their later releases no
    /// longer touch pins taken after the clear.
    pub fn clear(&self) {
        // ---
        let mut state = self.lock();
        let dropped = state.slots.len();
        state.slots.clear();
        state.pending.clear();
        state.generation += 1;
        tracing::info!("Grid cache cleared ({} months dropped)", dropped);
    }
}

/// Pending-month pins held by one unit of work.
///
/// Whatever has not been released explicitly is released on drop, so a
/// failed task cannot leave months pinned.
pub struct Reservation {
    store: Arc<GriddedFieldStore>,
    remaining: HashMap<MonthKey, usize>,
    generation: u64,
}

impl Reservation {
    /// Release one pin on `key`; no-op if none are held.
    pub fn release(&mut self, key: MonthKey) {
        // ---
        if let Some(n) = self.remaining.get_mut(&key) {
            if *n > 0 {
                *n -= 1;
                self.store.release_from(key, self.generation);
            }
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        for (key, count) in self.remaining.drain() {
            for _ in 0..count {
                self.store.release_from(key, self.generation);
            }
        }
    }
}
