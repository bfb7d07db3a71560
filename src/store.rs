//! Durable append-only store for readings.
//!
//! Keeps the full history in memory behind one mutex and mirrors it to a
//! CSV file (columns `timestamp, light, temperature, humidity`, one row
//! per reading, insertion order). Every append rewrites the whole file:
//! O(n) per append, acceptable at telemetry rates but a known ceiling if
//! ingestion ever becomes high-frequency. The rewrite runs outside the
//! collection lock on an atomically captured snapshot, so the read views
//! stay responsive while the file is written.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::reading::Reading;

/// Store errors.
#[derive(Debug)]
pub enum StoreError {
    /// The backing file could not be written or read
    Persist(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Persist(e) => write!(f, "persist: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

/// One row of the chart-series projection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartPoint {
    pub timestamp: DateTime<Utc>,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
}

/// Append-only reading log with a CSV mirror.
///
/// Appends come from the subscriber's receive thread while a consumer
/// polls the read views from its own thread; the collection mutex makes
/// each view a consistent snapshot against an in-flight append.
pub struct ReadingStore {
    path: PathBuf,
    readings: Mutex<Vec<Reading>>,
}

impl ReadingStore {
    /// Open a store backed by `path`, loading any existing rows.
    ///
    /// Creates the parent directory when missing. A missing file starts
    /// the store empty; an unreadable or malformed file degrades to empty
    /// with a warning instead of failing startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(dir) {
                    warn!("could not create data directory {:?}: {}", dir, e);
                }
            }
        }
        let readings = match load(&path) {
            Ok(readings) => readings,
            Err(e) => {
                warn!("could not load {:?}, starting empty: {}", path, e);
                Vec::new()
            }
        };
        debug!("opened store {:?} with {} readings", path, readings.len());
        Self {
            path,
            readings: Mutex::new(readings),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored readings.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the store holds no readings.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append a reading and rewrite the backing file.
    ///
    /// The reading stays in memory even when persistence fails; the next
    /// successful append writes it out again.
    pub fn append(&self, reading: Reading) -> Result<(), StoreError> {
        let snapshot = {
            let mut readings = self.lock();
            readings.push(reading);
            readings.clone()
        };
        persist(&self.path, &snapshot)
    }

    /// The most recently appended reading.
    pub fn latest(&self) -> Option<Reading> {
        self.lock().last().cloned()
    }

    /// Up to `limit` readings, newest first by timestamp; readings with
    /// equal timestamps keep their insertion order.
    pub fn recent(&self, limit: usize) -> Vec<Reading> {
        let mut readings = self.lock().clone();
        readings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        readings.truncate(limit);
        readings
    }

    /// All readings in insertion order.
    pub fn all(&self) -> Vec<Reading> {
        self.lock().clone()
    }

    /// The `(timestamp, temperature, humidity)` projection, timestamp
    /// ascending. Readings without numeric fields stay in as gaps; the
    /// presentation layer decides how to render them.
    pub fn chart_series(&self) -> Vec<ChartPoint> {
        let mut points: Vec<ChartPoint> = self
            .lock()
            .iter()
            .map(|r| ChartPoint {
                timestamp: r.timestamp,
                temperature: r.temperature,
                humidity: r.humidity,
            })
            .collect();
        points.sort_by_key(|p| p.timestamp);
        points
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Reading>> {
        // A reader that panicked mid-view must not sever ingestion.
        self.readings.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load(path: &Path) -> Result<Vec<Reading>, StoreError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader =
        csv::Reader::from_path(path).map_err(|e| StoreError::Persist(e.to_string()))?;
    let mut readings = Vec::new();
    for row in reader.deserialize() {
        let reading: Reading = row.map_err(|e| StoreError::Persist(e.to_string()))?;
        readings.push(reading);
    }
    Ok(readings)
}

fn persist(path: &Path, readings: &[Reading]) -> Result<(), StoreError> {
    let mut writer =
        csv::Writer::from_path(path).map_err(|e| StoreError::Persist(e.to_string()))?;
    for reading in readings {
        writer
            .serialize(reading)
            .map_err(|e| StoreError::Persist(e.to_string()))?;
    }
    writer.flush().map_err(|e| StoreError::Persist(e.to_string()))
}
