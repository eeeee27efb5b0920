//! # Canonical records
//!
//! The point/lap representation every format adapter converges to before
//! metric inference, plus the backfill buffer and the contract checks that
//! turn raw rows into [`CanonicalPoint`]s.

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OptionExt, Result};
use crate::{ActivityError, ActivityType, SourceFormat};

// ============================================================================
// Raw rows (adapter output)
// ============================================================================

/// A point as decoded from a source file. Any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation: Option<f64>,
    pub time: Option<DateTime<Utc>>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    /// 1-based lap index, when the source delimits laps
    pub lap: Option<u32>,
    /// Device-reported speed in km/h
    pub kmph: Option<f64>,
}

impl RawPoint {
    pub fn has_position(&self) -> bool {
        self.latitude.is_some() && self.longitude.is_some()
    }

    /// Fill every missing field from `other`, leaving present fields untouched.
    pub fn fill_missing_from(&mut self, other: &RawPoint) {
        self.latitude = self.latitude.or(other.latitude);
        self.longitude = self.longitude.or(other.longitude);
        self.elevation = self.elevation.or(other.elevation);
        self.time = self.time.or(other.time);
        self.heart_rate = self.heart_rate.or(other.heart_rate);
        self.cadence = self.cadence.or(other.cadence);
        self.lap = self.lap.or(other.lap);
        self.kmph = self.kmph.or(other.kmph);
    }
}

/// A lap as decoded from a source file. Empty fields are completed by
/// [`crate::metrics::infer`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLap {
    pub lap_no: u32,
    pub start_time: Option<DateTime<Utc>>,
    /// Meters
    pub distance: Option<f64>,
    /// Seconds
    pub duration: Option<f64>,
    pub calories: Option<f64>,
    pub mean_hr: Option<f64>,
    pub mean_cadence: Option<f64>,
    pub mean_kmph: Option<f64>,
}

/// Whatever activity-level metadata the source file carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialMetadata {
    pub activity_type: Option<ActivityType>,
    pub date_time: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// GPX `creator` attribute or device name
    pub creator: Option<String>,
}

/// Output of a format adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedActivity {
    pub points: Vec<RawPoint>,
    pub laps: Option<Vec<RawLap>>,
    pub metadata: PartialMetadata,
    pub source_format: SourceFormat,
    /// Name of the adapter that produced this output, e.g. `gpx:strava`
    pub adapter: String,
    pub source_file: Option<PathBuf>,
    /// Hex SHA-256 of the raw bytes
    pub source_hash: String,
}

// ============================================================================
// Backfill
// ============================================================================

/// Pending queue of points still waiting for coordinates.
///
/// Points without latitude/longitude are held back. When a point with both
/// arrives, each held point takes its missing fields from it, then the held
/// points are emitted in their original order followed by the trigger point.
#[derive(Debug, Default)]
pub struct BackfillBuffer {
    pending: Vec<RawPoint>,
    emitted: Vec<RawPoint>,
    backfilled: usize,
}

impl BackfillBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, point: RawPoint) {
        if !point.has_position() {
            self.pending.push(point);
            return;
        }

        if !self.pending.is_empty() {
            log::debug!(
                "[Parse] Backfilling {} points from point at {:?}",
                self.pending.len(),
                point.time
            );
            self.backfilled += self.pending.len();
            for mut held in self.pending.drain(..) {
                held.fill_missing_from(&point);
                self.emitted.push(held);
            }
        }
        self.emitted.push(point);
    }

    /// Number of points so far completed by backfill.
    pub fn backfilled(&self) -> usize {
        self.backfilled
    }

    /// Finish the stream. Points that never received coordinates are dropped.
    pub fn finish(self) -> Vec<RawPoint> {
        if !self.pending.is_empty() {
            log::debug!(
                "[Parse] Dropping {} trailing points without coordinates",
                self.pending.len()
            );
        }
        self.emitted
    }
}

impl Extend<RawPoint> for BackfillBuffer {
    fn extend<T: IntoIterator<Item = RawPoint>>(&mut self, iter: T) {
        for p in iter {
            self.push(p);
        }
    }
}

// ============================================================================
// Canonical points
// ============================================================================

/// A point whose mandatory fields are known to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub lap: Option<u32>,
    pub kmph: Option<f64>,
}

impl CanonicalPoint {
    /// Check a raw point against the canonical contract.
    pub fn from_raw(raw: &RawPoint, index: usize) -> Result<Self> {
        let latitude = raw
            .latitude
            .ok_or_schema(&format!("point {} has no latitude", index))?;
        let longitude = raw
            .longitude
            .ok_or_schema(&format!("point {} has no longitude", index))?;
        let time = raw
            .time
            .ok_or_schema(&format!("point {} has no timestamp", index))?;

        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(ActivityError::schema(format!(
                "point {} has non-finite coordinates",
                index
            )));
        }

        Ok(Self {
            latitude,
            longitude,
            elevation: raw.elevation,
            time,
            heart_rate: raw.heart_rate,
            cadence: raw.cadence,
            lap: raw.lap,
            kmph: raw.kmph,
        })
    }
}

/// Validate raw points and drop repeated timestamps (first occurrence kept).
pub fn canonicalize_points(raw: &[RawPoint]) -> Result<Vec<CanonicalPoint>> {
    let mut seen = HashSet::with_capacity(raw.len());
    let mut points = Vec::with_capacity(raw.len());

    for (i, r) in raw.iter().enumerate() {
        let p = CanonicalPoint::from_raw(r, i)?;
        if seen.insert(p.time) {
            points.push(p);
        }
    }

    if points.len() < raw.len() {
        log::debug!(
            "[Parse] Dropped {} points with duplicate timestamps",
            raw.len() - points.len()
        );
    }
    Ok(points)
}

/// Check a lap stream: 1-based, unique lap numbers.
pub fn validate_laps(laps: &[RawLap]) -> Result<()> {
    let mut seen = HashSet::new();
    for lap in laps {
        if lap.lap_no == 0 {
            return Err(ActivityError::schema("lap numbers are 1-based"));
        }
        if !seen.insert(lap.lap_no) {
            return Err(ActivityError::schema(format!(
                "lap {} appears more than once",
                lap.lap_no
            )));
        }
    }
    Ok(())
}
