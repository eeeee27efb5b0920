//! # Metric Inference Engine
//!
//! Derives per-point motion columns (step/cumulative distance, km/mile
//! bucket, elapsed time, interval speed and pace) from canonical points, and
//! completes whatever lap fields the source left empty.
//!
//! Inference is pure: the same canonical input always yields identical output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::error::Result;
use crate::geo_utils::{haversine_distance, mean_present};
use crate::records::{CanonicalPoint, RawLap};
use crate::{ActivityError, GpsPoint, KM, MILE};

// ============================================================================
// Types
// ============================================================================

/// A point with every derived column filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// 0-based, contiguous
    pub point_no: usize,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: DateTime<Utc>,
    pub heart_rate: Option<f64>,
    pub cadence: Option<f64>,
    pub lap: Option<u32>,

    /// Meters from the previous point; `None` for the first point
    pub step_distance: Option<f64>,
    /// Meters from the start
    pub cumul_distance: f64,
    /// Completed kilometres
    pub km: u32,
    /// Completed miles
    pub mile: u32,
    /// Seconds since the first point
    pub run_time: f64,

    pub kmph: Option<f64>,
    pub mph: Option<f64>,
    /// Seconds per kilometre
    pub km_pace: Option<f64>,
    /// Seconds per mile
    pub mile_pace: Option<f64>,
}

impl Point {
    pub fn gps(&self) -> GpsPoint {
        GpsPoint::new(self.latitude, self.longitude)
    }
}

/// Ordered, immutable sequence of fully-derived points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointSeries {
    points: Vec<Point>,
}

impl PointSeries {
    /// Wrap already-derived points, e.g. when loading from a store.
    pub fn from_points(points: Vec<Point>) -> Result<Self> {
        if points.is_empty() {
            return Err(ActivityError::schema("a point series needs at least one point"));
        }
        if let Some((i, _)) = points
            .iter()
            .enumerate()
            .find(|(i, p)| p.point_no != *i)
        {
            return Err(ActivityError::schema(format!(
                "point numbers must be contiguous from 0 (mismatch at index {})",
                i
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Series are never empty, so the first and last point always exist.
    pub fn first(&self) -> &Point {
        &self.points[0]
    }

    pub fn last(&self) -> &Point {
        &self.points[self.points.len() - 1]
    }

    /// Total distance in meters.
    pub fn total_distance(&self) -> f64 {
        self.last().cumul_distance
    }

    pub fn latitudes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.latitude).collect()
    }

    pub fn longitudes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.longitude).collect()
    }

    pub fn gps_points(&self) -> Vec<GpsPoint> {
        self.points.iter().map(Point::gps).collect()
    }

    pub fn has_laps(&self) -> bool {
        self.points.iter().any(|p| p.lap.is_some())
    }

    pub fn into_points(self) -> Vec<Point> {
        self.points
    }
}

impl<'a> IntoIterator for &'a PointSeries {
    type Item = &'a Point;
    type IntoIter = std::slice::Iter<'a, Point>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

/// A lap with all fields the points allow filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lap {
    /// 1-based
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

// ============================================================================
// Point inference
// ============================================================================

/// Derive per-point columns and complete laps.
pub fn infer(
    points: &[CanonicalPoint],
    laps: Option<&[RawLap]>,
    config: &InferenceConfig,
) -> Result<(PointSeries, Option<Vec<Lap>>)> {
    let series = infer_points(points, config)?;
    let laps = laps.map(|raw| complete_laps(raw, &series));
    Ok((series, laps))
}

/// Per-point derivation in point order.
pub fn infer_points(points: &[CanonicalPoint], config: &InferenceConfig) -> Result<PointSeries> {
    let interval = config.speed_measure_interval;
    if interval == 0 {
        return Err(ActivityError::invalid_parameter(
            "speed_measure_interval",
            interval.to_string(),
        ));
    }
    let first = points
        .first()
        .ok_or_else(|| ActivityError::schema("cannot infer metrics for zero points"))?;

    let use_device_speed = points.iter().any(|p| p.kmph.is_some());
    let start = first.time;

    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    let mut cumul = 0.0;

    for (i, p) in points.iter().enumerate() {
        let step_distance = i.checked_sub(1).map(|j| {
            let prev = &points[j];
            haversine_distance(prev.latitude, prev.longitude, p.latitude, p.longitude)
        });
        cumul += step_distance.unwrap_or(0.0);

        // Interval over the last N points; undefined until N points have passed
        let (interval_distance, interval_time) = match i.checked_sub(interval) {
            Some(j) => (
                Some(cumul - out[j].cumul_distance),
                Some(seconds_between(points[j].time, p.time)),
            ),
            None => (None, None),
        };

        let kmph = if use_device_speed {
            p.kmph
        } else {
            match (interval_distance, interval_time) {
                (Some(d), Some(t)) if t > 0.0 => Some(3.6 * d / t),
                _ => None,
            }
        };

        let pace = |unit: f64| match (interval_distance, interval_time) {
            (Some(d), Some(t)) if d > 0.0 => Some(unit / d * t),
            _ => None,
        };

        out.push(Point {
            point_no: i,
            latitude: p.latitude,
            longitude: p.longitude,
            elevation: p.elevation,
            time: p.time,
            heart_rate: p.heart_rate,
            cadence: p.cadence,
            lap: p.lap,
            step_distance,
            cumul_distance: cumul,
            km: (cumul / KM).floor() as u32,
            mile: (cumul / MILE).floor() as u32,
            run_time: seconds_between(start, p.time),
            kmph,
            mph: kmph.map(kmph_to_mph),
            km_pace: pace(KM),
            mile_pace: pace(MILE),
        });
    }

    PointSeries::from_points(out)
}

/// Fractional seconds from `a` to `b`.
pub fn seconds_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 1000.0
}

#[inline]
pub fn kmph_to_mph(kmph: f64) -> f64 {
    kmph * KM / MILE
}

// ============================================================================
// Lap completion
// ============================================================================

/// Fill empty lap fields from the points. Fields the source supplied are kept.
pub fn complete_laps(raw: &[RawLap], series: &PointSeries) -> Vec<Lap> {
    // lap_no -> indices of its points
    let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, p) in series.iter().enumerate() {
        if let Some(lap) = p.lap {
            groups.entry(lap).or_default().push(i);
        }
    }

    let mut sorted: Vec<&RawLap> = raw.iter().collect();
    sorted.sort_by_key(|l| l.lap_no);

    let points = series.points();
    let first_point = |lap_no: u32| -> Option<&Point> {
        groups.get(&lap_no).and_then(|g| g.first()).map(|&i| &points[i])
    };

    let start_of = |lap: &RawLap| -> Option<DateTime<Utc>> {
        lap.start_time
            .or_else(|| first_point(lap.lap_no).map(|p| p.time))
    };

    sorted
        .iter()
        .copied()
        .enumerate()
        .map(|(k, lap)| {
            let next = sorted.get(k + 1).copied();
            let start_time = start_of(lap);

            let duration = lap.duration.or_else(|| {
                let end = match next {
                    Some(n) => start_of(n)?,
                    None => series.last().time,
                };
                Some(seconds_between(start_time?, end))
            });

            let distance = lap.distance.or_else(|| {
                let from = first_point(lap.lap_no)?.cumul_distance;
                let to = match next {
                    Some(n) => first_point(n.lap_no)?.cumul_distance,
                    None => series.total_distance(),
                };
                Some(to - from)
            });

            let group: Vec<&Point> = groups
                .get(&lap.lap_no)
                .map(|g| g.iter().map(|&i| &points[i]).collect())
                .unwrap_or_default();

            Lap {
                lap_no: lap.lap_no,
                start_time,
                distance,
                duration,
                calories: lap.calories,
                mean_hr: lap
                    .mean_hr
                    .or_else(|| mean_present(group.iter().map(|p| p.heart_rate))),
                mean_cadence: lap
                    .mean_cadence
                    .or_else(|| mean_present(group.iter().map(|p| p.cadence))),
                mean_kmph: lap
                    .mean_kmph
                    .or_else(|| mean_present(group.iter().map(|p| p.kmph))),
            }
        })
        .collect()
}
