//! # Splits
//!
//! Fixed-distance segments (kilometres or miles) delimited by markers
//! interpolated at each whole-unit boundary, independent of device laps.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::geo_utils::{lerp, lerp_opt, mean_present};
use crate::metrics::{seconds_between, Point, PointSeries};
use crate::{ActivityError, KM, MILE};

/// Split distance unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitUnit {
    Km,
    Mile,
}

impl SplitUnit {
    /// Unit length in meters.
    pub fn meters(&self) -> f64 {
        match self {
            SplitUnit::Km => KM,
            SplitUnit::Mile => MILE,
        }
    }

    /// Completed units at a point.
    pub fn bucket(&self, point: &Point) -> u32 {
        match self {
            SplitUnit::Km => point.km,
            SplitUnit::Mile => point.mile,
        }
    }

    fn pace(&self, point: &Point) -> Option<f64> {
        match self {
            SplitUnit::Km => point.km_pace,
            SplitUnit::Mile => point.mile_pace,
        }
    }
}

impl fmt::Display for SplitUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SplitUnit::Km => "km",
            SplitUnit::Mile => "mile",
        })
    }
}

impl FromStr for SplitUnit {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "km" => Ok(SplitUnit::Km),
            "mile" => Ok(SplitUnit::Mile),
            other => Err(ActivityError::invalid_parameter("split_unit", other)),
        }
    }
}

/// Synthetic point on a whole-unit boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitMarker {
    /// Boundary index: the marker sits at `boundary * unit` meters
    pub boundary: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
    pub time: DateTime<Utc>,
    pub cumul_distance: f64,
}

/// Summary of one split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitSummary {
    /// 0-based: split `n` covers `[n, n+1)` units
    pub split_no: u32,
    pub start_time: DateTime<Utc>,
    /// Seconds
    pub duration: f64,
    /// Meters; the unit length except for the final, partial split
    pub distance: f64,
    /// Mean interval pace (seconds per unit) of the split's points
    pub mean_pace: Option<f64>,
    pub mean_kmph: Option<f64>,
    pub mean_hr: Option<f64>,
    pub mean_cadence: Option<f64>,
    pub mean_elevation: Option<f64>,
}

/// Interpolate a marker for every whole-unit boundary the series crosses.
pub fn split_markers(series: &PointSeries, unit: SplitUnit) -> Vec<SplitMarker> {
    let points = series.points();
    let last_bucket = unit.bucket(series.last());
    let unit_m = unit.meters();

    let mut markers = Vec::with_capacity(last_bucket as usize);
    // Index of the first point with bucket >= boundary; buckets are monotone
    let mut after = 0;

    for boundary in 1..=last_bucket {
        while unit.bucket(&points[after]) < boundary {
            after += 1;
        }
        if after == 0 {
            continue;
        }
        let p1 = &points[after - 1];
        let p2 = &points[after];

        let target = boundary as f64 * unit_m;
        let underrun = target - p1.cumul_distance;
        let overrun = p2.cumul_distance - target;
        let portion = underrun / (underrun + overrun);

        let offset_ms = (seconds_between(p1.time, p2.time) * portion * 1000.0).round() as i64;

        markers.push(SplitMarker {
            boundary,
            latitude: lerp(p1.latitude, p2.latitude, portion),
            longitude: lerp(p1.longitude, p2.longitude, portion),
            elevation: lerp_opt(p1.elevation, p2.elevation, portion),
            time: p1.time + Duration::milliseconds(offset_ms),
            cumul_distance: target,
        });
    }

    markers
}

/// Per-split start time, duration, distance and means.
pub fn split_summary(series: &PointSeries, unit: SplitUnit) -> Vec<SplitSummary> {
    let markers = split_markers(series, unit);
    let unit_m = unit.meters();
    let total = series.total_distance();

    (0..=markers.len())
        .map(|n| {
            let start_time = match n {
                0 => series.first().time,
                _ => markers[n - 1].time,
            };
            let end_time = markers.get(n).map_or(series.last().time, |m| m.time);
            let distance = if n < markers.len() {
                unit_m
            } else {
                total - n as f64 * unit_m
            };

            let split_no = n as u32;
            let group: Vec<&Point> = series
                .iter()
                .filter(|p| unit.bucket(p) == split_no)
                .collect();

            SplitSummary {
                split_no,
                start_time,
                duration: seconds_between(start_time, end_time),
                distance,
                mean_pace: mean_present(group.iter().map(|p| unit.pace(p))),
                mean_kmph: mean_present(group.iter().map(|p| p.kmph)),
                mean_hr: mean_present(group.iter().map(|p| p.heart_rate)),
                mean_cadence: mean_present(group.iter().map(|p| p.cadence)),
                mean_elevation: mean_present(group.iter().map(|p| p.elevation)),
            }
        })
        .collect()
}
