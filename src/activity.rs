//! # Activity Aggregate
//!
//! An [`Activity`] owns one [`PointSeries`], optional laps and one
//! [`ActivityMetadata`]. Metadata is computed exactly once when the activity
//! is built from parser output; afterwards only `prototype_id` may change.

use std::path::PathBuf;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::InferenceConfig;
use crate::error::Result;
use crate::geo_utils::{mean, mean_present, sample_std, sample_std_present};
use crate::metrics::{infer, kmph_to_mph, seconds_between, Lap, PointSeries};
use crate::records::{canonicalize_points, validate_laps, ParsedActivity};
use crate::splits::{split_markers, split_summary, SplitMarker, SplitSummary, SplitUnit};
use crate::{ActivityError, ActivityId, ActivityType, Bounds, SourceFormat, KM, MILE};

/// Column means of latitude, longitude and elevation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Center {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

/// Column sample standard deviations of latitude, longitude and elevation.
///
/// A single-point activity has zero spread.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Spread {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: Option<f64>,
}

/// Caller-supplied values that take precedence over what the file says.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivityOverrides {
    pub name: Option<String>,
    pub description: Option<String>,
    pub activity_type: Option<ActivityType>,
}

/// Whole-activity summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityMetadata {
    pub activity_id: ActivityId,
    pub activity_type: ActivityType,
    pub date_time: DateTime<Utc>,
    pub name: Option<String>,
    pub description: Option<String>,

    /// Always resolves to a member of the prototype set
    pub prototype_id: ActivityId,

    pub distance_2d_km: f64,
    pub distance_2d_mile: f64,
    pub center: Center,
    pub points_std: Spread,
    pub bounds: Bounds,
    /// Seconds from `date_time` to the last point
    pub duration: f64,

    pub mean_kmph: Option<f64>,
    pub mean_mph: Option<f64>,
    /// Seconds per kilometre
    pub mean_km_pace: Option<f64>,
    /// Seconds per mile
    pub mean_mile_pace: Option<f64>,
    pub mean_hr: Option<f64>,
    pub mean_cadence: Option<f64>,
    pub calories: Option<f64>,

    /// Weekday name, e.g. "Friday"
    pub day: String,
    pub hour: u32,
    /// Month name, e.g. "April"
    pub month: String,

    pub source_file: Option<PathBuf>,
    pub source_format: Option<SourceFormat>,
    pub source_hash: Option<String>,
    pub creator: Option<String>,
}

impl ActivityMetadata {
    pub fn is_prototype(&self) -> bool {
        self.prototype_id == self.activity_id
    }

    /// Calendar date of the activity (UTC).
    pub fn date(&self) -> chrono::NaiveDate {
        self.date_time.date_naive()
    }

    pub fn year(&self) -> i32 {
        self.date_time.year()
    }
}

/// One recorded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    metadata: ActivityMetadata,
    points: PointSeries,
    laps: Option<Vec<Lap>>,
}

impl Activity {
    /// Build an activity from adapter output: clean, infer, summarize.
    ///
    /// The activity starts as its own prototype; route matching reassigns it.
    pub fn from_parsed(
        activity_id: ActivityId,
        parsed: ParsedActivity,
        overrides: &ActivityOverrides,
        config: &InferenceConfig,
        default_type: ActivityType,
    ) -> Result<Self> {
        let canonical = canonicalize_points(&parsed.points)?;
        if let Some(laps) = &parsed.laps {
            validate_laps(laps)?;
        }
        let (points, laps) = infer(&canonical, parsed.laps.as_deref(), config)?;

        let meta = parsed.metadata;
        let date_time = meta.date_time.unwrap_or(points.first().time);
        let activity_type = overrides
            .activity_type
            .or(meta.activity_type)
            .unwrap_or(default_type);

        let mut metadata = summarize(activity_id, date_time, activity_type, &points, laps.as_deref())?;
        metadata.name = overrides.name.clone().or(meta.name);
        metadata.description = overrides.description.clone().or(meta.description);
        metadata.creator = meta.creator;
        metadata.source_file = parsed.source_file;
        metadata.source_format = Some(parsed.source_format);
        metadata.source_hash = Some(parsed.source_hash).filter(|h| !h.is_empty());

        log::debug!(
            "[Activity] Built {} activity from {} ({:.2} km, {} points)",
            metadata.activity_type,
            parsed.adapter,
            metadata.distance_2d_km,
            points.len()
        );

        Ok(Self {
            metadata,
            points,
            laps,
        })
    }

    /// Reassemble an activity from stored parts. Nothing is recomputed.
    pub fn from_stored(
        metadata: ActivityMetadata,
        points: PointSeries,
        laps: Option<Vec<Lap>>,
    ) -> Result<Self> {
        if points.is_empty() {
            return Err(ActivityError::schema(format!(
                "activity {} has no points",
                metadata.activity_id
            )));
        }
        Ok(Self {
            metadata,
            points,
            laps,
        })
    }

    pub fn id(&self) -> ActivityId {
        self.metadata.activity_id
    }

    pub fn metadata(&self) -> &ActivityMetadata {
        &self.metadata
    }

    pub fn points(&self) -> &PointSeries {
        &self.points
    }

    pub fn laps(&self) -> Option<&[Lap]> {
        self.laps.as_deref()
    }

    pub fn prototype_id(&self) -> ActivityId {
        self.metadata.prototype_id
    }

    pub fn is_prototype(&self) -> bool {
        self.metadata.is_prototype()
    }

    /// The only mutation permitted after construction.
    pub(crate) fn set_prototype_id(&mut self, prototype_id: ActivityId) {
        self.metadata.prototype_id = prototype_id;
    }

    /// Give a freshly built, unsaved activity its final id. It remains its
    /// own prototype until matched.
    pub(crate) fn assign_id(&mut self, activity_id: ActivityId) {
        self.metadata.activity_id = activity_id;
        self.metadata.prototype_id = activity_id;
    }

    pub fn split_markers(&self, unit: SplitUnit) -> Vec<SplitMarker> {
        split_markers(&self.points, unit)
    }

    pub fn split_summary(&self, unit: SplitUnit) -> Vec<SplitSummary> {
        split_summary(&self.points, unit)
    }

    pub fn into_parts(self) -> (ActivityMetadata, PointSeries, Option<Vec<Lap>>) {
        (self.metadata, self.points, self.laps)
    }
}

/// Whole-activity metadata from derived points.
fn summarize(
    activity_id: ActivityId,
    date_time: DateTime<Utc>,
    activity_type: ActivityType,
    points: &PointSeries,
    laps: Option<&[Lap]>,
) -> Result<ActivityMetadata> {
    let lats = points.latitudes();
    let lons = points.longitudes();
    let elevations: Vec<Option<f64>> = points.iter().map(|p| p.elevation).collect();

    let center = Center {
        latitude: mean(&lats).unwrap_or_default(),
        longitude: mean(&lons).unwrap_or_default(),
        elevation: mean_present(elevations.iter().copied()),
    };
    let points_std = Spread {
        latitude: sample_std(&lats).unwrap_or(0.0),
        longitude: sample_std(&lons).unwrap_or(0.0),
        elevation: sample_std_present(elevations.iter().copied()),
    };

    let bounds = Bounds::from_points(&points.gps_points())
        .ok_or_else(|| ActivityError::schema("cannot bound an empty point series"))?;

    let distance_m = points.total_distance();
    let duration = seconds_between(date_time, points.last().time);

    let mean_kmph = (duration > 0.0).then(|| (distance_m / KM) / (duration / 3600.0));
    let mean_mph = mean_kmph.map(kmph_to_mph);

    let calories = laps.and_then(|laps| {
        let present: Vec<f64> = laps.iter().filter_map(|l| l.calories).collect();
        (!present.is_empty()).then(|| present.iter().sum())
    });

    Ok(ActivityMetadata {
        activity_id,
        activity_type,
        date_time,
        name: None,
        description: None,
        prototype_id: activity_id,
        distance_2d_km: distance_m / KM,
        distance_2d_mile: distance_m / MILE,
        center,
        points_std,
        bounds,
        duration,
        mean_kmph,
        mean_mph,
        mean_km_pace: mean_kmph.and_then(speed_to_pace),
        mean_mile_pace: mean_mph.and_then(speed_to_pace),
        mean_hr: mean_present(points.iter().map(|p| p.heart_rate)),
        mean_cadence: mean_present(points.iter().map(|p| p.cadence)),
        calories,
        day: date_time.format("%A").to_string(),
        hour: date_time.hour(),
        month: date_time.format("%B").to_string(),
        source_file: None,
        source_format: None,
        source_hash: None,
        creator: None,
    })
}

/// Seconds per unit distance at `speed` units per hour. `None` when stationary.
pub fn speed_to_pace(speed: f64) -> Option<f64> {
    (speed > 0.0).then(|| 3600.0 / speed)
}
