//! # Period Summaries
//!
//! Weekly and monthly grouping of activity metadata, and per-period totals.
//! Weeks start on Monday; months on the 1st (both UTC calendar dates).

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::ActivityMetadata;
use crate::geo_utils::mean_present;
use crate::metrics::kmph_to_mph;

/// Bucket size for time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Week,
    Month,
}

impl Period {
    /// First calendar date of the period containing `dt`.
    pub fn start_of(self, dt: DateTime<Utc>) -> NaiveDate {
        let date = dt.date_naive();
        match self {
            Period::Week => date - Duration::days(date.weekday().num_days_from_monday() as i64),
            Period::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

/// Totals for one non-empty period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub start: NaiveDate,
    pub activity_count: usize,
    /// Seconds
    pub total_duration: f64,
    pub total_distance_km: f64,
    pub total_distance_mile: f64,
    /// Total distance over total duration
    pub mean_kmph: Option<f64>,
    pub mean_mph: Option<f64>,
    /// Mean of the activities' mean heart rates
    pub mean_hr: Option<f64>,
    pub mean_cadence: Option<f64>,
}

/// Group metadata by period start. Empty periods do not appear; order within
/// a period is preserved.
pub fn group_by_period(
    metadata: Vec<ActivityMetadata>,
    period: Period,
) -> BTreeMap<NaiveDate, Vec<ActivityMetadata>> {
    let mut groups: BTreeMap<NaiveDate, Vec<ActivityMetadata>> = BTreeMap::new();
    for md in metadata {
        groups.entry(period.start_of(md.date_time)).or_default().push(md);
    }
    groups
}

/// One summary per non-empty period, oldest first.
pub fn summarize_periods(metadata: &[ActivityMetadata], period: Period) -> Vec<PeriodSummary> {
    let mut groups: BTreeMap<NaiveDate, Vec<&ActivityMetadata>> = BTreeMap::new();
    for md in metadata {
        groups.entry(period.start_of(md.date_time)).or_default().push(md);
    }

    groups
        .into_iter()
        .map(|(start, members)| summarize(start, &members))
        .collect()
}

fn summarize(start: NaiveDate, members: &[&ActivityMetadata]) -> PeriodSummary {
    let total_duration: f64 = members.iter().map(|m| m.duration).sum();
    let total_distance_km: f64 = members.iter().map(|m| m.distance_2d_km).sum();
    let total_distance_mile: f64 = members.iter().map(|m| m.distance_2d_mile).sum();
    let mean_kmph = (total_duration > 0.0).then(|| total_distance_km / (total_duration / 3600.0));

    PeriodSummary {
        start,
        activity_count: members.len(),
        total_duration,
        total_distance_km,
        total_distance_mile,
        mean_kmph,
        mean_mph: mean_kmph.map(kmph_to_mph),
        mean_hr: mean_present(members.iter().map(|m| m.mean_hr)),
        mean_cadence: mean_present(members.iter().map(|m| m.mean_cadence)),
    }
}
