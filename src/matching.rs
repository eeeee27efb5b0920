//! # Route Matching
//!
//! Decides which prototype an activity belongs to, in two phases:
//!
//! 1. **Loose match**: a cheap filter on positional spread and total length.
//! 2. **Tight match**: Dynamic Time Warping between the two z-normalized
//!    latitude/longitude series, divided by the mean series length. Only
//!    evaluated for loose-match survivors.
//!
//! Also plans prototype-set maintenance when an activity is deleted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityMetadata};
use crate::config::{MatchConfig, ZNormAxis};
use crate::error::Result;
use crate::geo_utils::{haversine_distance, mean, norm_length_diff, sample_std};
use crate::metrics::PointSeries;
use crate::{ActivityError, ActivityId};

// ============================================================================
// Cancellation
// ============================================================================

/// Shared flag that aborts in-flight DTW comparisons.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Checked once per DTW row.
struct Interrupt<'a> {
    cancel: Option<&'a CancelToken>,
    deadline: Option<Instant>,
}

impl Interrupt<'_> {
    fn triggered(&self) -> bool {
        self.cancel.is_some_and(CancelToken::is_cancelled)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

// ============================================================================
// Loose match
// ============================================================================

/// Great-circle distance (meters) between the two activities' positional
/// spread values, each `(stdev latitude, stdev longitude)` read as a coordinate.
///
/// This is what loose matching compares. Two tracks of the same shape and
/// size have near-identical spread wherever they are.
pub fn norm_spread_distance(a: &ActivityMetadata, b: &ActivityMetadata) -> f64 {
    haversine_distance(
        a.points_std.latitude,
        a.points_std.longitude,
        b.points_std.latitude,
        b.points_std.longitude,
    )
}

/// Cheap necessary condition for two activities sharing a route.
pub fn loose_match(a: &ActivityMetadata, b: &ActivityMetadata, config: &MatchConfig) -> bool {
    norm_spread_distance(a, b) < config.center_threshold
        && norm_length_diff(a.distance_2d_km, b.distance_2d_km) < config.length_threshold
}

// ============================================================================
// Tight match
// ============================================================================

/// Z-normalized latitude/longitude series, ready for DTW.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedTrack {
    lat: Vec<f64>,
    lon: Vec<f64>,
}

impl NormalizedTrack {
    pub fn from_series(series: &PointSeries, axis: ZNormAxis) -> Self {
        Self::from_coords(&series.latitudes(), &series.longitudes(), axis)
    }

    /// Normalize raw coordinates.
    pub fn from_coords(lat: &[f64], lon: &[f64], axis: ZNormAxis) -> Self {
        match axis {
            ZNormAxis::PerAxis => Self {
                lat: znorm(lat, moments(lat)),
                lon: znorm(lon, moments(lon)),
            },
            ZNormAxis::Shared => {
                let combined: Vec<f64> = lat.iter().chain(lon.iter()).copied().collect();
                let m = moments(&combined);
                Self {
                    lat: znorm(lat, m),
                    lon: znorm(lon, m),
                }
            }
        }
    }

    /// Wrap series that are already normalized.
    pub fn from_normalized(lat: Vec<f64>, lon: Vec<f64>) -> Self {
        Self { lat, lon }
    }

    pub fn len(&self) -> usize {
        self.lat.len().min(self.lon.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn cost(&self, i: usize, other: &NormalizedTrack, j: usize) -> f64 {
        let d_lat = self.lat[i] - other.lat[j];
        let d_lon = self.lon[i] - other.lon[j];
        (d_lat * d_lat + d_lon * d_lon).sqrt()
    }
}

/// Mean and divisor for z-normalization. A zero or undefined stdev divides by 1.
fn moments(values: &[f64]) -> (f64, f64) {
    let m = mean(values).unwrap_or(0.0);
    let sd = sample_std(values)
        .filter(|s| s.is_finite() && *s > 0.0)
        .unwrap_or(1.0);
    (m, sd)
}

fn znorm(values: &[f64], (m, sd): (f64, f64)) -> Vec<f64> {
    values.iter().map(|v| (v - m) / sd).collect()
}

/// Result of one tight comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TightMatch {
    /// DTW distance divided by the mean series length
    pub distance: f64,
    pub matched: bool,
}

/// Exact DTW with Euclidean point cost over rolling rows.
///
/// With `window`, only cells within `max(window, |n - m|)` of the diagonal are
/// visited (Sakoe-Chiba band). Returns `None` if interrupted.
fn dtw(
    a: &NormalizedTrack,
    b: &NormalizedTrack,
    window: Option<usize>,
    interrupt: &Interrupt<'_>,
) -> Option<f64> {
    let n = a.len();
    let m = b.len();
    if n == 0 || m == 0 {
        return Some(if n == m { 0.0 } else { f64::INFINITY });
    }

    let band = window.map(|w| w.max(n.abs_diff(m)));
    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for i in 1..=n {
        if interrupt.triggered() {
            return None;
        }
        curr.fill(f64::INFINITY);

        let (lo, hi) = match band {
            Some(w) => (i.saturating_sub(w).max(1), (i + w).min(m)),
            None => (1, m),
        };

        for j in lo..=hi {
            let best = prev[j].min(curr[j - 1]).min(prev[j - 1]);
            curr[j] = a.cost(i - 1, b, j - 1) + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    Some(prev[m])
}

/// DTW distance between two normalized tracks. `None` if interrupted.
pub fn dtw_distance(
    a: &NormalizedTrack,
    b: &NormalizedTrack,
    window: Option<usize>,
    cancel: Option<&CancelToken>,
) -> Option<f64> {
    dtw(a, b, window, &Interrupt { cancel, deadline: None })
}

/// Shape comparison of two normalized tracks.
///
/// Returns `None` when cancelled or when the configured time budget ran out.
pub fn tight_match(
    a: &NormalizedTrack,
    b: &NormalizedTrack,
    config: &MatchConfig,
    cancel: Option<&CancelToken>,
) -> Option<TightMatch> {
    let interrupt = Interrupt {
        cancel,
        deadline: config
            .dtw_time_budget_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
    };
    let raw = dtw(a, b, config.dtw_window, &interrupt)?;

    let mean_len = (a.len() + b.len()) as f64 / 2.0;
    let distance = if mean_len > 0.0 { raw / mean_len } else { 0.0 };

    Some(TightMatch {
        distance,
        matched: distance < config.tight_threshold,
    })
}

// ============================================================================
// Prototype resolution
// ============================================================================

/// Trace of one `find_prototype` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchOutcome {
    /// Chosen prototype; `None` means the activity becomes a new prototype
    pub prototype_id: Option<ActivityId>,
    /// Prototypes that passed the loose filter, in candidate order
    pub loose_matches: Vec<ActivityId>,
    /// Every tight comparison run, as `(prototype, normalized DTW distance)`
    pub tight_evaluations: Vec<(ActivityId, f64)>,
}

impl MatchOutcome {
    pub fn is_new_prototype(&self) -> bool {
        self.prototype_id.is_none()
    }

    /// Prototype id to record for `activity_id`.
    pub fn resolve(&self, activity_id: ActivityId) -> ActivityId {
        self.prototype_id.unwrap_or(activity_id)
    }
}

/// Find the prototype `activity` should adopt among `prototypes`.
///
/// `load_track` supplies a prototype's normalized track and is only called for
/// loose-match survivors. With several tight matches the smallest distance
/// wins; on a tie the earlier candidate wins.
pub fn find_prototype<F>(
    activity: &Activity,
    activity_track: &NormalizedTrack,
    prototypes: &[ActivityMetadata],
    mut load_track: F,
    config: &MatchConfig,
    cancel: Option<&CancelToken>,
) -> Result<MatchOutcome>
where
    F: FnMut(ActivityId) -> Result<Arc<NormalizedTrack>>,
{
    let me = activity.metadata();
    let mut outcome = MatchOutcome::default();
    let mut best: Option<(ActivityId, f64)> = None;

    for proto in prototypes.iter().filter(|p| p.activity_id != me.activity_id) {
        if !loose_match(me, proto, config) {
            continue;
        }
        outcome.loose_matches.push(proto.activity_id);

        let proto_track = load_track(proto.activity_id)?;
        let result = tight_match(activity_track, &proto_track, config, cancel).ok_or(
            ActivityError::Cancelled {
                activity_id: me.activity_id,
            },
        )?;
        outcome
            .tight_evaluations
            .push((proto.activity_id, result.distance));

        log::debug!(
            "[Matching] {} vs prototype {}: ndtw={:.4} matched={}",
            me.activity_id,
            proto.activity_id,
            result.distance,
            result.matched
        );

        if result.matched && best.map_or(true, |(_, d)| result.distance < d) {
            best = Some((proto.activity_id, result.distance));
        }
    }

    outcome.prototype_id = best.map(|(id, _)| id);
    Ok(outcome)
}

// ============================================================================
// Deletion planning
// ============================================================================

/// Effect of a deletion on the prototype set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrototypeChange {
    /// The deleted activity was not a prototype
    Unchanged,
    /// The deleted prototype had no remaining matches
    Remove,
    /// `new_id` becomes the prototype and every id in `repointed` (which
    /// includes `new_id`) adopts it
    Promote {
        new_id: ActivityId,
        repointed: Vec<ActivityId>,
    },
}

/// Everything a store must apply atomically to delete one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionPlan {
    pub activity_id: ActivityId,
    pub prototype_change: PrototypeChange,
}

/// Plan the deletion of `deleted`.
///
/// `matches` are the other activities sharing its prototype id, in search
/// order; the first is promoted.
pub fn plan_deletion(deleted: &ActivityMetadata, matches: &[ActivityId]) -> DeletionPlan {
    let remaining: Vec<ActivityId> = matches
        .iter()
        .copied()
        .filter(|&id| id != deleted.activity_id)
        .collect();

    let prototype_change = if !deleted.is_prototype() {
        PrototypeChange::Unchanged
    } else if let Some(&new_id) = remaining.first() {
        PrototypeChange::Promote {
            new_id,
            repointed: remaining,
        }
    } else {
        PrototypeChange::Remove
    };

    DeletionPlan {
        activity_id: deleted.activity_id,
        prototype_change,
    }
}
