//! # Algorithm Toolbox
//!
//! Direct access to the standalone algorithms, for hosts that want to run
//! one step without an [`ActivityManager`](crate::ActivityManager) or store.
//!
//! ## Core Algorithms
//!
//! - **Metric Inference**: distance, speed, pace and lap completion
//! - **Splits**: interpolated km/mile boundary markers and per-split means
//! - **Loose Match**: spread and length filter
//! - **Tight Match**: z-normalized Dynamic Time Warping
//! - **Prototype Resolution**: best tight match among loose survivors
//! - **Deletion Planning**: prototype promotion on delete
//!
//! ## Geographic Utilities
//!
//! - **Haversine Distance**: great-circle distance on a 6378.137 km sphere
//! - **Column Statistics**: means and sample standard deviations that skip
//!   missing values
//!
//! # Example
//!
//! ```rust
//! use activity_matcher::algorithms::{dtw_distance, haversine_distance, NormalizedTrack, ZNormAxis};
//!
//! let d = haversine_distance(51.5074, -0.1278, 48.8566, 2.3522);
//! println!("London to Paris: {:.0} km", d / 1000.0);
//!
//! let a = NormalizedTrack::from_coords(&[51.0, 51.1, 51.2], &[0.0, 0.1, 0.2], ZNormAxis::PerAxis);
//! assert_eq!(dtw_distance(&a, &a, None, None), Some(0.0));
//! ```

// =============================================================================
// Core Types (re-exported from lib)
// =============================================================================

pub use crate::{
    Bounds, GpsPoint, InferenceConfig, Lap, MatchConfig, Point, PointSeries, ZNormAxis,
};

// =============================================================================
// Geographic Utilities
// =============================================================================

pub use crate::geo_utils::{
    haversine_distance, lerp, mean, mean_present, norm_length_diff, sample_std,
    sample_std_present, EARTH_RADIUS_M,
};

// =============================================================================
// Metric Inference
// =============================================================================

/// Derive every per-point column and complete the laps.
pub use crate::metrics::{complete_laps, infer, infer_points};

/// Drop duplicate timestamps and check mandatory fields.
pub use crate::records::{canonicalize_points, BackfillBuffer};

// =============================================================================
// Splits
// =============================================================================

pub use crate::splits::{split_markers, split_summary, SplitMarker, SplitSummary, SplitUnit};

// =============================================================================
// Route Matching
// =============================================================================

/// Loose filter: positional spread within `center_threshold` meters and
/// normalized length difference below `length_threshold`.
pub use crate::matching::{loose_match, norm_spread_distance};

/// DTW over z-normalized tracks, divided by the mean series length.
pub use crate::matching::{dtw_distance, tight_match, CancelToken, NormalizedTrack, TightMatch};

/// Prototype resolution and deletion planning.
pub use crate::matching::{
    find_prototype, plan_deletion, DeletionPlan, MatchOutcome, PrototypeChange,
};

// =============================================================================
// Summaries
// =============================================================================

pub use crate::summary::{group_by_period, summarize_periods, Period, PeriodSummary};
