//! # Activity Matcher
//!
//! Ingestion, metric inference and route matching for recorded exercise
//! activities.
//!
//! This library provides:
//! - Format adapters turning GPX, TCX and FIT files into one canonical point/lap stream
//! - Metric inference (distance, pace, speed, laps, km/mile splits)
//! - Route matching that clusters activities of the same physical route under a
//!   shared *prototype*, using a cheap loose filter followed by normalized
//!   Dynamic Time Warping
//! - An [`ActivityManager`] orchestrating ingest, deletion and search against a
//!   pluggable [`ActivityStore`]
//!
//! ## Features
//!
//! - **`parallel`** - Parse and infer batches of files on a rayon pool
//! - **`persistence`** - SQLite-backed [`ActivityStore`]
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use activity_matcher::{ActivityManager, ManagerConfig, MemoryStore};
//!
//! let manager = ActivityManager::new(MemoryStore::new(), ManagerConfig::default());
//! let id = manager.add_activity_from_file("morning_run.gpx", Default::default())?;
//! let metadata = manager.get_metadata(id)?;
//! println!(
//!     "{:.2} km, prototype {}",
//!     metadata.distance_2d_km, metadata.prototype_id
//! );
//! # Ok::<(), activity_matcher::ActivityError>(())
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use geo::{BoundingRect, Coord, LineString};
use serde::{Deserialize, Serialize};

// Unified error handling
pub mod error;
pub use error::{ActivityError, OptionExt, Result};

// Tunable parameters for inference and matching
pub mod config;
pub use config::{InferenceConfig, ManagerConfig, MatchConfig, ZNormAxis};

// Geographic utilities (distance, statistics, interpolation)
pub mod geo_utils;

// Canonical pre-metric records shared by all format adapters
pub mod records;
pub use records::{CanonicalPoint, ParsedActivity, PartialMetadata, RawLap, RawPoint};

// Format adapters (GPX, TCX, FIT)
pub mod parse;
pub use parse::{parse_bytes, parse_file, AdapterRegistry, FormatAdapter};

// Metric inference engine
pub mod metrics;
pub use metrics::{infer, Lap, Point, PointSeries};

// Distance-based splits (km / mile)
pub mod splits;
pub use splits::{split_markers, split_summary, SplitMarker, SplitSummary, SplitUnit};

// Activity aggregate
pub mod activity;
pub use activity::{Activity, ActivityMetadata, ActivityOverrides, Center, Spread};

// Route matching (loose filter + normalized DTW)
pub mod matching;
pub use matching::{
    find_prototype, loose_match, plan_deletion, tight_match, CancelToken, DeletionPlan,
    MatchOutcome, NormalizedTrack, PrototypeChange, TightMatch,
};

// LRU cache for efficient memory management
pub mod lru_cache;

// Activity cache with invalidation hooks
pub mod cache;
pub use cache::ActivityCache;

// Persistence collaborator interface and in-memory implementation
pub mod store;
pub use store::{ActivityStore, MemoryStore, MetadataQuery};

// SQLite-backed store
#[cfg(feature = "persistence")]
pub mod persistence;
#[cfg(feature = "persistence")]
pub use persistence::SqliteStore;

// Period summaries over activity metadata
pub mod summary;
pub use summary::{group_by_period, summarize_periods, Period, PeriodSummary};

// Orchestration of ingest, matching and deletion
pub mod manager;
pub use manager::{ActivityManager, IngestReport};

// Algorithm toolbox - modular access to all algorithms
pub mod algorithms;

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a stored activity. Allocated as `max(existing) + 1`.
pub type ActivityId = i64;

/// Metres in a kilometre.
pub const KM: f64 = 1000.0;

/// Metres in a statute mile.
pub const MILE: f64 = 1609.344;

/// A GPS coordinate with latitude and longitude.
///
/// # Example
/// ```
/// use activity_matcher::GpsPoint;
/// let point = GpsPoint::new(51.5074, -0.1278); // London
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPoint {
    /// Create a new GPS point.
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Check if the point has valid coordinates.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.latitude >= -90.0
            && self.latitude <= 90.0
            && self.longitude >= -180.0
            && self.longitude <= 180.0
    }
}

/// Bounding box of an activity's track.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Bounds {
    /// Create bounds from GPS points. Returns `None` for an empty slice.
    pub fn from_points(points: &[GpsPoint]) -> Option<Self> {
        let line: LineString<f64> = points
            .iter()
            .map(|p| Coord {
                x: p.longitude,
                y: p.latitude,
            })
            .collect();
        let rect = line.bounding_rect()?;
        Some(Self {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lng: rect.min().x,
            max_lng: rect.max().x,
        })
    }

    /// Get the center point of the bounds.
    pub fn center(&self) -> GpsPoint {
        GpsPoint::new(
            (self.min_lat + self.max_lat) / 2.0,
            (self.min_lng + self.max_lng) / 2.0,
        )
    }
}

/// Canonical activity types. Every adapter maps its own vocabulary onto these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityType {
    Run,
    Walk,
    Hike,
    Cycle,
    /// Generic fallback for anything unmapped
    #[default]
    Activity,
}

impl ActivityType {
    pub const ALL: [ActivityType; 5] = [
        ActivityType::Run,
        ActivityType::Walk,
        ActivityType::Hike,
        ActivityType::Cycle,
        ActivityType::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityType::Run => "run",
            ActivityType::Walk => "walk",
            ActivityType::Hike => "hike",
            ActivityType::Cycle => "cycle",
            ActivityType::Activity => "activity",
        }
    }
}

impl fmt::Display for ActivityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityType {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self> {
        ActivityType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| ActivityError::invalid_parameter("activity_type", s))
    }
}

/// File format an activity was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Gpx,
    Tcx,
    Fit,
}

impl SourceFormat {
    /// Determine the format from a file extension (case-insensitive).
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "gpx" => Some(SourceFormat::Gpx),
            "tcx" => Some(SourceFormat::Tcx),
            "fit" => Some(SourceFormat::Fit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Gpx => "gpx",
            SourceFormat::Tcx => "tcx",
            SourceFormat::Fit => "fit",
        }
    }
}

impl fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceFormat {
    type Err = ActivityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gpx" => Ok(SourceFormat::Gpx),
            "tcx" => Ok(SourceFormat::Tcx),
            "fit" => Ok(SourceFormat::Fit),
            other => Err(ActivityError::invalid_parameter("source_format", other)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
