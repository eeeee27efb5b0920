//! Tunable parameters for metric inference, route matching and the manager.
//!
//! All structs implement `Default` and serde, so a host can load them from
//! whatever serde format it already uses.

use serde::{Deserialize, Serialize};

use crate::{ActivityError, ActivityType, Result};

/// How latitude/longitude series are z-normalized before DTW.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZNormAxis {
    /// Each axis normalized by its own mean and standard deviation.
    #[default]
    PerAxis,
    /// One mean/stdev computed over the concatenated lat+lon values.
    Shared,
}

/// Configuration for route matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Maximum distance (meters) between the two activities' positional spread values.
    /// Default: 1000.0
    pub center_threshold: f64,

    /// Maximum relative length difference `|l1-l2| / mean(l1,l2)`.
    /// Default: 0.1
    pub length_threshold: f64,

    /// Maximum DTW distance between z-normalized tracks, divided by mean track length.
    /// Default: 0.3
    pub tight_threshold: f64,

    /// Normalization strategy for tight matching.
    pub znorm_axis: ZNormAxis,

    /// Optional Sakoe-Chiba band half-width (points). `None` runs full DTW.
    pub dtw_window: Option<usize>,

    /// Optional wall-clock budget for a single DTW comparison.
    pub dtw_time_budget_ms: Option<u64>,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            center_threshold: 1000.0,
            length_threshold: 0.1,
            tight_threshold: 0.3,
            znorm_axis: ZNormAxis::PerAxis,
            dtw_window: None,
            dtw_time_budget_ms: None,
        }
    }
}

/// Configuration for per-point metric derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Number of points spanned by interval speed/pace.
    /// Default: 5
    pub speed_measure_interval: usize,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            speed_measure_interval: 5,
        }
    }
}

/// Configuration for [`crate::ActivityManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub match_config: MatchConfig,
    pub inference_config: InferenceConfig,

    /// Activities kept in the in-memory cache.
    /// Default: 100
    pub cache_capacity: usize,

    /// Type used when neither the file nor the caller names one.
    pub default_activity_type: ActivityType,

    /// Refuse files whose SHA-256 matches an already-stored activity.
    pub reject_duplicate_sources: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            match_config: MatchConfig::default(),
            inference_config: InferenceConfig::default(),
            cache_capacity: 100,
            default_activity_type: ActivityType::Activity,
            reject_duplicate_sources: false,
        }
    }
}

impl ManagerConfig {
    /// Parse a JSON config. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| ActivityError::invalid_parameter("config", e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ActivityError::invalid_parameter("config", e.to_string()))
    }
}
