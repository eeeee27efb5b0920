//! Per-source activity-type vocabularies mapped onto [`ActivityType`].

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::ActivityType;

/// Strava encodes the activity type as a numeric string in `<trk><type>`.
static STRAVA_TYPES: Lazy<HashMap<&'static str, ActivityType>> = Lazy::new(|| {
    HashMap::from([
        ("4", ActivityType::Hike),
        ("9", ActivityType::Run),
        ("10", ActivityType::Walk),
    ])
});

/// Garmin Connect GPX `<type>`, FIT `sport` and TCX `Sport`, lowercased.
static DEVICE_TYPES: Lazy<HashMap<&'static str, ActivityType>> = Lazy::new(|| {
    HashMap::from([
        ("running", ActivityType::Run),
        ("walking", ActivityType::Walk),
        ("hiking", ActivityType::Hike),
        ("cycling", ActivityType::Cycle),
        ("biking", ActivityType::Cycle),
        ("other", ActivityType::Activity),
    ])
});

/// Runkeeper names tracks like "Running 4/2/21 7:02 am".
static RUNKEEPER_TYPES: Lazy<HashMap<&'static str, ActivityType>> = Lazy::new(|| {
    HashMap::from([
        ("running", ActivityType::Run),
        ("walking", ActivityType::Walk),
        ("hiking", ActivityType::Hike),
        ("cycling", ActivityType::Cycle),
    ])
});

/// Accept a value that already is one of the canonical names.
pub fn canonical(raw: &str) -> Option<ActivityType> {
    raw.trim().to_ascii_lowercase().parse().ok()
}

pub fn from_strava(raw: &str) -> Option<ActivityType> {
    STRAVA_TYPES.get(raw.trim()).copied()
}

/// Device vocabulary (Garmin GPX, FIT, TCX). Case-insensitive.
pub fn from_device(raw: &str) -> Option<ActivityType> {
    DEVICE_TYPES
        .get(raw.trim().to_ascii_lowercase().as_str())
        .copied()
}

/// Runkeeper: first word of the track name.
pub fn from_runkeeper_name(name: &str) -> Option<ActivityType> {
    let first = name.split_whitespace().next()?.to_ascii_lowercase();
    RUNKEEPER_TYPES.get(first.as_str()).copied()
}
