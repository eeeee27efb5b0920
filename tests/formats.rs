//! Format adapter integration tests: synthetic GPX, TCX and FIT files parsed
//! from disk and turned into activities.

mod common;

use activity_matcher::{
    parse_bytes, parse_file, Activity, ActivityError, ActivityManager, ActivityOverrides,
    ActivityType, InferenceConfig, ManagerConfig, MemoryStore, SourceFormat, SplitUnit,
};
use common::*;
use tempfile::TempDir;

fn build(parsed: activity_matcher::ParsedActivity) -> Activity {
    Activity::from_parsed(
        1,
        parsed,
        &ActivityOverrides::default(),
        &InferenceConfig::default(),
        ActivityType::Activity,
    )
    .expect("failed to build activity")
}

#[test]
fn test_fit_crc_helper() {
    // CRC-16/ARC check value
    assert_eq!(fit_crc(b"123456789"), 0xBB3D);
}

// ============================================================================
// GPX
// ============================================================================

#[test]
fn test_gpx_creator_flavors() {
    let samples = circle(500.0, 40, start_time(2));
    let cases = [
        ("StravaGPX iPhone", Some("9"), None, "gpx:strava", ActivityType::Run),
        ("Garmin Connect", Some("hiking"), None, "gpx:garmin", ActivityType::Hike),
        ("Runkeeper - http://www.runkeeper.com", None, Some("Walking 4/2/21"), "gpx:runkeeper", ActivityType::Walk),
        ("SomeOtherApp", Some("run"), None, "gpx:generic", ActivityType::Run),
        ("SomeOtherApp", Some("kayaking"), None, "gpx:generic", ActivityType::Activity),
    ];

    for (creator, track_type, name, adapter, expected) in cases {
        let text = gpx(creator, name, track_type, &samples);
        let parsed = parse_bytes("a.gpx", text.as_bytes()).expect("parse failed");
        assert_eq!(parsed.adapter, adapter, "creator {}", creator);
        let activity = build(parsed);
        assert_eq!(activity.metadata().activity_type, expected, "creator {}", creator);
    }
}

#[test]
fn test_gpx_extensions_and_metadata() {
    let samples = circle(500.0, 40, start_time(2));
    let parsed = parse_bytes(
        "a.gpx",
        gpx("Garmin Connect", Some("Lunch Run"), Some("running"), &samples).as_bytes(),
    )
    .unwrap();

    assert_eq!(parsed.points.len(), 40);
    assert_eq!(parsed.points[0].heart_rate, Some(140.0));
    assert_eq!(parsed.points[0].cadence, Some(85.0));
    assert_eq!(parsed.metadata.name.as_deref(), Some("Lunch Run"));
    assert_eq!(parsed.metadata.date_time, Some(start_time(2)));
    assert_eq!(parsed.metadata.creator.as_deref(), Some("Garmin Connect"));
    assert_eq!(parsed.source_format, SourceFormat::Gpx);
    assert_eq!(parsed.source_hash.len(), 64);
}

#[test]
fn test_backfill_leading_points_without_position() {
    let mut samples = circle(500.0, 20, start_time(2));
    for s in samples.iter_mut().take(3) {
        s.lat = None;
        s.lon = None;
        s.hr = None;
    }
    let fourth = samples[3].clone();

    let parsed = parse_bytes("d.gpx", gpx("Garmin Connect", None, None, &samples).as_bytes())
        .expect("parse failed");
    assert_eq!(parsed.points.len(), 20);
    for (i, p) in parsed.points.iter().take(3).enumerate() {
        assert!((p.latitude.unwrap() - fourth.lat.unwrap()).abs() < 1e-7);
        assert!((p.longitude.unwrap() - fourth.lon.unwrap()).abs() < 1e-7);
        // Own fields are kept, missing ones come from the fourth sample
        assert_eq!(p.time, Some(samples[i].time));
        assert!((p.elevation.unwrap() - samples[i].ele.unwrap()).abs() < 0.06);
        assert_eq!(p.heart_rate, fourth.hr.map(f64::from));
    }

    let activity = build(parsed);
    assert_eq!(activity.points().len(), 20);
    let times: Vec<_> = activity.points().iter().map(|p| p.time).collect();
    let expected: Vec<_> = samples.iter().map(|s| s.time).collect();
    assert_eq!(times, expected);
}

#[test]
fn test_malformed_and_unsupported_files() {
    let dir = TempDir::new().expect("failed to create temp dir");

    let broken = write_file(dir.path(), "broken.gpx", "<gpx creator=\"x\"><trk>");
    let err = parse_file(&broken).unwrap_err();
    assert!(matches!(err, ActivityError::Parse { .. }));
    assert!(err.to_string().contains("broken.gpx"));

    let empty = write_file(dir.path(), "empty.gpx", gpx("Garmin Connect", None, None, &[]));
    assert!(matches!(parse_file(&empty), Err(ActivityError::Parse { .. })));

    let notes = write_file(dir.path(), "notes.txt", "hello");
    assert!(matches!(
        parse_file(&notes),
        Err(ActivityError::UnsupportedFormat { .. })
    ));

    let missing = dir.path().join("missing.gpx");
    assert!(matches!(parse_file(&missing), Err(ActivityError::Io { .. })));
}

#[test]
fn test_trackpoint_without_time_is_parse_error() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let samples = circle(500.0, 20, start_time(2));
    let stamp = format!("<time>{}</time>", samples[1].time.format("%Y-%m-%dT%H:%M:%SZ"));
    let text = gpx("Garmin Connect", None, None, &samples);
    assert!(text.contains(&stamp));
    let path = write_file(dir.path(), "untimed.gpx", text.replacen(&stamp, "", 1));

    match parse_file(&path) {
        Err(ActivityError::Parse { path: p, adapter, message }) => {
            assert_eq!(p, path);
            assert_eq!(adapter, "gpx:garmin");
            assert_eq!(message, "point 1 has no timestamp");
        }
        other => panic!("expected parse error, got {:?}", other),
    }

    let manager = ActivityManager::new(MemoryStore::new(), ManagerConfig::default());
    let err = manager
        .add_activity_from_file(&path, Default::default())
        .unwrap_err();
    assert!(err.is_parse_failure());
    assert!(err.to_string().contains("untimed.gpx"));
    assert!(manager.activity_ids().unwrap().is_empty());
}

#[test]
fn test_tcx_trackpoint_without_time_is_parse_error() {
    let samples = circle(500.0, 20, start_time(2));
    let stamp = format!("<Time>{}</Time>", samples[4].time.format("%Y-%m-%dT%H:%M:%SZ"));
    let text = tcx("Running", &samples, 10);
    assert!(text.contains(&stamp));

    let err = parse_bytes("untimed.tcx", text.replacen(&stamp, "", 1).as_bytes()).unwrap_err();
    assert!(matches!(
        err,
        ActivityError::Parse { ref adapter, ref message, .. }
            if adapter == "tcx" && message == "point 4 has no timestamp"
    ));
}

#[test]
fn test_out_of_range_coordinates_are_parse_errors() {
    let mut samples = circle(500.0, 20, start_time(2));
    samples[3].lat = Some(91.5);
    let err = parse_bytes("pole.gpx", gpx("Garmin Connect", None, None, &samples).as_bytes())
        .unwrap_err();
    assert!(matches!(
        err,
        ActivityError::Parse { ref message, .. } if message.contains("point 3 has invalid coordinates")
    ));
}

// ============================================================================
// TCX
// ============================================================================

#[test]
fn test_tcx_laps_completed_from_points() {
    let mut samples = circle(500.0, 60, start_time(2));
    for s in &mut samples {
        s.speed = Some(3.0);
    }
    let dir = TempDir::new().unwrap();
    let path = write_file(dir.path(), "laps.tcx", tcx("Running", &samples, 20));

    let parsed = parse_file(&path).expect("parse failed");
    assert_eq!(parsed.adapter, "tcx");
    assert_eq!(parsed.metadata.activity_type, Some(ActivityType::Run));
    assert_eq!(parsed.points[25].lap, Some(2));

    let activity = build(parsed);
    let laps = activity.laps().expect("tcx activity has laps");
    assert_eq!(laps.len(), 3);
    assert_eq!(laps[0].calories, Some(50.0));
    assert_eq!(laps[1].start_time, Some(samples[20].time));
    // Duration runs to the next lap's start; the last lap to the final point
    assert_eq!(laps[0].duration, Some(100.0));
    assert_eq!(laps[2].duration, Some(95.0));
    assert!(laps.iter().all(|l| l.distance.unwrap() > 0.0));
    assert_eq!(activity.metadata().calories, Some(150.0));

    // Device speed is used as reported
    let p = &activity.points().points()[10];
    assert!((p.kmph.unwrap() - 10.8).abs() < 1e-9);
}

// ============================================================================
// FIT
// ============================================================================

#[test]
fn test_fit_records_laps_and_session() {
    let samples = circle(800.0, 120, start_time(2));
    let parsed = parse_bytes("run.fit", &fit(&samples, 50)).expect("fit parse failed");

    assert_eq!(parsed.adapter, "fit");
    assert_eq!(parsed.points.len(), 120);
    assert_eq!(parsed.metadata.activity_type, Some(ActivityType::Run));
    assert_eq!(parsed.metadata.date_time, Some(start_time(2)));

    let laps = parsed.laps.as_ref().expect("fit laps");
    assert_eq!(laps.len(), 3);
    assert_eq!(parsed.points[0].lap, Some(1));
    assert_eq!(parsed.points[60].lap, Some(2));
    assert_eq!(parsed.points[119].lap, Some(3));

    let p = &parsed.points[7];
    assert!((p.latitude.unwrap() - samples[7].lat.unwrap()).abs() < 1e-6);
    assert!((p.elevation.unwrap() - samples[7].ele.unwrap()).abs() < 0.2);
    assert_eq!(p.heart_rate, samples[7].hr.map(f64::from));
}

#[test]
fn test_fit_and_gpx_of_same_session_agree() {
    let samples = circle(1432.0, 300, start_time(2));
    let from_gpx = build(
        parse_bytes("s.gpx", gpx("Garmin Connect", None, Some("running"), &samples).as_bytes())
            .unwrap(),
    );
    let from_fit = build(parse_bytes("s.fit", &fit(&samples, 100)).unwrap());

    let (g, f) = (from_gpx.metadata(), from_fit.metadata());
    assert!(
        (g.distance_2d_km - f.distance_2d_km).abs() / g.distance_2d_km < 0.001,
        "gpx {} km vs fit {} km",
        g.distance_2d_km,
        f.distance_2d_km
    );
    assert!((g.duration - f.duration).abs() <= 3.0);
    assert_eq!(g.activity_type, f.activity_type);
}

// ============================================================================
// Inference
// ============================================================================

#[test]
fn test_inference_is_idempotent() {
    let samples = circle(1000.0, 150, start_time(2));
    let text = gpx("Garmin Connect", None, None, &samples);

    let first = build(parse_bytes("a.gpx", text.as_bytes()).unwrap());
    let second = build(parse_bytes("a.gpx", text.as_bytes()).unwrap());
    assert_eq!(first.points(), second.points());
    assert_eq!(first.metadata(), second.metadata());
}

#[test]
fn test_km_splits_cover_distance() {
    let samples = circle(1000.0, 300, start_time(2));
    let activity = build(parse_bytes("a.gpx", gpx("Garmin Connect", None, None, &samples).as_bytes()).unwrap());

    let total_km = activity.metadata().distance_2d_km;
    let splits = activity.split_summary(SplitUnit::Km);
    assert_eq!(splits.len(), total_km.ceil() as usize);
    let covered: f64 = splits.iter().map(|s| s.distance).sum();
    assert!((covered - total_km * 1000.0).abs() < 1.0);

    let markers = activity.split_markers(SplitUnit::Km);
    assert_eq!(markers.len(), total_km.floor() as usize);
    assert!(markers.windows(2).all(|w| w[0].time < w[1].time));
}
