//! Manager over the SQLite store: ingest, reopen the database file, delete.

#![cfg(feature = "persistence")]

mod common;

use activity_matcher::{
    ActivityManager, ActivityStore, ManagerConfig, MetadataQuery, PrototypeChange, SqliteStore,
};
use common::*;
use tempfile::TempDir;

fn open(path: &std::path::Path) -> ActivityManager<SqliteStore> {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = SqliteStore::new(path).expect("failed to open database");
    ActivityManager::new(store, ManagerConfig::default())
}

#[test]
fn test_state_survives_reopen() {
    let dir = TempDir::new().expect("failed to create temp dir");
    let db_path = dir.path().join("activities.db");

    let files = [
        write_file(
            dir.path(),
            "p.gpx",
            gpx("Garmin Connect", Some("Loop"), Some("running"), &circle(1432.0, 300, start_time(2))),
        ),
        write_file(
            dir.path(),
            "m.tcx",
            tcx("Running", &circle(1432.0, 280, start_time(3)), 100),
        ),
        write_file(dir.path(), "other.fit", fit(&circle(700.0, 200, start_time(4)), 50)),
    ];

    let (before, activity_before) = {
        let manager = open(&db_path);
        let reports = manager.add_activities_from_files(&files, &Default::default());
        assert!(reports.iter().all(|r| r.is_ok()), "{:?}", reports);

        assert_eq!(manager.get_metadata(2).unwrap().prototype_id, 1);
        assert_eq!(manager.prototype_ids().unwrap(), vec![1, 3]);
        let before = manager.search_metadata(&MetadataQuery::all()).unwrap();
        let activity = manager.get_activity(2).unwrap();
        (before, activity)
    };

    let manager = open(&db_path);
    assert_eq!(manager.search_metadata(&MetadataQuery::all()).unwrap(), before);
    assert_eq!(manager.prototype_ids().unwrap(), vec![1, 3]);

    let reloaded = manager.get_activity(2).unwrap();
    assert_eq!(*reloaded, *activity_before);
    assert_eq!(reloaded.laps().map(|l| l.len()), Some(3));
    assert_eq!(reloaded.metadata().name, None);
    assert_eq!(manager.get_metadata(1).unwrap().name.as_deref(), Some("Loop"));

    // New ids continue after the stored maximum
    let extra = write_file(
        dir.path(),
        "extra.gpx",
        gpx("Garmin Connect", None, None, &circle(1432.0, 290, start_time(5))),
    );
    let id = manager.add_activity_from_file(&extra, Default::default()).unwrap();
    assert_eq!(id, 4);
    assert_eq!(manager.get_metadata(id).unwrap().prototype_id, 1);
}

#[test]
fn test_promotion_is_persisted() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("activities.db");

    let files: Vec<_> = [(300, 2), (290, 3), (280, 4)]
        .iter()
        .map(|&(n, day)| {
            write_file(
                dir.path(),
                &format!("loop{}.gpx", day),
                gpx("Garmin Connect", None, None, &circle(1432.0, n, start_time(day))),
            )
        })
        .collect();

    {
        let manager = open(&db_path);
        assert!(manager
            .add_activities_from_files(&files, &Default::default())
            .iter()
            .all(|r| r.is_ok()));

        let plan = manager.delete_activity(1).unwrap();
        assert_eq!(
            plan.prototype_change,
            PrototypeChange::Promote {
                new_id: 2,
                repointed: vec![2, 3],
            }
        );
    }

    let store = SqliteStore::new(&db_path).unwrap();
    assert_eq!(store.get_all_activity_ids().unwrap(), vec![2, 3]);
    assert_eq!(store.get_all_prototype_ids().unwrap(), vec![2]);
    assert_eq!(store.load_metadata(3).unwrap().prototype_id, 2);
    assert_eq!(store.get_max_activity_id().unwrap(), Some(3));
    assert!(store.load_points(1).is_err());

    let matches = store
        .search_metadata(&MetadataQuery::matches_of(2))
        .unwrap();
    assert_eq!(
        matches.iter().map(|m| m.activity_id).collect::<Vec<_>>(),
        vec![2, 3]
    );
}
