//! # SQLite Activity Store
//!
//! [`ActivityStore`] backed by a single SQLite database.
//!
//! ## Layout
//!
//! - `activities`: one row per activity. Filter columns (`prototype_id`,
//!   `activity_type`, `date_time`, `source_hash`) plus the full metadata as a
//!   MessagePack blob. The `prototype_id` column is authoritative.
//! - `tracks`: derived points, MessagePack blob, loaded on demand.
//! - `laps`: derived laps, present only for activities that have them.
//! - `prototypes`: the prototype set.
//!
//! Saves and deletion plans run inside one transaction each.

use std::path::Path;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction};

use crate::activity::{Activity, ActivityMetadata};
use crate::error::Result;
use crate::matching::{DeletionPlan, PrototypeChange};
use crate::metrics::{Lap, PointSeries};
use crate::store::{ActivityStore, MetadataQuery};
use crate::{ActivityError, ActivityId, ActivityType};

const DAY_MS: i64 = 86_400_000;

/// SQLite-backed activity store.
pub struct SqliteStore {
    db: Connection,
}

impl SqliteStore {
    // ========================================================================
    // Initialization
    // ========================================================================

    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db = Connection::open(db_path.as_ref())?;
        Self::init_schema(&db)?;
        log::info!(
            "[SqliteStore] Opened {}",
            db_path.as_ref().display()
        );
        Ok(Self { db })
    }

    /// In-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self { db })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS activities (
                activity_id INTEGER PRIMARY KEY,
                prototype_id INTEGER NOT NULL,
                activity_type TEXT NOT NULL,
                date_time INTEGER NOT NULL,
                source_hash TEXT,
                metadata BLOB NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracks (
                activity_id INTEGER PRIMARY KEY,
                points BLOB NOT NULL,
                point_count INTEGER NOT NULL,
                FOREIGN KEY (activity_id) REFERENCES activities(activity_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS laps (
                activity_id INTEGER PRIMARY KEY,
                laps BLOB NOT NULL,
                FOREIGN KEY (activity_id) REFERENCES activities(activity_id) ON DELETE CASCADE
            );

            CREATE TABLE IF NOT EXISTS prototypes (
                activity_id INTEGER PRIMARY KEY,
                FOREIGN KEY (activity_id) REFERENCES activities(activity_id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_activities_prototype ON activities(prototype_id);
            CREATE INDEX IF NOT EXISTS idx_activities_date ON activities(date_time);
            CREATE INDEX IF NOT EXISTS idx_activities_hash ON activities(source_hash);

            PRAGMA foreign_keys = ON;
        "#,
        )?;
        Ok(())
    }

    pub fn activity_count(&self) -> Result<usize> {
        let count: i64 = self
            .db
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Drop every activity and prototype.
    pub fn clear(&mut self) -> Result<()> {
        self.db.execute_batch(
            "DELETE FROM prototypes;
             DELETE FROM laps;
             DELETE FROM tracks;
             DELETE FROM activities;",
        )?;
        log::info!("[SqliteStore] Cleared all activities");
        Ok(())
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn exists(&self, id: ActivityId) -> Result<bool> {
        Ok(self
            .db
            .query_row(
                "SELECT 1 FROM activities WHERE activity_id = ?",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn require(&self, id: ActivityId) -> Result<()> {
        if self.exists(id)? {
            Ok(())
        } else {
            Err(ActivityError::NotFound { activity_id: id })
        }
    }

    fn is_prototype_row(&self, id: ActivityId) -> Result<bool> {
        Ok(self
            .db
            .query_row(
                "SELECT 1 FROM prototypes WHERE activity_id = ?",
                params![id],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn decode_metadata(blob: &[u8], prototype_id: ActivityId) -> Result<ActivityMetadata> {
        let mut md: ActivityMetadata = rmp_serde::from_slice(blob)?;
        md.prototype_id = prototype_id;
        Ok(md)
    }

    /// Metadata of the first activity in the given `date_time` order.
    fn metadata_at_edge(&self, descending: bool) -> Result<Option<ActivityMetadata>> {
        let sql = if descending {
            "SELECT metadata, prototype_id FROM activities
             ORDER BY date_time DESC, activity_id DESC LIMIT 1"
        } else {
            "SELECT metadata, prototype_id FROM activities
             ORDER BY date_time ASC, activity_id ASC LIMIT 1"
        };
        let row = self
            .db
            .query_row(sql, [], |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
            })
            .optional()?;
        row.map(|(blob, proto)| Self::decode_metadata(&blob, proto))
            .transpose()
    }
}

fn day_start_ms(date: NaiveDate) -> i64 {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
        .timestamp_millis()
}

fn write_activity(tx: &Transaction<'_>, activity: &Activity) -> Result<()> {
    let md = activity.metadata();
    let metadata_blob = rmp_serde::to_vec_named(md)?;
    tx.execute(
        "INSERT INTO activities
            (activity_id, prototype_id, activity_type, date_time, source_hash, metadata)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(activity_id) DO UPDATE SET
            prototype_id = excluded.prototype_id,
            activity_type = excluded.activity_type,
            date_time = excluded.date_time,
            source_hash = excluded.source_hash,
            metadata = excluded.metadata",
        params![
            md.activity_id,
            md.prototype_id,
            md.activity_type.as_str(),
            md.date_time.timestamp_millis(),
            md.source_hash,
            metadata_blob
        ],
    )?;

    let points_blob = rmp_serde::to_vec_named(activity.points())?;
    tx.execute(
        "INSERT OR REPLACE INTO tracks (activity_id, points, point_count) VALUES (?, ?, ?)",
        params![md.activity_id, points_blob, activity.points().len() as i64],
    )?;

    match activity.laps() {
        Some(laps) => {
            let laps_blob = rmp_serde::to_vec_named(laps)?;
            tx.execute(
                "INSERT OR REPLACE INTO laps (activity_id, laps) VALUES (?, ?)",
                params![md.activity_id, laps_blob],
            )?;
        }
        None => {
            tx.execute("DELETE FROM laps WHERE activity_id = ?", params![md.activity_id])?;
        }
    }

    if md.is_prototype() {
        tx.execute(
            "INSERT OR IGNORE INTO prototypes (activity_id) VALUES (?)",
            params![md.activity_id],
        )?;
    }
    Ok(())
}

impl ActivityStore for SqliteStore {
    fn load_points(&self, id: ActivityId) -> Result<PointSeries> {
        let blob: Vec<u8> = self
            .db
            .query_row(
                "SELECT points FROM tracks WHERE activity_id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(ActivityError::NotFound { activity_id: id })?;
        Ok(rmp_serde::from_slice(&blob)?)
    }

    fn load_laps(&self, id: ActivityId) -> Result<Option<Vec<Lap>>> {
        self.require(id)?;
        let blob: Option<Vec<u8>> = self
            .db
            .query_row(
                "SELECT laps FROM laps WHERE activity_id = ?",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match blob {
            Some(blob) => Ok(Some(rmp_serde::from_slice(&blob)?)),
            None => Ok(None),
        }
    }

    fn load_metadata(&self, id: ActivityId) -> Result<ActivityMetadata> {
        let (blob, proto): (Vec<u8>, i64) = self
            .db
            .query_row(
                "SELECT metadata, prototype_id FROM activities WHERE activity_id = ?",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .ok_or(ActivityError::NotFound { activity_id: id })?;
        Self::decode_metadata(&blob, proto)
    }

    fn save_activity(&mut self, activity: &Activity) -> Result<()> {
        let md = activity.metadata();
        if !md.is_prototype() && !self.is_prototype_row(md.prototype_id)? {
            return Err(ActivityError::NotFound {
                activity_id: md.prototype_id,
            });
        }

        let tx = self.db.transaction()?;
        write_activity(&tx, activity)?;
        tx.commit()?;

        log::debug!(
            "[SqliteStore] Saved activity {} (prototype {})",
            md.activity_id,
            md.prototype_id
        );
        Ok(())
    }

    fn get_all_prototype_ids(&self) -> Result<Vec<ActivityId>> {
        let mut stmt = self
            .db
            .prepare("SELECT activity_id FROM prototypes ORDER BY activity_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<ActivityId>, _>>()?;
        Ok(ids)
    }

    fn get_all_activity_ids(&self) -> Result<Vec<ActivityId>> {
        let mut stmt = self
            .db
            .prepare("SELECT activity_id FROM activities ORDER BY activity_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<ActivityId>, _>>()?;
        Ok(ids)
    }

    fn get_max_activity_id(&self) -> Result<Option<ActivityId>> {
        Ok(self
            .db
            .query_row("SELECT MAX(activity_id) FROM activities", [], |row| {
                row.get(0)
            })?)
    }

    fn search_metadata(&self, query: &MetadataQuery) -> Result<Vec<ActivityMetadata>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(from) = query.from_date {
            clauses.push("date_time >= ?".into());
            values.push(Value::Integer(day_start_ms(from)));
        }
        if let Some(to) = query.to_date {
            clauses.push("date_time < ?".into());
            values.push(Value::Integer(day_start_ms(to) + DAY_MS));
        }
        if let Some(proto) = query.prototype {
            clauses.push("prototype_id = ?".into());
            values.push(Value::Integer(proto));
        }
        if let Some(t) = query.activity_type {
            clauses.push("activity_type = ?".into());
            values.push(Value::Text(t.as_str().to_string()));
        }
        if let Some(ids) = &query.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let marks = vec!["?"; ids.len()].join(", ");
            clauses.push(format!("activity_id IN ({})", marks));
            values.extend(ids.iter().map(|&id| Value::Integer(id)));
        }
        if query.prototypes_only {
            clauses.push("activity_id = prototype_id".into());
        }

        let mut sql = String::from("SELECT metadata, prototype_id FROM activities");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY date_time ASC, activity_id ASC");
        if let Some(n) = query.number {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(n as i64));
        }

        let mut stmt = self.db.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values), |row| {
                Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.iter()
            .map(|(blob, proto)| Self::decode_metadata(blob, *proto))
            .collect()
    }

    fn find_by_hash(&self, source_hash: &str) -> Result<Option<ActivityId>> {
        Ok(self.db.query_row(
            "SELECT MIN(activity_id) FROM activities WHERE source_hash = ?",
            params![source_hash],
            |row| row.get(0),
        )?)
    }

    fn apply_deletion(&mut self, plan: &DeletionPlan) -> Result<()> {
        self.require(plan.activity_id)?;
        if let PrototypeChange::Promote { repointed, .. } = &plan.prototype_change {
            for id in repointed {
                self.require(*id)?;
            }
        }

        let id = plan.activity_id;
        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM prototypes WHERE activity_id = ?", params![id])?;
        tx.execute("DELETE FROM laps WHERE activity_id = ?", params![id])?;
        tx.execute("DELETE FROM tracks WHERE activity_id = ?", params![id])?;
        tx.execute("DELETE FROM activities WHERE activity_id = ?", params![id])?;

        if let PrototypeChange::Promote { new_id, repointed } = &plan.prototype_change {
            tx.execute(
                "INSERT OR IGNORE INTO prototypes (activity_id) VALUES (?)",
                params![new_id],
            )?;
            for other in repointed {
                tx.execute(
                    "UPDATE activities SET prototype_id = ? WHERE activity_id = ?",
                    params![new_id, other],
                )?;
            }
        }
        tx.commit()?;

        log::info!(
            "[SqliteStore] Deleted activity {} ({:?})",
            id,
            plan.prototype_change
        );
        Ok(())
    }

    fn activity_types(&self) -> Result<Vec<ActivityType>> {
        let mut stmt = self
            .db
            .prepare("SELECT DISTINCT activity_type FROM activities ORDER BY activity_type")?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        names
            .iter()
            .map(|name| {
                name.parse::<ActivityType>()
                    .map_err(|_| ActivityError::persistence(format!("unknown activity type '{}'", name)))
            })
            .collect()
    }

    fn earliest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.metadata_at_edge(false)?.map(|md| md.date_time))
    }

    fn latest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.metadata_at_edge(true)?.map(|md| md.date_time))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityOverrides;
    use crate::config::InferenceConfig;
    use crate::records::{ParsedActivity, PartialMetadata, RawLap, RawPoint};
    use crate::SourceFormat;

    fn activity(id: ActivityId, day: u32, prototype_id: ActivityId, with_laps: bool) -> Activity {
        let start = Utc.with_ymd_and_hms(2021, 4, day, 7, 0, 0).unwrap();
        let points = (0..20)
            .map(|i| RawPoint {
                latitude: Some(51.5 + 0.0001 * i as f64),
                longitude: Some(-0.12),
                time: Some(start + chrono::Duration::seconds(i)),
                heart_rate: Some(150.0),
                lap: with_laps.then_some(1),
                ..Default::default()
            })
            .collect();
        let parsed = ParsedActivity {
            points,
            laps: with_laps.then(|| {
                vec![RawLap {
                    lap_no: 1,
                    ..Default::default()
                }]
            }),
            metadata: PartialMetadata {
                name: Some(format!("Run {}", id)),
                ..Default::default()
            },
            source_format: SourceFormat::Tcx,
            adapter: "tcx".into(),
            source_file: None,
            source_hash: format!("hash-{}", id),
        };
        let mut a = Activity::from_parsed(
            id,
            parsed,
            &ActivityOverrides::default(),
            &InferenceConfig::default(),
            ActivityType::Run,
        )
        .unwrap();
        a.set_prototype_id(prototype_id);
        a
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let mut store = SqliteStore::in_memory().unwrap();
        let original = activity(1, 2, 1, true);
        store.save_activity(&original).unwrap();

        let loaded = store.load_activity(1).unwrap();
        assert_eq!(loaded, original);
        assert_eq!(store.activity_count().unwrap(), 1);
        assert_eq!(store.get_all_prototype_ids().unwrap(), vec![1]);
        assert_eq!(store.find_by_hash("hash-1").unwrap(), Some(1));
        assert_eq!(store.find_by_hash("other").unwrap(), None);
    }

    #[test]
    fn test_missing_activity() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(matches!(
            store.load_metadata(5),
            Err(ActivityError::NotFound { activity_id: 5 })
        ));
        assert!(store.load_points(5).is_err());
        assert!(store.load_laps(5).is_err());
        assert_eq!(store.get_max_activity_id().unwrap(), None);
        assert_eq!(store.earliest_datetime().unwrap(), None);
    }

    #[test]
    fn test_laps_absent() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.save_activity(&activity(1, 2, 1, false)).unwrap();
        assert_eq!(store.load_laps(1).unwrap(), None);
    }

    #[test]
    fn test_save_rejects_dangling_prototype() {
        let mut store = SqliteStore::in_memory().unwrap();
        assert!(store.save_activity(&activity(2, 2, 1, false)).is_err());
        assert_eq!(store.activity_count().unwrap(), 0);
    }

    #[test]
    fn test_search() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.save_activity(&activity(1, 5, 1, false)).unwrap();
        store.save_activity(&activity(2, 3, 1, false)).unwrap();
        store.save_activity(&activity(3, 4, 3, false)).unwrap();

        let ids = |q: &MetadataQuery| -> Vec<ActivityId> {
            store
                .search_metadata(q)
                .unwrap()
                .iter()
                .map(|m| m.activity_id)
                .collect()
        };
        let day = |d| NaiveDate::from_ymd_opt(2021, 4, d).unwrap();

        assert_eq!(ids(&MetadataQuery::all()), vec![2, 3, 1]);
        assert_eq!(ids(&MetadataQuery::matches_of(1)), vec![2, 1]);
        assert_eq!(ids(&MetadataQuery::between(day(3), day(4))), vec![2, 3]);
        assert_eq!(
            ids(&MetadataQuery {
                ids: Some(vec![1, 3]),
                number: Some(1),
                ..Default::default()
            }),
            vec![3]
        );
        assert_eq!(
            ids(&MetadataQuery {
                activity_type: Some(ActivityType::Walk),
                ..Default::default()
            }),
            Vec::<ActivityId>::new()
        );
        assert_eq!(store.activity_types().unwrap(), vec![ActivityType::Run]);
        assert_eq!(
            store.latest_datetime().unwrap().unwrap().date_naive(),
            day(5)
        );
    }

    #[test]
    fn test_apply_deletion_promotes() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.save_activity(&activity(1, 2, 1, true)).unwrap();
        store.save_activity(&activity(2, 3, 1, false)).unwrap();
        store.save_activity(&activity(3, 4, 1, false)).unwrap();

        store
            .apply_deletion(&DeletionPlan {
                activity_id: 1,
                prototype_change: PrototypeChange::Promote {
                    new_id: 2,
                    repointed: vec![2, 3],
                },
            })
            .unwrap();

        assert_eq!(store.get_all_prototype_ids().unwrap(), vec![2]);
        assert_eq!(store.load_metadata(3).unwrap().prototype_id, 2);
        assert!(store.load_metadata(2).unwrap().is_prototype());
        assert!(store.load_points(1).is_err());
    }

    #[test]
    fn test_apply_deletion_validates_first() {
        let mut store = SqliteStore::in_memory().unwrap();
        store.save_activity(&activity(1, 2, 1, false)).unwrap();

        let result = store.apply_deletion(&DeletionPlan {
            activity_id: 1,
            prototype_change: PrototypeChange::Promote {
                new_id: 42,
                repointed: vec![42],
            },
        });
        assert!(result.is_err());
        assert_eq!(store.activity_count().unwrap(), 1);
        assert_eq!(store.get_all_prototype_ids().unwrap(), vec![1]);
    }

    #[test]
    fn test_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activities.db");
        {
            let mut store = SqliteStore::new(&path).unwrap();
            store.save_activity(&activity(1, 2, 1, false)).unwrap();
        }
        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get_all_activity_ids().unwrap(), vec![1]);
        assert_eq!(
            store.load_metadata(1).unwrap().name.as_deref(),
            Some("Run 1")
        );
    }
}
