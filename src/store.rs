//! # Activity store
//!
//! The persistence collaborator the core depends on, plus an in-memory
//! implementation. Multi-record mutations (saving an activity together with
//! its prototype-set membership, applying a deletion plan) are atomic in
//! every implementation.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityMetadata};
use crate::error::{OptionExt, Result};
use crate::matching::{DeletionPlan, PrototypeChange};
use crate::metrics::{Lap, PointSeries};
use crate::{ActivityError, ActivityId, ActivityType};

// ============================================================================
// Query
// ============================================================================

/// Metadata search filter. Results are ordered by `date_time` ascending.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataQuery {
    /// Inclusive, by calendar date (UTC)
    pub from_date: Option<NaiveDate>,
    /// Inclusive, by calendar date (UTC)
    pub to_date: Option<NaiveDate>,
    /// Only activities with this prototype id
    pub prototype: Option<ActivityId>,
    pub activity_type: Option<ActivityType>,
    pub ids: Option<Vec<ActivityId>>,
    /// Only prototypes
    pub prototypes_only: bool,
    /// Maximum number of results
    pub number: Option<usize>,
}

impl MetadataQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn matches_of(prototype: ActivityId) -> Self {
        Self {
            prototype: Some(prototype),
            ..Default::default()
        }
    }

    pub fn between(from_date: NaiveDate, to_date: NaiveDate) -> Self {
        Self {
            from_date: Some(from_date),
            to_date: Some(to_date),
            ..Default::default()
        }
    }

    /// Whether one record passes the filter (ignores `number`).
    pub fn matches(&self, md: &ActivityMetadata) -> bool {
        let date = md.date();
        self.from_date.map_or(true, |d| date >= d)
            && self.to_date.map_or(true, |d| date <= d)
            && self.prototype.map_or(true, |p| md.prototype_id == p)
            && self.activity_type.map_or(true, |t| md.activity_type == t)
            && self
                .ids
                .as_ref()
                .map_or(true, |ids| ids.contains(&md.activity_id))
            && (!self.prototypes_only || md.is_prototype())
    }
}

/// Search order: date ascending, then id.
pub fn sort_for_search(results: &mut [ActivityMetadata]) {
    results.sort_by(|a, b| {
        a.date_time
            .cmp(&b.date_time)
            .then(a.activity_id.cmp(&b.activity_id))
    });
}

// ============================================================================
// Trait
// ============================================================================

/// Persistence collaborator.
pub trait ActivityStore {
    fn load_points(&self, id: ActivityId) -> Result<PointSeries>;

    fn load_laps(&self, id: ActivityId) -> Result<Option<Vec<Lap>>>;

    fn load_metadata(&self, id: ActivityId) -> Result<ActivityMetadata>;

    fn load_activity(&self, id: ActivityId) -> Result<Activity> {
        let metadata = self.load_metadata(id)?;
        Activity::from_stored(metadata, self.load_points(id)?, self.load_laps(id)?)
    }

    /// Save points, laps and metadata; add to the prototype set when the
    /// activity is its own prototype. Fails without writing anything if a
    /// non-prototype activity points at an id outside the prototype set.
    fn save_activity(&mut self, activity: &Activity) -> Result<()>;

    fn get_all_prototype_ids(&self) -> Result<Vec<ActivityId>>;

    fn get_all_activity_ids(&self) -> Result<Vec<ActivityId>>;

    fn get_max_activity_id(&self) -> Result<Option<ActivityId>>;

    fn search_metadata(&self, query: &MetadataQuery) -> Result<Vec<ActivityMetadata>>;

    /// Id of a stored activity whose source file had this SHA-256.
    fn find_by_hash(&self, source_hash: &str) -> Result<Option<ActivityId>>;

    /// Delete one activity and apply the prototype change, all or nothing.
    fn apply_deletion(&mut self, plan: &DeletionPlan) -> Result<()>;

    /// Distinct activity types in use.
    fn activity_types(&self) -> Result<Vec<ActivityType>> {
        let mut types: Vec<ActivityType> = self
            .search_metadata(&MetadataQuery::all())?
            .into_iter()
            .map(|md| md.activity_type)
            .collect();
        types.sort_by_key(|t| t.as_str());
        types.dedup();
        Ok(types)
    }

    fn earliest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .search_metadata(&MetadataQuery::all())?
            .first()
            .map(|md| md.date_time))
    }

    fn latest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .search_metadata(&MetadataQuery::all())?
            .last()
            .map(|md| md.date_time))
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone)]
struct StoredActivity {
    metadata: ActivityMetadata,
    points: PointSeries,
    laps: Option<Vec<Lap>>,
}

/// Store that keeps everything in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    activities: HashMap<ActivityId, StoredActivity>,
    prototypes: BTreeSet<ActivityId>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, id: ActivityId) -> Result<&StoredActivity> {
        self.activities.get(&id).ok_or_not_found(id)
    }
}

impl ActivityStore for MemoryStore {
    fn load_points(&self, id: ActivityId) -> Result<PointSeries> {
        Ok(self.get(id)?.points.clone())
    }

    fn load_laps(&self, id: ActivityId) -> Result<Option<Vec<Lap>>> {
        Ok(self.get(id)?.laps.clone())
    }

    fn load_metadata(&self, id: ActivityId) -> Result<ActivityMetadata> {
        Ok(self.get(id)?.metadata.clone())
    }

    fn save_activity(&mut self, activity: &Activity) -> Result<()> {
        let md = activity.metadata();
        if !md.is_prototype() && !self.prototypes.contains(&md.prototype_id) {
            return Err(ActivityError::NotFound {
                activity_id: md.prototype_id,
            });
        }

        if md.is_prototype() {
            self.prototypes.insert(md.activity_id);
        }
        self.activities.insert(
            md.activity_id,
            StoredActivity {
                metadata: md.clone(),
                points: activity.points().clone(),
                laps: activity.laps().map(<[Lap]>::to_vec),
            },
        );
        Ok(())
    }

    fn get_all_prototype_ids(&self) -> Result<Vec<ActivityId>> {
        Ok(self.prototypes.iter().copied().collect())
    }

    fn get_all_activity_ids(&self) -> Result<Vec<ActivityId>> {
        let mut ids: Vec<ActivityId> = self.activities.keys().copied().collect();
        ids.sort_unstable();
        Ok(ids)
    }

    fn get_max_activity_id(&self) -> Result<Option<ActivityId>> {
        Ok(self.activities.keys().max().copied())
    }

    fn search_metadata(&self, query: &MetadataQuery) -> Result<Vec<ActivityMetadata>> {
        let mut results: Vec<ActivityMetadata> = self
            .activities
            .values()
            .filter(|a| query.matches(&a.metadata))
            .map(|a| a.metadata.clone())
            .collect();
        sort_for_search(&mut results);
        if let Some(n) = query.number {
            results.truncate(n);
        }
        Ok(results)
    }

    fn find_by_hash(&self, source_hash: &str) -> Result<Option<ActivityId>> {
        Ok(self
            .activities
            .values()
            .filter(|a| a.metadata.source_hash.as_deref() == Some(source_hash))
            .map(|a| a.metadata.activity_id)
            .min())
    }

    fn apply_deletion(&mut self, plan: &DeletionPlan) -> Result<()> {
        // Validate everything before the first write
        self.get(plan.activity_id)?;
        if let PrototypeChange::Promote { repointed, .. } = &plan.prototype_change {
            for id in repointed {
                self.get(*id)?;
            }
        }

        self.activities.remove(&plan.activity_id);
        match &plan.prototype_change {
            PrototypeChange::Unchanged => {}
            PrototypeChange::Remove => {
                self.prototypes.remove(&plan.activity_id);
            }
            PrototypeChange::Promote { new_id, repointed } => {
                self.prototypes.remove(&plan.activity_id);
                self.prototypes.insert(*new_id);
                for id in repointed {
                    if let Some(stored) = self.activities.get_mut(id) {
                        stored.metadata.prototype_id = *new_id;
                    }
                }
            }
        }
        Ok(())
    }
}
