//! # Activity cache
//!
//! Bounded cache of loaded activities and their normalized tracks, owned by
//! the manager. Entries are dropped through explicit hooks when an activity
//! is deleted or its prototype id is reassigned.

use std::sync::Arc;

use crate::activity::Activity;
use crate::lru_cache::{CacheStats, LruCache};
use crate::matching::NormalizedTrack;
use crate::ActivityId;

#[derive(Debug)]
pub struct ActivityCache {
    activities: LruCache<ActivityId, Arc<Activity>>,
    tracks: LruCache<ActivityId, Arc<NormalizedTrack>>,
}

impl ActivityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            activities: LruCache::new(capacity),
            tracks: LruCache::new(capacity),
        }
    }

    pub fn activity(&mut self, id: ActivityId) -> Option<Arc<Activity>> {
        self.activities.get_cloned(&id)
    }

    pub fn insert_activity(&mut self, activity: Arc<Activity>) {
        self.activities.insert(activity.id(), activity);
    }

    pub fn track(&mut self, id: ActivityId) -> Option<Arc<NormalizedTrack>> {
        self.tracks.get_cloned(&id)
    }

    pub fn insert_track(&mut self, id: ActivityId, track: Arc<NormalizedTrack>) {
        self.tracks.insert(id, track);
    }

    /// Hook: an activity was deleted.
    pub fn on_delete(&mut self, id: ActivityId) {
        self.activities.invalidate(&id);
        self.tracks.invalidate(&id);
    }

    /// Hook: these activities now point at a different prototype.
    ///
    /// Only the cached activities carry the prototype id; tracks stay valid.
    pub fn on_prototype_reassigned(&mut self, ids: &[ActivityId]) {
        let dropped = self.activities.invalidate_many(ids);
        if dropped > 0 {
            log::debug!(
                "[ActivityCache] Dropped {} activities after prototype reassignment",
                dropped
            );
        }
    }

    pub fn clear(&mut self) {
        self.activities.clear();
        self.tracks.clear();
    }

    pub fn len(&self) -> usize {
        self.activities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.activities.is_empty()
    }

    pub fn contains(&self, id: ActivityId) -> bool {
        self.activities.contains(&id)
    }

    /// `(activity stats, track stats)`
    pub fn stats(&self) -> (CacheStats, CacheStats) {
        (self.activities.stats(), self.tracks.stats())
    }
}
