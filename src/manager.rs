//! # Activity Manager
//!
//! Orchestrates the pipeline: parse → infer → summarize → match → save, plus
//! deletion with prototype maintenance, search and period summaries.
//!
//! All methods take `&self`; the manager can be shared across threads.
//! Parsing and inference run without locks. The read-decide-write span of
//! prototype assignment (allocate id, load prototypes, match, save) and of
//! deletion runs under one prototype lock, so two concurrent ingests of the
//! same route cannot both create a prototype for it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, NaiveDate, Utc};

use crate::activity::{Activity, ActivityMetadata, ActivityOverrides};
use crate::cache::ActivityCache;
use crate::config::ManagerConfig;
use crate::error::Result;
use crate::lru_cache::CacheStats;
use crate::matching::{find_prototype, plan_deletion, CancelToken, DeletionPlan, NormalizedTrack, PrototypeChange};
use crate::parse::AdapterRegistry;
use crate::records::ParsedActivity;
use crate::store::{ActivityStore, MetadataQuery};
use crate::summary::{group_by_period, summarize_periods, Period, PeriodSummary};
use crate::{ActivityError, ActivityId, ActivityType};

/// Id given to activities between construction and commit.
const PROVISIONAL_ID: ActivityId = 0;

/// Outcome of one file in a batch ingest.
#[derive(Debug)]
pub struct IngestReport {
    pub path: PathBuf,
    pub result: Result<ActivityId>,
}

impl IngestReport {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn activity_id(&self) -> Option<ActivityId> {
        self.result.as_ref().ok().copied()
    }
}

/// Poisoning only means another thread panicked mid-operation; store writes
/// are atomic, so the guarded state is still consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Entry point for hosts: owns the store, the adapters and the cache.
pub struct ActivityManager<S: ActivityStore> {
    store: Mutex<S>,
    cache: Mutex<ActivityCache>,
    prototype_lock: Mutex<()>,
    registry: AdapterRegistry,
    config: ManagerConfig,
    cancel: CancelToken,
}

impl<S: ActivityStore + Send> ActivityManager<S> {
    pub fn new(store: S, config: ManagerConfig) -> Self {
        log::info!(
            "[ActivityManager] Created (cache capacity {}, tight threshold {})",
            config.cache_capacity,
            config.match_config.tight_threshold
        );
        Self {
            store: Mutex::new(store),
            cache: Mutex::new(ActivityCache::new(config.cache_capacity)),
            prototype_lock: Mutex::new(()),
            registry: AdapterRegistry::default(),
            config,
            cancel: CancelToken::new(),
        }
    }

    /// Replace the format adapters.
    pub fn with_registry(mut self, registry: AdapterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Share a cancellation token with the host.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Token that aborts in-flight route comparisons.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// `(activity stats, track stats)`
    pub fn cache_stats(&self) -> (CacheStats, CacheStats) {
        lock(&self.cache).stats()
    }

    /// Run `f` against the store.
    pub fn with_store<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&lock(&self.store))
    }

    pub fn into_store(self) -> S {
        self.store.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Ingest
    // ========================================================================

    /// Parse, analyze, match and store one file.
    pub fn add_activity_from_file(
        &self,
        path: impl AsRef<Path>,
        overrides: ActivityOverrides,
    ) -> Result<ActivityId> {
        let activity = self.prepare_file(path.as_ref(), &overrides)?;
        self.commit(activity)
    }

    /// Analyze, match and store adapter output that did not come from disk.
    pub fn add_activity(
        &self,
        parsed: ParsedActivity,
        overrides: ActivityOverrides,
    ) -> Result<ActivityId> {
        let activity = self.build(parsed, &overrides)?;
        self.commit(activity)
    }

    /// Ingest several files. Each file succeeds or fails on its own; earlier
    /// successes stay committed. Reports are in input order.
    pub fn add_activities_from_files<P>(
        &self,
        paths: &[P],
        overrides: &ActivityOverrides,
    ) -> Vec<IngestReport>
    where
        P: AsRef<Path> + Sync,
    {
        let start = Instant::now();

        #[cfg(feature = "parallel")]
        let prepared: Vec<Result<Activity>> = {
            use rayon::prelude::*;
            log::info!(
                "[ActivityManager] Preparing {} files in parallel",
                paths.len()
            );
            paths
                .par_iter()
                .map(|p| self.prepare_file(p.as_ref(), overrides))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let prepared: Vec<Result<Activity>> = {
            log::info!("[ActivityManager] Preparing {} files", paths.len());
            paths
                .iter()
                .map(|p| self.prepare_file(p.as_ref(), overrides))
                .collect()
        };

        let reports: Vec<IngestReport> = paths
            .iter()
            .zip(prepared)
            .map(|(path, prepared)| {
                let path = path.as_ref().to_path_buf();
                let result = prepared.and_then(|activity| self.commit(activity));
                if let Err(e) = &result {
                    log::warn!("[ActivityManager] Skipped {}: {}", path.display(), e);
                }
                IngestReport { path, result }
            })
            .collect();

        log::info!(
            "[ActivityManager] Batch done: {}/{} files ingested in {:?}",
            reports.iter().filter(|r| r.is_ok()).count(),
            reports.len(),
            start.elapsed()
        );
        reports
    }

    fn prepare_file(&self, path: &Path, overrides: &ActivityOverrides) -> Result<Activity> {
        let parsed = self.registry.parse_file(path)?;
        self.build(parsed, overrides)
    }

    fn build(&self, parsed: ParsedActivity, overrides: &ActivityOverrides) -> Result<Activity> {
        Activity::from_parsed(
            PROVISIONAL_ID,
            parsed,
            overrides,
            &self.config.inference_config,
            self.config.default_activity_type,
        )
    }

    /// Allocate an id, assign a prototype and save. Serialized.
    fn commit(&self, mut activity: Activity) -> Result<ActivityId> {
        let _guard = lock(&self.prototype_lock);

        if self.config.reject_duplicate_sources {
            self.check_duplicate(activity.metadata())?;
        }

        let id = lock(&self.store)
            .get_max_activity_id()?
            .map_or(1, |max| max + 1);
        activity.assign_id(id);

        let track = Arc::new(NormalizedTrack::from_series(
            activity.points(),
            self.config.match_config.znorm_axis,
        ));
        let prototypes = lock(&self.store).search_metadata(&MetadataQuery {
            prototypes_only: true,
            ..Default::default()
        })?;

        let outcome = find_prototype(
            &activity,
            &track,
            &prototypes,
            |proto_id| self.track(proto_id),
            &self.config.match_config,
            Some(&self.cancel),
        )?;
        let prototype_id = outcome.resolve(id);
        activity.set_prototype_id(prototype_id);

        lock(&self.store).save_activity(&activity)?;

        {
            let mut cache = lock(&self.cache);
            cache.insert_track(id, track);
            cache.insert_activity(Arc::new(activity));
        }

        if outcome.is_new_prototype() {
            log::info!(
                "[ActivityManager] Added activity {} as new prototype ({} loose candidates)",
                id,
                outcome.loose_matches.len()
            );
        } else {
            log::info!(
                "[ActivityManager] Added activity {} matching prototype {}",
                id,
                prototype_id
            );
        }
        Ok(id)
    }

    fn check_duplicate(&self, metadata: &ActivityMetadata) -> Result<()> {
        let Some(hash) = metadata.source_hash.as_deref() else {
            return Ok(());
        };
        match lock(&self.store).find_by_hash(hash)? {
            Some(existing) => Err(ActivityError::Duplicate {
                path: metadata.source_file.clone().unwrap_or_default(),
                existing,
            }),
            None => Ok(()),
        }
    }

    /// Normalized track of a stored activity, through the cache.
    fn track(&self, id: ActivityId) -> Result<Arc<NormalizedTrack>> {
        if let Some(track) = lock(&self.cache).track(id) {
            return Ok(track);
        }
        let points = lock(&self.store).load_points(id)?;
        let track = Arc::new(NormalizedTrack::from_series(
            &points,
            self.config.match_config.znorm_axis,
        ));
        lock(&self.cache).insert_track(id, track.clone());
        Ok(track)
    }

    // ========================================================================
    // Deletion
    // ========================================================================

    /// Delete one activity, promoting a replacement prototype if needed.
    ///
    /// Returns the plan that was applied.
    pub fn delete_activity(&self, id: ActivityId) -> Result<DeletionPlan> {
        let _guard = lock(&self.prototype_lock);

        let plan = {
            let mut store = lock(&self.store);
            let metadata = store.load_metadata(id)?;
            let matches: Vec<ActivityId> = if metadata.is_prototype() {
                store
                    .search_metadata(&MetadataQuery::matches_of(id))?
                    .into_iter()
                    .map(|md| md.activity_id)
                    .collect()
            } else {
                Vec::new()
            };
            let plan = plan_deletion(&metadata, &matches);
            store.apply_deletion(&plan)?;
            plan
        };

        let mut cache = lock(&self.cache);
        cache.on_delete(id);
        match &plan.prototype_change {
            PrototypeChange::Unchanged => {
                log::info!("[ActivityManager] Deleted activity {}", id);
            }
            PrototypeChange::Remove => {
                log::info!(
                    "[ActivityManager] Deleted prototype {} (no remaining matches)",
                    id
                );
            }
            PrototypeChange::Promote { new_id, repointed } => {
                cache.on_prototype_reassigned(repointed);
                log::info!(
                    "[ActivityManager] Deleted prototype {}, promoted {} ({} activities re-pointed)",
                    id,
                    new_id,
                    repointed.len()
                );
            }
        }
        Ok(plan)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Full activity, through the cache.
    ///
    /// The cache lock is held across the store load, so a concurrent
    /// deletion invalidates after any insert made here.
    pub fn get_activity(&self, id: ActivityId) -> Result<Arc<Activity>> {
        let mut cache = lock(&self.cache);
        if let Some(activity) = cache.activity(id) {
            return Ok(activity);
        }
        let activity = Arc::new(lock(&self.store).load_activity(id)?);
        cache.insert_activity(activity.clone());
        Ok(activity)
    }

    pub fn get_metadata(&self, id: ActivityId) -> Result<ActivityMetadata> {
        lock(&self.store).load_metadata(id)
    }

    pub fn search_metadata(&self, query: &MetadataQuery) -> Result<Vec<ActivityMetadata>> {
        lock(&self.store).search_metadata(query)
    }

    /// Other activities sharing this activity's prototype, in date order.
    pub fn get_activity_matches(&self, id: ActivityId) -> Result<Vec<ActivityMetadata>> {
        let store = lock(&self.store);
        let metadata = store.load_metadata(id)?;
        let mut matches = store.search_metadata(&MetadataQuery::matches_of(metadata.prototype_id))?;
        matches.retain(|md| md.activity_id != id);
        Ok(matches)
    }

    /// Search results grouped by week (Monday start).
    pub fn get_metadata_by_week(
        &self,
        query: &MetadataQuery,
    ) -> Result<BTreeMap<NaiveDate, Vec<ActivityMetadata>>> {
        Ok(group_by_period(self.search_metadata(query)?, Period::Week))
    }

    /// Search results grouped by calendar month.
    pub fn get_metadata_by_month(
        &self,
        query: &MetadataQuery,
    ) -> Result<BTreeMap<NaiveDate, Vec<ActivityMetadata>>> {
        Ok(group_by_period(self.search_metadata(query)?, Period::Month))
    }

    /// Per-period totals of the search results. Empty periods are skipped.
    pub fn summarize(&self, query: &MetadataQuery, period: Period) -> Result<Vec<PeriodSummary>> {
        Ok(summarize_periods(&self.search_metadata(query)?, period))
    }

    pub fn activity_types(&self) -> Result<Vec<ActivityType>> {
        lock(&self.store).activity_types()
    }

    pub fn earliest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        lock(&self.store).earliest_datetime()
    }

    pub fn latest_datetime(&self) -> Result<Option<DateTime<Utc>>> {
        lock(&self.store).latest_datetime()
    }

    pub fn prototype_ids(&self) -> Result<Vec<ActivityId>> {
        lock(&self.store).get_all_prototype_ids()
    }

    pub fn activity_ids(&self) -> Result<Vec<ActivityId>> {
        lock(&self.store).get_all_activity_ids()
    }
}
