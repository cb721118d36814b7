//! Shared takeoff engine
//!
//! [`Takeoff`] wraps a [`TakeoffState`] behind a lock so pages, conditions
//! and measurements can be edited from several threads. Every operation runs
//! as one critical section, which serializes all calibration and measurement
//! changes and keeps each condition's aggregate consistent with its
//! measurements.
//!
//! Scale detection and page recalculation can also run as background jobs.
//! Detection does its image work outside the lock and only takes it to apply
//! the outcome; a result computed against an older calibration is discarded
//! with [`TakeoffError::ConcurrentCalibrationConflict`]. Cancelling a job
//! before it commits leaves the state untouched.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::GrayImage;
use takeoff_scheduler::{spawn_job, CancellationRegistry, JobHandle, JobId, JobOutcome};
use tracing::{debug, info};

use crate::condition::{Condition, ConditionId};
use crate::config::{ConfigError, TakeoffConfig};
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::GeometryData;
use crate::measurement::{Measurement, MeasurementId, Provenance};
use crate::page::{Page, PageId, TextBlock};
use crate::persistence::{self, TakeoffSnapshot};
use crate::resolver::{CalibrationResult, ScaleResolver};
use crate::scale_bar::Cancelled;
use crate::store::{RecalculationReport, TakeoffState};
use crate::units::LengthUnit;

type SharedState = Arc<Mutex<TakeoffState>>;

fn lock_state(state: &SharedState) -> MutexGuard<'_, TakeoffState> {
    // Mutations validate before writing, so a panic mid-operation cannot
    // leave a half-applied change behind.
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Thread-safe takeoff engine
#[derive(Clone)]
pub struct Takeoff {
    state: SharedState,
    resolver: Arc<ScaleResolver>,
    jobs: Arc<CancellationRegistry<PageId>>,
    next_job_id: Arc<AtomicU64>,
}

impl Default for Takeoff {
    fn default() -> Self {
        Self::from_parts(TakeoffState::default(), ScaleResolver::default())
    }
}

impl Takeoff {
    /// Create an empty takeoff with validated settings
    pub fn new(config: TakeoffConfig) -> Result<Self, ConfigError> {
        let resolver = ScaleResolver::new(config.resolver, config.scale_bar)?;
        Ok(Self::from_parts(TakeoffState::default(), resolver))
    }

    fn from_parts(state: TakeoffState, resolver: ScaleResolver) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            resolver: Arc::new(resolver),
            jobs: Arc::new(CancellationRegistry::new()),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn resolver(&self) -> &ScaleResolver {
        &self.resolver
    }

    /// Run `f` against a consistent view of the state
    pub fn read<R>(&self, f: impl FnOnce(&TakeoffState) -> R) -> R {
        f(&lock_state(&self.state))
    }

    // -- Persistence ---------------------------------------------------------

    pub fn snapshot(&self) -> TakeoffSnapshot {
        lock_state(&self.state).snapshot()
    }

    /// Replace the state from a snapshot, cancelling running jobs
    pub fn restore(&self, snapshot: TakeoffSnapshot) -> TakeoffResult<()> {
        let restored = TakeoffState::from_snapshot(snapshot)?;
        self.jobs.cancel_all();
        *lock_state(&self.state) = restored;
        Ok(())
    }

    /// Write the state to a snapshot file
    pub fn save(&self, path: &Path) -> TakeoffResult<()> {
        persistence::save_snapshot(&self.snapshot(), path)?;
        debug!(path = %path.display(), "takeoff saved");
        Ok(())
    }

    /// Load a snapshot file if it exists
    ///
    /// Returns whether a snapshot was found.
    pub fn load(&self, path: &Path) -> TakeoffResult<bool> {
        match persistence::load_snapshot(path)? {
            Some(snapshot) => {
                self.restore(snapshot)?;
                info!(path = %path.display(), "takeoff loaded");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // -- Pages and conditions ------------------------------------------------

    pub fn add_page(&self, page: Page) -> PageId {
        lock_state(&self.state).add_page(page)
    }

    pub fn page(&self, page_id: PageId) -> Option<Page> {
        lock_state(&self.state).page(page_id).cloned()
    }

    pub fn pages(&self) -> Vec<Page> {
        lock_state(&self.state).pages().cloned().collect()
    }

    /// Remove a page, cancelling its background jobs first
    pub fn remove_page(&self, page_id: PageId) -> TakeoffResult<Page> {
        let cancelled = self.jobs.cancel_owner(&page_id);
        if cancelled > 0 {
            debug!(%page_id, cancelled, "cancelled jobs for removed page");
        }
        lock_state(&self.state).remove_page(page_id)
    }

    pub fn add_condition(&self, condition: Condition) -> TakeoffResult<ConditionId> {
        lock_state(&self.state).add_condition(condition)
    }

    pub fn condition(&self, condition_id: ConditionId) -> Option<Condition> {
        lock_state(&self.state).condition(condition_id).cloned()
    }

    pub fn conditions(&self) -> Vec<Condition> {
        lock_state(&self.state).conditions().cloned().collect()
    }

    pub fn update_condition_depth(
        &self,
        condition_id: ConditionId,
        depth_inches: Option<f64>,
    ) -> TakeoffResult<RecalculationReport> {
        lock_state(&self.state).update_condition_depth(condition_id, depth_inches)
    }

    pub fn delete_condition(&self, condition_id: ConditionId) -> TakeoffResult<Condition> {
        lock_state(&self.state).delete_condition(condition_id)
    }

    // -- Measurements --------------------------------------------------------

    pub fn create_measurement(
        &self,
        condition_id: ConditionId,
        page_id: PageId,
        geometry: GeometryData,
        provenance: Provenance,
    ) -> TakeoffResult<Measurement> {
        lock_state(&self.state).create_measurement(condition_id, page_id, geometry, provenance)
    }

    pub fn update_measurement(
        &self,
        measurement_id: MeasurementId,
        geometry: GeometryData,
    ) -> TakeoffResult<Measurement> {
        lock_state(&self.state).update_measurement(measurement_id, geometry)
    }

    pub fn delete_measurement(&self, measurement_id: MeasurementId) -> TakeoffResult<Measurement> {
        lock_state(&self.state).delete_measurement(measurement_id)
    }

    pub fn measurement(&self, measurement_id: MeasurementId) -> Option<Measurement> {
        lock_state(&self.state).measurement(measurement_id).cloned()
    }

    pub fn measurements_on_page(&self, page_id: PageId) -> Vec<Measurement> {
        lock_state(&self.state)
            .measurements_on_page(page_id)
            .cloned()
            .collect()
    }

    pub fn measurements_for_condition(&self, condition_id: ConditionId) -> Vec<Measurement> {
        lock_state(&self.state)
            .measurements_for_condition(condition_id)
            .cloned()
            .collect()
    }

    pub fn recalculate_one(&self, measurement_id: MeasurementId) -> TakeoffResult<Measurement> {
        lock_state(&self.state).recalculate_one(measurement_id)
    }

    pub fn recalculate_all_on_page(&self, page_id: PageId) -> TakeoffResult<RecalculationReport> {
        lock_state(&self.state).recalculate_all_on_page(page_id)
    }

    pub fn verify_measurement(&self, measurement_id: MeasurementId, verified: bool) -> TakeoffResult<()> {
        lock_state(&self.state).verify_measurement(measurement_id, verified)
    }

    pub fn set_measurement_attributes(
        &self,
        measurement_id: MeasurementId,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> TakeoffResult<Measurement> {
        lock_state(&self.state).set_measurement_attributes(measurement_id, attributes)
    }

    pub fn verify_aggregates(&self) -> Vec<ConditionId> {
        lock_state(&self.state).verify_aggregates()
    }

    // -- Calibration ---------------------------------------------------------

    /// Resolve a page's scale in the calling thread
    pub fn resolve_automatic(
        &self,
        page_id: PageId,
        text_blocks: &[TextBlock],
        image: Option<&GrayImage>,
    ) -> TakeoffResult<CalibrationResult> {
        lock_state(&self.state).resolve_automatic(&self.resolver, page_id, text_blocks, image)
    }

    pub fn calibrate_manual(
        &self,
        page_id: PageId,
        pixel_distance: f64,
        real_distance: f64,
        real_unit: LengthUnit,
    ) -> TakeoffResult<CalibrationResult> {
        lock_state(&self.state).calibrate_manual(
            &self.resolver,
            page_id,
            pixel_distance,
            real_distance,
            real_unit,
        )
    }

    pub fn copy_from(&self, source_id: PageId, target_id: PageId) -> TakeoffResult<CalibrationResult> {
        lock_state(&self.state).copy_from(&self.resolver, source_id, target_id)
    }

    // -- Background jobs -----------------------------------------------------

    /// Resolve a page's scale on a background thread
    ///
    /// The page reports `detection_pending` until the job ends. A manual
    /// calibration made while the job runs wins; the job then fails with
    /// `ConcurrentCalibrationConflict`.
    pub fn spawn_scale_detection(
        &self,
        page_id: PageId,
        text_blocks: Vec<TextBlock>,
        image: Option<Arc<GrayImage>>,
    ) -> TakeoffResult<JobHandle<CalibrationResult, TakeoffError>> {
        let request = {
            let mut state = lock_state(&self.state);
            let page = state
                .page_mut(page_id)
                .ok_or(TakeoffError::PageNotFound(page_id))?;
            page.job_started();
            self.resolver.prepare_detection(page, &text_blocks)
        };
        let pending = self.track(page_id);
        let job_id = pending.job_id;
        let token = self.jobs.register(job_id, page_id);
        debug!(%page_id, job_id, version = request.dispatched_version, "scale detection dispatched");

        let resolver = Arc::clone(&self.resolver);
        Ok(spawn_job(job_id, token, move |cancel| {
            let pending = pending;
            let outcome = match resolver.detect(&request, &text_blocks, image.as_deref(), cancel) {
                Ok(outcome) => outcome,
                Err(Cancelled) => return JobOutcome::Cancelled,
            };

            let mut state = lock_state(&pending.state);
            if cancel.is_cancelled() {
                return JobOutcome::Cancelled;
            }
            state.apply_detection(&resolver, outcome).into()
        }))
    }

    /// Recalculate every measurement on a page on a background thread
    ///
    /// Nothing is written if the job is cancelled before it commits.
    pub fn spawn_page_recalculation(
        &self,
        page_id: PageId,
    ) -> TakeoffResult<JobHandle<RecalculationReport, TakeoffError>> {
        {
            let mut state = lock_state(&self.state);
            let page = state
                .page_mut(page_id)
                .ok_or(TakeoffError::PageNotFound(page_id))?;
            if page.pixels_per_unit().is_none() {
                return Err(TakeoffError::CalibrationRequired { page_id });
            }
            page.job_started();
        }
        let pending = self.track(page_id);
        let job_id = pending.job_id;
        let token = self.jobs.register(job_id, page_id);

        Ok(spawn_job(job_id, token, move |cancel| {
            let pending = pending;
            let mut state = lock_state(&pending.state);
            match state.stage_page_recalculation(page_id, cancel) {
                Ok(Some(staged)) if !cancel.is_cancelled() => {
                    JobOutcome::Completed(state.commit_recalculation(staged))
                }
                Ok(_) => JobOutcome::Cancelled,
                Err(err) => JobOutcome::Failed(err),
            }
        }))
    }

    /// Cancel every background job running against a page
    pub fn cancel_jobs_for_page(&self, page_id: PageId) -> usize {
        self.jobs.cancel_owner(&page_id)
    }

    /// Number of registered background jobs for a page
    pub fn jobs_for_page(&self, page_id: PageId) -> usize {
        self.jobs.count_for(&page_id)
    }

    fn track(&self, page_id: PageId) -> PendingJob {
        PendingJob {
            state: Arc::clone(&self.state),
            jobs: Arc::clone(&self.jobs),
            page_id,
            job_id: self.next_job_id.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// Clears a page's pending flag and registry entry when its job ends
///
/// Dropped on every path, including a job cancelled before it starts.
struct PendingJob {
    state: SharedState,
    jobs: Arc<CancellationRegistry<PageId>>,
    page_id: PageId,
    job_id: JobId,
}

impl Drop for PendingJob {
    fn drop(&mut self) {
        if let Some(page) = lock_state(&self.state).page_mut(self.page_id) {
            page.job_finished();
        }
        self.jobs.unregister(self.job_id);
    }
}
