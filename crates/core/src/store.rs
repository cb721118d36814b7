//! Takeoff state and measurement lifecycle
//!
//! [`TakeoffState`] owns every page, condition and measurement. Each
//! mutation validates first and then commits the measurement change and the
//! owning condition's aggregate together, so a failed operation leaves no
//! trace and a reader never sees a measurement without its aggregate.
//!
//! Aggregates are always re-derived by summation over the condition's valid
//! measurements in insertion order, which keeps them exactly equal to a
//! fresh recomputation.

use std::collections::{BTreeSet, HashMap};

use image::GrayImage;
use takeoff_scheduler::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::calculator::{compute_quantity_in, measure_pixels, Scale};
use crate::condition::{Condition, ConditionId};
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::GeometryData;
use crate::measurement::{ComputedQuantity, Measurement, MeasurementId, Provenance};
use crate::page::{Page, PageId, TextBlock};
use crate::persistence::{PersistenceError, TakeoffSnapshot};
use crate::resolver::{CalibrationResult, DetectionOutcome, ScaleResolver};
use crate::units::LengthUnit;

/// Counts from a batch recalculation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RecalculationReport {
    pub recalculated: u32,
    pub failed: u32,
}

/// Recomputed quantities for a page, not yet written
#[derive(Debug)]
pub(crate) struct StagedRecalculation {
    page_id: PageId,
    results: Vec<(MeasurementId, TakeoffResult<ComputedQuantity>)>,
}

/// In-memory takeoff: pages, conditions and measurements
#[derive(Debug, Clone, Default)]
pub struct TakeoffState {
    pages: HashMap<PageId, Page>,
    page_order: Vec<PageId>,
    conditions: HashMap<ConditionId, Condition>,
    condition_order: Vec<ConditionId>,
    measurements: HashMap<MeasurementId, Measurement>,
    /// Insertion order; aggregates sum in this order
    measurement_order: Vec<MeasurementId>,
}

impl TakeoffState {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Pages ---------------------------------------------------------------

    /// Add a page; it starts uncalibrated unless it carries a calibration
    pub fn add_page(&mut self, page: Page) -> PageId {
        let id = page.id();
        if self.pages.insert(id, page).is_none() {
            self.page_order.push(id);
        }
        id
    }

    pub fn page(&self, id: PageId) -> Option<&Page> {
        self.pages.get(&id)
    }

    pub(crate) fn page_mut(&mut self, id: PageId) -> Option<&mut Page> {
        self.pages.get_mut(&id)
    }

    /// Pages in the order they were added
    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.page_order.iter().filter_map(|id| self.pages.get(id))
    }

    /// Remove a page together with its measurements
    #[instrument(skip(self))]
    pub fn remove_page(&mut self, page_id: PageId) -> TakeoffResult<Page> {
        let page = self
            .pages
            .remove(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        self.page_order.retain(|id| *id != page_id);

        let removed: Vec<MeasurementId> = self
            .measurement_order
            .iter()
            .copied()
            .filter(|id| self.measurements.get(id).is_some_and(|m| m.page_id() == page_id))
            .collect();
        let touched = self.remove_measurements(&removed);
        self.rederive_aggregates(&touched);

        info!(measurements = removed.len(), "page removed");
        Ok(page)
    }

    // -- Conditions ----------------------------------------------------------

    /// Add a condition after checking its unit, type and depth agree
    pub fn add_condition(&mut self, mut condition: Condition) -> TakeoffResult<ConditionId> {
        condition.validate()?;
        condition.set_aggregate(0.0, 0);
        let id = condition.id();
        if self.conditions.insert(id, condition).is_none() {
            self.condition_order.push(id);
        }
        Ok(id)
    }

    pub fn condition(&self, id: ConditionId) -> Option<&Condition> {
        self.conditions.get(&id)
    }

    /// Conditions in the order they were added
    pub fn conditions(&self) -> impl Iterator<Item = &Condition> {
        self.condition_order
            .iter()
            .filter_map(|id| self.conditions.get(id))
    }

    /// Change a condition's depth and recompute its measurements
    ///
    /// Measurements that can no longer be computed are marked invalid.
    #[instrument(skip(self))]
    pub fn update_condition_depth(
        &mut self,
        condition_id: ConditionId,
        depth_inches: Option<f64>,
    ) -> TakeoffResult<RecalculationReport> {
        let mut updated = self
            .conditions
            .get(&condition_id)
            .cloned()
            .ok_or(TakeoffError::ConditionNotFound(condition_id))?;
        updated.set_depth_inches(depth_inches);
        updated.validate()?;

        let ids = self.measurement_ids_where(|m| m.condition_id() == condition_id);
        let results: Vec<_> = ids
            .iter()
            .map(|id| (*id, self.recompute_with(&updated, *id)))
            .collect();

        self.conditions.insert(condition_id, updated);
        let report = self.commit_results(results);
        self.rederive_aggregate(condition_id);
        Ok(report)
    }

    /// Delete a condition and every measurement attributed to it
    #[instrument(skip(self))]
    pub fn delete_condition(&mut self, condition_id: ConditionId) -> TakeoffResult<Condition> {
        let condition = self
            .conditions
            .remove(&condition_id)
            .ok_or(TakeoffError::ConditionNotFound(condition_id))?;
        self.condition_order.retain(|id| *id != condition_id);

        let removed = self.measurement_ids_where(|m| m.condition_id() == condition_id);
        self.remove_measurements(&removed);
        debug!(measurements = removed.len(), "condition deleted");
        Ok(condition)
    }

    // -- Measurements --------------------------------------------------------

    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.get(&id)
    }

    /// All measurements in insertion order
    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurement_order
            .iter()
            .filter_map(|id| self.measurements.get(id))
    }

    pub fn measurements_on_page(&self, page_id: PageId) -> impl Iterator<Item = &Measurement> {
        self.measurements().filter(move |m| m.page_id() == page_id)
    }

    pub fn measurements_for_condition(
        &self,
        condition_id: ConditionId,
    ) -> impl Iterator<Item = &Measurement> {
        self.measurements()
            .filter(move |m| m.condition_id() == condition_id)
    }

    /// Measure `geometry` on a page for a condition
    ///
    /// Fails with `CalibrationRequired` on an uncalibrated page,
    /// `GeometryTypeMismatch` when the condition cannot take the shape and
    /// `InvalidGeometry` for degenerate shapes. Nothing is written on failure.
    #[instrument(skip(self, geometry, provenance), fields(geometry_type = %geometry.geometry_type()))]
    pub fn create_measurement(
        &mut self,
        condition_id: ConditionId,
        page_id: PageId,
        geometry: GeometryData,
        provenance: Provenance,
    ) -> TakeoffResult<Measurement> {
        let condition = self
            .conditions
            .get(&condition_id)
            .ok_or(TakeoffError::ConditionNotFound(condition_id))?;
        let page = self
            .pages
            .get(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        let computed = compute(condition, page, &geometry)?;

        let measurement = Measurement::new(condition_id, page_id, geometry, provenance, computed);
        let id = measurement.id();
        self.measurements.insert(id, measurement.clone());
        self.measurement_order.push(id);
        self.rederive_aggregate(condition_id);

        debug!(measurement_id = %id, quantity = computed.quantity, "measurement created");
        Ok(measurement)
    }

    /// Replace a measurement's geometry and recompute it under the page's
    /// current calibration
    #[instrument(skip(self, geometry))]
    pub fn update_measurement(
        &mut self,
        measurement_id: MeasurementId,
        geometry: GeometryData,
    ) -> TakeoffResult<Measurement> {
        let (condition_id, page_id) = self.owners_of(measurement_id)?;
        let condition = self
            .conditions
            .get(&condition_id)
            .ok_or(TakeoffError::ConditionNotFound(condition_id))?;
        let page = self
            .pages
            .get(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        let computed = compute(condition, page, &geometry)?;

        let measurement = self
            .measurements
            .get_mut(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?;
        measurement.set_geometry(geometry);
        measurement.apply(computed);
        let updated = measurement.clone();
        self.rederive_aggregate(condition_id);
        Ok(updated)
    }

    /// Delete a measurement and update its condition
    #[instrument(skip(self))]
    pub fn delete_measurement(&mut self, measurement_id: MeasurementId) -> TakeoffResult<Measurement> {
        let measurement = self
            .measurements
            .remove(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?;
        self.measurement_order.retain(|id| *id != measurement_id);
        self.rederive_aggregate(measurement.condition_id());
        Ok(measurement)
    }

    /// Recompute one measurement under the page's current calibration
    pub fn recalculate_one(&mut self, measurement_id: MeasurementId) -> TakeoffResult<Measurement> {
        let (condition_id, page_id) = self.owners_of(measurement_id)?;
        let condition = self
            .conditions
            .get(&condition_id)
            .ok_or(TakeoffError::ConditionNotFound(condition_id))?;
        let page = self
            .pages
            .get(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        let measurement = self
            .measurements
            .get(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?;
        let computed = compute(condition, page, measurement.geometry())?;

        let measurement = self
            .measurements
            .get_mut(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?;
        measurement.apply(computed);
        let updated = measurement.clone();
        self.rederive_aggregate(condition_id);
        Ok(updated)
    }

    /// Recompute every measurement on a page
    ///
    /// Per-measurement failures are counted and the measurement is marked
    /// invalid; the batch continues. Every touched condition's aggregate is
    /// then re-derived by summation.
    pub fn recalculate_all_on_page(&mut self, page_id: PageId) -> TakeoffResult<RecalculationReport> {
        match self.stage_page_recalculation(page_id, &CancellationToken::new())? {
            Some(staged) => Ok(self.commit_recalculation(staged)),
            None => Ok(RecalculationReport::default()),
        }
    }

    /// Compute new quantities for a page without writing them
    ///
    /// Returns `None` when `cancel` fires between measurements.
    pub(crate) fn stage_page_recalculation(
        &self,
        page_id: PageId,
        cancel: &CancellationToken,
    ) -> TakeoffResult<Option<StagedRecalculation>> {
        let page = self
            .pages
            .get(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        if page.pixels_per_unit().is_none() {
            return Err(TakeoffError::CalibrationRequired { page_id });
        }

        let mut results = Vec::new();
        for id in self.measurement_ids_where(|m| m.page_id() == page_id) {
            if cancel.is_cancelled() {
                debug!(%page_id, "page recalculation cancelled");
                return Ok(None);
            }
            let result = self
                .measurements
                .get(&id)
                .ok_or(TakeoffError::MeasurementNotFound(id))
                .and_then(|m| {
                    let condition = self
                        .conditions
                        .get(&m.condition_id())
                        .ok_or(TakeoffError::ConditionNotFound(m.condition_id()))?;
                    compute(condition, page, m.geometry())
                });
            results.push((id, result));
        }
        Ok(Some(StagedRecalculation { page_id, results }))
    }

    /// Write staged results and re-derive the touched aggregates
    #[instrument(skip(self, staged), fields(page_id = %staged.page_id))]
    pub(crate) fn commit_recalculation(&mut self, staged: StagedRecalculation) -> RecalculationReport {
        let touched: BTreeSet<ConditionId> = staged
            .results
            .iter()
            .filter_map(|(id, _)| self.measurements.get(id).map(|m| m.condition_id()))
            .collect();
        let report = self.commit_results(staged.results);
        for condition_id in touched {
            self.rederive_aggregate(condition_id);
        }
        info!(
            recalculated = report.recalculated,
            failed = report.failed,
            "page recalculated"
        );
        report
    }

    /// Mark a measurement as reviewed (or not)
    pub fn verify_measurement(&mut self, measurement_id: MeasurementId, verified: bool) -> TakeoffResult<()> {
        self.measurements
            .get_mut(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?
            .set_verified(verified);
        Ok(())
    }

    /// Replace the opaque caller data on a measurement
    ///
    /// Quantities and aggregates are unaffected.
    pub fn set_measurement_attributes(
        &mut self,
        measurement_id: MeasurementId,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> TakeoffResult<Measurement> {
        let measurement = self
            .measurements
            .get_mut(&measurement_id)
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))?;
        measurement.set_auxiliary_attributes(attributes);
        Ok(measurement.clone())
    }

    /// Conditions whose stored aggregate differs from a fresh summation
    ///
    /// Empty when every aggregate is consistent.
    pub fn verify_aggregates(&self) -> Vec<ConditionId> {
        self.conditions()
            .filter(|c| {
                let (total, count) = self.summed_aggregate(c.id());
                c.total_quantity() != total || c.measurement_count() != count
            })
            .map(|c| c.id())
            .collect()
    }

    // -- Calibration ---------------------------------------------------------

    /// Run automatic resolution on a page, recalculating it when the
    /// calibration changes
    pub fn resolve_automatic(
        &mut self,
        resolver: &ScaleResolver,
        page_id: PageId,
        text_blocks: &[TextBlock],
        image: Option<&GrayImage>,
    ) -> TakeoffResult<CalibrationResult> {
        let page = self
            .pages
            .get_mut(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        let result = resolver.resolve_automatic(page, text_blocks, image);
        self.after_calibration(&result)?;
        Ok(result)
    }

    /// Apply a background detection result, discarding it when stale
    pub fn apply_detection(
        &mut self,
        resolver: &ScaleResolver,
        outcome: DetectionOutcome,
    ) -> TakeoffResult<CalibrationResult> {
        let page = self
            .pages
            .get_mut(&outcome.page_id)
            .ok_or(TakeoffError::PageNotFound(outcome.page_id))?;
        let result = resolver.apply_detection(page, outcome)?;
        self.after_calibration(&result)?;
        Ok(result)
    }

    /// Calibrate a page from a known distance and recalculate it
    pub fn calibrate_manual(
        &mut self,
        resolver: &ScaleResolver,
        page_id: PageId,
        pixel_distance: f64,
        real_distance: f64,
        real_unit: LengthUnit,
    ) -> TakeoffResult<CalibrationResult> {
        let page = self
            .pages
            .get_mut(&page_id)
            .ok_or(TakeoffError::PageNotFound(page_id))?;
        let result = resolver.calibrate_manual(page, pixel_distance, real_distance, real_unit)?;
        self.after_calibration(&result)?;
        Ok(result)
    }

    /// Copy one page's calibration onto another and recalculate the target
    pub fn copy_from(
        &mut self,
        resolver: &ScaleResolver,
        source_id: PageId,
        target_id: PageId,
    ) -> TakeoffResult<CalibrationResult> {
        let source = self
            .pages
            .get(&source_id)
            .cloned()
            .ok_or(TakeoffError::PageNotFound(source_id))?;
        let target = self
            .pages
            .get_mut(&target_id)
            .ok_or(TakeoffError::PageNotFound(target_id))?;
        let result = resolver.copy_from(&source, target)?;
        self.after_calibration(&result)?;
        Ok(result)
    }

    fn after_calibration(&mut self, result: &CalibrationResult) -> TakeoffResult<()> {
        if result.changed {
            let report = self.recalculate_all_on_page(result.page_id)?;
            if report.failed > 0 {
                warn!(
                    page_id = %result.page_id,
                    failed = report.failed,
                    "measurements could not be recalculated after calibration change"
                );
            }
        }
        Ok(())
    }

    // -- Snapshots -----------------------------------------------------------

    /// Copy the state into a serializable snapshot
    pub fn snapshot(&self) -> TakeoffSnapshot {
        TakeoffSnapshot {
            pages: self.pages().cloned().collect(),
            conditions: self.conditions().cloned().collect(),
            measurements: self.measurements().cloned().collect(),
            ..TakeoffSnapshot::default()
        }
    }

    /// Rebuild state from a snapshot
    ///
    /// Aggregates are re-derived rather than trusted, and job bookkeeping is
    /// reset.
    pub fn from_snapshot(snapshot: TakeoffSnapshot) -> TakeoffResult<Self> {
        let mut state = TakeoffState::new();
        for mut page in snapshot.pages {
            page.clear_pending_jobs();
            state.add_page(page);
        }
        for condition in snapshot.conditions {
            state.add_condition(condition)?;
        }
        for measurement in snapshot.measurements {
            if !state.pages.contains_key(&measurement.page_id()) {
                return Err(PersistenceError::Deserialization(format!(
                    "measurement {} references unknown page {}",
                    measurement.id(),
                    measurement.page_id()
                ))
                .into());
            }
            if !state.conditions.contains_key(&measurement.condition_id()) {
                return Err(PersistenceError::Deserialization(format!(
                    "measurement {} references unknown condition {}",
                    measurement.id(),
                    measurement.condition_id()
                ))
                .into());
            }
            let id = measurement.id();
            if state.measurements.insert(id, measurement).is_none() {
                state.measurement_order.push(id);
            }
        }
        let all: BTreeSet<ConditionId> = state.conditions.keys().copied().collect();
        state.rederive_aggregates(&all);
        Ok(state)
    }

    // -- Internals -----------------------------------------------------------

    fn owners_of(&self, measurement_id: MeasurementId) -> TakeoffResult<(ConditionId, PageId)> {
        self.measurements
            .get(&measurement_id)
            .map(|m| (m.condition_id(), m.page_id()))
            .ok_or(TakeoffError::MeasurementNotFound(measurement_id))
    }

    fn measurement_ids_where(&self, predicate: impl Fn(&Measurement) -> bool) -> Vec<MeasurementId> {
        self.measurements().filter(|m| predicate(m)).map(|m| m.id()).collect()
    }

    fn recompute_with(&self, condition: &Condition, id: MeasurementId) -> TakeoffResult<ComputedQuantity> {
        let measurement = self
            .measurements
            .get(&id)
            .ok_or(TakeoffError::MeasurementNotFound(id))?;
        let page = self
            .pages
            .get(&measurement.page_id())
            .ok_or(TakeoffError::PageNotFound(measurement.page_id()))?;
        compute(condition, page, measurement.geometry())
    }

    fn commit_results(
        &mut self,
        results: Vec<(MeasurementId, TakeoffResult<ComputedQuantity>)>,
    ) -> RecalculationReport {
        let mut report = RecalculationReport::default();
        for (id, result) in results {
            let Some(measurement) = self.measurements.get_mut(&id) else {
                continue;
            };
            match result {
                Ok(computed) => {
                    measurement.apply(computed);
                    report.recalculated += 1;
                }
                Err(err) => {
                    warn!(measurement_id = %id, error = %err, "measurement could not be recalculated");
                    measurement.mark_invalid(err.to_string());
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Remove measurements and return the conditions they belonged to
    fn remove_measurements(&mut self, ids: &[MeasurementId]) -> BTreeSet<ConditionId> {
        let mut touched = BTreeSet::new();
        for id in ids {
            if let Some(measurement) = self.measurements.remove(id) {
                touched.insert(measurement.condition_id());
            }
        }
        self.measurement_order
            .retain(|id| self.measurements.contains_key(id));
        touched
    }

    fn summed_aggregate(&self, condition_id: ConditionId) -> (f64, u32) {
        self.measurements_for_condition(condition_id)
            .filter(|m| m.is_valid())
            .fold((0.0, 0), |(total, count), m| (total + m.quantity(), count + 1))
    }

    fn rederive_aggregate(&mut self, condition_id: ConditionId) {
        let (total, count) = self.summed_aggregate(condition_id);
        if let Some(condition) = self.conditions.get_mut(&condition_id) {
            condition.set_aggregate(total, count);
        }
    }

    fn rederive_aggregates(&mut self, condition_ids: &BTreeSet<ConditionId>) {
        for condition_id in condition_ids {
            self.rederive_aggregate(*condition_id);
        }
    }
}

/// Quantity of `geometry` for `condition` under `page`'s calibration
fn compute(condition: &Condition, page: &Page, geometry: &GeometryData) -> TakeoffResult<ComputedQuantity> {
    let pixels_per_unit = page
        .pixels_per_unit()
        .ok_or(TakeoffError::CalibrationRequired { page_id: page.id() })?;
    let scale = Scale::new(pixels_per_unit, page.unit())?;
    let quantity = compute_quantity_in(
        geometry,
        condition.measurement_type(),
        &scale,
        condition.depth_inches(),
        condition.unit(),
    )?;
    Ok(ComputedQuantity {
        quantity: quantity.value,
        unit: quantity.unit,
        metrics: measure_pixels(geometry)?,
        calibration_version: page.calibration_version(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calculator::GeometryMetrics;
    use crate::condition::MeasurementType;
    use crate::geometry::PixelPoint;
    use crate::page::ScaleState;
    use crate::units::QuantityUnit;

    fn calibrated(state: &mut TakeoffState, resolver: &ScaleResolver, ppu: f64) -> PageId {
        let page_id = state.add_page(Page::new(0, 2000, 1500));
        state
            .calibrate_manual(resolver, page_id, ppu * 10.0, 10.0, LengthUnit::Foot)
            .unwrap();
        page_id
    }

    fn square(size: f64) -> GeometryData {
        GeometryData::Polygon {
            points: vec![
                PixelPoint::new(0.0, 0.0),
                PixelPoint::new(size, 0.0),
                PixelPoint::new(size, size),
                PixelPoint::new(0.0, size),
            ],
        }
    }

    fn line(length: f64) -> GeometryData {
        GeometryData::Line {
            start: PixelPoint::new(10.0, 10.0),
            end: PixelPoint::new(10.0 + length, 10.0),
        }
    }

    fn point() -> GeometryData {
        GeometryData::Point {
            position: PixelPoint::new(5.0, 5.0),
        }
    }

    #[test]
    fn test_create_requires_calibration() {
        let mut state = TakeoffState::new();
        let page_id = state.add_page(Page::new(0, 100, 100));
        let condition_id = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();

        let err = state
            .create_measurement(condition_id, page_id, line(50.0), Provenance::human())
            .unwrap_err();
        assert_eq!(err, TakeoffError::CalibrationRequired { page_id });
        assert!(err.requires_calibration());
        assert_eq!(state.measurements().count(), 0);
        assert_eq!(state.condition(condition_id).unwrap().measurement_count(), 0);
    }

    #[test]
    fn test_calibration_checked_before_geometry() {
        let mut state = TakeoffState::new();
        let page_id = state.add_page(Page::new(0, 100, 100));
        let condition_id = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();

        let err = state
            .create_measurement(condition_id, page_id, point(), Provenance::human())
            .unwrap_err();
        assert!(err.requires_calibration());
    }

    #[test]
    fn test_create_rejects_mismatch_and_degenerate() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let area = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();

        let err = state
            .create_measurement(area, page_id, point(), Provenance::human())
            .unwrap_err();
        assert!(matches!(err, TakeoffError::GeometryTypeMismatch { .. }));

        let err = state
            .create_measurement(area, page_id, square(0.0), Provenance::human())
            .unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidGeometry(_)));

        assert_eq!(state.measurements().count(), 0);
        assert!(state.verify_aggregates().is_empty());
    }

    #[test]
    fn test_create_update_delete_keep_aggregate() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();

        let a = state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();
        let b = state
            .create_measurement(walls, page_id, line(250.0), Provenance::machine(0.8))
            .unwrap();
        assert_eq!(a.quantity(), 10.0);
        assert_eq!(a.unit(), QuantityUnit::LINEAR_FEET);
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 35.0);
        assert_eq!(state.condition(walls).unwrap().measurement_count(), 2);

        let a = state.update_measurement(a.id(), line(300.0)).unwrap();
        assert_eq!(a.quantity(), 30.0);
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 55.0);

        state.delete_measurement(b.id()).unwrap();
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 30.0);
        assert_eq!(state.condition(walls).unwrap().measurement_count(), 1);
        assert!(state.verify_aggregates().is_empty());
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        let m = state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();

        let err = state.update_measurement(m.id(), line(0.0)).unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidGeometry(_)));
        assert_eq!(state.measurement(m.id()).unwrap(), &m);
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 10.0);
    }

    #[test]
    fn test_recalculation_is_idempotent() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 12.5);
        let slab = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();
        state
            .create_measurement(slab, page_id, square(137.0), Provenance::human())
            .unwrap();
        state
            .create_measurement(slab, page_id, square(91.0), Provenance::human())
            .unwrap();

        let first = state.recalculate_all_on_page(page_id).unwrap();
        let after_first: Vec<f64> = state.measurements().map(|m| m.quantity()).collect();
        let total_first = state.condition(slab).unwrap().total_quantity();

        let second = state.recalculate_all_on_page(page_id).unwrap();
        let after_second: Vec<f64> = state.measurements().map(|m| m.quantity()).collect();

        assert_eq!(first, second);
        assert_eq!(first.recalculated, 2);
        assert_eq!(after_first, after_second);
        assert_eq!(state.condition(slab).unwrap().total_quantity(), total_first);
    }

    #[test]
    fn test_scale_change_scaling_law() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 20.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        let slab = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();
        let concrete = state
            .add_condition(Condition::new("Concrete", MeasurementType::Volume).with_depth_inches(6.0))
            .unwrap();
        for condition in [walls, slab, concrete] {
            state
                .create_measurement(condition, page_id, square(200.0), Provenance::human())
                .unwrap();
        }
        let before: Vec<f64> = state.conditions().map(|c| c.total_quantity()).collect();

        state
            .calibrate_manual(&resolver, page_id, 100.0, 10.0, LengthUnit::Foot)
            .unwrap();
        let after: Vec<f64> = state.conditions().map(|c| c.total_quantity()).collect();

        assert!((after[0] / before[0] - 2.0).abs() < 1e-12);
        assert!((after[1] / before[1] - 4.0).abs() < 1e-12);
        // Depth is a real-world value; volume follows plan area.
        assert!((after[2] / before[2] - 4.0).abs() < 1e-12);

        let versions: Vec<u64> = state.measurements().map(|m| m.calibration_version()).collect();
        assert_eq!(versions, vec![2, 2, 2]);
    }

    #[test]
    fn test_batch_failures_are_excluded_from_aggregate() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        let good = state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();

        // A degenerate shape that slipped in through an older snapshot.
        let broken = Measurement::new(
            walls,
            page_id,
            line(0.0),
            Provenance::human(),
            ComputedQuantity {
                quantity: 3.0,
                unit: QuantityUnit::LINEAR_FEET,
                metrics: GeometryMetrics::default(),
                calibration_version: 0,
            },
        );
        let broken_id = broken.id();
        state.measurements.insert(broken_id, broken);
        state.measurement_order.push(broken_id);

        let report = state.recalculate_all_on_page(page_id).unwrap();
        assert_eq!(report, RecalculationReport { recalculated: 1, failed: 1 });
        assert!(state.measurement(broken_id).unwrap().invalid_reason().is_some());
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 10.0);
        assert_eq!(state.condition(walls).unwrap().measurement_count(), 1);
        assert!(state.verify_aggregates().is_empty());

        // Fixing the geometry brings it back.
        state.update_measurement(broken_id, line(50.0)).unwrap();
        assert!(state.measurement(broken_id).unwrap().is_valid());
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 15.0);
        assert_eq!(state.measurement(good.id()).unwrap().quantity(), 10.0);
    }

    #[test]
    fn test_update_condition_depth_recomputes() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let slab = state
            .add_condition(Condition::new("Slab", MeasurementType::Volume).with_depth_inches(4.0))
            .unwrap();
        // 10 ft x 10 ft
        state
            .create_measurement(slab, page_id, square(100.0), Provenance::human())
            .unwrap();
        let before = state.condition(slab).unwrap().total_quantity();

        let report = state.update_condition_depth(slab, Some(8.0)).unwrap();
        assert_eq!(report.recalculated, 1);
        let after = state.condition(slab).unwrap().total_quantity();
        assert!((after / before - 2.0).abs() < 1e-12);

        let err = state.update_condition_depth(slab, None).unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidCondition(_)));
        assert_eq!(state.condition(slab).unwrap().depth_inches(), Some(8.0));
    }

    #[test]
    fn test_delete_condition_cascades() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let outlets = state
            .add_condition(Condition::new("Outlets", MeasurementType::Count))
            .unwrap();
        state
            .create_measurement(outlets, page_id, point(), Provenance::machine(0.9))
            .unwrap();

        state.delete_condition(outlets).unwrap();
        assert_eq!(state.measurements().count(), 0);
        assert!(matches!(
            state.delete_condition(outlets),
            Err(TakeoffError::ConditionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_page_cascades_and_rederives() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let first = calibrated(&mut state, &resolver, 10.0);
        let second = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        state
            .create_measurement(walls, first, line(100.0), Provenance::human())
            .unwrap();
        state
            .create_measurement(walls, second, line(200.0), Provenance::human())
            .unwrap();

        state.remove_page(first).unwrap();
        assert_eq!(state.pages().count(), 1);
        assert_eq!(state.condition(walls).unwrap().total_quantity(), 20.0);
        assert_eq!(state.condition(walls).unwrap().measurement_count(), 1);
    }

    #[test]
    fn test_copy_from_recalculates_target() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let source = calibrated(&mut state, &resolver, 10.0);
        let target = calibrated(&mut state, &resolver, 20.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        let m = state
            .create_measurement(walls, target, line(200.0), Provenance::human())
            .unwrap();
        assert_eq!(m.quantity(), 10.0);

        let result = state.copy_from(&resolver, source, target).unwrap();
        assert_eq!(result.state, ScaleState::ManuallyCalibrated);
        assert_eq!(state.measurement(m.id()).unwrap().quantity(), 20.0);
    }

    #[test]
    fn test_verify_measurement() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let outlets = state
            .add_condition(Condition::new("Outlets", MeasurementType::Count))
            .unwrap();
        let m = state
            .create_measurement(outlets, page_id, point(), Provenance::machine(0.7))
            .unwrap();
        assert!(!m.provenance().verified);

        state.verify_measurement(m.id(), true).unwrap();
        assert!(state.measurement(m.id()).unwrap().provenance().verified);
    }

    #[test]
    fn test_verify_aggregates_detects_drift() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();

        if let Some(condition) = state.conditions.get_mut(&walls) {
            condition.set_aggregate(99.0, 1);
        }
        assert_eq!(state.verify_aggregates(), vec![walls]);
    }

    #[test]
    fn test_snapshot_rebuild_rederives_aggregates() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();

        let mut snapshot = state.snapshot();
        snapshot.conditions[0].set_aggregate(0.0, 0);

        let restored = TakeoffState::from_snapshot(snapshot).unwrap();
        assert_eq!(restored.condition(walls).unwrap().total_quantity(), 10.0);
        assert!(restored.verify_aggregates().is_empty());
    }

    #[test]
    fn test_auxiliary_attributes_survive_snapshot() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let mut sheet = serde_json::Map::new();
        sheet.insert("sheet".to_string(), serde_json::json!("A-101"));
        let page_id = state.add_page(Page::new(0, 2000, 1500).with_auxiliary_attributes(sheet));
        state
            .calibrate_manual(&resolver, page_id, 100.0, 10.0, LengthUnit::Foot)
            .unwrap();

        let mut cost = serde_json::Map::new();
        cost.insert("cost_code".to_string(), serde_json::json!("03 30 00"));
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear).with_auxiliary_attributes(cost))
            .unwrap();
        let m = state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();
        assert!(m.auxiliary_attributes().is_empty());

        let mut note = serde_json::Map::new();
        note.insert("room".to_string(), serde_json::json!(204));
        let m = state.set_measurement_attributes(m.id(), note).unwrap();
        assert_eq!(m.auxiliary_attributes()["room"], 204);
        assert_eq!(m.quantity(), 10.0);

        let json = serde_json::to_string(&state.snapshot()).unwrap();
        let restored = TakeoffState::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored.page(page_id).unwrap().auxiliary_attributes()["sheet"], "A-101");
        assert_eq!(restored.condition(walls).unwrap().auxiliary_attributes()["cost_code"], "03 30 00");
        assert_eq!(restored.measurement(m.id()).unwrap().auxiliary_attributes()["room"], 204);
        assert_eq!(restored.condition(walls).unwrap().total_quantity(), 10.0);
    }

    #[test]
    fn test_overflowing_shape_never_reaches_aggregate() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let slab = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();
        let huge = GeometryData::Rectangle {
            origin: PixelPoint::new(0.0, 0.0),
            width: 1.0e200,
            height: 1.0e200,
        };

        let err = state
            .create_measurement(slab, page_id, huge.clone(), Provenance::human())
            .unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidGeometry(_)));
        assert_eq!(state.measurements().count(), 0);

        let m = state
            .create_measurement(slab, page_id, square(100.0), Provenance::human())
            .unwrap();
        let err = state.update_measurement(m.id(), huge).unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidGeometry(_)));

        let total = state.condition(slab).unwrap().total_quantity();
        assert!(total.is_finite());
        assert!((total - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_collinear_polygon_is_not_persisted() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let slab = state
            .add_condition(Condition::new("Slab", MeasurementType::Area))
            .unwrap();
        let sliver = GeometryData::Polygon {
            points: vec![
                PixelPoint::new(1000.6, 2001.3),
                PixelPoint::new(2701.11, 5402.32),
                PixelPoint::new(6101.79, 12203.68),
            ],
        };

        let err = state
            .create_measurement(slab, page_id, sliver, Provenance::human())
            .unwrap_err();
        assert!(matches!(err, TakeoffError::InvalidGeometry(_)));
        assert_eq!(state.measurements().count(), 0);
        assert_eq!(state.condition(slab).unwrap().total_quantity(), 0.0);
    }

    #[test]
    fn test_snapshot_with_dangling_measurement_rejected() {
        let resolver = ScaleResolver::default();
        let mut state = TakeoffState::new();
        let page_id = calibrated(&mut state, &resolver, 10.0);
        let walls = state
            .add_condition(Condition::new("Walls", MeasurementType::Linear))
            .unwrap();
        state
            .create_measurement(walls, page_id, line(100.0), Provenance::human())
            .unwrap();

        let mut snapshot = state.snapshot();
        snapshot.pages.clear();
        assert!(matches!(
            TakeoffState::from_snapshot(snapshot),
            Err(TakeoffError::Persistence(_))
        ));
    }
}
