//! Measurements taken against a calibrated page
//!
//! A measurement stores raw pixel geometry and the quantity derived from it.
//! The quantity is never edited directly; it is recomputed from the geometry,
//! the owning condition and the page calibration whenever any of them change.

use crate::calculator::GeometryMetrics;
use crate::condition::ConditionId;
use crate::geometry::GeometryData;
use crate::page::PageId;
use crate::units::QuantityUnit;

/// Unique identifier for measurements
pub type MeasurementId = uuid::Uuid;

/// Who drew a measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Author {
    Human,
    Machine,
}

/// Origin and review status of a measurement
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Provenance {
    pub author: Author,
    /// Detector confidence for machine-drawn geometry
    pub confidence: Option<f64>,
    /// Whether a reviewer accepted the geometry
    pub verified: bool,
}

impl Provenance {
    /// Geometry drawn by a person
    pub fn human() -> Self {
        Self {
            author: Author::Human,
            confidence: None,
            verified: true,
        }
    }

    /// Geometry proposed by an automated detector, pending review
    pub fn machine(confidence: f64) -> Self {
        Self {
            author: Author::Machine,
            confidence: Some(confidence.clamp(0.0, 1.0)),
            verified: false,
        }
    }
}

impl Default for Provenance {
    fn default() -> Self {
        Self::human()
    }
}

/// One shape on one page, attributed to one condition
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Measurement {
    id: MeasurementId,
    condition_id: ConditionId,
    page_id: PageId,
    geometry: GeometryData,
    quantity: f64,
    unit: QuantityUnit,
    metrics: GeometryMetrics,
    /// Page calibration version the quantity was computed under
    calibration_version: u64,
    provenance: Provenance,
    /// Why the last batch recalculation could not compute this measurement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invalid_reason: Option<String>,
    #[serde(default)]
    auxiliary_attributes: serde_json::Map<String, serde_json::Value>,
}

impl Measurement {
    pub(crate) fn new(
        condition_id: ConditionId,
        page_id: PageId,
        geometry: GeometryData,
        provenance: Provenance,
        computed: ComputedQuantity,
    ) -> Self {
        Self {
            id: MeasurementId::new_v4(),
            condition_id,
            page_id,
            geometry,
            quantity: computed.quantity,
            unit: computed.unit,
            metrics: computed.metrics,
            calibration_version: computed.calibration_version,
            provenance,
            invalid_reason: None,
            auxiliary_attributes: serde_json::Map::new(),
        }
    }

    pub fn id(&self) -> MeasurementId {
        self.id
    }

    pub fn condition_id(&self) -> ConditionId {
        self.condition_id
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn geometry(&self) -> &GeometryData {
        &self.geometry
    }

    /// Real-world quantity in [`Measurement::unit`]
    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn unit(&self) -> QuantityUnit {
        self.unit
    }

    /// Cached path length, perimeter or circumference in pixels
    pub fn pixel_length(&self) -> Option<f64> {
        self.metrics.pixel_length
    }

    /// Cached enclosed area in square pixels
    pub fn pixel_area(&self) -> Option<f64> {
        self.metrics.pixel_area
    }

    pub fn calibration_version(&self) -> u64 {
        self.calibration_version
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn invalid_reason(&self) -> Option<&str> {
        self.invalid_reason.as_deref()
    }

    /// Whether the measurement counts toward its condition's aggregate
    pub fn is_valid(&self) -> bool {
        self.invalid_reason.is_none()
    }

    pub fn auxiliary_attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.auxiliary_attributes
    }

    pub(crate) fn set_auxiliary_attributes(
        &mut self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) {
        self.auxiliary_attributes = attributes;
    }

    pub(crate) fn set_geometry(&mut self, geometry: GeometryData) {
        self.geometry = geometry;
    }

    pub(crate) fn apply(&mut self, computed: ComputedQuantity) {
        self.quantity = computed.quantity;
        self.unit = computed.unit;
        self.metrics = computed.metrics;
        self.calibration_version = computed.calibration_version;
        self.invalid_reason = None;
    }

    pub(crate) fn mark_invalid(&mut self, reason: impl Into<String>) {
        self.invalid_reason = Some(reason.into());
    }

    pub(crate) fn set_verified(&mut self, verified: bool) {
        self.provenance.verified = verified;
    }
}

/// Result of computing a measurement's quantity, staged before commit
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ComputedQuantity {
    pub quantity: f64,
    pub unit: QuantityUnit,
    pub metrics: GeometryMetrics,
    pub calibration_version: u64,
}
