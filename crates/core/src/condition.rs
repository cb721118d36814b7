//! Takeoff conditions (line items)
//!
//! A condition groups measurements that contribute to one quantity, e.g.
//! "4\" slab on grade" or "interior partition type A". Its running total and
//! count are denormalized from its measurements and are kept equal to a
//! direct recomputation by the takeoff store.

use std::fmt;

use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::GeometryType;
use crate::units::{Dimension, QuantityUnit};

/// Unique identifier for conditions
pub type ConditionId = uuid::Uuid;

/// What a condition measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasurementType {
    /// Length along a path or around a shape
    Linear,
    /// Plan area of a closed shape
    Area,
    /// Plan area times depth
    Volume,
    /// Number of items
    Count,
}

impl MeasurementType {
    /// Whether a shape of `geometry_type` can be measured by this type
    pub fn accepts(self, geometry_type: GeometryType) -> bool {
        use GeometryType::*;
        match self {
            MeasurementType::Linear => {
                matches!(geometry_type, Line | Polyline | Polygon | Rectangle | Circle)
            }
            MeasurementType::Area | MeasurementType::Volume => {
                matches!(geometry_type, Polygon | Rectangle | Circle)
            }
            MeasurementType::Count => geometry_type == Point,
        }
    }

    /// Dimension of the quantities produced
    pub fn dimension(self) -> Dimension {
        match self {
            MeasurementType::Linear => Dimension::Length,
            MeasurementType::Area => Dimension::Area,
            MeasurementType::Volume => Dimension::Volume,
            MeasurementType::Count => Dimension::Count,
        }
    }

    /// Unit used when a condition does not name one
    pub fn default_unit(self) -> QuantityUnit {
        match self {
            MeasurementType::Linear => QuantityUnit::LINEAR_FEET,
            MeasurementType::Area => QuantityUnit::SQUARE_FEET,
            MeasurementType::Volume => QuantityUnit::CubicYard,
            MeasurementType::Count => QuantityUnit::Each,
        }
    }
}

impl fmt::Display for MeasurementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementType::Linear => "linear",
            MeasurementType::Area => "area",
            MeasurementType::Volume => "volume",
            MeasurementType::Count => "count",
        };
        f.write_str(name)
    }
}

/// A takeoff line item with its denormalized aggregate
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Condition {
    id: ConditionId,
    name: String,
    measurement_type: MeasurementType,
    unit: QuantityUnit,
    /// Depth or thickness in inches; required for volume conditions
    depth_inches: Option<f64>,
    total_quantity: f64,
    measurement_count: u32,
    #[serde(default)]
    auxiliary_attributes: serde_json::Map<String, serde_json::Value>,
}

impl Condition {
    /// Create a condition reporting in the default unit for its type
    pub fn new(name: impl Into<String>, measurement_type: MeasurementType) -> Self {
        Self {
            id: ConditionId::new_v4(),
            name: name.into(),
            measurement_type,
            unit: measurement_type.default_unit(),
            depth_inches: None,
            total_quantity: 0.0,
            measurement_count: 0,
            auxiliary_attributes: serde_json::Map::new(),
        }
    }

    /// Report quantities in `unit`
    pub fn with_unit(mut self, unit: QuantityUnit) -> Self {
        self.unit = unit;
        self
    }

    /// Set depth or thickness in inches
    pub fn with_depth_inches(mut self, depth_inches: f64) -> Self {
        self.depth_inches = Some(depth_inches);
        self
    }

    /// Attach opaque caller data
    pub fn with_auxiliary_attributes(
        mut self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.auxiliary_attributes = attributes;
        self
    }

    /// Check that unit, type and depth agree
    pub fn validate(&self) -> TakeoffResult<()> {
        if self.unit.dimension() != self.measurement_type.dimension() {
            return Err(TakeoffError::InvalidCondition(format!(
                "unit {} does not measure {} quantities",
                self.unit, self.measurement_type
            )));
        }
        match (self.measurement_type, self.depth_inches) {
            (MeasurementType::Volume, None) => Err(TakeoffError::InvalidCondition(
                "volume conditions require a depth".to_string(),
            )),
            (_, Some(depth)) if !(depth.is_finite() && depth > 0.0) => Err(
                TakeoffError::InvalidCondition(format!("depth must be positive, got {depth}")),
            ),
            _ => Ok(()),
        }
    }

    pub fn id(&self) -> ConditionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn measurement_type(&self) -> MeasurementType {
        self.measurement_type
    }

    pub fn unit(&self) -> QuantityUnit {
        self.unit
    }

    pub fn depth_inches(&self) -> Option<f64> {
        self.depth_inches
    }

    /// Sum of the quantities of the condition's valid measurements
    pub fn total_quantity(&self) -> f64 {
        self.total_quantity
    }

    /// Number of the condition's valid measurements
    pub fn measurement_count(&self) -> u32 {
        self.measurement_count
    }

    pub fn auxiliary_attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.auxiliary_attributes
    }

    pub(crate) fn set_depth_inches(&mut self, depth_inches: Option<f64>) {
        self.depth_inches = depth_inches;
    }

    pub(crate) fn set_aggregate(&mut self, total_quantity: f64, measurement_count: u32) {
        self.total_quantity = total_quantity;
        self.measurement_count = measurement_count;
    }
}
