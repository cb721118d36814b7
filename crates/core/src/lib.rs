//! Takeoff Core Library
//!
//! Quantity takeoff engine for construction drawings: scale detection and
//! calibration per page, geometry-to-quantity calculation, and the
//! measurement lifecycle that keeps condition totals in step with their
//! measurements.

pub mod calculator;
pub mod condition;
pub mod config;
pub mod error;
pub mod geometry;
pub mod measurement;
pub mod page;
pub mod persistence;
pub mod resolver;
pub mod scale_bar;
pub mod scale_notation;
pub mod store;
pub mod takeoff;
pub mod units;

pub use calculator::{
    area, compute_quantity, compute_quantity_in, diameter, length, measure_pixels, perimeter,
    volume_cubic_yards, GeometryMetrics, Quantity, Scale,
};
pub use condition::{Condition, ConditionId, MeasurementType};
pub use config::{ConfigError, TakeoffConfig};
pub use error::{TakeoffError, TakeoffResult};
pub use geometry::{BoundingBox, GeometryData, GeometryType, PixelPoint};
pub use measurement::{Author, Measurement, MeasurementId, Provenance};
pub use page::{
    CalibrationCandidate, CalibrationRecord, DetectionMethod, Page, PageId, ScaleState, TextBlock,
};
pub use persistence::{PersistenceError, TakeoffSnapshot};
pub use resolver::{
    CalibrationResult, DetectionOutcome, DetectionRequest, ResolverConfig, ScaleResolver,
    DEFAULT_ACCEPTANCE_THRESHOLD,
};
pub use scale_bar::{parse_bar_label, BarLabel, Cancelled, ScaleBarCandidate, ScaleBarConfig, ScaleBarDetector};
pub use scale_notation::{best_scale, parse_scale_notation, ParsedScale, ScaleCategory};
pub use store::{RecalculationReport, TakeoffState};
pub use takeoff::Takeoff;
pub use takeoff_scheduler::{CancellationToken, JobHandle, JobStatus};
pub use units::{Dimension, LengthUnit, QuantityUnit};
