//! Error types for the takeoff engine

use crate::condition::{ConditionId, MeasurementType};
use crate::geometry::GeometryType;
use crate::measurement::MeasurementId;
use crate::page::PageId;
use crate::persistence::PersistenceError;

/// Errors raised by calibration and measurement operations
///
/// A scale string that matches no grammar is not an error; parsing returns an
/// empty candidate list instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TakeoffError {
    #[error("page {page_id} has no scale calibration; calibrate the page manually or resolve its scale before taking quantities")]
    CalibrationRequired { page_id: PageId },

    #[error("invalid calibration input: {0}")]
    InvalidCalibrationInput(String),

    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("{geometry_type} geometry cannot be measured by a {measurement_type} condition")]
    GeometryTypeMismatch {
        geometry_type: GeometryType,
        measurement_type: MeasurementType,
    },

    #[error("calibration of page {page_id} advanced from version {dispatched} to {current} while detection was running; stale result discarded")]
    ConcurrentCalibrationConflict {
        page_id: PageId,
        dispatched: u64,
        current: u64,
    },

    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    #[error("page not found: {0}")]
    PageNotFound(PageId),

    #[error("condition not found: {0}")]
    ConditionNotFound(ConditionId),

    #[error("measurement not found: {0}")]
    MeasurementNotFound(MeasurementId),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl TakeoffError {
    /// Whether the caller should prompt for a manual calibration
    pub fn requires_calibration(&self) -> bool {
        matches!(self, TakeoffError::CalibrationRequired { .. })
    }

    /// Whether the error is the stale-result outcome of a background detection
    pub fn is_stale_result(&self) -> bool {
        matches!(self, TakeoffError::ConcurrentCalibrationConflict { .. })
    }
}

/// Result type for takeoff operations
pub type TakeoffResult<T> = Result<T, TakeoffError>;
