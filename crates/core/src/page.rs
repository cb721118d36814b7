//! Pages and their scale calibration
//!
//! A page is one raster sheet. Its calibration (pixels per real unit) is
//! only ever changed through the scale resolver; every change bumps
//! `calibration_version` so that background work started under an older
//! calibration can detect that its result is stale.

use std::fmt;

use crate::geometry::BoundingBox;
use crate::scale_notation::ScaleCategory;
use crate::units::LengthUnit;

/// Unique identifier for pages
pub type PageId = uuid::Uuid;

/// Calibration state of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleState {
    #[default]
    Uncalibrated,
    /// Accepted from a detected notation
    AutoDetected,
    /// Set by a person, either by measurement or by copying another page
    ManuallyCalibrated,
}

impl ScaleState {
    pub fn is_calibrated(self) -> bool {
        !matches!(self, ScaleState::Uncalibrated)
    }
}

impl fmt::Display for ScaleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScaleState::Uncalibrated => "uncalibrated",
            ScaleState::AutoDetected => "auto_detected",
            ScaleState::ManuallyCalibrated => "manually_calibrated",
        };
        f.write_str(name)
    }
}

/// How a calibration candidate was found
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Parsed from a scale notation in a text block
    Notation { category: ScaleCategory },
    /// Graphical scale bar found in the raster
    ScaleBar,
    /// Two-point measurement by a person
    Manual,
    /// Copied from another page's calibration
    CopiedFromPage { source: PageId },
}

/// One scale signal considered for a page
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationCandidate {
    pub method: DetectionMethod,
    /// Drawing ratio when known (0 for not-to-scale)
    pub ratio: Option<f64>,
    pub pixels_per_unit: Option<f64>,
    pub confidence: f64,
    /// Source text of a notation match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    /// Where on the page the signal was found
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<BoundingBox>,
    /// Bar length in pixels for scale-bar candidates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pixel_length: Option<f64>,
    #[serde(default)]
    pub in_title_block: bool,
}

impl CalibrationCandidate {
    /// Whether the candidate may calibrate a page without review
    ///
    /// Scale-bar signals are advisory even when a label suggests a factor.
    pub fn is_auto_eligible(&self) -> bool {
        let calibrates = matches!(self.pixels_per_unit, Some(ppu) if ppu.is_finite() && ppu > 0.0);
        let has_ratio = matches!(self.ratio, Some(ratio) if ratio > 0.0);
        calibrates && has_ratio && !matches!(self.method, DetectionMethod::ScaleBar)
    }
}

/// Audit trail of a page's calibration
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationRecord {
    /// Candidate the current calibration came from
    pub chosen: Option<CalibrationCandidate>,
    /// Candidates considered when `chosen` was selected
    #[serde(default)]
    pub candidates: Vec<CalibrationCandidate>,
    /// Candidates from later automatic runs that left the calibration alone
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewed_candidates: Vec<CalibrationCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CalibrationRecord {
    pub fn method(&self) -> Option<DetectionMethod> {
        self.chosen.as_ref().map(|c| c.method)
    }
}

/// A block of extracted text with its position on the page
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BoundingBox,
    /// Recognition confidence (0.0-1.0)
    pub confidence: f64,
    #[serde(default)]
    pub in_title_block: bool,
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence,
            in_title_block: false,
        }
    }

    /// Mark the block as extracted from the sheet's title block
    pub fn in_title_block(mut self) -> Self {
        self.in_title_block = true;
        self
    }
}

/// One raster sheet of a drawing set
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Page {
    id: PageId,
    /// Position in the source document (0-based)
    page_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    width_px: u32,
    height_px: u32,
    unit: LengthUnit,
    /// Resolution the raster was rendered at, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    render_dpi: Option<f64>,
    scale_state: ScaleState,
    pixels_per_unit: Option<f64>,
    #[serde(default)]
    calibration_record: CalibrationRecord,
    calibration_version: u64,
    #[serde(skip)]
    pending_jobs: u32,
    #[serde(default)]
    auxiliary_attributes: serde_json::Map<String, serde_json::Value>,
}

impl Page {
    /// Create an uncalibrated page measured in feet
    pub fn new(page_index: u32, width_px: u32, height_px: u32) -> Self {
        Self {
            id: PageId::new_v4(),
            page_index,
            label: None,
            width_px,
            height_px,
            unit: LengthUnit::default(),
            render_dpi: None,
            scale_state: ScaleState::Uncalibrated,
            pixels_per_unit: None,
            calibration_record: CalibrationRecord::default(),
            calibration_version: 0,
            pending_jobs: 0,
            auxiliary_attributes: serde_json::Map::new(),
        }
    }

    pub fn with_unit(mut self, unit: LengthUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_render_dpi(mut self, dpi: f64) -> Self {
        self.render_dpi = Some(dpi);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_auxiliary_attributes(
        mut self,
        attributes: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.auxiliary_attributes = attributes;
        self
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn width_px(&self) -> u32 {
        self.width_px
    }

    pub fn height_px(&self) -> u32 {
        self.height_px
    }

    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    pub fn render_dpi(&self) -> Option<f64> {
        self.render_dpi
    }

    pub fn scale_state(&self) -> ScaleState {
        self.scale_state
    }

    pub fn pixels_per_unit(&self) -> Option<f64> {
        self.pixels_per_unit
    }

    pub fn calibration_record(&self) -> &CalibrationRecord {
        &self.calibration_record
    }

    pub fn calibration_version(&self) -> u64 {
        self.calibration_version
    }

    /// Whether background detection or recalculation is running
    pub fn detection_pending(&self) -> bool {
        self.pending_jobs > 0
    }

    pub fn auxiliary_attributes(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.auxiliary_attributes
    }

    /// Install a new calibration and bump the version
    pub(crate) fn set_calibration(
        &mut self,
        state: ScaleState,
        pixels_per_unit: f64,
        record: CalibrationRecord,
    ) -> u64 {
        self.scale_state = state;
        self.pixels_per_unit = Some(pixels_per_unit);
        self.calibration_record = record;
        self.calibration_version += 1;
        self.calibration_version
    }

    pub(crate) fn set_unit(&mut self, unit: LengthUnit) {
        self.unit = unit;
    }

    /// Keep the current calibration but record the candidates reviewed
    ///
    /// The candidates behind `chosen` stay untouched.
    pub(crate) fn record_candidates(&mut self, candidates: Vec<CalibrationCandidate>) {
        self.calibration_record.reviewed_candidates = candidates;
    }

    pub(crate) fn job_started(&mut self) {
        self.pending_jobs += 1;
    }

    pub(crate) fn job_finished(&mut self) {
        self.pending_jobs = self.pending_jobs.saturating_sub(1);
    }

    pub(crate) fn clear_pending_jobs(&mut self) {
        self.pending_jobs = 0;
    }
}
