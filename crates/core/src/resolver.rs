//! Scale resolver
//!
//! Owns the page calibration state machine:
//!
//! ```text
//! Uncalibrated ──auto──▶ AutoDetected ──manual/copy──▶ ManuallyCalibrated
//!      │                  ▲      │                          │
//!      │                  └─auto─┘                          │
//!      └──────────────manual/copy──────────────────────────▶│◀─manual/copy─┘
//! ```
//!
//! Automatic resolution never overrides a manual calibration, and a visual
//! scale bar alone never calibrates a page. Every transition bumps the page's
//! calibration version.

use image::GrayImage;
use takeoff_scheduler::CancellationToken;
use tracing::{debug, info, instrument};

use crate::config::ConfigError;
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::BoundingBox;
use crate::page::{
    CalibrationCandidate, CalibrationRecord, DetectionMethod, Page, PageId, ScaleState, TextBlock,
};
use crate::scale_bar::{parse_bar_label, Cancelled, ScaleBarCandidate, ScaleBarConfig, ScaleBarDetector};
use crate::scale_notation::parse_scale_notation;
use crate::units::LengthUnit;

/// Default confidence an automatic candidate needs to calibrate a page
pub const DEFAULT_ACCEPTANCE_THRESHOLD: f64 = 0.85;

/// Resolver tuning
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Minimum confidence for automatic acceptance
    pub acceptance_threshold: f64,
    /// Margin added around title-block text when searching for scale bars
    pub title_block_margin_px: f64,
    /// Run the visual scale-bar detector when an image is supplied
    pub detect_scale_bars: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            acceptance_threshold: DEFAULT_ACCEPTANCE_THRESHOLD,
            title_block_margin_px: 50.0,
            detect_scale_bars: true,
        }
    }
}

impl ResolverConfig {
    pub fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.acceptance_threshold = threshold;
        self
    }

    pub fn with_title_block_margin(mut self, margin_px: f64) -> Self {
        self.title_block_margin_px = margin_px;
        self
    }

    pub fn with_scale_bar_detection(mut self, enabled: bool) -> Self {
        self.detect_scale_bars = enabled;
        self
    }

    /// Name of the first invalid field, if any
    pub fn invalid_field(&self) -> Option<&'static str> {
        if !(0.0..=1.0).contains(&self.acceptance_threshold) {
            return Some("acceptance_threshold");
        }
        if !(self.title_block_margin_px >= 0.0 && self.title_block_margin_px.is_finite()) {
            return Some("title_block_margin_px");
        }
        None
    }
}

/// Outcome of a calibration operation
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationResult {
    pub page_id: PageId,
    pub state: ScaleState,
    pub pixels_per_unit: Option<f64>,
    pub unit: LengthUnit,
    /// Candidate behind the page's calibration after the operation
    pub chosen: Option<CalibrationCandidate>,
    /// Candidates considered by this operation
    pub candidates: Vec<CalibrationCandidate>,
    /// Page calibration version after the operation
    pub version: u64,
    /// Whether the page calibration changed
    pub changed: bool,
}

impl CalibrationResult {
    fn from_page(page: &Page, candidates: Vec<CalibrationCandidate>, changed: bool) -> Self {
        Self {
            page_id: page.id(),
            state: page.scale_state(),
            pixels_per_unit: page.pixels_per_unit(),
            unit: page.unit(),
            chosen: page.calibration_record().chosen.clone(),
            candidates,
            version: page.calibration_version(),
            changed,
        }
    }
}

/// Page facts captured when automatic detection is dispatched
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionRequest {
    pub page_id: PageId,
    pub dispatched_version: u64,
    pub unit: LengthUnit,
    pub render_dpi: Option<f64>,
    /// Scale-bar search region, when the page has a title block
    pub region: Option<BoundingBox>,
}

/// Candidates found by a detection run, waiting to be applied
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionOutcome {
    pub page_id: PageId,
    pub dispatched_version: u64,
    pub candidates: Vec<CalibrationCandidate>,
}

/// Resolves page scale from notations, scale bars and manual input
#[derive(Debug, Clone, Default)]
pub struct ScaleResolver {
    config: ResolverConfig,
    detector: ScaleBarDetector,
}

impl ScaleResolver {
    /// Create a resolver from validated settings
    pub fn new(config: ResolverConfig, scale_bar: ScaleBarConfig) -> Result<Self, ConfigError> {
        if let Some(field) = config.invalid_field() {
            return Err(ConfigError::InvalidValue(format!("resolver.{field}")));
        }
        Ok(Self {
            config,
            detector: ScaleBarDetector::new(scale_bar)?,
        })
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn detector(&self) -> &ScaleBarDetector {
        &self.detector
    }

    /// Parse every text block into weighted notation candidates
    pub fn notation_candidates(
        &self,
        text_blocks: &[TextBlock],
        render_dpi: Option<f64>,
        unit: LengthUnit,
    ) -> Vec<CalibrationCandidate> {
        text_blocks
            .iter()
            .flat_map(|block| {
                let ocr_confidence = block.confidence.clamp(0.0, 1.0);
                parse_scale_notation(&block.text, render_dpi, unit)
                    .into_iter()
                    .map(move |parsed| CalibrationCandidate {
                        method: DetectionMethod::Notation {
                            category: parsed.category,
                        },
                        ratio: Some(parsed.ratio),
                        pixels_per_unit: parsed.pixels_per_unit,
                        confidence: parsed.confidence * ocr_confidence,
                        raw_text: Some(parsed.raw_text),
                        location: Some(block.bbox),
                        pixel_length: None,
                        in_title_block: block.in_title_block,
                    })
            })
            .collect()
    }

    /// Union of the title-block text regions, grown by the configured margin
    pub fn title_block_region(&self, text_blocks: &[TextBlock]) -> Option<BoundingBox> {
        text_blocks
            .iter()
            .filter(|block| block.in_title_block)
            .map(|block| block.bbox)
            .reduce(|acc, bbox| acc.union(&bbox))
            .map(|region| region.expand(self.config.title_block_margin_px))
    }

    /// Turn detected bars into advisory candidates
    ///
    /// A bar with a readable label nearby (`0 5 10 20 FEET`) gets a suggested
    /// factor; it is still never eligible for automatic acceptance.
    pub fn scale_bar_candidates(
        &self,
        bars: Vec<ScaleBarCandidate>,
        text_blocks: &[TextBlock],
        unit: LengthUnit,
        in_title_block: bool,
    ) -> Vec<CalibrationCandidate> {
        let search = self.detector.config().label_search_px;
        bars.into_iter()
            .map(|bar| {
                let label = text_blocks
                    .iter()
                    .filter(|block| block.bbox.gap_to(&bar.location) <= search)
                    .find_map(|block| parse_bar_label(&block.text).map(|label| (block, label)));
                let (raw_text, pixels_per_unit) = match label {
                    Some((block, label)) => {
                        let length = label.unit.convert(label.length, unit);
                        (Some(block.text.clone()), Some(bar.pixel_length / length))
                    }
                    None => (None, None),
                };
                CalibrationCandidate {
                    method: DetectionMethod::ScaleBar,
                    ratio: None,
                    pixels_per_unit,
                    confidence: bar.confidence,
                    raw_text,
                    location: Some(bar.location),
                    pixel_length: Some(bar.pixel_length),
                    in_title_block,
                }
            })
            .collect()
    }

    /// Highest-confidence auto-eligible candidate; ties prefer the title block
    pub fn select_best<'a>(
        &self,
        candidates: &'a [CalibrationCandidate],
    ) -> Option<&'a CalibrationCandidate> {
        candidates
            .iter()
            .filter(|c| c.is_auto_eligible())
            .fold(None, |best: Option<&CalibrationCandidate>, c| match best {
                Some(b)
                    if b.confidence > c.confidence
                        || (b.confidence == c.confidence && (b.in_title_block || !c.in_title_block)) =>
                {
                    Some(b)
                }
                _ => Some(c),
            })
    }

    /// Capture what a background detection needs from the page
    pub fn prepare_detection(&self, page: &Page, text_blocks: &[TextBlock]) -> DetectionRequest {
        DetectionRequest {
            page_id: page.id(),
            dispatched_version: page.calibration_version(),
            unit: page.unit(),
            render_dpi: page.render_dpi(),
            region: self.title_block_region(text_blocks),
        }
    }

    /// Gather notation and scale-bar candidates without touching the page
    #[instrument(skip(self, request, text_blocks, image, cancel), fields(page_id = %request.page_id))]
    pub fn detect(
        &self,
        request: &DetectionRequest,
        text_blocks: &[TextBlock],
        image: Option<&GrayImage>,
        cancel: &CancellationToken,
    ) -> Result<DetectionOutcome, Cancelled> {
        let mut candidates = self.notation_candidates(text_blocks, request.render_dpi, request.unit);

        if let Some(image) = image.filter(|_| self.config.detect_scale_bars) {
            let bars = self.detector.detect(image, request.region, cancel)?;
            candidates.extend(self.scale_bar_candidates(
                bars,
                text_blocks,
                request.unit,
                request.region.is_some(),
            ));
        }
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        debug!(candidate_count = candidates.len(), "scale candidates gathered");
        Ok(DetectionOutcome {
            page_id: request.page_id,
            dispatched_version: request.dispatched_version,
            candidates,
        })
    }

    /// Apply a detection outcome unless the page changed since dispatch
    pub fn apply_detection(
        &self,
        page: &mut Page,
        outcome: DetectionOutcome,
    ) -> TakeoffResult<CalibrationResult> {
        if page.calibration_version() != outcome.dispatched_version {
            info!(
                page_id = %page.id(),
                dispatched = outcome.dispatched_version,
                current = page.calibration_version(),
                "discarding stale scale detection"
            );
            return Err(TakeoffError::ConcurrentCalibrationConflict {
                page_id: page.id(),
                dispatched: outcome.dispatched_version,
                current: page.calibration_version(),
            });
        }
        Ok(self.commit(page, outcome.candidates))
    }

    /// Parse text, look for scale bars and accept the best candidate
    ///
    /// Never fails: when nothing qualifies the page keeps its state and the
    /// candidates are recorded for review.
    pub fn resolve_automatic(
        &self,
        page: &mut Page,
        text_blocks: &[TextBlock],
        image: Option<&GrayImage>,
    ) -> CalibrationResult {
        let request = self.prepare_detection(page, text_blocks);
        let candidates = match self.detect(&request, text_blocks, image, &CancellationToken::new()) {
            Ok(outcome) => outcome.candidates,
            Err(Cancelled) => Vec::new(),
        };
        self.commit(page, candidates)
    }

    #[instrument(skip(self, page, candidates), fields(page_id = %page.id()))]
    fn commit(&self, page: &mut Page, candidates: Vec<CalibrationCandidate>) -> CalibrationResult {
        let best = self.select_best(&candidates).cloned();
        let threshold = self.config.acceptance_threshold;

        match best {
            Some(best) if page.scale_state() == ScaleState::ManuallyCalibrated => {
                debug!(
                    confidence = best.confidence,
                    "page is manually calibrated; recording candidates only"
                );
            }
            Some(best) if best.confidence >= threshold => {
                if let Some(pixels_per_unit) = best.pixels_per_unit {
                    let record = CalibrationRecord {
                        chosen: Some(best.clone()),
                        candidates: candidates.clone(),
                        reviewed_candidates: Vec::new(),
                        note: None,
                    };
                    let version = page.set_calibration(ScaleState::AutoDetected, pixels_per_unit, record);
                    info!(
                        version,
                        confidence = best.confidence,
                        pixels_per_unit,
                        "scale auto-detected"
                    );
                    return CalibrationResult::from_page(page, candidates, true);
                }
            }
            Some(best) => {
                debug!(
                    confidence = best.confidence,
                    threshold, "best candidate below acceptance threshold"
                );
            }
            None => debug!("no auto-eligible scale candidate"),
        }

        page.record_candidates(candidates.clone());
        CalibrationResult::from_page(page, candidates, false)
    }

    /// Calibrate from a known distance measured on the page
    ///
    /// `pixel_distance` pixels span `real_distance` in `real_unit`.
    pub fn calibrate_manual(
        &self,
        page: &mut Page,
        pixel_distance: f64,
        real_distance: f64,
        real_unit: LengthUnit,
    ) -> TakeoffResult<CalibrationResult> {
        if !(pixel_distance.is_finite() && pixel_distance > 0.0) {
            return Err(TakeoffError::InvalidCalibrationInput(format!(
                "pixel distance must be positive, got {pixel_distance}"
            )));
        }
        if !(real_distance.is_finite() && real_distance > 0.0) {
            return Err(TakeoffError::InvalidCalibrationInput(format!(
                "real distance must be positive, got {real_distance}"
            )));
        }

        let pixels_per_unit = pixel_distance * page.unit().factor_to(real_unit) / real_distance;
        let chosen = CalibrationCandidate {
            method: DetectionMethod::Manual,
            ratio: None,
            pixels_per_unit: Some(pixels_per_unit),
            confidence: 1.0,
            raw_text: Some(format!("{pixel_distance} px = {real_distance} {real_unit}")),
            location: None,
            pixel_length: Some(pixel_distance),
            in_title_block: false,
        };
        let record = CalibrationRecord {
            chosen: Some(chosen.clone()),
            candidates: Vec::new(),
            reviewed_candidates: reviewed_so_far(page),
            note: None,
        };
        let version = page.set_calibration(ScaleState::ManuallyCalibrated, pixels_per_unit, record);
        info!(page_id = %page.id(), version, pixels_per_unit, "page calibrated manually");
        Ok(CalibrationResult::from_page(page, vec![chosen], true))
    }

    /// Reuse another page's calibration
    ///
    /// The target takes the source's factor and unit. The result is treated
    /// as a manual calibration.
    pub fn copy_from(&self, source: &Page, target: &mut Page) -> TakeoffResult<CalibrationResult> {
        let source_ppu = source
            .pixels_per_unit()
            .filter(|_| source.scale_state().is_calibrated())
            .ok_or(TakeoffError::CalibrationRequired {
                page_id: source.id(),
            })?;

        let pixels_per_unit = source_ppu;
        let source_chosen = source.calibration_record().chosen.as_ref();
        let chosen = CalibrationCandidate {
            method: DetectionMethod::CopiedFromPage {
                source: source.id(),
            },
            ratio: source_chosen.and_then(|c| c.ratio),
            pixels_per_unit: Some(pixels_per_unit),
            confidence: source_chosen.map_or(1.0, |c| c.confidence),
            raw_text: None,
            location: None,
            pixel_length: None,
            in_title_block: false,
        };
        let record = CalibrationRecord {
            chosen: Some(chosen.clone()),
            candidates: Vec::new(),
            reviewed_candidates: reviewed_so_far(target),
            note: Some(format!("copied from page {}", source.id())),
        };
        target.set_unit(source.unit());
        let version = target.set_calibration(ScaleState::ManuallyCalibrated, pixels_per_unit, record);
        info!(
            page_id = %target.id(),
            source = %source.id(),
            version,
            pixels_per_unit,
            "calibration copied"
        );
        Ok(CalibrationResult::from_page(target, vec![chosen], true))
    }
}

/// Automatic candidates a manual step supersedes, kept for review
fn reviewed_so_far(page: &Page) -> Vec<CalibrationCandidate> {
    let record = page.calibration_record();
    if record.reviewed_candidates.is_empty() {
        record.candidates.clone()
    } else {
        record.reviewed_candidates.clone()
    }
}
