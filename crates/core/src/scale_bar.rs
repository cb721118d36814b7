//! Graphical scale-bar detection
//!
//! Looks for the ruled bars drawn next to a scale notation:
//!
//! 1. Crop to the search region (usually the title block)
//! 2. Gaussian blur and Canny edges
//! 3. Hough line transform; keep lines within a few degrees of horizontal
//! 4. Trace contiguous ink runs along each line on the binarized crop
//! 5. Score runs by fill, thickness uniformity and end tick marks
//!
//! The detector reports a pixel length only. It does not know what real
//! length a bar stands for; [`parse_bar_label`] reads a nearby label when one
//! exists so a reviewer can be offered a suggested factor.

use std::sync::LazyLock;

use image::GrayImage;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::hough::{detect_lines, LineDetectionOptions, PolarLine};
use regex::Regex;
use takeoff_scheduler::CancellationToken;
use tracing::{debug, instrument};

use crate::config::ConfigError;
use crate::geometry::BoundingBox;
use crate::units::LengthUnit;

/// Weight of the ink fill ratio in a candidate's confidence
const STRAIGHTNESS_WEIGHT: f64 = 0.35;
/// Weight of thickness uniformity in a candidate's confidence
const STABILITY_WEIGHT: f64 = 0.25;
/// Weight of end tick marks in a candidate's confidence
const TICK_WEIGHT: f64 = 0.40;

static LABEL_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d+(?:\.\d+)?").expect("label number pattern should compile")
});

/// Detection returned early because its token was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("scale-bar detection cancelled")]
pub struct Cancelled;

/// Tuning for [`ScaleBarDetector`]
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ScaleBarConfig {
    /// Gaussian blur sigma applied before edge detection
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Minimum Hough votes for a line
    pub hough_vote_threshold: u32,
    /// Non-maximum suppression radius in Hough space
    pub hough_suppression_radius: u32,
    /// Largest deviation from horizontal, in degrees
    pub max_angle_deviation_deg: f64,
    /// Gray level below which a pixel counts as ink
    pub ink_threshold: u8,
    pub min_length_px: f64,
    pub max_length_px: f64,
    /// Longest break in a run that is still bridged
    pub max_gap_px: u32,
    /// Thickest stroke considered a bar
    pub max_bar_thickness_px: u32,
    /// Extra height over the bar that makes a tick mark
    pub min_tick_height_px: u32,
    /// Horizontal distance from a run end searched for its tick
    pub tick_search_px: u32,
    /// Distance from a bar within which a text label is paired with it
    pub label_search_px: f64,
}

impl Default for ScaleBarConfig {
    fn default() -> Self {
        Self {
            blur_sigma: 1.0,
            canny_low: 30.0,
            canny_high: 90.0,
            hough_vote_threshold: 40,
            hough_suppression_radius: 6,
            max_angle_deviation_deg: 3.0,
            ink_threshold: 128,
            min_length_px: 40.0,
            max_length_px: 4000.0,
            max_gap_px: 2,
            max_bar_thickness_px: 12,
            min_tick_height_px: 4,
            tick_search_px: 4,
            label_search_px: 60.0,
        }
    }
}

impl ScaleBarConfig {
    pub fn with_length_range(mut self, min_length_px: f64, max_length_px: f64) -> Self {
        self.min_length_px = min_length_px;
        self.max_length_px = max_length_px;
        self
    }

    /// Name of the first invalid field, if any
    pub fn invalid_field(&self) -> Option<&'static str> {
        if !(self.blur_sigma > 0.0 && self.blur_sigma.is_finite()) {
            return Some("blur_sigma");
        }
        if !(self.canny_low >= 0.0 && self.canny_high >= self.canny_low) {
            return Some("canny_high");
        }
        if !(self.min_length_px > 0.0 && self.min_length_px.is_finite()) {
            return Some("min_length_px");
        }
        if !(self.max_length_px >= self.min_length_px && self.max_length_px.is_finite()) {
            return Some("max_length_px");
        }
        if !(0.0..90.0).contains(&self.max_angle_deviation_deg) {
            return Some("max_angle_deviation_deg");
        }
        if self.max_bar_thickness_px == 0 {
            return Some("max_bar_thickness_px");
        }
        None
    }
}

/// A detected scale bar
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScaleBarCandidate {
    /// Bar length in page pixels
    pub pixel_length: f64,
    /// Bar extent in page pixel coordinates
    pub location: BoundingBox,
    pub confidence: f64,
}

/// Real length written on a scale bar's label
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BarLabel {
    /// Largest graduation, taken as the full bar length
    pub length: f64,
    pub unit: LengthUnit,
}

/// Binarized view of a grayscale crop
struct InkMask<'a> {
    image: &'a GrayImage,
    threshold: u8,
}

impl InkMask<'_> {
    fn is_ink(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.image.width() as i64 || y >= self.image.height() as i64 {
            return false;
        }
        self.image.get_pixel(x as u32, y as u32)[0] < self.threshold
    }

    /// Rows above and below `(x, y)` covered by the same stroke
    fn vertical_extent(&self, x: i64, y: i64, cap: i64) -> Option<(i64, i64)> {
        if !self.is_ink(x, y) {
            return None;
        }
        let mut top = y;
        while y - top < cap && self.is_ink(x, top - 1) {
            top -= 1;
        }
        let mut bottom = y;
        while bottom - y < cap && self.is_ink(x, bottom + 1) {
            bottom += 1;
        }
        Some((top, bottom))
    }
}

/// A near-horizontal line through the crop, as `y = y0 + slope * x`
#[derive(Debug, Clone, Copy)]
struct TraceLine {
    y0: f64,
    slope: f64,
}

impl TraceLine {
    /// Solve `x cos(t) + y sin(t) = r` for y; `None` for vertical lines
    fn from_polar(line: PolarLine) -> Option<Self> {
        let theta = (line.angle_in_degrees as f64).to_radians();
        let (sin, cos) = theta.sin_cos();
        if sin.abs() < 1e-6 {
            return None;
        }
        Some(Self {
            y0: line.r as f64 / sin,
            slope: -cos / sin,
        })
    }

    fn row_at(&self, x: i64, offset: i64) -> i64 {
        (self.y0 + self.slope * x as f64).round() as i64 + offset
    }
}

/// Finds graphical scale bars in a page raster
#[derive(Debug, Clone, Default)]
pub struct ScaleBarDetector {
    config: ScaleBarConfig,
}

impl ScaleBarDetector {
    /// Create a detector, rejecting settings the image filters cannot use
    pub fn new(config: ScaleBarConfig) -> Result<Self, ConfigError> {
        if let Some(field) = config.invalid_field() {
            return Err(ConfigError::InvalidValue(format!("scale_bar.{field}")));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScaleBarConfig {
        &self.config
    }

    /// Detect scale bars, optionally restricted to `region`
    ///
    /// Candidates are in page coordinates, sorted by confidence (highest
    /// first), with overlapping detections merged.
    #[instrument(skip(self, image, cancel), fields(width = image.width(), height = image.height()))]
    pub fn detect(
        &self,
        image: &GrayImage,
        region: Option<BoundingBox>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ScaleBarCandidate>, Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let Some((x0, y0, w, h)) = clip_region(image, region) else {
            debug!("search region lies outside the image");
            return Ok(Vec::new());
        };
        let crop = image::imageops::crop_imm(image, x0, y0, w, h).to_image();
        if w < 3 || h < 3 {
            return Ok(Vec::new());
        }

        let blurred = gaussian_blur_f32(&crop, self.config.blur_sigma);
        let edges = canny(&blurred, self.config.canny_low, self.config.canny_high);
        let lines = detect_lines(
            &edges,
            LineDetectionOptions {
                vote_threshold: self.config.hough_vote_threshold,
                suppression_radius: self.config.hough_suppression_radius,
            },
        );
        debug!(line_count = lines.len(), "hough lines detected");

        let mask = InkMask {
            image: &crop,
            threshold: self.config.ink_threshold,
        };
        let mut candidates = Vec::new();
        for line in lines {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }
            let deviation = (90.0 - line.angle_in_degrees as f64).abs();
            if deviation > self.config.max_angle_deviation_deg {
                continue;
            }
            let Some(trace) = TraceLine::from_polar(line) else {
                continue;
            };
            candidates.extend(self.trace_runs(&mask, trace));
        }

        let mut merged = merge_overlapping(candidates);
        for candidate in &mut merged {
            candidate.location.x += x0 as f64;
            candidate.location.y += y0 as f64;
        }
        debug!(candidate_count = merged.len(), "scale bar detection finished");
        Ok(merged)
    }

    /// Score every ink run along `line` whose length is plausible
    fn trace_runs(&self, mask: &InkMask<'_>, line: TraceLine) -> Vec<ScaleBarCandidate> {
        let width = mask.image.width() as i64;
        let band = self.config.max_bar_thickness_px as i64;

        // The Hough line sits on a stroke edge; move it onto the inkiest row.
        let offset = (-band..=band)
            .map(|offset| {
                let ink = (0..width).filter(|&x| mask.is_ink(x, line.row_at(x, offset))).count();
                (offset, ink)
            })
            .max_by(|a, b| a.1.cmp(&b.1).then(b.0.abs().cmp(&a.0.abs())))
            .map(|(offset, _)| offset)
            .unwrap_or(0);

        let max_gap = self.config.max_gap_px as i64;
        let mut runs = Vec::new();
        let mut current: Option<(i64, i64)> = None;
        for x in 0..width {
            if !mask.is_ink(x, line.row_at(x, offset)) {
                continue;
            }
            current = match current {
                Some((start, end)) if x - end - 1 <= max_gap => Some((start, x)),
                Some(run) => {
                    runs.push(run);
                    Some((x, x))
                }
                None => Some((x, x)),
            };
        }
        runs.extend(current);

        runs.into_iter()
            .filter_map(|(start, end)| self.score_run(mask, line, offset, start, end))
            .collect()
    }

    fn score_run(
        &self,
        mask: &InkMask<'_>,
        line: TraceLine,
        offset: i64,
        start: i64,
        end: i64,
    ) -> Option<ScaleBarCandidate> {
        let span = (end - start + 1) as f64;
        let pixel_length = span.hypot(span * line.slope);
        if pixel_length < self.config.min_length_px || pixel_length > self.config.max_length_px {
            return None;
        }

        let inked = (start..=end)
            .filter(|&x| mask.is_ink(x, line.row_at(x, offset)))
            .count() as f64;
        let straightness = inked / span;

        let cap = self.config.max_bar_thickness_px as i64;
        let margin = self.config.tick_search_px as i64 + 1;
        let mut thickness = Vec::new();
        let (mut top, mut bottom) = (i64::MAX, i64::MIN);
        for x in (start + margin)..=(end - margin) {
            if let Some((t, b)) = mask.vertical_extent(x, line.row_at(x, offset), cap) {
                thickness.push((b - t + 1) as f64);
                top = top.min(t);
                bottom = bottom.max(b);
            }
        }
        if thickness.is_empty() {
            return None;
        }
        let stability = 1.0 - coefficient_of_variation(&thickness).min(1.0);
        let bar_thickness = median(&mut thickness);

        let ticks = [start, end]
            .iter()
            .filter(|&&end_x| self.has_tick(mask, line, offset, end_x, bar_thickness))
            .count() as f64
            / 2.0;

        let confidence =
            STRAIGHTNESS_WEIGHT * straightness + STABILITY_WEIGHT * stability + TICK_WEIGHT * ticks;
        let location = BoundingBox::new(
            start as f64,
            top as f64,
            span,
            (bottom - top + 1) as f64,
        );
        Some(ScaleBarCandidate {
            pixel_length,
            location,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }

    /// Whether a perpendicular stroke rises above the bar near `end_x`
    fn has_tick(
        &self,
        mask: &InkMask<'_>,
        line: TraceLine,
        offset: i64,
        end_x: i64,
        bar_thickness: f64,
    ) -> bool {
        let search = self.config.tick_search_px as i64;
        let needed = bar_thickness + self.config.min_tick_height_px as f64;
        let cap = (needed.ceil() as i64) * 2;
        ((end_x - search)..=(end_x + search)).any(|x| {
            mask.vertical_extent(x, line.row_at(x, offset), cap)
                .is_some_and(|(t, b)| (b - t + 1) as f64 >= needed)
        })
    }
}

/// Clip an optional region to the image, as `(x, y, width, height)`
fn clip_region(image: &GrayImage, region: Option<BoundingBox>) -> Option<(u32, u32, u32, u32)> {
    let full = BoundingBox::new(0.0, 0.0, image.width() as f64, image.height() as f64);
    let clipped = match region {
        Some(region) => region.intersection(&full)?,
        None => full,
    };
    let x = clipped.x.floor().max(0.0) as u32;
    let y = clipped.y.floor().max(0.0) as u32;
    let right = (clipped.right().ceil() as u32).min(image.width());
    let bottom = (clipped.bottom().ceil() as u32).min(image.height());
    (right > x && bottom > y).then(|| (x, y, right - x, bottom - y))
}

/// Keep the most confident of each group of overlapping candidates
fn merge_overlapping(mut candidates: Vec<ScaleBarCandidate>) -> Vec<ScaleBarCandidate> {
    candidates.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.pixel_length.total_cmp(&a.pixel_length))
    });
    let mut kept: Vec<ScaleBarCandidate> = Vec::new();
    for candidate in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.location.expand(1.0).intersection(&candidate.location).is_some());
        if !overlaps {
            kept.push(candidate);
        }
    }
    kept
}

fn coefficient_of_variation(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        return 1.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(f64::total_cmp);
    values[values.len() / 2]
}

/// Read a scale-bar label such as `0 5 10 20 FEET` or `0 1 2 5m`
///
/// Labels start at zero; the largest graduation is the full bar length.
pub fn parse_bar_label(text: &str) -> Option<BarLabel> {
    let numbers: Vec<f64> = LABEL_NUMBER
        .find_iter(text)
        .filter_map(|m| m.as_str().parse().ok())
        .collect();
    if numbers.len() < 2 || numbers[0] != 0.0 {
        return None;
    }

    let trailing = text
        .trim_end()
        .trim_end_matches(|c: char| c.is_ascii_digit() || c == '.' || c.is_whitespace());
    let unit_text = trailing
        .rsplit(|c: char| c.is_ascii_digit() || c.is_whitespace())
        .next()
        .filter(|word| !word.is_empty())
        .unwrap_or(trailing);
    let unit = LengthUnit::parse(unit_text.trim_end_matches('.'))?;

    let length = numbers.into_iter().fold(0.0, f64::max);
    (length > 0.0).then_some(BarLabel { length, unit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn blank(width: u32, height: u32) -> GrayImage {
        GrayImage::from_pixel(width, height, Luma([255u8]))
    }

    fn fill(image: &mut GrayImage, x: u32, y: u32, w: u32, h: u32) {
        for py in y..y + h {
            for px in x..x + w {
                image.put_pixel(px, py, Luma([0u8]));
            }
        }
    }

    /// 300 px bar, 4 px thick, with 24 px ticks at both ends
    fn ticked_bar() -> GrayImage {
        let mut image = blank(400, 200);
        fill(&mut image, 50, 100, 300, 4);
        fill(&mut image, 50, 90, 3, 24);
        fill(&mut image, 347, 90, 3, 24);
        image
    }

    #[test]
    fn test_detects_ticked_bar() {
        let detector = ScaleBarDetector::default();
        let candidates = detector
            .detect(&ticked_bar(), None, &CancellationToken::new())
            .unwrap();

        assert_eq!(candidates.len(), 1);
        let bar = &candidates[0];
        assert!((bar.pixel_length - 300.0).abs() <= 4.0, "{}", bar.pixel_length);
        assert!(bar.confidence > 0.9, "{}", bar.confidence);
        assert!((bar.location.x - 50.0).abs() <= 2.0);
    }

    #[test]
    fn test_bar_without_ticks_scores_lower() {
        let mut image = blank(400, 200);
        fill(&mut image, 50, 100, 300, 4);

        let candidates = ScaleBarDetector::default()
            .detect(&image, None, &CancellationToken::new())
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].confidence < 0.7);
        assert!(candidates[0].confidence > 0.5);
    }

    #[test]
    fn test_blank_page_has_no_candidates() {
        let candidates = ScaleBarDetector::default()
            .detect(&blank(300, 300), None, &CancellationToken::new())
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_vertical_lines_ignored() {
        let mut image = blank(200, 400);
        fill(&mut image, 100, 50, 4, 300);

        let candidates = ScaleBarDetector::default()
            .detect(&image, None, &CancellationToken::new())
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_short_strokes_ignored() {
        let mut image = blank(200, 200);
        fill(&mut image, 50, 100, 20, 3);

        let candidates = ScaleBarDetector::default()
            .detect(&image, None, &CancellationToken::new())
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_region_restricts_search_and_offsets_location() {
        let mut image = blank(800, 400);
        fill(&mut image, 450, 300, 300, 4);
        fill(&mut image, 450, 290, 3, 24);
        fill(&mut image, 747, 290, 3, 24);

        let detector = ScaleBarDetector::default();
        let token = CancellationToken::new();

        let outside = detector
            .detect(&image, Some(BoundingBox::new(0.0, 0.0, 400.0, 200.0)), &token)
            .unwrap();
        assert!(outside.is_empty());

        let inside = detector
            .detect(&image, Some(BoundingBox::new(400.0, 250.0, 400.0, 150.0)), &token)
            .unwrap();
        assert_eq!(inside.len(), 1);
        assert!((inside[0].location.x - 450.0).abs() <= 2.0);
        assert!((inside[0].location.y - 300.0).abs() <= 2.0);
    }

    #[test]
    fn test_cancelled_detection_returns_nothing() {
        let token = CancellationToken::new();
        token.cancel();

        let result = ScaleBarDetector::default().detect(&ticked_bar(), None, &token);
        assert_eq!(result, Err(Cancelled));
    }

    #[test]
    fn test_merge_keeps_most_confident() {
        let merged = merge_overlapping(vec![
            ScaleBarCandidate {
                pixel_length: 100.0,
                location: BoundingBox::new(0.0, 0.0, 100.0, 4.0),
                confidence: 0.6,
            },
            ScaleBarCandidate {
                pixel_length: 100.0,
                location: BoundingBox::new(0.0, 2.0, 100.0, 4.0),
                confidence: 0.9,
            },
            ScaleBarCandidate {
                pixel_length: 50.0,
                location: BoundingBox::new(0.0, 100.0, 50.0, 4.0),
                confidence: 0.7,
            },
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(merged[1].confidence, 0.7);
    }

    #[test]
    fn test_parse_bar_labels() {
        assert_eq!(
            parse_bar_label("0 5 10 20 FEET"),
            Some(BarLabel {
                length: 20.0,
                unit: LengthUnit::Foot
            })
        );
        assert_eq!(
            parse_bar_label("0 1 2 5m"),
            Some(BarLabel {
                length: 5.0,
                unit: LengthUnit::Meter
            })
        );
        assert_eq!(parse_bar_label("5 10 FEET"), None);
        assert_eq!(parse_bar_label("0 10 20"), None);
        assert_eq!(parse_bar_label("FIRST FLOOR"), None);
    }

    #[test]
    fn test_detector_rejects_unusable_blur() {
        let config = ScaleBarConfig {
            blur_sigma: 0.0,
            ..ScaleBarConfig::default()
        };
        assert!(matches!(
            ScaleBarDetector::new(config),
            Err(ConfigError::InvalidValue(field)) if field == "scale_bar.blur_sigma"
        ));
        assert!(ScaleBarDetector::new(ScaleBarConfig::default()).is_ok());
    }

    #[test]
    fn test_config_validation() {
        assert_eq!(ScaleBarConfig::default().invalid_field(), None);
        assert_eq!(
            ScaleBarConfig::default()
                .with_length_range(100.0, 50.0)
                .invalid_field(),
            Some("max_length_px")
        );
    }
}
