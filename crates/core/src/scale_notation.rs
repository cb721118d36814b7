//! Scale notation parsing
//!
//! Parses scale notations found in title blocks and drawing labels into a
//! drawing ratio (real length per paper length). Supported notations:
//! - Architectural: `1/4" = 1'-0"`, `1-1/2" = 1'`, `3" = 1'-0"`
//! - Engineering: `1" = 20'`, `1" = 50'-0"`
//! - Ratio: `1:100`, `SCALE 1:50`
//! - Not to scale: `NTS`, `N.T.S.`, `NOT TO SCALE`
//!
//! Text that matches no notation yields an empty list; that is a normal
//! outcome, not an error.

use std::sync::LazyLock;

use regex::Regex;

use crate::units::LengthUnit;

/// Confidence of an architectural notation match
pub const ARCHITECTURAL_CONFIDENCE: f64 = 0.95;
/// Confidence of an engineering notation match
pub const ENGINEERING_CONFIDENCE: f64 = 0.90;
/// Confidence of a bare `1:N` ratio
pub const RATIO_CONFIDENCE: f64 = 0.80;
/// Confidence of a `1:N` ratio preceded by a `SCALE` label
pub const LABELED_RATIO_CONFIDENCE: f64 = 0.90;
/// Confidence of a not-to-scale marker
pub const NOT_TO_SCALE_CONFIDENCE: f64 = 0.95;

/// Largest drawing ratio accepted from text
const MAX_RATIO: f64 = 10_000.0;

// Leading `(?:^|[^0-9./])` keeps numbers from matching inside longer ones.
static ARCHITECTURAL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^0-9./])(?P<body>(?:(?P<whole>\d+)\s*-\s*)?(?P<num>\d+(?:\.\d+)?)(?:\s*/\s*(?P<den>\d+))?\s*"\s*=\s*1\s*'(?:\s*-\s*0\s*"?)?)"#,
    )
    .expect("architectural pattern should compile")
});

static ENGINEERING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:^|[^0-9./])(?P<body>1\s*"\s*=\s*(?P<feet>\d+(?:\.\d+)?)\s*'(?:\s*-\s*0\s*"?)?)"#,
    )
    .expect("engineering pattern should compile")
});

static RATIO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9./])(?P<body>(?P<label>SCALE\s*:?\s*)?1\s*:\s*(?P<denominator>\d+(?:\.\d+)?))")
        .expect("ratio pattern should compile")
});

static NOT_TO_SCALE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:N\.?\s?T\.?\s?S\b\.?|NOT\s+TO\s+SCALE\b)")
        .expect("not-to-scale pattern should compile")
});

/// Notation family a match came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleCategory {
    Architectural,
    Engineering,
    Ratio,
    NotToScale,
}

/// A scale parsed from text
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ParsedScale {
    pub category: ScaleCategory,
    /// Real length per paper length; 0 for not-to-scale
    pub ratio: f64,
    /// Derived when the rendering resolution is known
    pub pixels_per_unit: Option<f64>,
    /// Grammar weight (0.0-1.0)
    pub confidence: f64,
    /// Matched text after OCR normalization
    pub raw_text: String,
}

impl ParsedScale {
    /// Whether this scale can calibrate a page on its own
    pub fn is_calibratable(&self) -> bool {
        self.ratio > 0.0 && self.pixels_per_unit.is_some()
    }
}

/// Normalize OCR output before matching
///
/// Upper-cases the text, folds typographic quotes into ASCII and reads a
/// doubled apostrophe as an inch mark.
pub fn normalize(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2033}' | '\u{201D}' | '\u{201C}' => normalized.push('"'),
            '\u{2032}' | '\u{2019}' | '\u{2018}' | '`' => normalized.push('\''),
            _ => normalized.extend(c.to_uppercase()),
        }
    }
    normalized.replace("''", "\"")
}

/// Pixels per real unit for a drawing ratio rendered at `render_dpi`
///
/// One real inch covers `1 / ratio` paper inches, so one real unit covers
/// `render_dpi * inches(unit) / ratio` pixels.
pub fn pixels_per_unit_for_ratio(ratio: f64, render_dpi: f64, unit: LengthUnit) -> Option<f64> {
    if !(ratio > 0.0 && ratio.is_finite() && render_dpi > 0.0 && render_dpi.is_finite()) {
        return None;
    }
    Some(render_dpi * unit.inches() / ratio)
}

/// Parse every scale notation in `text`
///
/// Returns matches sorted by confidence (highest first); ties keep their
/// order of appearance.
pub fn parse_scale_notation(
    text: &str,
    render_dpi: Option<f64>,
    page_unit: LengthUnit,
) -> Vec<ParsedScale> {
    let normalized = normalize(text);
    let mut found: Vec<ParsedScale> = Vec::new();

    let mut push = |category: ScaleCategory, ratio: f64, confidence: f64, raw: &str| {
        if category != ScaleCategory::NotToScale && !(ratio > 0.0 && ratio <= MAX_RATIO) {
            return;
        }
        let duplicate = found
            .iter()
            .any(|s| s.category == category && (s.ratio - ratio).abs() < 1e-9);
        if duplicate {
            return;
        }
        let pixels_per_unit = render_dpi.and_then(|dpi| pixels_per_unit_for_ratio(ratio, dpi, page_unit));
        found.push(ParsedScale {
            category,
            ratio,
            pixels_per_unit,
            confidence,
            raw_text: raw.trim().to_string(),
        });
    };

    for caps in ARCHITECTURAL.captures_iter(&normalized) {
        let Some(inches) = architectural_inches(&caps) else {
            continue;
        };
        push(
            ScaleCategory::Architectural,
            12.0 / inches,
            ARCHITECTURAL_CONFIDENCE,
            &caps["body"],
        );
    }

    for caps in ENGINEERING.captures_iter(&normalized) {
        let Ok(feet) = caps["feet"].parse::<f64>() else {
            continue;
        };
        // 1" = 1' is the architectural full-size notation
        if feet <= 1.0 {
            continue;
        }
        push(
            ScaleCategory::Engineering,
            12.0 * feet,
            ENGINEERING_CONFIDENCE,
            &caps["body"],
        );
    }

    for caps in RATIO.captures_iter(&normalized) {
        let Ok(denominator) = caps["denominator"].parse::<f64>() else {
            continue;
        };
        let confidence = if caps.name("label").is_some() {
            LABELED_RATIO_CONFIDENCE
        } else {
            RATIO_CONFIDENCE
        };
        push(ScaleCategory::Ratio, denominator, confidence, &caps["body"]);
    }

    if let Some(m) = NOT_TO_SCALE.find(&normalized) {
        push(ScaleCategory::NotToScale, 0.0, NOT_TO_SCALE_CONFIDENCE, m.as_str());
    }

    found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    found
}

/// Highest-confidence scale in `text`, if any
pub fn best_scale(text: &str, render_dpi: Option<f64>, page_unit: LengthUnit) -> Option<ParsedScale> {
    parse_scale_notation(text, render_dpi, page_unit).into_iter().next()
}

/// Paper inches on the left side of an architectural notation
fn architectural_inches(caps: &regex::Captures<'_>) -> Option<f64> {
    let numerator: f64 = caps.name("num")?.as_str().parse().ok()?;
    let whole = caps.name("whole");
    let inches = match caps.name("den") {
        Some(den) => {
            let denominator: f64 = den.as_str().parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            let whole: f64 = match whole {
                Some(w) => w.as_str().parse().ok()?,
                None => 0.0,
            };
            whole + numerator / denominator
        }
        // "3-1" without a fraction is not a mixed number
        None if whole.is_some() => return None,
        None => numerator,
    };
    (inches > 0.0).then_some(inches)
}
