//! Pixel-space geometry model
//!
//! All coordinates are raster pixel coordinates of the page image:
//! - Origin (0, 0) at the top-left of the image
//! - X increases to the right
//! - Y increases downward

use std::fmt;

/// Point in page pixel space
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PixelPoint {
    pub x: f64,
    pub y: f64,
}

impl PixelPoint {
    /// Create a new pixel point
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &PixelPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Axis-aligned box in page pixel space
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Smallest box containing both boxes
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Overlapping region, if any
    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        (right > x && bottom > y).then(|| BoundingBox::new(x, y, right - x, bottom - y))
    }

    /// Grow the box by `margin` on every side
    pub fn expand(&self, margin: f64) -> BoundingBox {
        BoundingBox::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Shortest distance between the two boxes (0 when they touch or overlap)
    pub fn gap_to(&self, other: &BoundingBox) -> f64 {
        let dx = (other.x - self.right()).max(self.x - other.right()).max(0.0);
        let dy = (other.y - self.bottom()).max(self.y - other.bottom()).max(0.0);
        dx.hypot(dy)
    }
}

/// Kind of shape drawn on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryType {
    Line,
    Polyline,
    Polygon,
    Rectangle,
    Circle,
    Point,
}

impl fmt::Display for GeometryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GeometryType::Line => "line",
            GeometryType::Polyline => "polyline",
            GeometryType::Polygon => "polygon",
            GeometryType::Rectangle => "rectangle",
            GeometryType::Circle => "circle",
            GeometryType::Point => "point",
        };
        f.write_str(name)
    }
}

/// Shape geometry in page pixel space
///
/// The variant carries the geometry type, so type and data can never
/// disagree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GeometryData {
    /// Segment between two endpoints
    Line { start: PixelPoint, end: PixelPoint },

    /// Open path through ordered points
    Polyline { points: Vec<PixelPoint> },

    /// Closed shape through ordered vertices (last vertex joins the first)
    Polygon { points: Vec<PixelPoint> },

    /// Axis-aligned rectangle from an origin corner; extents may be negative
    /// when drawn toward the origin
    Rectangle {
        origin: PixelPoint,
        width: f64,
        height: f64,
    },

    /// Circle from center and radius (pixels)
    Circle { center: PixelPoint, radius: f64 },

    /// Single count marker
    Point { position: PixelPoint },
}

impl GeometryData {
    /// The geometry type of this shape
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            GeometryData::Line { .. } => GeometryType::Line,
            GeometryData::Polyline { .. } => GeometryType::Polyline,
            GeometryData::Polygon { .. } => GeometryType::Polygon,
            GeometryData::Rectangle { .. } => GeometryType::Rectangle,
            GeometryData::Circle { .. } => GeometryType::Circle,
            GeometryData::Point { .. } => GeometryType::Point,
        }
    }
}
