//! Geometry calculator
//!
//! Pure functions that turn pixel-space geometry into real-world quantities.
//! Linear values divide by pixels-per-unit, areas by its square; volumes are
//! derived from plan area and a depth in inches and reported in cubic yards.
//!
//! Degenerate shapes are rejected with [`TakeoffError::InvalidGeometry`]
//! rather than measured as zero.

use std::f64::consts::PI;

use crate::condition::MeasurementType;
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::{GeometryData, PixelPoint};
use crate::units::{LengthUnit, QuantityUnit, CUBIC_FEET_PER_CUBIC_YARD};

/// Lengths at or below this many pixels are treated as zero
const MIN_PIXEL_LENGTH: f64 = 1e-9;

/// Areas at or below this many square pixels are treated as zero
const MIN_PIXEL_AREA: f64 = 1e-9;

/// Fraction of a shape's own extent below which round-off counts as zero
const RELATIVE_TOLERANCE: f64 = 1e-9;

/// Page calibration used for a computation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scale {
    pixels_per_unit: f64,
    unit: LengthUnit,
}

impl Scale {
    /// Create a scale, rejecting non-positive or non-finite factors
    pub fn new(pixels_per_unit: f64, unit: LengthUnit) -> TakeoffResult<Self> {
        if !(pixels_per_unit.is_finite() && pixels_per_unit > 0.0) {
            return Err(TakeoffError::InvalidCalibrationInput(format!(
                "pixels per unit must be positive, got {pixels_per_unit}"
            )));
        }
        Ok(Self {
            pixels_per_unit,
            unit,
        })
    }

    pub fn pixels_per_unit(&self) -> f64 {
        self.pixels_per_unit
    }

    pub fn unit(&self) -> LengthUnit {
        self.unit
    }

    /// Convert a pixel length into real units
    pub fn to_real_length(&self, pixels: f64) -> f64 {
        pixels / self.pixels_per_unit
    }

    /// Convert a pixel area into real square units
    pub fn to_real_area(&self, square_pixels: f64) -> f64 {
        square_pixels / (self.pixels_per_unit * self.pixels_per_unit)
    }
}

/// Pixel-space metrics cached on a measurement for audit
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct GeometryMetrics {
    /// Path length, perimeter or circumference in pixels
    pub pixel_length: Option<f64>,
    /// Enclosed area in square pixels (closed shapes only)
    pub pixel_area: Option<f64>,
}

/// A computed real-world quantity
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Quantity {
    pub value: f64,
    pub unit: QuantityUnit,
}

fn invalid(message: impl Into<String>) -> TakeoffError {
    TakeoffError::InvalidGeometry(message.into())
}

fn ensure_finite(points: &[PixelPoint]) -> TakeoffResult<()> {
    if points.iter().all(PixelPoint::is_finite) {
        Ok(())
    } else {
        Err(invalid("coordinates must be finite"))
    }
}

/// Largest coordinate magnitude, the scale of round-off in its metrics
fn coordinate_magnitude(points: &[PixelPoint]) -> f64 {
    points
        .iter()
        .map(|p| p.x.abs().max(p.y.abs()))
        .fold(0.0, f64::max)
}

fn min_length_for(points: &[PixelPoint]) -> f64 {
    MIN_PIXEL_LENGTH.max(RELATIVE_TOLERANCE * coordinate_magnitude(points))
}

/// Whether an enclosed area is round-off for a boundary this long
///
/// The perimeter bounds the extent of the shape from above, so comparing
/// against its square covers the bounding box as well.
fn is_negligible_area(area: f64, perimeter: f64) -> bool {
    area <= MIN_PIXEL_AREA || area / perimeter / perimeter <= RELATIVE_TOLERANCE
}

fn ensure_measurable(metrics: GeometryMetrics) -> TakeoffResult<GeometryMetrics> {
    let finite = metrics.pixel_length.map_or(true, f64::is_finite)
        && metrics.pixel_area.map_or(true, f64::is_finite);
    if finite {
        Ok(metrics)
    } else {
        Err(invalid("shape is too large to measure"))
    }
}

fn path_length(points: &[PixelPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Shoelace area of a simple polygon
///
/// Vertices are taken relative to the first one to keep the cross products
/// small for shapes far from the origin.
fn shoelace_area(points: &[PixelPoint]) -> f64 {
    let Some(anchor) = points.first() else {
        return 0.0;
    };
    let n = points.len();
    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        let (xi, yi) = (points[i].x - anchor.x, points[i].y - anchor.y);
        let (xj, yj) = (points[j].x - anchor.x, points[j].y - anchor.y);
        twice_area += xi * yj - xj * yi;
    }
    twice_area.abs() / 2.0
}

fn closed_perimeter(points: &[PixelPoint]) -> f64 {
    let closing = match (points.first(), points.last()) {
        (Some(first), Some(last)) => last.distance_to(first),
        _ => 0.0,
    };
    path_length(points) + closing
}

/// Validate a shape and compute its pixel metrics
///
/// Rejects zero-length lines and polylines, polylines with fewer than two
/// points, polygons with fewer than three vertices, zero-area polygons,
/// rectangles and circles, non-finite coordinates, and shapes whose metrics
/// overflow. "Zero" is relative to the shape's own size, so collinear
/// vertices with fractional coordinates are rejected too.
pub fn measure_pixels(geometry: &GeometryData) -> TakeoffResult<GeometryMetrics> {
    ensure_measurable(raw_metrics(geometry)?)
}

fn raw_metrics(geometry: &GeometryData) -> TakeoffResult<GeometryMetrics> {
    match geometry {
        GeometryData::Line { start, end } => {
            ensure_finite(&[*start, *end])?;
            let length = start.distance_to(end);
            if length <= min_length_for(&[*start, *end]) {
                return Err(invalid("line has zero length"));
            }
            Ok(GeometryMetrics {
                pixel_length: Some(length),
                pixel_area: None,
            })
        }
        GeometryData::Polyline { points } => {
            if points.len() < 2 {
                return Err(invalid(format!(
                    "polyline needs at least 2 points, got {}",
                    points.len()
                )));
            }
            ensure_finite(points)?;
            let length = path_length(points);
            if length <= min_length_for(points) {
                return Err(invalid("polyline has zero length"));
            }
            Ok(GeometryMetrics {
                pixel_length: Some(length),
                pixel_area: None,
            })
        }
        GeometryData::Polygon { points } => {
            if points.len() < 3 {
                return Err(invalid(format!(
                    "polygon needs at least 3 points, got {}",
                    points.len()
                )));
            }
            ensure_finite(points)?;
            let area = shoelace_area(points);
            let perimeter = closed_perimeter(points);
            let metrics = ensure_measurable(GeometryMetrics {
                pixel_length: Some(perimeter),
                pixel_area: Some(area),
            })?;
            if is_negligible_area(area, perimeter) {
                return Err(invalid("polygon has zero area"));
            }
            Ok(metrics)
        }
        GeometryData::Rectangle {
            origin,
            width,
            height,
        } => {
            ensure_finite(&[*origin])?;
            if !(width.is_finite() && height.is_finite()) {
                return Err(invalid("rectangle extents must be finite"));
            }
            let (w, h) = (width.abs(), height.abs());
            let perimeter = 2.0 * (w + h);
            let metrics = ensure_measurable(GeometryMetrics {
                pixel_length: Some(perimeter),
                pixel_area: Some(w * h),
            })?;
            if is_negligible_area(w * h, perimeter) {
                return Err(invalid("rectangle has zero area"));
            }
            Ok(metrics)
        }
        GeometryData::Circle { center, radius } => {
            ensure_finite(&[*center])?;
            if !radius.is_finite() || *radius < 0.0 {
                return Err(invalid(format!("circle radius must be positive, got {radius}")));
            }
            if *radius <= min_length_for(&[*center]) {
                return Err(invalid("circle has zero radius"));
            }
            let area = PI * radius * radius;
            if area <= MIN_PIXEL_AREA {
                return Err(invalid("circle has zero radius"));
            }
            Ok(GeometryMetrics {
                pixel_length: Some(2.0 * PI * radius),
                pixel_area: Some(area),
            })
        }
        GeometryData::Point { position } => {
            ensure_finite(&[*position])?;
            Ok(GeometryMetrics::default())
        }
    }
}

/// Real length of an open path (line or polyline)
pub fn length(geometry: &GeometryData, scale: &Scale) -> TakeoffResult<f64> {
    match geometry {
        GeometryData::Line { .. } | GeometryData::Polyline { .. } => {
            let metrics = measure_pixels(geometry)?;
            Ok(scale.to_real_length(metrics.pixel_length.unwrap_or_default()))
        }
        other => Err(invalid(format!("{} has no open length", other.geometry_type()))),
    }
}

/// Real perimeter of a closed shape (circumference for circles)
pub fn perimeter(geometry: &GeometryData, scale: &Scale) -> TakeoffResult<f64> {
    match geometry {
        GeometryData::Polygon { .. }
        | GeometryData::Rectangle { .. }
        | GeometryData::Circle { .. } => {
            let metrics = measure_pixels(geometry)?;
            Ok(scale.to_real_length(metrics.pixel_length.unwrap_or_default()))
        }
        other => Err(invalid(format!("{} has no perimeter", other.geometry_type()))),
    }
}

/// Real area of a closed shape in square units
pub fn area(geometry: &GeometryData, scale: &Scale) -> TakeoffResult<f64> {
    match geometry {
        GeometryData::Polygon { .. }
        | GeometryData::Rectangle { .. }
        | GeometryData::Circle { .. } => {
            let metrics = measure_pixels(geometry)?;
            Ok(scale.to_real_area(metrics.pixel_area.unwrap_or_default()))
        }
        other => Err(invalid(format!("{} has no area", other.geometry_type()))),
    }
}

/// Real diameter of a circle
pub fn diameter(geometry: &GeometryData, scale: &Scale) -> TakeoffResult<f64> {
    match geometry {
        GeometryData::Circle { radius, .. } => {
            measure_pixels(geometry)?;
            Ok(scale.to_real_length(2.0 * radius))
        }
        other => Err(invalid(format!("{} has no diameter", other.geometry_type()))),
    }
}

/// Volume in cubic yards of a plan area extruded by `depth_inches`
///
/// `area` is in square `area_unit`; it is converted to square feet first.
/// Depth is a real-world value independent of the page scale, so volume
/// scales with plan area when the calibration changes.
pub fn volume_cubic_yards(area: f64, area_unit: LengthUnit, depth_inches: f64) -> f64 {
    let to_feet = area_unit.factor_to(LengthUnit::Foot);
    let square_feet = area * to_feet * to_feet;
    square_feet * (depth_inches / 12.0) / CUBIC_FEET_PER_CUBIC_YARD
}

/// Compute the quantity a condition of `measurement_type` takes from a shape
///
/// The result is in the natural unit for the scale: length or square length
/// in the scale's unit, cubic yards for volume, each for counts.
pub fn compute_quantity(
    geometry: &GeometryData,
    measurement_type: MeasurementType,
    scale: &Scale,
    depth_inches: Option<f64>,
) -> TakeoffResult<Quantity> {
    finite_quantity(raw_quantity(geometry, measurement_type, scale, depth_inches)?)
}

fn finite_quantity(quantity: Quantity) -> TakeoffResult<Quantity> {
    if quantity.value.is_finite() {
        Ok(quantity)
    } else {
        Err(invalid(format!("quantity is not finite: {}", quantity.value)))
    }
}

fn raw_quantity(
    geometry: &GeometryData,
    measurement_type: MeasurementType,
    scale: &Scale,
    depth_inches: Option<f64>,
) -> TakeoffResult<Quantity> {
    let geometry_type = geometry.geometry_type();
    if !measurement_type.accepts(geometry_type) {
        return Err(TakeoffError::GeometryTypeMismatch {
            geometry_type,
            measurement_type,
        });
    }

    match measurement_type {
        MeasurementType::Linear => {
            let value = match geometry {
                GeometryData::Line { .. } | GeometryData::Polyline { .. } => {
                    length(geometry, scale)?
                }
                _ => perimeter(geometry, scale)?,
            };
            Ok(Quantity {
                value,
                unit: QuantityUnit::Linear(scale.unit()),
            })
        }
        MeasurementType::Area => Ok(Quantity {
            value: area(geometry, scale)?,
            unit: QuantityUnit::Square(scale.unit()),
        }),
        MeasurementType::Volume => {
            let depth = depth_inches.ok_or_else(|| {
                TakeoffError::InvalidCondition("volume requires a depth".to_string())
            })?;
            if !(depth.is_finite() && depth > 0.0) {
                return Err(TakeoffError::InvalidCondition(format!(
                    "depth must be positive, got {depth}"
                )));
            }
            let plan_area = area(geometry, scale)?;
            Ok(Quantity {
                value: volume_cubic_yards(plan_area, scale.unit(), depth),
                unit: QuantityUnit::CubicYard,
            })
        }
        MeasurementType::Count => {
            measure_pixels(geometry)?;
            Ok(Quantity {
                value: 1.0,
                unit: QuantityUnit::Each,
            })
        }
    }
}

/// Compute a quantity and convert it into `target` unit
pub fn compute_quantity_in(
    geometry: &GeometryData,
    measurement_type: MeasurementType,
    scale: &Scale,
    depth_inches: Option<f64>,
    target: QuantityUnit,
) -> TakeoffResult<Quantity> {
    let quantity = compute_quantity(geometry, measurement_type, scale, depth_inches)?;
    let value = quantity.unit.convert(quantity.value, target).ok_or_else(|| {
        TakeoffError::InvalidCondition(format!(
            "cannot report {} quantities in {}",
            measurement_type, target
        ))
    })?;
    finite_quantity(Quantity {
        value,
        unit: target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feet(ppu: f64) -> Scale {
        Scale::new(ppu, LengthUnit::Foot).unwrap()
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
            start: PixelPoint::new(0.0, 0.0),
            end: PixelPoint::new(length, 0.0),
        }
    }

    #[test]
    fn test_square_area_shoelace() {
        let value = area(&square(100.0), &feet(10.0)).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangle_area_shoelace() {
        let triangle = GeometryData::Polygon {
            points: vec![
                PixelPoint::new(0.0, 0.0),
                PixelPoint::new(100.0, 0.0),
                PixelPoint::new(50.0, 100.0),
            ],
        };
        let value = area(&triangle, &feet(10.0)).unwrap();
        assert!((value - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_winding_does_not_matter() {
        let clockwise = GeometryData::Polygon {
            points: vec![
                PixelPoint::new(0.0, 0.0),
                PixelPoint::new(0.0, 100.0),
                PixelPoint::new(100.0, 100.0),
                PixelPoint::new(100.0, 0.0),
            ],
        };
        let value = area(&clockwise, &feet(10.0)).unwrap();
        assert!((value - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_polygon_perimeter_is_closed() {
        let value = perimeter(&square(100.0), &feet(10.0)).unwrap();
        assert!((value - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_polyline_length() {
        let polyline = GeometryData::Polyline {
            points: vec![
                PixelPoint::new(0.0, 0.0),
                PixelPoint::new(30.0, 40.0),
                PixelPoint::new(30.0, 90.0),
            ],
        };
        // 50 + 50 px at 10 px/ft
        let value = length(&polyline, &feet(10.0)).unwrap();
        assert!((value - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_rectangle_metrics() {
        let rectangle = GeometryData::Rectangle {
            origin: PixelPoint::new(10.0, 10.0),
            width: 200.0,
            height: -100.0,
        };
        let scale = feet(10.0);
        assert!((area(&rectangle, &scale).unwrap() - 200.0).abs() < 1e-9);
        assert!((perimeter(&rectangle, &scale).unwrap() - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_circle_metrics() {
        let circle = GeometryData::Circle {
            center: PixelPoint::new(50.0, 50.0),
            radius: 10.0,
        };
        let scale = feet(10.0);
        assert!((area(&circle, &scale).unwrap() - PI).abs() < 1e-9);
        assert!((perimeter(&circle, &scale).unwrap() - 2.0 * PI).abs() < 1e-9);
        assert!((diameter(&circle, &scale).unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_volume_from_area_and_depth() {
        // 100 SF at 4 in deep
        let cy = volume_cubic_yards(100.0, LengthUnit::Foot, 4.0);
        assert!((cy - 1.23).abs() < 0.01);

        let quantity =
            compute_quantity(&square(100.0), MeasurementType::Volume, &feet(10.0), Some(4.0))
                .unwrap();
        assert_eq!(quantity.unit, QuantityUnit::CubicYard);
        assert!((quantity.value - 1.2345679).abs() < 1e-6);
    }

    #[test]
    fn test_volume_from_metric_page() {
        // 1 m² at 12 in deep = 10.7639 ft³
        let cy = volume_cubic_yards(1.0, LengthUnit::Meter, 12.0);
        assert!((cy - 10.763_910_4 / 27.0).abs() < 1e-6);
    }

    #[test]
    fn test_count_is_always_one() {
        let point = GeometryData::Point {
            position: PixelPoint::new(5.0, 5.0),
        };
        let quantity = compute_quantity(&point, MeasurementType::Count, &feet(3.0), None).unwrap();
        assert_eq!(quantity.value, 1.0);
        assert_eq!(quantity.unit, QuantityUnit::Each);
    }

    #[test]
    fn test_degenerate_shapes_rejected() {
        let scale = feet(10.0);

        let zero_line = line(0.0);
        assert!(matches!(
            compute_quantity(&zero_line, MeasurementType::Linear, &scale, None),
            Err(TakeoffError::InvalidGeometry(_))
        ));

        let flat = GeometryData::Polygon {
            points: vec![
                PixelPoint::new(0.0, 0.0),
                PixelPoint::new(50.0, 0.0),
                PixelPoint::new(100.0, 0.0),
            ],
        };
        assert!(matches!(
            compute_quantity(&flat, MeasurementType::Area, &scale, None),
            Err(TakeoffError::InvalidGeometry(_))
        ));

        let dot = GeometryData::Circle {
            center: PixelPoint::new(0.0, 0.0),
            radius: 0.0,
        };
        assert!(matches!(
            compute_quantity(&dot, MeasurementType::Area, &scale, None),
            Err(TakeoffError::InvalidGeometry(_))
        ));

        let thin = GeometryData::Rectangle {
            origin: PixelPoint::new(0.0, 0.0),
            width: 10.0,
            height: 0.0,
        };
        assert!(matches!(measure_pixels(&thin), Err(TakeoffError::InvalidGeometry(_))));
    }

    #[test]
    fn test_collinear_polygon_with_fractional_coordinates_rejected() {
        let scale = feet(10.0);
        for step in [0.0, 0.37, 1.61, 12.93] {
            let along_diagonal = GeometryData::Polygon {
                points: vec![
                    PixelPoint::new(1000.6 + step, 2001.3 + 2.0 * step),
                    PixelPoint::new(2701.11, 5402.32),
                    PixelPoint::new(6101.79, 12203.68),
                ],
            };
            let direct = (2701.11 - 1000.6 - step) * (12203.68 - 2001.3 - 2.0 * step)
                - (6101.79 - 1000.6 - step) * (5402.32 - 2001.3 - 2.0 * step);
            // Only shapes that are collinear up to float noise are expected here
            assert!(direct.abs() < 1e-3);
            assert!(matches!(
                compute_quantity(&along_diagonal, MeasurementType::Area, &scale, None),
                Err(TakeoffError::InvalidGeometry(_))
            ));
        }

        let offset_slightly = GeometryData::Polygon {
            points: vec![
                PixelPoint::new(1000.6, 2001.3),
                PixelPoint::new(2701.11, 5402.32),
                PixelPoint::new(6101.79, 12205.68),
            ],
        };
        assert!(area(&offset_slightly, &scale).unwrap() > 0.0);
    }

    #[test]
    fn test_relative_length_and_radius_thresholds() {
        let far_line = GeometryData::Line {
            start: PixelPoint::new(1.0e9, 1.0e9),
            end: PixelPoint::new(1.0e9 + 1.0e-3, 1.0e9),
        };
        assert!(matches!(measure_pixels(&far_line), Err(TakeoffError::InvalidGeometry(_))));

        let far_dot = GeometryData::Circle {
            center: PixelPoint::new(1.0e9, 1.0e9),
            radius: 1.0e-3,
        };
        assert!(matches!(measure_pixels(&far_dot), Err(TakeoffError::InvalidGeometry(_))));

        let small_near_origin = GeometryData::Line {
            start: PixelPoint::new(0.0, 0.0),
            end: PixelPoint::new(1.0e-3, 0.0),
        };
        assert!(measure_pixels(&small_near_origin).is_ok());
    }

    #[test]
    fn test_overflowing_shapes_rejected() {
        let huge = GeometryData::Rectangle {
            origin: PixelPoint::new(0.0, 0.0),
            width: 1.0e200,
            height: 1.0e200,
        };
        assert!(matches!(measure_pixels(&huge), Err(TakeoffError::InvalidGeometry(_))));
        assert!(matches!(
            compute_quantity(&huge, MeasurementType::Area, &feet(10.0), None),
            Err(TakeoffError::InvalidGeometry(_))
        ));

        // Finite in pixels, infinite once divided by a tiny scale
        let wide = GeometryData::Rectangle {
            origin: PixelPoint::new(0.0, 0.0),
            width: 1.0e150,
            height: 1.0e150,
        };
        assert!(measure_pixels(&wide).is_ok());
        assert!(matches!(
            compute_quantity(&wide, MeasurementType::Area, &feet(1.0e-10), None),
            Err(TakeoffError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_minimum_point_counts() {
        let single = GeometryData::Polyline {
            points: vec![PixelPoint::new(0.0, 0.0)],
        };
        assert!(matches!(measure_pixels(&single), Err(TakeoffError::InvalidGeometry(_))));

        let two = GeometryData::Polygon {
            points: vec![PixelPoint::new(0.0, 0.0), PixelPoint::new(10.0, 10.0)],
        };
        assert!(matches!(measure_pixels(&two), Err(TakeoffError::InvalidGeometry(_))));
    }

    #[test]
    fn test_non_finite_coordinates_rejected() {
        let bad = GeometryData::Line {
            start: PixelPoint::new(f64::NAN, 0.0),
            end: PixelPoint::new(10.0, 0.0),
        };
        assert!(matches!(measure_pixels(&bad), Err(TakeoffError::InvalidGeometry(_))));
    }

    #[test]
    fn test_type_mismatch() {
        let point = GeometryData::Point {
            position: PixelPoint::new(1.0, 1.0),
        };
        let err = compute_quantity(&point, MeasurementType::Area, &feet(10.0), None).unwrap_err();
        assert!(matches!(err, TakeoffError::GeometryTypeMismatch { .. }));
    }

    #[test]
    fn test_scale_change_scaling_law() {
        let shape = square(200.0);
        let coarse = feet(20.0);
        let fine = feet(10.0);

        let linear_a = compute_quantity(&shape, MeasurementType::Linear, &coarse, None).unwrap();
        let linear_b = compute_quantity(&shape, MeasurementType::Linear, &fine, None).unwrap();
        assert!((linear_b.value / linear_a.value - 2.0).abs() < 1e-12);

        let area_a = compute_quantity(&shape, MeasurementType::Area, &coarse, None).unwrap();
        let area_b = compute_quantity(&shape, MeasurementType::Area, &fine, None).unwrap();
        assert!((area_b.value / area_a.value - 4.0).abs() < 1e-12);

        // Depth is a real-world value, so volume follows plan area.
        let vol_a =
            compute_quantity(&shape, MeasurementType::Volume, &coarse, Some(6.0)).unwrap();
        let vol_b = compute_quantity(&shape, MeasurementType::Volume, &fine, Some(6.0)).unwrap();
        assert!((vol_b.value / vol_a.value - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_scale_rejected() {
        assert!(Scale::new(0.0, LengthUnit::Foot).is_err());
        assert!(Scale::new(-2.0, LengthUnit::Foot).is_err());
        assert!(Scale::new(f64::INFINITY, LengthUnit::Foot).is_err());
    }

    #[test]
    fn test_compute_quantity_in_target_unit() {
        let quantity = compute_quantity_in(
            &line(120.0),
            MeasurementType::Linear,
            &feet(10.0),
            None,
            QuantityUnit::Linear(LengthUnit::Inch),
        )
        .unwrap();
        assert_eq!(quantity.value, 144.0);
    }
}
