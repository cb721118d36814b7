//! Length and quantity units
//!
//! Conversions between feet, inches and meters go through exact rational
//! inch factors so that integral foot/inch conversions carry no rounding
//! error (10 in is exactly 10/12 ft).

use std::fmt;

/// Length unit of a page's pixels-per-unit factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LengthUnit {
    #[default]
    Foot,
    Inch,
    Meter,
}

impl LengthUnit {
    /// Inches per unit as an exact `(numerator, denominator)` pair
    fn inches_ratio(self) -> (f64, f64) {
        match self {
            LengthUnit::Foot => (12.0, 1.0),
            LengthUnit::Inch => (1.0, 1.0),
            // 1 in = 0.0254 m exactly, so 1 m = 5000/127 in
            LengthUnit::Meter => (5000.0, 127.0),
        }
    }

    /// Inches in one unit
    pub fn inches(self) -> f64 {
        let (num, den) = self.inches_ratio();
        num / den
    }

    /// Factor that converts a length in `self` into `to`
    pub fn factor_to(self, to: LengthUnit) -> f64 {
        if self == to {
            return 1.0;
        }
        let (from_num, from_den) = self.inches_ratio();
        let (to_num, to_den) = to.inches_ratio();
        (from_num * to_den) / (from_den * to_num)
    }

    /// Convert a length from `self` into `to`
    pub fn convert(self, value: f64, to: LengthUnit) -> f64 {
        if self == to {
            return value;
        }
        let (from_num, from_den) = self.inches_ratio();
        let (to_num, to_den) = to.inches_ratio();
        value * from_num * to_den / (from_den * to_num)
    }

    /// Parse a unit name as written on drawings or typed by a user
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_ascii_lowercase().as_str() {
            "ft" | "foot" | "feet" | "'" => Some(LengthUnit::Foot),
            "in" | "inch" | "inches" | "\"" => Some(LengthUnit::Inch),
            "m" | "meter" | "meters" | "metre" | "metres" => Some(LengthUnit::Meter),
            _ => None,
        }
    }

    /// Short symbol used in labels
    pub fn symbol(self) -> &'static str {
        match self {
            LengthUnit::Foot => "ft",
            LengthUnit::Inch => "in",
            LengthUnit::Meter => "m",
        }
    }
}

impl fmt::Display for LengthUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl std::str::FromStr for LengthUnit {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LengthUnit::parse(s).ok_or_else(|| format!("unknown length unit '{s}'"))
    }
}

/// Cubic feet in one cubic yard
pub const CUBIC_FEET_PER_CUBIC_YARD: f64 = 27.0;

/// Physical dimension of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Length,
    Area,
    Volume,
    Count,
}

/// Unit a condition reports its quantities in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", content = "unit", rename_all = "snake_case")]
pub enum QuantityUnit {
    /// Length (LF, in, m)
    Linear(LengthUnit),
    /// Area (SF, sq in, m²)
    Square(LengthUnit),
    CubicYard,
    CubicMeter,
    /// Item count
    Each,
}

impl QuantityUnit {
    pub const LINEAR_FEET: QuantityUnit = QuantityUnit::Linear(LengthUnit::Foot);
    pub const SQUARE_FEET: QuantityUnit = QuantityUnit::Square(LengthUnit::Foot);

    /// Dimension measured by this unit
    pub fn dimension(self) -> Dimension {
        match self {
            QuantityUnit::Linear(_) => Dimension::Length,
            QuantityUnit::Square(_) => Dimension::Area,
            QuantityUnit::CubicYard | QuantityUnit::CubicMeter => Dimension::Volume,
            QuantityUnit::Each => Dimension::Count,
        }
    }

    /// Convert `value` from `self` into `to`
    ///
    /// Returns `None` when the units measure different dimensions.
    pub fn convert(self, value: f64, to: QuantityUnit) -> Option<f64> {
        match (self, to) {
            (QuantityUnit::Linear(from), QuantityUnit::Linear(to)) => {
                Some(from.convert(value, to))
            }
            (QuantityUnit::Square(from), QuantityUnit::Square(to)) => {
                let factor = from.factor_to(to);
                Some(value * factor * factor)
            }
            (QuantityUnit::CubicYard, QuantityUnit::CubicYard)
            | (QuantityUnit::CubicMeter, QuantityUnit::CubicMeter)
            | (QuantityUnit::Each, QuantityUnit::Each) => Some(value),
            (QuantityUnit::CubicYard, QuantityUnit::CubicMeter) => {
                Some(value * cubic_meters_per_cubic_yard())
            }
            (QuantityUnit::CubicMeter, QuantityUnit::CubicYard) => {
                Some(value / cubic_meters_per_cubic_yard())
            }
            _ => None,
        }
    }

    /// Estimator-style abbreviation
    pub fn abbreviation(self) -> &'static str {
        match self {
            QuantityUnit::Linear(LengthUnit::Foot) => "LF",
            QuantityUnit::Linear(LengthUnit::Inch) => "in",
            QuantityUnit::Linear(LengthUnit::Meter) => "m",
            QuantityUnit::Square(LengthUnit::Foot) => "SF",
            QuantityUnit::Square(LengthUnit::Inch) => "sq in",
            QuantityUnit::Square(LengthUnit::Meter) => "m²",
            QuantityUnit::CubicYard => "CY",
            QuantityUnit::CubicMeter => "m³",
            QuantityUnit::Each => "EA",
        }
    }
}

impl fmt::Display for QuantityUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

fn cubic_meters_per_cubic_yard() -> f64 {
    let yard_in_meters = LengthUnit::Foot.convert(3.0, LengthUnit::Meter);
    yard_in_meters * yard_in_meters * yard_in_meters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_foot_inch_conversion_is_exact() {
        assert_eq!(LengthUnit::Foot.convert(1.0, LengthUnit::Inch), 12.0);
        assert_eq!(LengthUnit::Inch.convert(24.0, LengthUnit::Foot), 2.0);
        assert_eq!(LengthUnit::Inch.factor_to(LengthUnit::Foot), 1.0 / 12.0);
    }

    #[test]
    fn test_meter_conversion() {
        let feet = LengthUnit::Meter.convert(1.0, LengthUnit::Foot);
        assert!((feet - 3.280_839_895).abs() < 1e-9);

        let meters = LengthUnit::Foot.convert(feet, LengthUnit::Meter);
        assert!((meters - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parse_unit_names() {
        assert_eq!(LengthUnit::parse("FT"), Some(LengthUnit::Foot));
        assert_eq!(LengthUnit::parse(" inches "), Some(LengthUnit::Inch));
        assert_eq!(LengthUnit::parse("metres"), Some(LengthUnit::Meter));
        assert_eq!(LengthUnit::parse("cubits"), None);
        assert!("yard".parse::<LengthUnit>().is_err());
    }

    #[test]
    fn test_square_conversion_uses_squared_factor() {
        let sq_in = QuantityUnit::SQUARE_FEET
            .convert(2.0, QuantityUnit::Square(LengthUnit::Inch))
            .unwrap();
        assert_eq!(sq_in, 288.0);
    }

    #[test]
    fn test_cross_dimension_conversion_rejected() {
        assert_eq!(QuantityUnit::LINEAR_FEET.convert(1.0, QuantityUnit::SQUARE_FEET), None);
        assert_eq!(QuantityUnit::Each.convert(1.0, QuantityUnit::CubicYard), None);
    }

    #[test]
    fn test_cubic_yard_to_cubic_meter() {
        let m3 = QuantityUnit::CubicYard
            .convert(1.0, QuantityUnit::CubicMeter)
            .unwrap();
        assert!((m3 - 0.764_554_857_984).abs() < 1e-9);
    }

    #[test]
    fn test_abbreviations() {
        assert_eq!(QuantityUnit::LINEAR_FEET.to_string(), "LF");
        assert_eq!(QuantityUnit::SQUARE_FEET.to_string(), "SF");
        assert_eq!(QuantityUnit::CubicYard.to_string(), "CY");
        assert_eq!(QuantityUnit::Each.to_string(), "EA");
    }
}
