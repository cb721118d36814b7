//! Engine configuration
//!
//! Settings can be loaded from a TOML file, overridden from environment
//! variables, or built programmatically. Every source goes through
//! [`TakeoffConfig::validate`] before the engine accepts it.
//!
//! File layout:
//! ```toml
//! [resolver]
//! acceptance_threshold = 0.85
//! title_block_margin_px = 50.0
//! detect_scale_bars = true
//!
//! [scale_bar]
//! min_length_px = 40.0
//! max_length_px = 4000.0
//! ```

use std::fs;
use std::io;
use std::path::Path;

use crate::resolver::ResolverConfig;
use crate::scale_bar::ScaleBarConfig;

pub const ENV_ACCEPTANCE_THRESHOLD: &str = "TAKEOFF_ACCEPTANCE_THRESHOLD";
pub const ENV_TITLE_BLOCK_MARGIN_PX: &str = "TAKEOFF_TITLE_BLOCK_MARGIN_PX";
pub const ENV_DETECT_SCALE_BARS: &str = "TAKEOFF_DETECT_SCALE_BARS";
pub const ENV_SCALE_BAR_MIN_LENGTH_PX: &str = "TAKEOFF_SCALE_BAR_MIN_LENGTH_PX";
pub const ENV_SCALE_BAR_MAX_LENGTH_PX: &str = "TAKEOFF_SCALE_BAR_MAX_LENGTH_PX";

/// Configuration for the takeoff engine
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct TakeoffConfig {
    pub resolver: ResolverConfig,
    pub scale_bar: ScaleBarConfig,
}

impl TakeoffConfig {
    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_scale_bar(mut self, scale_bar: ScaleBarConfig) -> Self {
        self.scale_bar = scale_bar;
        self
    }

    /// Sets the minimum confidence for automatic acceptance.
    pub fn with_acceptance_threshold(mut self, threshold: f64) -> Self {
        self.resolver.acceptance_threshold = threshold;
        self
    }

    /// Check every field, naming the first bad one
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(field) = self.resolver.invalid_field() {
            return Err(ConfigError::InvalidValue(format!("resolver.{field}")));
        }
        if let Some(field) = self.scale_bar.invalid_field() {
            return Err(ConfigError::InvalidValue(format!("scale_bar.{field}")));
        }
        Ok(())
    }

    /// Loads defaults overridden by environment variables.
    ///
    /// Environment variables:
    /// - `TAKEOFF_ACCEPTANCE_THRESHOLD`: automatic acceptance threshold (default: 0.85)
    /// - `TAKEOFF_TITLE_BLOCK_MARGIN_PX`: scale-bar search margin around the title block
    /// - `TAKEOFF_DETECT_SCALE_BARS`: `true` or `false`
    /// - `TAKEOFF_SCALE_BAR_MIN_LENGTH_PX` / `TAKEOFF_SCALE_BAR_MAX_LENGTH_PX`: bar length range
    ///
    /// # Errors
    /// Returns an error if any variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Overrides fields from a variable lookup such as `std::env::var`
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_ACCEPTANCE_THRESHOLD) {
            self.resolver.acceptance_threshold = parse_var(ENV_ACCEPTANCE_THRESHOLD, &value)?;
        }
        if let Some(value) = lookup(ENV_TITLE_BLOCK_MARGIN_PX) {
            self.resolver.title_block_margin_px = parse_var(ENV_TITLE_BLOCK_MARGIN_PX, &value)?;
        }
        if let Some(value) = lookup(ENV_DETECT_SCALE_BARS) {
            self.resolver.detect_scale_bars = parse_var(ENV_DETECT_SCALE_BARS, &value)?;
        }
        if let Some(value) = lookup(ENV_SCALE_BAR_MIN_LENGTH_PX) {
            self.scale_bar.min_length_px = parse_var(ENV_SCALE_BAR_MIN_LENGTH_PX, &value)?;
        }
        if let Some(value) = lookup(ENV_SCALE_BAR_MAX_LENGTH_PX) {
            self.scale_bar.max_length_px = parse_var(ENV_SCALE_BAR_MAX_LENGTH_PX, &value)?;
        }
        self.validate()
    }

    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string; missing keys keep defaults.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(name.to_string()))
}

/// Errors that can occur during configuration operations
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("malformed configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not encode configuration: {0}")]
    Encode(#[from] toml::ser::Error),
}
