//! Visualization parameters for materializing tile layers.
//!
//! The render backend colors a single-band field by linearly stretching
//! values between `min` and `max` across an ordered palette.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ThermalError, ThermalResult};

/// Named colors accepted in palettes.
const NAMED_COLORS: &[&str] = &[
    "black", "white", "red", "green", "blue", "yellow", "cyan", "magenta", "orange", "purple",
    "gray", "grey",
];

/// A palette color: `RRGGBB` hex (optional leading `#`) or a basic color name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn parse(s: &str) -> ThermalResult<Self> {
        let trimmed = s.trim();
        let hex = trimmed.strip_prefix('#').unwrap_or(trimmed);

        if (hex.len() == 6 || hex.len() == 8) && hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Ok(Self(hex.to_ascii_lowercase()));
        }

        let lower = trimmed.to_ascii_lowercase();
        if NAMED_COLORS.contains(&lower.as_str()) {
            return Ok(Self(lower));
        }

        Err(ThermalError::InvalidColor(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Color {
    type Error = ThermalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.0
    }
}

/// Typed visualization parameters for a tile layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisParams {
    /// Value mapped to the first palette color
    pub min: f64,
    /// Value mapped to the last palette color
    pub max: f64,
    /// Ordered palette, low to high
    pub palette: Vec<Color>,
    /// Tile edge size in pixels
    #[serde(default = "default_dimensions")]
    pub dimensions: u32,
}

fn default_dimensions() -> u32 {
    256
}

impl VisParams {
    pub fn new(min: f64, max: f64, palette: &[&str]) -> ThermalResult<Self> {
        let palette = palette
            .iter()
            .map(|c| Color::parse(c))
            .collect::<ThermalResult<Vec<_>>>()?;
        let params = Self {
            min,
            max,
            palette,
            dimensions: default_dimensions(),
        };
        params.validate()?;
        Ok(params)
    }

    pub fn with_dimensions(mut self, dimensions: u32) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn validate(&self) -> ThermalResult<()> {
        if !self.min.is_finite() || !self.max.is_finite() || self.min >= self.max {
            return Err(ThermalError::InvalidVisParams(format!(
                "min ({}) must be finite and below max ({})",
                self.min, self.max
            )));
        }
        if self.palette.is_empty() {
            return Err(ThermalError::InvalidVisParams(
                "palette must contain at least one color".to_string(),
            ));
        }
        if self.dimensions == 0 {
            return Err(ThermalError::InvalidVisParams(
                "dimensions must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// A named output layer and how it is styled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    /// Logical layer name, used as the key of the persisted tile config
    pub name: String,
    pub vis: VisParams,
}

const LST_PALETTE: &[&str] = &[
    "040274", "040281", "0502a3", "0502b8", "0502ce", "0502e6", "0602ff", "235cb1", "307ef3",
    "269db1", "30c8e2", "32d3ef", "3be285", "3ff38f", "86e26f", "3ae237", "b5e22e", "d6e21f",
    "fff705", "ffd611", "ffb613", "ff8b13", "ff6e08", "ff500d", "ff0000", "de0101", "c21301",
    "a71001", "911003",
];

const DIVERGING_PALETTE: &[&str] = &["0000ff", "ffffff", "ff0000"];

impl LayerStyle {
    fn preset(name: &str, min: f64, max: f64, palette: &[&str]) -> Self {
        let palette = palette
            .iter()
            .filter_map(|c| Color::parse(c).ok())
            .collect();
        Self {
            name: name.to_string(),
            vis: VisParams {
                min,
                max,
                palette,
                dimensions: default_dimensions(),
            },
        }
    }

    /// Fused land surface temperature, degrees Celsius.
    pub fn lst() -> Self {
        Self::preset("lst", -20.0, 50.0, LST_PALETTE)
    }

    /// Standardized anomaly, in standard deviations.
    pub fn anomaly() -> Self {
        Self::preset("anomaly", -3.0, 3.0, DIVERGING_PALETTE)
    }

    /// Absolute anomaly, degrees Celsius.
    pub fn absolute_anomaly() -> Self {
        Self::preset("absolute_anomaly", -5.0, 5.0, DIVERGING_PALETTE)
    }

    /// Projected near-surface air temperature, degrees Celsius.
    pub fn temperature() -> Self {
        let mut style = Self::preset("temperature", -10.0, 30.0, &["blue", "red"]);
        style.vis.dimensions = 1024;
        style
    }
}
