//! Tile coordinates and URL templates.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ThermalError, ThermalResult};

/// A tile coordinate (z/x/y).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Zoom level
    pub z: u32,
    /// Column (x)
    pub x: u32,
    /// Row (y)
    pub y: u32,
}

impl TileCoord {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Whether x/y fall inside the 2^z by 2^z grid for this zoom.
    pub fn is_valid(&self) -> bool {
        let n = 1u64 << self.z.min(31);
        (self.x as u64) < n && (self.y as u64) < n
    }
}

/// A tile URL pattern with `{z}`, `{x}` and `{y}` placeholders.
///
/// Produced by the render backend when a field is materialized for display.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TileTemplate(String);

impl TileTemplate {
    pub fn new(template: impl Into<String>) -> ThermalResult<Self> {
        let template = template.into();
        let has_all = ["{z}", "{x}", "{y}"]
            .iter()
            .all(|placeholder| template.contains(placeholder));
        if !has_all {
            return Err(ThermalError::InvalidTileTemplate(template));
        }
        Ok(Self(template))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the URL of a single tile.
    pub fn tile_url(&self, coord: TileCoord) -> String {
        self.0
            .replace("{z}", &coord.z.to_string())
            .replace("{x}", &coord.x.to_string())
            .replace("{y}", &coord.y.to_string())
    }
}

impl fmt::Display for TileTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TileTemplate {
    type Error = ThermalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TileTemplate> for String {
    fn from(template: TileTemplate) -> Self {
        template.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_requires_placeholders() {
        assert!(TileTemplate::new("https://tiles/{z}/{x}/{y}").is_ok());
        assert!(matches!(
            TileTemplate::new("https://tiles/{z}/{x}"),
            Err(ThermalError::InvalidTileTemplate(_))
        ));
    }

    #[test]
    fn test_tile_url() {
        let template = TileTemplate::new("https://tiles/maps/abc/tiles/{z}/{x}/{y}").unwrap();
        assert_eq!(
            template.tile_url(TileCoord::new(2, 1, 1)),
            "https://tiles/maps/abc/tiles/2/1/1"
        );
    }

    #[test]
    fn test_deserialize_validates() {
        let ok: Result<TileTemplate, _> = serde_json::from_str("\"/t/{z}/{x}/{y}\"");
        assert!(ok.is_ok());
        let bad: Result<TileTemplate, _> = serde_json::from_str("\"/t/static.png\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_tile_coord_validity() {
        assert!(TileCoord::new(0, 0, 0).is_valid());
        assert!(TileCoord::new(2, 3, 3).is_valid());
        assert!(!TileCoord::new(2, 4, 0).is_valid());
    }
}
