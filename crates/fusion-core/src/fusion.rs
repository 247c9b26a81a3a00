//! Primary/fallback gap filling.

use raster_graph::{GraphResult, RasterField};

/// Merges a preferred source with a fallback, pixel by pixel.
pub struct FusionEngine;

impl FusionEngine {
    /// Primary value where defined, fallback value elsewhere.
    ///
    /// The fallback is first resampled onto the primary grid, so the result
    /// keeps the primary's band, CRS and scale. Defined primary pixels are
    /// never blended.
    pub fn fuse(primary: &RasterField, fallback: &RasterField) -> GraphResult<RasterField> {
        let aligned = fallback.reproject_like(primary);
        primary.unmask(&aligned)
    }
}
