//! Standardized and absolute anomalies.

use raster_graph::{GraphResult, RasterField};

use crate::climatology::ClimatologyStats;

/// Band name of the standardized anomaly layer.
pub const STANDARDIZED_BAND: &str = "T_Anomaly";
/// Band name of the absolute anomaly layer, degrees Celsius.
pub const ABSOLUTE_BAND: &str = "T_Anomaly_C";

/// Anomalies of one fused field against its climatology.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyResult {
    /// Departure in standard deviations
    pub standardized: RasterField,
    /// Departure in native units
    pub absolute: RasterField,
}

pub struct AnomalyCalculator;

impl AnomalyCalculator {
    /// `(field - mean) / std_dev`, masked wherever `std_dev` is zero or masked.
    pub fn standardized_anomaly(
        field: &RasterField,
        mean: &RasterField,
        std_dev: &RasterField,
    ) -> GraphResult<RasterField> {
        let valid_spread = std_dev.gt(0.0);
        field
            .subtract(mean)?
            .divide(std_dev)?
            .update_mask(&valid_spread)
    }

    /// `field - mean`, defined wherever both inputs are.
    pub fn absolute_anomaly(field: &RasterField, mean: &RasterField) -> GraphResult<RasterField> {
        field.subtract(mean)
    }

    /// Both anomalies of an already fused field.
    pub fn anomalies(fused: &RasterField, climatology: &ClimatologyStats) -> GraphResult<AnomalyResult> {
        let standardized =
            Self::standardized_anomaly(fused, &climatology.mean, &climatology.std_dev)?
                .rename(STANDARDIZED_BAND);
        let absolute = Self::absolute_anomaly(fused, &climatology.mean)?.rename(ABSOLUTE_BAND);
        Ok(AnomalyResult {
            standardized,
            absolute,
        })
    }
}
