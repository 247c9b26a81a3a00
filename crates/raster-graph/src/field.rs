//! Single-band raster fields.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thermal_common::CrsCode;

use crate::collection::Calibration;
use crate::error::{GraphError, GraphResult};
use crate::expr::{BinaryOp, FieldExpr, Operand};

/// Relative tolerance when comparing nominal resolutions.
const SCALE_TOLERANCE: f64 = 1e-9;

/// A named, georeferenced, single-band raster described lazily.
///
/// Pixels may be masked. Arithmetic between two fields requires them to
/// share CRS and scale; scalar arithmetic and renames keep the grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterField {
    band: String,
    crs: CrsCode,
    scale: f64,
    expr: Arc<FieldExpr>,
}

impl RasterField {
    pub fn new(band: impl Into<String>, crs: CrsCode, scale: f64, expr: FieldExpr) -> Self {
        Self {
            band: band.into(),
            crs,
            scale,
            expr: Arc::new(expr),
        }
    }

    pub fn band(&self) -> &str {
        &self.band
    }

    pub fn crs(&self) -> CrsCode {
        self.crs
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn expr(&self) -> &FieldExpr {
        &self.expr
    }

    /// Whether two fields live on the same grid.
    pub fn is_compatible(&self, other: &RasterField) -> bool {
        let tolerance = SCALE_TOLERANCE * self.scale.abs().max(other.scale.abs()).max(1.0);
        self.crs == other.crs && (self.scale - other.scale).abs() <= tolerance
    }

    fn ensure_compatible(&self, other: &RasterField) -> GraphResult<()> {
        if self.is_compatible(other) {
            Ok(())
        } else {
            Err(GraphError::IncompatibleGrid {
                left_crs: self.crs,
                left_scale: self.scale,
                right_crs: other.crs,
                right_scale: other.scale,
            })
        }
    }

    /// Derive a field on the same grid and band.
    fn derive(&self, expr: FieldExpr) -> Self {
        Self {
            band: self.band.clone(),
            crs: self.crs,
            scale: self.scale,
            expr: Arc::new(expr),
        }
    }

    fn binary(&self, op: BinaryOp, other: &RasterField) -> GraphResult<Self> {
        self.ensure_compatible(other)?;
        Ok(self.derive(FieldExpr::Binary {
            op,
            lhs: self.expr.clone(),
            rhs: Operand::Field(other.expr.clone()),
        }))
    }

    fn binary_scalar(&self, op: BinaryOp, value: f64) -> Self {
        self.derive(FieldExpr::Binary {
            op,
            lhs: self.expr.clone(),
            rhs: Operand::Scalar(value),
        })
    }

    pub fn add(&self, other: &RasterField) -> GraphResult<Self> {
        self.binary(BinaryOp::Add, other)
    }

    pub fn subtract(&self, other: &RasterField) -> GraphResult<Self> {
        self.binary(BinaryOp::Subtract, other)
    }

    pub fn multiply(&self, other: &RasterField) -> GraphResult<Self> {
        self.binary(BinaryOp::Multiply, other)
    }

    pub fn divide(&self, other: &RasterField) -> GraphResult<Self> {
        self.binary(BinaryOp::Divide, other)
    }

    pub fn add_scalar(&self, value: f64) -> Self {
        self.binary_scalar(BinaryOp::Add, value)
    }

    pub fn subtract_scalar(&self, value: f64) -> Self {
        self.binary_scalar(BinaryOp::Subtract, value)
    }

    pub fn multiply_scalar(&self, value: f64) -> Self {
        self.binary_scalar(BinaryOp::Multiply, value)
    }

    pub fn divide_scalar(&self, value: f64) -> Self {
        self.binary_scalar(BinaryOp::Divide, value)
    }

    /// `raw * gain + offset`, skipping identity steps.
    pub fn calibrate(&self, calibration: &Calibration) -> Self {
        let scaled = self.calibrate_spread(calibration);
        if calibration.offset == 0.0 {
            scaled
        } else {
            scaled.add_scalar(calibration.offset)
        }
    }

    /// Calibrate a spread statistic (standard deviation): gain only.
    pub fn calibrate_spread(&self, calibration: &Calibration) -> Self {
        if calibration.gain == 1.0 {
            self.clone()
        } else {
            self.multiply_scalar(calibration.gain)
        }
    }

    /// 1 where the value exceeds `threshold`, 0 elsewhere.
    pub fn gt(&self, threshold: f64) -> Self {
        self.derive(FieldExpr::GreaterThan {
            field: self.expr.clone(),
            threshold,
        })
    }

    /// Mask every pixel where `mask` is zero or masked.
    pub fn update_mask(&self, mask: &RasterField) -> GraphResult<Self> {
        self.ensure_compatible(mask)?;
        Ok(self.derive(FieldExpr::UpdateMask {
            field: self.expr.clone(),
            mask: mask.expr.clone(),
        }))
    }

    /// Fill masked pixels from `fallback`. Defined pixels are untouched.
    pub fn unmask(&self, fallback: &RasterField) -> GraphResult<Self> {
        self.ensure_compatible(fallback)?;
        Ok(self.derive(FieldExpr::Unmask {
            field: self.expr.clone(),
            fallback: fallback.expr.clone(),
        }))
    }

    /// Resample onto another grid.
    pub fn reproject(&self, crs: CrsCode, scale: f64) -> Self {
        Self {
            band: self.band.clone(),
            crs,
            scale,
            expr: Arc::new(FieldExpr::Reproject {
                field: self.expr.clone(),
                crs,
                scale,
            }),
        }
    }

    /// Resample onto the grid of `target`, or return self if already there.
    pub fn reproject_like(&self, target: &RasterField) -> Self {
        if self.is_compatible(target) {
            self.clone()
        } else {
            self.reproject(target.crs, target.scale)
        }
    }

    pub fn rename(&self, band: impl Into<String>) -> Self {
        let band = band.into();
        Self {
            band: band.clone(),
            crs: self.crs,
            scale: self.scale,
            expr: Arc::new(FieldExpr::Rename {
                field: self.expr.clone(),
                band,
            }),
        }
    }

    /// Per-pixel mean of several fields on one grid; the first sets the context.
    pub fn mean_of(fields: &[RasterField]) -> GraphResult<Self> {
        let first = fields.first().ok_or(GraphError::EmptyInput)?;
        for other in &fields[1..] {
            first.ensure_compatible(other)?;
        }
        Ok(first.derive(FieldExpr::MeanOf {
            fields: fields.iter().map(|f| f.expr.clone()).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{SourceSpec, TimeSeriesCollection};
    use crate::session::Session;

    fn field(spec: SourceSpec) -> RasterField {
        let session = Session::new("test").unwrap();
        TimeSeriesCollection::open(&session, &spec).mean()
    }

    #[test]
    fn test_arithmetic_requires_same_grid() {
        let modis = field(SourceSpec::modis_lst());
        let era5 = field(SourceSpec::era5_land());

        assert!(modis.subtract(&modis).is_ok());
        assert!(matches!(
            modis.subtract(&era5),
            Err(GraphError::IncompatibleGrid { .. })
        ));
        assert!(modis.unmask(&era5.reproject_like(&modis)).is_ok());
    }

    #[test]
    fn test_calibrate_skips_identity_steps() {
        let era5 = field(SourceSpec::era5_land());
        let calibrated = era5.calibrate(&Calibration::KELVIN_TO_CELSIUS);
        assert_eq!(calibrated.expr().node_count(), 2);

        let spread = era5.calibrate_spread(&Calibration::KELVIN_TO_CELSIUS);
        assert_eq!(spread, era5);
    }

    #[test]
    fn test_mean_of_empty_is_error() {
        assert_eq!(RasterField::mean_of(&[]), Err(GraphError::EmptyInput));
    }

    #[test]
    fn test_rename_keeps_grid() {
        let modis = field(SourceSpec::modis_lst());
        let renamed = modis.rename("LST");
        assert_eq!(renamed.band(), "LST");
        assert!(renamed.is_compatible(&modis));
    }
}
