//! Date-indexed image collections.

use serde::{Deserialize, Serialize};
use thermal_common::{CrsCode, DateRange};

use crate::expr::{CollectionExpr, CollectionFilter, FieldExpr, Reducer, SourceRef};
use crate::field::RasterField;
use crate::session::Session;

/// Linear conversion from stored digital numbers to physical units.
///
/// `physical = raw * gain + offset`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub gain: f64,
    pub offset: f64,
}

impl Calibration {
    pub const IDENTITY: Calibration = Calibration {
        gain: 1.0,
        offset: 0.0,
    };

    /// Kelvin to degrees Celsius.
    pub const KELVIN_TO_CELSIUS: Calibration = Calibration {
        gain: 1.0,
        offset: -273.15,
    };

    pub fn new(gain: f64, offset: f64) -> Self {
        Self { gain, offset }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Catalog description of one source collection and band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Collection id
    pub id: String,
    /// Band to select
    pub band: String,
    /// Native CRS of the band
    pub crs: CrsCode,
    /// Nominal resolution in meters
    pub scale: f64,
    #[serde(default)]
    pub calibration: Calibration,
    /// Property holding the model name, for multi-model collections
    #[serde(default)]
    pub model_property: Option<String>,
}

impl SourceSpec {
    /// MODIS/Terra daily land surface temperature, 1 km.
    pub fn modis_lst() -> Self {
        Self {
            id: "MODIS/061/MOD11A1".to_string(),
            band: "LST_Day_1km".to_string(),
            crs: CrsCode::ModisSinusoidal,
            scale: 1000.0,
            calibration: Calibration::new(0.02, -273.15),
            model_property: None,
        }
    }

    /// ERA5-Land daily aggregates, 2 m air temperature.
    pub fn era5_land() -> Self {
        Self {
            id: "ECMWF/ERA5_LAND/DAILY_AGGR".to_string(),
            band: "temperature_2m".to_string(),
            crs: CrsCode::Epsg4326,
            scale: 11132.0,
            calibration: Calibration::KELVIN_TO_CELSIUS,
            model_property: None,
        }
    }

    /// NEX-GDDP-CMIP6 downscaled projections, near-surface air temperature.
    pub fn cmip6_tas() -> Self {
        Self {
            id: "NASA/GDDP-CMIP6".to_string(),
            band: "tas".to_string(),
            crs: CrsCode::Epsg4326,
            scale: 27830.0,
            calibration: Calibration::KELVIN_TO_CELSIUS,
            model_property: Some("model".to_string()),
        }
    }
}

/// An ordered, filterable view over a source collection.
///
/// Filtering never mutates: every filter returns a new collection.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesCollection {
    spec: SourceSpec,
    expr: CollectionExpr,
}

impl TimeSeriesCollection {
    pub fn open(session: &Session, spec: &SourceSpec) -> Self {
        Self {
            expr: CollectionExpr {
                source: SourceRef {
                    id: spec.id.clone(),
                    band: spec.band.clone(),
                    project: session.project().to_string(),
                },
                filters: Vec::new(),
            },
            spec: spec.clone(),
        }
    }

    pub fn spec(&self) -> &SourceSpec {
        &self.spec
    }

    pub fn expr(&self) -> &CollectionExpr {
        &self.expr
    }

    fn with_filter(&self, filter: CollectionFilter) -> Self {
        let mut expr = self.expr.clone();
        expr.filters.push(filter);
        Self {
            spec: self.spec.clone(),
            expr,
        }
    }

    pub fn filter_date(&self, range: DateRange) -> Self {
        self.with_filter(CollectionFilter::Date { range })
    }

    pub fn filter_eq(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_filter(CollectionFilter::PropertyEq {
            name: name.into(),
            value: value.into(),
        })
    }

    /// Restrict a multi-model collection to one model. No-op for sources
    /// without a model property.
    pub fn select_model(&self, model: Option<&str>) -> Self {
        match (model, &self.spec.model_property) {
            (Some(model), Some(property)) => self.filter_eq(property.clone(), model),
            _ => self.clone(),
        }
    }

    pub fn reduce(&self, reducer: Reducer) -> RasterField {
        let band = match reducer.band_suffix() {
            Some(suffix) => format!("{}_{}", self.spec.band, suffix),
            None => self.spec.band.clone(),
        };
        RasterField::new(
            band,
            self.spec.crs,
            self.spec.scale,
            FieldExpr::Reduce {
                collection: self.expr.clone(),
                reducer,
            },
        )
    }

    /// Per-pixel mean over every observation.
    pub fn mean(&self) -> RasterField {
        self.reduce(Reducer::Mean)
    }

    /// Per-pixel standard deviation over every observation.
    pub fn std_dev(&self) -> RasterField {
        self.reduce(Reducer::StdDev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn session() -> Session {
        Session::new("test-project").unwrap()
    }

    #[test]
    fn test_filtering_returns_new_view() {
        let base = TimeSeriesCollection::open(&session(), &SourceSpec::era5_land());
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2023, 1, 31).unwrap(),
        )
        .unwrap();

        let filtered = base.filter_date(range);
        assert!(base.expr().filters.is_empty());
        assert_eq!(filtered.expr().filters.len(), 1);
        assert_eq!(filtered.expr().source.project, "test-project");
    }

    #[test]
    fn test_select_model_only_applies_to_model_sources() {
        let cmip = TimeSeriesCollection::open(&session(), &SourceSpec::cmip6_tas());
        let selected = cmip.select_model(Some("ACCESS-CM2"));
        assert_eq!(
            selected.expr().filters,
            vec![CollectionFilter::PropertyEq {
                name: "model".to_string(),
                value: "ACCESS-CM2".to_string()
            }]
        );

        let era5 = TimeSeriesCollection::open(&session(), &SourceSpec::era5_land());
        assert!(era5.select_model(Some("ACCESS-CM2")).expr().filters.is_empty());
        assert!(cmip.select_model(None).expr().filters.is_empty());
    }

    #[test]
    fn test_reduce_band_names() {
        let modis = TimeSeriesCollection::open(&session(), &SourceSpec::modis_lst());
        assert_eq!(modis.mean().band(), "LST_Day_1km");
        assert_eq!(modis.std_dev().band(), "LST_Day_1km_stdDev");
        assert_eq!(modis.mean().crs(), CrsCode::ModisSinusoidal);
        assert_eq!(modis.mean().scale(), 1000.0);
    }
}
