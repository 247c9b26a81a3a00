//! Common test fixtures for pipeline tests.
//!
//! Source specs here use identity calibration so tests can reason about
//! values directly.

use chrono::NaiveDate;
use raster_graph::{Calibration, Grid, LocalBackend, Observation, SourceSpec};
use thermal_common::{BoundingBox, CrsCode};

use crate::generators::{constant_grid, days_of_month};

/// Fixture source standing in for the high-resolution primary.
pub fn primary_spec() -> SourceSpec {
    SourceSpec {
        id: "test/primary".to_string(),
        band: "lst".to_string(),
        crs: CrsCode::ModisSinusoidal,
        scale: 1000.0,
        calibration: Calibration::IDENTITY,
        model_property: None,
    }
}

/// Fixture source standing in for the coarse, gap-free fallback.
pub fn fallback_spec() -> SourceSpec {
    SourceSpec {
        id: "test/fallback".to_string(),
        band: "t2m".to_string(),
        crs: CrsCode::Epsg4326,
        scale: 11132.0,
        calibration: Calibration::IDENTITY,
        model_property: None,
    }
}

/// Fixture multi-model projection source.
pub fn projection_spec() -> SourceSpec {
    SourceSpec {
        id: "test/projection".to_string(),
        band: "tas".to_string(),
        crs: CrsCode::Epsg4326,
        scale: 27830.0,
        calibration: Calibration::IDENTITY,
        model_property: Some("model".to_string()),
    }
}

/// Builder for a [`LocalBackend`] populated with synthetic observations.
///
/// ```ignore
/// let backend = LocalFixture::new(2, 2)
///     .month(&primary_spec(), 2023, 1, 21.0)
///     .build();
/// ```
pub struct LocalFixture {
    width: usize,
    height: usize,
    backend: LocalBackend,
}

impl LocalFixture {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            backend: LocalBackend::new(width, height, BoundingBox::global()),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Add one observation.
    pub fn observation(mut self, spec: &SourceSpec, observation: Observation) -> Self {
        self.backend
            .add_observation(spec.id.clone(), observation)
            .expect("fixture grid matches backend shape");
        self
    }

    /// Add a grid for one day.
    pub fn day(self, spec: &SourceSpec, date: NaiveDate, grid: Grid) -> Self {
        self.observation(spec, Observation::new(date, grid))
    }

    /// Fill every day of a month with the same constant grid.
    pub fn month(self, spec: &SourceSpec, year: i32, month: u32, value: f64) -> Self {
        let grid = constant_grid(self.width, self.height, value);
        self.month_grid(spec, year, month, grid)
    }

    /// Fill every day of a month with `grid`.
    pub fn month_grid(mut self, spec: &SourceSpec, year: i32, month: u32, grid: Grid) -> Self {
        for date in days_of_month(year, month) {
            self = self.day(spec, date, grid.clone());
        }
        self
    }

    /// Fill every day of a month for one model of a multi-model source.
    pub fn model_month(
        mut self,
        spec: &SourceSpec,
        model: &str,
        year: i32,
        month: u32,
        value: f64,
    ) -> Self {
        let property = spec.model_property.clone().unwrap_or_else(|| "model".to_string());
        for date in days_of_month(year, month) {
            let grid = constant_grid(self.width, self.height, value);
            let observation = Observation::new(date, grid).with_property(property.clone(), model);
            self = self.observation(spec, observation);
        }
        self
    }

    pub fn build(self) -> LocalBackend {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster_graph::{Session, TimeSeriesCollection};

    #[test]
    fn test_fixture_months() {
        let backend = LocalFixture::new(2, 1)
            .month(&primary_spec(), 2023, 1, 1.0)
            .month(&primary_spec(), 2023, 2, 2.0)
            .build();

        let collection =
            TimeSeriesCollection::open(&Session::new("test").unwrap(), &primary_spec());
        let grid = backend.evaluate(&collection.mean()).unwrap();
        // 31 days of 1.0 and 28 days of 2.0
        let expected = (31.0 + 56.0) / 59.0;
        assert!((grid.values()[0].unwrap() - expected).abs() < 1e-12);
    }

    #[test]
    fn test_model_month_sets_property() {
        let backend = LocalFixture::new(1, 1)
            .model_month(&projection_spec(), "ACCESS-CM2", 2050, 6, 300.0)
            .model_month(&projection_spec(), "MIROC6", 2050, 6, 310.0)
            .build();

        let collection =
            TimeSeriesCollection::open(&Session::new("test").unwrap(), &projection_spec())
                .select_model(Some("MIROC6"));
        let grid = backend.evaluate(&collection.mean()).unwrap();
        assert_eq!(grid.values(), &[Some(310.0)]);
    }
}
