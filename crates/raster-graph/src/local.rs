//! In-memory render backend.
//!
//! Evaluates computation graphs over small grids held in memory. All
//! observations share one grid shape; `Reproject` nodes are treated as
//! identity because every source is already on that grid. Used for offline
//! runs over fixture data and for exercising the pipeline without a network.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thermal_common::{BoundingBox, TileTemplate, VisParams};
use tracing::debug;

use crate::backend::{RegionReduction, RegionStats, RenderBackend};
use crate::collection::TimeSeriesCollection;
use crate::error::{BackendError, BackendResult};
use crate::expr::{CollectionExpr, CollectionFilter, FieldExpr, Operand, Reducer};
use crate::field::RasterField;

/// A materialized single-band grid, row-major from the top-left corner.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    width: usize,
    height: usize,
    bbox: BoundingBox,
    values: Vec<Option<f64>>,
}

impl Grid {
    pub fn new(
        width: usize,
        height: usize,
        bbox: BoundingBox,
        values: Vec<Option<f64>>,
    ) -> BackendResult<Self> {
        if values.len() != width * height {
            return Err(BackendError::compute(format!(
                "grid has {} values, expected {}x{}",
                values.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            bbox,
            values,
        })
    }

    /// A grid with every pixel set to `value`.
    pub fn filled(width: usize, height: usize, bbox: BoundingBox, value: Option<f64>) -> Self {
        Self {
            width,
            height,
            bbox,
            values: vec![value; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.values[row * self.width + col]
    }

    pub fn masked_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_none()).count()
    }

    /// True when no pixel is masked.
    pub fn is_complete(&self) -> bool {
        self.masked_count() == 0
    }

    fn same_shape(&self, other: &Grid) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Geographic center of pixel `index`.
    fn pixel_center(&self, index: usize) -> (f64, f64) {
        let col = (index % self.width) as f64;
        let row = (index / self.width) as f64;
        let dx = self.bbox.width() / self.width as f64;
        let dy = self.bbox.height() / self.height as f64;
        (
            self.bbox.min_x + (col + 0.5) * dx,
            self.bbox.max_y - (row + 0.5) * dy,
        )
    }

    fn map(&self, f: impl Fn(Option<f64>) -> Option<f64>) -> Grid {
        Grid {
            width: self.width,
            height: self.height,
            bbox: self.bbox,
            values: self.values.iter().map(|v| f(*v)).collect(),
        }
    }

    fn zip(&self, other: &Grid, f: impl Fn(Option<f64>, Option<f64>) -> Option<f64>) -> BackendResult<Grid> {
        if !self.same_shape(other) {
            return Err(BackendError::compute(format!(
                "grid shape mismatch: {}x{} vs {}x{}",
                self.width, self.height, other.width, other.height
            )));
        }
        Ok(Grid {
            width: self.width,
            height: self.height,
            bbox: self.bbox,
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| f(*a, *b))
                .collect(),
        })
    }
}

/// One dated image in a local collection.
#[derive(Debug, Clone)]
pub struct Observation {
    pub date: NaiveDate,
    pub properties: BTreeMap<String, String>,
    pub grid: Grid,
}

impl Observation {
    pub fn new(date: NaiveDate, grid: Grid) -> Self {
        Self {
            date,
            properties: BTreeMap::new(),
            grid,
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    fn matches(&self, filter: &CollectionFilter) -> bool {
        match filter {
            CollectionFilter::Date { range } => {
                self.date >= range.start && self.date < range.end_exclusive()
            }
            CollectionFilter::PropertyEq { name, value } => {
                self.properties.get(name).is_some_and(|v| v == value)
            }
        }
    }
}

/// Snapshot of terminal calls served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalCallCounts {
    pub count: u64,
    pub reduce_region: u64,
    pub tile_template: u64,
}

impl LocalCallCounts {
    pub fn total(&self) -> u64 {
        self.count + self.reduce_region + self.tile_template
    }
}

/// Render backend evaluating graphs over in-memory grids.
pub struct LocalBackend {
    width: usize,
    height: usize,
    bbox: BoundingBox,
    collections: HashMap<String, Vec<Observation>>,
    latency: Option<Duration>,
    failing: AtomicBool,
    count_calls: AtomicU64,
    reduce_calls: AtomicU64,
    tile_calls: AtomicU64,
}

impl LocalBackend {
    /// Create an empty backend whose grids cover `bbox` with `width` x `height` pixels.
    pub fn new(width: usize, height: usize, bbox: BoundingBox) -> Self {
        Self {
            width,
            height,
            bbox,
            collections: HashMap::new(),
            latency: None,
            failing: AtomicBool::new(false),
            count_calls: AtomicU64::new(0),
            reduce_calls: AtomicU64::new(0),
            tile_calls: AtomicU64::new(0),
        }
    }

    /// Delay every terminal call, to emulate a slow remote service.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make every terminal call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn grid_shape(&self) -> (usize, usize, BoundingBox) {
        (self.width, self.height, self.bbox)
    }

    pub fn add_observation(
        &mut self,
        collection_id: impl Into<String>,
        observation: Observation,
    ) -> BackendResult<()> {
        let grid = &observation.grid;
        if grid.width != self.width || grid.height != self.height {
            return Err(BackendError::compute(format!(
                "observation grid {}x{} does not match backend grid {}x{}",
                grid.width, grid.height, self.width, self.height
            )));
        }
        self.collections
            .entry(collection_id.into())
            .or_default()
            .push(observation);
        Ok(())
    }

    pub fn calls(&self) -> LocalCallCounts {
        LocalCallCounts {
            count: self.count_calls.load(Ordering::Relaxed),
            reduce_region: self.reduce_calls.load(Ordering::Relaxed),
            tile_template: self.tile_calls.load(Ordering::Relaxed),
        }
    }

    /// Evaluate a field to pixels. Not a counted terminal call.
    pub fn evaluate(&self, field: &RasterField) -> BackendResult<Grid> {
        self.eval(field.expr())
    }

    fn select(&self, collection: &CollectionExpr) -> Vec<&Observation> {
        self.collections
            .get(&collection.source.id)
            .map(|observations| {
                observations
                    .iter()
                    .filter(|obs| collection.filters.iter().all(|f| obs.matches(f)))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn empty_grid(&self) -> Grid {
        Grid::filled(self.width, self.height, self.bbox, None)
    }

    fn eval(&self, expr: &FieldExpr) -> BackendResult<Grid> {
        match expr {
            FieldExpr::Reduce {
                collection,
                reducer,
            } => {
                let observations = self.select(collection);
                let mut out = self.empty_grid();
                for (index, slot) in out.values.iter_mut().enumerate() {
                    *slot = reduce_values(
                        *reducer,
                        observations.iter().filter_map(|obs| obs.grid.values[index]),
                    );
                }
                Ok(out)
            }
            FieldExpr::MeanOf { fields } => {
                let grids = fields
                    .iter()
                    .map(|f| self.eval(f))
                    .collect::<BackendResult<Vec<_>>>()?;
                let mut out = self.empty_grid();
                for grid in &grids {
                    if !grid.same_shape(&out) {
                        return Err(BackendError::compute("mean_of input shape mismatch"));
                    }
                }
                for (index, slot) in out.values.iter_mut().enumerate() {
                    *slot = reduce_values(
                        Reducer::Mean,
                        grids.iter().filter_map(|grid| grid.values[index]),
                    );
                }
                Ok(out)
            }
            FieldExpr::Unmask { field, fallback } => {
                let primary = self.eval(field)?;
                let fallback = self.eval(fallback)?;
                primary.zip(&fallback, |p, f| p.or(f))
            }
            FieldExpr::Binary { op, lhs, rhs } => {
                let left = self.eval(lhs)?;
                match rhs {
                    Operand::Scalar(value) => {
                        Ok(left.map(|v| v.and_then(|v| op.apply(v, *value))))
                    }
                    Operand::Field(rhs) => {
                        let right = self.eval(rhs)?;
                        left.zip(&right, |a, b| match (a, b) {
                            (Some(a), Some(b)) => op.apply(a, b),
                            _ => None,
                        })
                    }
                }
            }
            FieldExpr::GreaterThan { field, threshold } => Ok(self
                .eval(field)?
                .map(|v| v.map(|v| if v > *threshold { 1.0 } else { 0.0 }))),
            FieldExpr::UpdateMask { field, mask } => {
                let values = self.eval(field)?;
                let mask = self.eval(mask)?;
                values.zip(&mask, |v, m| match m {
                    Some(m) if m != 0.0 => v,
                    _ => None,
                })
            }
            FieldExpr::Reproject { field, .. } | FieldExpr::Rename { field, .. } => {
                self.eval(field)
            }
        }
    }

    async fn before_terminal_call(&self, counter: &AtomicU64) -> BackendResult<()> {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BackendError::compute("local backend is set to fail"));
        }
        Ok(())
    }
}

/// Reduce a pixel stack. Returns `None` for an empty stack.
fn reduce_values(reducer: Reducer, values: impl Iterator<Item = f64>) -> Option<f64> {
    let values: Vec<f64> = values.collect();
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    match reducer {
        Reducer::Mean => Some(values.iter().sum::<f64>() / n),
        Reducer::StdDev => {
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            Some(variance.sqrt())
        }
        Reducer::Min => values.into_iter().reduce(f64::min),
        Reducer::Max => values.into_iter().reduce(f64::max),
    }
}

#[async_trait]
impl RenderBackend for LocalBackend {
    async fn count(&self, collection: &TimeSeriesCollection) -> BackendResult<usize> {
        self.before_terminal_call(&self.count_calls).await?;
        Ok(self.select(collection.expr()).len())
    }

    async fn reduce_region(
        &self,
        field: &RasterField,
        reduction: &RegionReduction,
    ) -> BackendResult<RegionStats> {
        self.before_terminal_call(&self.reduce_calls).await?;
        let grid = self.evaluate(field)?;

        let inside: Vec<usize> = (0..grid.values.len())
            .filter(|&index| {
                let (x, y) = grid.pixel_center(index);
                reduction.geometry.contains(x, y)
            })
            .collect();
        let required = inside.len() as u64;
        if required > reduction.max_pixels {
            return Err(BackendError::TooManyPixels {
                required,
                budget: reduction.max_pixels,
            });
        }

        let mut stats = RegionStats::new();
        if let Some(value) = reduce_values(
            reduction.reducer,
            inside.iter().filter_map(|&index| grid.values[index]),
        ) {
            stats.insert(field.band().to_string(), value);
        }
        debug!(band = field.band(), pixels = required, "Local region reduction");
        Ok(stats)
    }

    async fn tile_template(
        &self,
        field: &RasterField,
        vis: &VisParams,
    ) -> BackendResult<TileTemplate> {
        self.before_terminal_call(&self.tile_calls).await?;
        vis.validate()
            .map_err(|e| BackendError::compute(e.to_string()))?;
        self.evaluate(field)?;

        let map_id = uuid::Uuid::new_v4().simple().to_string();
        TileTemplate::new(format!("local://maps/{}/tiles/{{z}}/{{x}}/{{y}}", map_id))
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::SourceSpec;
    use crate::session::Session;
    use thermal_common::{month_range, LayerStyle};

    fn bbox() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 2.0, 1.0)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn backend_with(values: &[(NaiveDate, [Option<f64>; 2])]) -> LocalBackend {
        let mut backend = LocalBackend::new(2, 1, bbox());
        let spec = SourceSpec::era5_land();
        for (day, pixels) in values {
            let grid = Grid::new(2, 1, bbox(), pixels.to_vec()).unwrap();
            backend
                .add_observation(spec.id.clone(), Observation::new(*day, grid))
                .unwrap();
        }
        backend
    }

    fn collection() -> TimeSeriesCollection {
        TimeSeriesCollection::open(&Session::new("test").unwrap(), &SourceSpec::era5_land())
    }

    #[test]
    fn test_reduce_values() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(reduce_values(Reducer::Mean, values.iter().copied()), Some(5.0));
        assert_eq!(reduce_values(Reducer::StdDev, values.iter().copied()), Some(2.0));
        assert_eq!(reduce_values(Reducer::Min, values.iter().copied()), Some(2.0));
        assert_eq!(reduce_values(Reducer::Max, values.iter().copied()), Some(9.0));
        assert_eq!(reduce_values(Reducer::Mean, std::iter::empty()), None);
    }

    #[test]
    fn test_mean_skips_masked_observations() {
        let backend = backend_with(&[
            (date(2023, 1, 1), [Some(1.0), None]),
            (date(2023, 1, 2), [Some(3.0), None]),
        ]);
        let grid = backend.evaluate(&collection().mean()).unwrap();
        assert_eq!(grid.values(), &[Some(2.0), None]);
        assert_eq!(grid.masked_count(), 1);
    }

    #[test]
    fn test_date_filter_includes_last_day_of_month() {
        let backend = backend_with(&[
            (date(2023, 2, 28), [Some(1.0), Some(1.0)]),
            (date(2023, 3, 1), [Some(9.0), Some(9.0)]),
        ]);
        let february = collection().filter_date(month_range(2023, 2).unwrap());
        let grid = backend.evaluate(&february.mean()).unwrap();
        assert_eq!(grid.values(), &[Some(1.0), Some(1.0)]);
    }

    #[test]
    fn test_update_mask_and_divide_by_zero() {
        let backend = backend_with(&[(date(2023, 1, 1), [Some(4.0), Some(0.0)])]);
        let field = collection().mean();

        let ratio = field.divide(&field).unwrap();
        assert_eq!(backend.evaluate(&ratio).unwrap().values(), &[Some(1.0), None]);

        let masked = field.update_mask(&field.gt(0.0)).unwrap();
        assert_eq!(backend.evaluate(&masked).unwrap().values(), &[Some(4.0), None]);
    }

    #[tokio::test]
    async fn test_terminal_calls_are_counted() {
        let backend = backend_with(&[(date(2023, 1, 1), [Some(10.0), Some(20.0)])]);
        let field = collection().mean();

        assert_eq!(backend.count(&collection()).await.unwrap(), 1);

        let stats = backend
            .reduce_region(&field, &RegionReduction::global_mean())
            .await
            .unwrap();
        assert_eq!(stats.get("temperature_2m"), Some(&15.0));

        let template = backend
            .tile_template(&field, &LayerStyle::lst().vis)
            .await
            .unwrap();
        assert!(template.as_str().starts_with("local://maps/"));

        assert_eq!(
            backend.calls(),
            LocalCallCounts {
                count: 1,
                reduce_region: 1,
                tile_template: 1
            }
        );
    }

    #[tokio::test]
    async fn test_pixel_budget_is_enforced() {
        let backend = backend_with(&[(date(2023, 1, 1), [Some(10.0), Some(20.0)])]);
        let mut reduction = RegionReduction::global_mean();
        reduction.max_pixels = 1;
        let result = backend.reduce_region(&collection().mean(), &reduction).await;
        assert_eq!(
            result,
            Err(BackendError::TooManyPixels {
                required: 2,
                budget: 1
            })
        );
    }

    #[tokio::test]
    async fn test_failing_backend() {
        let backend = backend_with(&[]);
        backend.set_failing(true);
        assert!(matches!(
            backend.count(&collection()).await,
            Err(BackendError::Compute(_))
        ));
        backend.set_failing(false);
        assert_eq!(backend.count(&collection()).await.unwrap(), 0);
    }

    #[test]
    fn test_observation_shape_is_checked() {
        let mut backend = LocalBackend::new(2, 2, bbox());
        let grid = Grid::filled(3, 1, bbox(), Some(1.0));
        assert!(backend
            .add_observation("x", Observation::new(date(2023, 1, 1), grid))
            .is_err());
    }
}
