//! Long-term reference statistics.

use std::collections::HashMap;
use std::sync::Arc;

use raster_graph::{CollectionExpr, RasterField, RenderBackend, TimeSeriesCollection};
use thermal_common::DateRange;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Calibrated per-pixel mean and standard deviation over a reference window.
#[derive(Debug, Clone, PartialEq)]
pub struct ClimatologyStats {
    pub mean: RasterField,
    pub std_dev: RasterField,
    /// Observations inside the window
    pub observations: usize,
    pub window: DateRange,
}

/// Computes climatologies over a fixed window and memoizes them per source.
///
/// The window does not depend on the year being analysed, so one entry per
/// filtered source collection is enough. Concurrent first requests for a
/// collection share one computation.
pub struct ClimatologyEngine {
    backend: Arc<dyn RenderBackend>,
    window: DateRange,
    memo: Mutex<HashMap<CollectionExpr, Arc<OnceCell<ClimatologyStats>>>>,
}

impl ClimatologyEngine {
    pub fn new(backend: Arc<dyn RenderBackend>, window: DateRange) -> Self {
        Self {
            backend,
            window,
            memo: Mutex::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> DateRange {
        self.window
    }

    /// Climatology over an explicit window, without memoization.
    ///
    /// Month boundaries play no role: every observation in the window counts.
    pub async fn compute(
        &self,
        collection: &TimeSeriesCollection,
        window: DateRange,
    ) -> Result<ClimatologyStats> {
        let reference = collection.filter_date(window);
        let observations = self.backend.count(&reference).await?;
        if observations == 0 {
            return Err(PipelineError::data_unavailable(format!(
                "no {} observations in climatology window {}",
                collection.spec().id,
                window
            )));
        }

        let calibration = collection.spec().calibration;
        let stats = ClimatologyStats {
            mean: reference.mean().calibrate(&calibration),
            std_dev: reference.std_dev().calibrate_spread(&calibration),
            observations,
            window,
        };

        info!(
            source = %collection.spec().id,
            window = %window,
            observations,
            "Computed climatology"
        );
        Ok(stats)
    }

    /// Climatology over the engine's window, computed once per collection.
    ///
    /// Failures are not memoized.
    pub async fn climatology(&self, collection: &TimeSeriesCollection) -> Result<ClimatologyStats> {
        let cell = self
            .memo
            .lock()
            .await
            .entry(collection.expr().clone())
            .or_default()
            .clone();

        if let Some(stats) = cell.get() {
            debug!(source = %collection.spec().id, "Climatology memo hit");
            return Ok(stats.clone());
        }

        let stats = cell
            .get_or_try_init(|| self.compute(collection, self.window))
            .await?;
        Ok(stats.clone())
    }

    /// Number of memoized climatologies.
    pub async fn memoized(&self) -> usize {
        self.memo
            .lock()
            .await
            .values()
            .filter(|cell| cell.initialized())
            .count()
    }
}
