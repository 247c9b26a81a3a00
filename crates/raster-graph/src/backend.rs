//! The render backend boundary.
//!
//! Everything above this trait is pure graph construction. The three methods
//! below are the only operations that evaluate pixels, and so the only places
//! where network latency and failures occur.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thermal_common::{BoundingBox, TileTemplate, VisParams};

use crate::collection::TimeSeriesCollection;
use crate::error::{BackendError, BackendResult};
use crate::expr::Reducer;
use crate::field::RasterField;

/// Scalar statistics keyed by output name.
pub type RegionStats = BTreeMap<String, f64>;

/// Parameters of a spatial reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionReduction {
    pub reducer: Reducer,
    pub geometry: BoundingBox,
    /// Resolution of the reduction in meters
    pub scale: f64,
    /// Refuse reductions touching more pixels than this
    pub max_pixels: u64,
}

impl RegionReduction {
    /// Global mean at 50 km with a 1e10 pixel budget.
    pub fn global_mean() -> Self {
        Self {
            reducer: Reducer::Mean,
            geometry: BoundingBox::global(),
            scale: 50_000.0,
            max_pixels: 10_000_000_000,
        }
    }
}

/// Remote raster-compute service.
#[async_trait]
pub trait RenderBackend: Send + Sync {
    /// Number of observations in a filtered collection.
    async fn count(&self, collection: &TimeSeriesCollection) -> BackendResult<usize>;

    /// Reduce a field over a region to scalar statistics.
    ///
    /// Output keys are the field's band name; bands with no unmasked pixel in
    /// the region are omitted.
    async fn reduce_region(
        &self,
        field: &RasterField,
        reduction: &RegionReduction,
    ) -> BackendResult<RegionStats>;

    /// Materialize a field as a `{z}/{x}/{y}` tile template.
    async fn tile_template(&self, field: &RasterField, vis: &VisParams)
        -> BackendResult<TileTemplate>;
}

#[async_trait]
impl<B: RenderBackend + ?Sized> RenderBackend for Arc<B> {
    async fn count(&self, collection: &TimeSeriesCollection) -> BackendResult<usize> {
        (**self).count(collection).await
    }

    async fn reduce_region(
        &self,
        field: &RasterField,
        reduction: &RegionReduction,
    ) -> BackendResult<RegionStats> {
        (**self).reduce_region(field, reduction).await
    }

    async fn tile_template(
        &self,
        field: &RasterField,
        vis: &VisParams,
    ) -> BackendResult<TileTemplate> {
        (**self).tile_template(field, vis).await
    }
}

/// Decorator bounding every terminal call with a timeout.
///
/// A call that overruns resolves to [`BackendError::Timeout`]; the inner
/// future is dropped.
pub struct TimeoutBackend<B> {
    inner: B,
    timeout: Duration,
}

impl<B: RenderBackend> TimeoutBackend<B> {
    pub fn new(inner: B, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn bounded<T>(&self, call: impl Future<Output = BackendResult<T>>) -> BackendResult<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(BackendError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl<B: RenderBackend> RenderBackend for TimeoutBackend<B> {
    async fn count(&self, collection: &TimeSeriesCollection) -> BackendResult<usize> {
        self.bounded(self.inner.count(collection)).await
    }

    async fn reduce_region(
        &self,
        field: &RasterField,
        reduction: &RegionReduction,
    ) -> BackendResult<RegionStats> {
        self.bounded(self.inner.reduce_region(field, reduction)).await
    }

    async fn tile_template(
        &self,
        field: &RasterField,
        vis: &VisParams,
    ) -> BackendResult<TileTemplate> {
        self.bounded(self.inner.tile_template(field, vis)).await
    }
}
