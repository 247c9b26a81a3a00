//! Temporal compositing of sparse daily collections.

use std::sync::Arc;

use futures::future::try_join_all;
use raster_graph::{RasterField, RenderBackend, TimeSeriesCollection};
use thermal_common::{month_range, ThermalError, ThermalResult};
use tracing::{debug, info, warn};

use crate::error::Result;

/// A request for one yearly composite.
#[derive(Debug, Clone)]
pub struct CompositeRequest {
    pub collection: TimeSeriesCollection,
    pub year: i32,
    /// Ascending, de-duplicated month numbers
    pub months: Vec<u32>,
}

impl CompositeRequest {
    pub fn new(collection: TimeSeriesCollection, year: i32, months: &[u32]) -> ThermalResult<Self> {
        if let Some(&bad) = months.iter().find(|m| !(1..=12).contains(*m)) {
            return Err(ThermalError::InvalidMonth(bad));
        }
        let mut months = months.to_vec();
        months.sort_unstable();
        months.dedup();
        Ok(Self {
            collection,
            year,
            months,
        })
    }
}

/// Outcome of compositing.
///
/// `Empty` means no requested month had any observation. It is "no data",
/// not a failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Composite {
    Field {
        field: RasterField,
        /// Months that contributed
        months: Vec<u32>,
    },
    Empty,
}

impl Composite {
    pub fn is_empty(&self) -> bool {
        matches!(self, Composite::Empty)
    }

    pub fn field(&self) -> Option<&RasterField> {
        match self {
            Composite::Field { field, .. } => Some(field),
            Composite::Empty => None,
        }
    }

    pub fn into_field(self) -> Option<RasterField> {
        match self {
            Composite::Field { field, .. } => Some(field),
            Composite::Empty => None,
        }
    }
}

/// Reduces a collection to one field per requested period.
pub struct TemporalCompositor {
    backend: Arc<dyn RenderBackend>,
}

impl TemporalCompositor {
    pub fn new(backend: Arc<dyn RenderBackend>) -> Self {
        Self { backend }
    }

    /// Mean of one calendar month, or `None` when the month has no observations.
    pub async fn monthly(
        &self,
        collection: &TimeSeriesCollection,
        year: i32,
        month: u32,
    ) -> Result<Option<RasterField>> {
        let range = month_range(year, month)?;
        let monthly = collection.filter_date(range);
        let count = self.backend.count(&monthly).await?;

        if count == 0 {
            warn!(
                source = %collection.spec().id,
                year,
                month,
                "No observations for month, skipping"
            );
            return Ok(None);
        }

        debug!(source = %collection.spec().id, year, month, count, "Monthly composite");
        Ok(Some(monthly.mean()))
    }

    /// Yearly composite: the mean of every available monthly mean.
    ///
    /// Month counts are requested concurrently; the composite keeps month order.
    pub async fn composite(&self, request: &CompositeRequest) -> Result<Composite> {
        let monthly = try_join_all(
            request
                .months
                .iter()
                .map(|&month| self.monthly(&request.collection, request.year, month)),
        )
        .await?;

        let (months, fields): (Vec<u32>, Vec<RasterField>) = request
            .months
            .iter()
            .zip(monthly)
            .filter_map(|(&month, field)| field.map(|f| (month, f)))
            .unzip();

        if fields.is_empty() {
            warn!(
                source = %request.collection.spec().id,
                year = request.year,
                "No observations in any requested month"
            );
            return Ok(Composite::Empty);
        }

        info!(
            source = %request.collection.spec().id,
            year = request.year,
            available = months.len(),
            requested = request.months.len(),
            "Built yearly composite"
        );

        let field = RasterField::mean_of(&fields)?;
        Ok(Composite::Field { field, months })
    }
}
