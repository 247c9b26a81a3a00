//! Request-level pipelines and their externally visible results.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use futures::future::try_join_all;
use raster_graph::{
    RasterField, RegionStats, RenderBackend, Session, TimeSeriesCollection, TimeoutBackend,
};
use serde::{Deserialize, Serialize};
use thermal_common::{months_for_year, DateRange, LayerStyle, TileTemplate};
use tracing::{info, instrument};

use crate::anomaly::{AnomalyCalculator, AnomalyResult};
use crate::climatology::{ClimatologyEngine, ClimatologyStats};
use crate::composite::{CompositeRequest, TemporalCompositor};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::fusion::FusionEngine;

/// Band name of the fused surface temperature layer.
pub const FUSED_BAND: &str = "LST";
/// Band name of the calibrated fallback composite.
pub const FALLBACK_BAND: &str = "ERA5_LST";
/// Band name of the projected air temperature layer.
pub const PROJECTION_BAND: &str = "tas_celsius";

/// Identity of a pipeline request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PipelineKey {
    pub year: i32,
    /// Model selector for multi-model sources
    #[serde(default)]
    pub model: Option<String>,
}

impl PipelineKey {
    pub fn year(year: i32) -> Self {
        Self { year, model: None }
    }

    pub fn with_model(year: i32, model: impl Into<String>) -> Self {
        Self {
            year,
            model: Some(model.into()),
        }
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}:{}", self.year, model),
            None => write!(f, "{}", self.year),
        }
    }
}

/// A materialized layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerTile {
    pub name: String,
    pub template: TileTemplate,
}

/// What a successful pipeline run produces, before timing is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    /// Layers in publication order; the first is the primary layer
    pub layers: Vec<LayerTile>,
    pub stats: RegionStats,
}

impl PipelineOutput {
    pub fn tile(&self, name: &str) -> Option<&TileTemplate> {
        self.layers
            .iter()
            .find(|layer| layer.name == name)
            .map(|layer| &layer.template)
    }
}

/// Classification of a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureKind {
    DataUnavailable,
    #[default]
    BackendCompute,
    InvalidRequest,
    /// The computation task ended without producing a result
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSuccess {
    /// Template of the primary layer
    pub tile_url: String,
    /// Templates of every layer, by layer name
    pub tile_urls: BTreeMap<String, String>,
    pub stats: BTreeMap<String, f64>,
    /// Seconds spent computing
    pub processing_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub error: String,
    #[serde(skip)]
    pub kind: FailureKind,
}

/// The externally visible artifact of one request.
///
/// Serializes as `{tile_url, tile_urls, stats, processing_time}` or `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineResult {
    Success(PipelineSuccess),
    Failure(PipelineFailure),
}

impl PipelineResult {
    /// Convert a pipeline outcome, attaching the elapsed time.
    pub fn from_outcome(outcome: Result<PipelineOutput>, elapsed: Duration) -> Self {
        match outcome {
            Ok(output) => {
                let tile_url = output
                    .layers
                    .first()
                    .map(|layer| layer.template.to_string())
                    .unwrap_or_default();
                PipelineResult::Success(PipelineSuccess {
                    tile_url,
                    tile_urls: output
                        .layers
                        .into_iter()
                        .map(|layer| (layer.name, layer.template.into()))
                        .collect(),
                    stats: output.stats,
                    processing_time: elapsed.as_secs_f64(),
                })
            }
            Err(err) => {
                let kind = match &err {
                    PipelineError::DataUnavailable(_) => FailureKind::DataUnavailable,
                    PipelineError::InvalidRequest(_) => FailureKind::InvalidRequest,
                    PipelineError::Backend(_) | PipelineError::Graph(_) => {
                        FailureKind::BackendCompute
                    }
                };
                PipelineResult::failure(kind, err.to_string())
            }
        }
    }

    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        PipelineResult::Failure(PipelineFailure {
            error: error.into(),
            kind,
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResult::Success(_))
    }

    pub fn success(&self) -> Option<&PipelineSuccess> {
        match self {
            PipelineResult::Success(success) => Some(success),
            PipelineResult::Failure(_) => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            PipelineResult::Success(_) => None,
            PipelineResult::Failure(failure) => Some(failure.kind),
        }
    }
}

/// A request-level computation from key to output.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, key: &PipelineKey) -> Result<PipelineOutput>;
}

/// Graph of every layer of one fused request, before materialization.
#[derive(Debug, Clone)]
pub struct FusedLayers {
    pub months: Vec<u32>,
    pub primary: RasterField,
    pub fallback: RasterField,
    pub fused: RasterField,
    pub climatology: ClimatologyStats,
    pub anomalies: AnomalyResult,
}

/// Gap-filled surface temperature with anomalies against the primary climatology.
pub struct FusionPipeline {
    session: Session,
    backend: Arc<dyn RenderBackend>,
    config: PipelineConfig,
    compositor: TemporalCompositor,
    climatology: ClimatologyEngine,
}

impl FusionPipeline {
    /// Every terminal call issued by the pipeline is bounded by the
    /// configured backend timeout.
    pub fn new<B: RenderBackend + 'static>(session: Session, backend: B, config: PipelineConfig) -> Self {
        let backend: Arc<dyn RenderBackend> =
            Arc::new(TimeoutBackend::new(backend, config.backend_timeout()));
        Self {
            compositor: TemporalCompositor::new(backend.clone()),
            climatology: ClimatologyEngine::new(backend.clone(), config.climatology_window),
            session,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn climatology_engine(&self) -> &ClimatologyEngine {
        &self.climatology
    }

    fn today(&self) -> NaiveDate {
        self.config.today.unwrap_or_else(|| Utc::now().date_naive())
    }

    /// Build the graphs of every layer. Only observation counts touch the backend.
    pub async fn build_layers(&self, key: &PipelineKey) -> Result<FusedLayers> {
        let months = months_for_year(key.year, self.today());
        let model = key.model.as_deref();

        let primary_collection =
            TimeSeriesCollection::open(&self.session, &self.config.primary).select_model(model);
        let fallback_collection =
            TimeSeriesCollection::open(&self.session, &self.config.fallback).select_model(model);

        let primary_request = CompositeRequest::new(primary_collection.clone(), key.year, &months)?;
        let fallback_request = CompositeRequest::new(fallback_collection, key.year, &months)?;

        let (primary, fallback) = futures::try_join!(
            self.compositor.composite(&primary_request),
            self.compositor.composite(&fallback_request),
        )?;

        let primary = primary.into_field().ok_or_else(|| {
            PipelineError::data_unavailable(format!(
                "no {} data for {}",
                self.config.primary.id, key
            ))
        })?;
        let fallback = fallback.into_field().ok_or_else(|| {
            PipelineError::data_unavailable(format!(
                "no {} data for {}",
                self.config.fallback.id, key
            ))
        })?;

        let primary = primary
            .calibrate(&self.config.primary.calibration)
            .rename(FUSED_BAND);
        let fallback = fallback
            .calibrate(&self.config.fallback.calibration)
            .rename(FALLBACK_BAND);

        let climatology = self.climatology.climatology(&primary_collection).await?;
        let fused = FusionEngine::fuse(&primary, &fallback)?;
        let anomalies = AnomalyCalculator::anomalies(&fused, &climatology)?;

        Ok(FusedLayers {
            months,
            primary,
            fallback,
            fused,
            climatology,
            anomalies,
        })
    }
}

/// Region statistics and tile templates for a list of styled fields.
async fn materialize(
    backend: &dyn RenderBackend,
    config: &PipelineConfig,
    layers: &[(&RasterField, &LayerStyle)],
) -> Result<PipelineOutput> {
    let reductions = try_join_all(
        layers
            .iter()
            .map(|(field, _)| backend.reduce_region(field, &config.region)),
    );
    let templates = try_join_all(
        layers
            .iter()
            .map(|(field, style)| backend.tile_template(field, &style.vis)),
    );
    let (reductions, templates) = futures::try_join!(reductions, templates)?;

    let stats = reductions.into_iter().flatten().collect();
    let layers = layers
        .iter()
        .zip(templates)
        .map(|((_, style), template)| LayerTile {
            name: style.name.clone(),
            template,
        })
        .collect();

    Ok(PipelineOutput { layers, stats })
}

#[async_trait]
impl Pipeline for FusionPipeline {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn run(&self, key: &PipelineKey) -> Result<PipelineOutput> {
        let built = self.build_layers(key).await?;
        info!(months = built.months.len(), "Materializing fused layers");

        let styles = &self.config.layers;
        materialize(
            self.backend.as_ref(),
            &self.config,
            &[
                (&built.fused, &styles.lst),
                (&built.anomalies.standardized, &styles.anomaly),
                (&built.anomalies.absolute, &styles.absolute_anomaly),
            ],
        )
        .await
    }
}

/// Yearly mean of one climate model's projected air temperature.
pub struct ProjectionPipeline {
    session: Session,
    backend: Arc<dyn RenderBackend>,
    config: PipelineConfig,
}

impl ProjectionPipeline {
    pub fn new<B: RenderBackend + 'static>(session: Session, backend: B, config: PipelineConfig) -> Self {
        Self {
            backend: Arc::new(TimeoutBackend::new(backend, config.backend_timeout())),
            session,
            config,
        }
    }

    /// Graph of the calibrated yearly mean for `key`.
    pub async fn build_field(&self, key: &PipelineKey) -> Result<RasterField> {
        let model = key.model.as_deref().ok_or_else(|| {
            PipelineError::invalid_request("a model selector is required for projections")
        })?;

        let collection = TimeSeriesCollection::open(&self.session, &self.config.projection)
            .select_model(Some(model))
            .filter_date(DateRange::year(key.year)?);

        if self.backend.count(&collection).await? == 0 {
            return Err(PipelineError::data_unavailable(format!(
                "no {} data for {}",
                self.config.projection.id, key
            )));
        }

        Ok(collection
            .mean()
            .calibrate(&self.config.projection.calibration)
            .rename(PROJECTION_BAND))
    }
}

#[async_trait]
impl Pipeline for ProjectionPipeline {
    #[instrument(skip(self, key), fields(key = %key))]
    async fn run(&self, key: &PipelineKey) -> Result<PipelineOutput> {
        let field = self.build_field(key).await?;
        materialize(
            self.backend.as_ref(),
            &self.config,
            &[(&field, &self.config.layers.temperature)],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raster_graph::BackendError;

    fn output() -> PipelineOutput {
        PipelineOutput {
            layers: vec![
                LayerTile {
                    name: "lst".to_string(),
                    template: TileTemplate::new("https://t/a/{z}/{x}/{y}").unwrap(),
                },
                LayerTile {
                    name: "anomaly".to_string(),
                    template: TileTemplate::new("https://t/b/{z}/{x}/{y}").unwrap(),
                },
            ],
            stats: [("LST".to_string(), 21.5)].into_iter().collect(),
        }
    }

    #[test]
    fn test_success_shape() {
        let result = PipelineResult::from_outcome(Ok(output()), Duration::from_millis(1500));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["tile_url"], "https://t/a/{z}/{x}/{y}");
        assert_eq!(json["tile_urls"]["anomaly"], "https://t/b/{z}/{x}/{y}");
        assert_eq!(json["stats"]["LST"], 21.5);
        assert_eq!(json["processing_time"], 1.5);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failure_shape() {
        let result = PipelineResult::from_outcome(
            Err(PipelineError::data_unavailable("no MODIS data for 1999")),
            Duration::from_millis(10),
        );
        assert_eq!(result.failure_kind(), Some(FailureKind::DataUnavailable));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, serde_json::json!({"error": "data unavailable: no MODIS data for 1999"}));
    }

    #[test]
    fn test_backend_errors_classify_as_compute() {
        let result = PipelineResult::from_outcome(
            Err(BackendError::Timeout(Duration::from_secs(1)).into()),
            Duration::ZERO,
        );
        assert_eq!(result.failure_kind(), Some(FailureKind::BackendCompute));
        assert!(!result.is_success());
    }

    #[test]
    fn test_result_deserializes_either_shape() {
        let ok: PipelineResult = serde_json::from_str(
            r#"{"tile_url": "u", "tile_urls": {}, "stats": {}, "processing_time": 0.1}"#,
        )
        .unwrap();
        assert!(ok.is_success());

        let err: PipelineResult = serde_json::from_str(r#"{"error": "boom"}"#).unwrap();
        assert!(!err.is_success());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(PipelineKey::year(2023).to_string(), "2023");
        assert_eq!(
            PipelineKey::with_model(2023, "ACCESS-CM2").to_string(),
            "2023:ACCESS-CM2"
        );
    }
}
