//! Surface-temperature fusion and anomaly pipeline.
//!
//! # Architecture
//!
//! ```text
//! PipelineKey (year, model)
//!      │
//!      ├─► TemporalCompositor ── monthly means ──► yearly composite (primary, fallback)
//!      │
//!      ├─► ClimatologyEngine ── reference window ──► (mean, std_dev)   [memoized]
//!      │
//!      ├─► FusionEngine ── primary where defined, else fallback ──► fused field
//!      │
//!      ├─► AnomalyCalculator ── standardized + absolute anomalies
//!      │
//!      └─► RenderBackend ── region stats + tile templates ──► PipelineOutput
//! ```
//!
//! Everything up to the last step only builds graphs (plus the observation
//! counts the compositor needs). The last step is where pixels are computed.

pub mod anomaly;
pub mod climatology;
pub mod composite;
pub mod config;
pub mod error;
pub mod fusion;
pub mod pipeline;

pub use anomaly::{AnomalyCalculator, AnomalyResult};
pub use climatology::{ClimatologyEngine, ClimatologyStats};
pub use composite::{Composite, CompositeRequest, TemporalCompositor};
pub use config::{LayerStyles, PipelineConfig};
pub use error::{PipelineError, Result};
pub use fusion::FusionEngine;
pub use pipeline::{
    FailureKind, FusedLayers, FusionPipeline, LayerTile, Pipeline, PipelineFailure, PipelineKey,
    PipelineOutput, PipelineResult, PipelineSuccess, ProjectionPipeline,
};
