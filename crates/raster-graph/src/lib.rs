//! Lazy raster computation graphs.
//!
//! A [`RasterField`] or [`TimeSeriesCollection`] is a description of a
//! computation, not pixel data. Composing filters, reductions, arithmetic and
//! mask-fill is local and cheap. Pixels are only produced when a terminal
//! operation is invoked on a [`RenderBackend`]:
//!
//! ```text
//! TimeSeriesCollection ──filter──► TimeSeriesCollection ──mean/std_dev──► RasterField
//!                                                                             │
//!                                   subtract / divide / unmask / update_mask  │
//!                                                                             ▼
//!                          RenderBackend::{count, reduce_region, tile_template}
//!                                      (network call, may fail or time out)
//! ```
//!
//! Two backends are provided: [`HttpBackend`] forwards serialized graphs to a
//! remote raster service, and [`LocalBackend`] evaluates them in memory over
//! small grids.

pub mod backend;
pub mod collection;
pub mod error;
pub mod expr;
pub mod field;
pub mod http;
pub mod local;
pub mod session;

pub use backend::{RegionReduction, RegionStats, RenderBackend, TimeoutBackend};
pub use collection::{Calibration, SourceSpec, TimeSeriesCollection};
pub use error::{BackendError, BackendResult, GraphError, GraphResult};
pub use expr::{BinaryOp, CollectionExpr, CollectionFilter, FieldExpr, Operand, Reducer, SourceRef};
pub use field::RasterField;
pub use http::{BackendConfig, HttpBackend};
pub use local::{Grid, LocalBackend, LocalCallCounts, Observation};
pub use session::Session;
