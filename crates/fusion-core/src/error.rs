//! Error types for pipeline requests.

use raster_graph::{BackendError, GraphError};
use thermal_common::ThermalError;
use thiserror::Error;

/// Per-request failures. These are caught at the cache boundary and turned
/// into error-shaped results; none of them abort the process.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// No observations for a requested period.
    #[error("data unavailable: {0}")]
    DataUnavailable(String),

    /// A terminal backend call failed or timed out.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The graph could not be assembled.
    #[error("invalid computation graph: {0}")]
    Graph(#[from] GraphError),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn data_unavailable(msg: impl Into<String>) -> Self {
        Self::DataUnavailable(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// True for "no data" outcomes, as opposed to failures.
    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_))
    }
}

impl From<ThermalError> for PipelineError {
    fn from(err: ThermalError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
