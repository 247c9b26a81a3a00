//! Error types for graph construction and backend evaluation.

use thermal_common::CrsCode;
use thiserror::Error;

/// Errors raised while composing a graph. These never touch the network.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Arithmetic between fields on different grids.
    #[error("incompatible grids: {left_crs}@{left_scale}m vs {right_crs}@{right_scale}m")]
    IncompatibleGrid {
        left_crs: CrsCode,
        left_scale: f64,
        right_crs: CrsCode,
        right_scale: f64,
    },

    /// A reduction over zero input fields.
    #[error("cannot reduce an empty list of fields")]
    EmptyInput,
}

/// Result type for graph construction.
pub type GraphResult<T> = std::result::Result<T, GraphError>;

/// Errors raised by a render backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Session or credential setup failed. Fatal at startup.
    #[error("backend initialization failed: {0}")]
    Initialization(String),

    /// The backend rejected or failed a terminal computation.
    #[error("backend computation failed: {0}")]
    Compute(String),

    /// A terminal call did not finish within its time budget.
    #[error("backend call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The region reduction would touch more pixels than allowed.
    #[error("region reduction needs {required} pixels, budget is {budget}")]
    TooManyPixels { required: u64, budget: u64 },

    /// Transport-level failure talking to a remote backend.
    #[error("backend transport error: {0}")]
    Transport(String),

    /// The backend returned something we could not decode.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn compute(msg: impl Into<String>) -> Self {
        Self::Compute(msg.into())
    }

    pub fn initialization(msg: impl Into<String>) -> Self {
        Self::Initialization(msg.into())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;
