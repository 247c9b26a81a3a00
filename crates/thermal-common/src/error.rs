//! Error types shared by the surface-temperature services.

use thiserror::Error;

/// Result type alias using ThermalError.
pub type ThermalResult<T> = Result<T, ThermalError>;

/// Errors raised while building requests from user input.
#[derive(Debug, Error)]
pub enum ThermalError {
    #[error("Invalid month: {0} (expected 1-12)")]
    InvalidMonth(u32),

    #[error("Invalid date {year}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },

    #[error("Invalid date range: {start} is after {end}")]
    InvalidDateRange { start: String, end: String },

    #[error("Invalid tile template '{0}': must contain {{z}}, {{x}} and {{y}}")]
    InvalidTileTemplate(String),

    #[error("Invalid visualization parameters: {0}")]
    InvalidVisParams(String),

    #[error("Invalid color: {0}")]
    InvalidColor(String),
}
