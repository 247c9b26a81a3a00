//! Common types and utilities shared across the surface-temperature services.

pub mod bbox;
pub mod crs;
pub mod error;
pub mod style;
pub mod tile;
pub mod time;

pub use bbox::BoundingBox;
pub use crs::CrsCode;
pub use error::{ThermalError, ThermalResult};
pub use style::{Color, LayerStyle, VisParams};
pub use tile::{TileCoord, TileTemplate};
pub use time::{days_in_month, month_range, months_for_year, DateRange};
