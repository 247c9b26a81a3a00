//! Result caching and persistence for the urban-heat pipelines.
//!
//! Provides:
//! - A bounded, coalescing in-memory cache of pipeline results
//! - A directory-backed store of per-year tile configurations

pub mod error;
pub mod pipeline_cache;
pub mod tile_config;

pub use error::{StorageError, StorageResult};
pub use pipeline_cache::{CacheConfig, ErrorCachePolicy, PipelineCache, PipelineCacheStats};
pub use tile_config::{TileConfig, TileConfigStore};
