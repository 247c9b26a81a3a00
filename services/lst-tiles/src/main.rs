//! Surface-temperature tile builder.
//!
//! For each requested year, either:
//! - fuses the primary land-surface temperature with the gap-free fallback,
//!   derives anomalies against the climatology and publishes three tile
//!   layers plus `tile_config_{year}.json`, or
//! - with `--model`, publishes that climate model's projected yearly mean
//!   temperature.
//!
//! All requests go through one [`PipelineCache`], so repeated years are
//! computed once.

mod report;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use fusion_core::{
    FusionPipeline, Pipeline, PipelineConfig, PipelineKey, PipelineResult, ProjectionPipeline,
};
use raster_graph::{BackendConfig, HttpBackend, Session};
use storage::{CacheConfig, PipelineCache, TileConfig, TileConfigStore};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "lst-tiles")]
#[command(about = "Fused surface-temperature and anomaly tile layers")]
struct Args {
    /// Year to process; repeat for several years
    #[arg(long = "year", required = true)]
    years: Vec<i32>,

    /// Climate model to project (selects the projection pipeline)
    #[arg(short, long)]
    model: Option<String>,

    /// Directory for tile_config_{year}.json files
    #[arg(long, env = "TILE_CONFIG_DIR", default_value = "tiles")]
    output_dir: PathBuf,

    /// Pipeline configuration YAML (defaults come from the environment)
    #[arg(long, env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Raster service URL
    #[arg(long, env = "BACKEND_URL")]
    backend_url: Option<String>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Initialize tracing
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!(years = ?args.years, model = ?args.model, "Starting lst-tiles");

    let pipeline_config = match &args.config {
        Some(path) => PipelineConfig::from_yaml_file(path).map_err(|e| anyhow!(e))?,
        None => PipelineConfig::from_env(),
    };
    pipeline_config
        .validate()
        .map_err(|e| anyhow!("invalid pipeline config: {}", e))?;

    let cache_config = CacheConfig::from_env();
    cache_config
        .validate()
        .map_err(|e| anyhow!("invalid cache config: {}", e))?;

    let mut backend_config = BackendConfig::from_env();
    if let Some(url) = args.backend_url.clone() {
        backend_config.url = url;
    }

    let backend = match HttpBackend::connect(&backend_config).await {
        Ok(backend) => backend,
        Err(e) => {
            error!(url = %backend_config.url, error = %e, "Backend initialization failed");
            return Err(e.into());
        }
    };
    let session = Session::new(backend_config.project.clone())?;
    info!(
        url = %backend_config.url,
        project = %session.project(),
        cache_capacity = cache_config.capacity,
        error_policy = %cache_config.error_policy,
        "Backend connected"
    );

    let keys: Vec<PipelineKey> = args
        .years
        .iter()
        .map(|&year| PipelineKey {
            year,
            model: args.model.clone(),
        })
        .collect();

    let results = match args.model {
        Some(_) => {
            let pipeline = ProjectionPipeline::new(session, backend, pipeline_config);
            run_all(PipelineCache::new(pipeline, cache_config), &keys).await
        }
        None => {
            let pipeline = FusionPipeline::new(session, backend, pipeline_config);
            run_all(PipelineCache::new(pipeline, cache_config), &keys).await
        }
    };

    let store = TileConfigStore::new(&args.output_dir);
    let mut failures = 0;

    for (key, result) in &results {
        println!("{}", report::result_json(result)?);

        match result.as_ref() {
            PipelineResult::Success(success) => {
                for line in report::test_tiles(success) {
                    println!("{}", line);
                }

                if key.model.is_none() {
                    let config = TileConfig::from_success(success)?;
                    let path = store.save(key.year, &config).await?;
                    println!("Tile configuration saved to {}", path.display());
                }
            }
            PipelineResult::Failure(failure) => {
                error!(key = %key, kind = ?failure.kind, error = %failure.error, "Request failed");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} requests failed", failures, results.len());
    }

    info!(requests = results.len(), "Done");
    Ok(())
}

/// Resolve every key concurrently through the cache.
async fn run_all<P: Pipeline + 'static>(
    cache: PipelineCache<P>,
    keys: &[PipelineKey],
) -> Vec<(PipelineKey, Arc<PipelineResult>)> {
    let results = futures::future::join_all(keys.iter().map(|key| cache.get_or_compute(key))).await;

    let stats = cache.stats();
    info!(
        hits = stats.hits(),
        misses = stats.misses(),
        coalesced = stats.coalesced(),
        errors = stats.errors(),
        "Pipeline cache summary"
    );

    keys.iter().cloned().zip(results).collect()
}
