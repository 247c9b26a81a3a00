//! Per-year tile configuration persisted as JSON.
//!
//! Each year is stored as `<dir>/tile_config_{year}.json`. Readers consult an
//! in-memory map first and fall back to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fusion_core::PipelineSuccess;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

const FILE_PREFIX: &str = "tile_config_";
const FILE_SUFFIX: &str = ".json";

/// Tile templates published for one year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileConfig {
    pub lst_tile_url: String,
    pub anomaly_tile_url: String,
    pub absolute_anomaly_tile_url: String,
}

impl TileConfig {
    /// Extract the three fused layers from a successful result.
    pub fn from_success(success: &PipelineSuccess) -> StorageResult<Self> {
        let layer = |name: &str| {
            success
                .tile_urls
                .get(name)
                .cloned()
                .ok_or_else(|| StorageError::MissingLayer(name.to_string()))
        };
        Ok(Self {
            lst_tile_url: layer("lst")?,
            anomaly_tile_url: layer("anomaly")?,
            absolute_anomaly_tile_url: layer("absolute_anomaly")?,
        })
    }
}

/// Directory-backed store of [`TileConfig`]s keyed by year.
pub struct TileConfigStore {
    dir: PathBuf,
    configs: RwLock<HashMap<i32, TileConfig>>,
}

impl TileConfigStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            configs: RwLock::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{}{}{}", FILE_PREFIX, year, FILE_SUFFIX))
    }

    /// Write the config for `year` and keep it in memory.
    pub async fn save(&self, year: i32, config: &TileConfig) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let path = self.path_for(year);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        self.configs.write().await.insert(year, config.clone());
        info!(year, path = %path.display(), "Saved tile config");
        Ok(path)
    }

    /// Read the config for `year` from disk into memory.
    pub async fn load_year(&self, year: i32) -> StorageResult<TileConfig> {
        let path = self.path_for(year);
        let data = fs::read_to_string(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(year)
            } else {
                StorageError::io(&path, e)
            }
        })?;
        let config: TileConfig = serde_json::from_str(&data)?;

        self.configs.write().await.insert(year, config.clone());
        debug!(year, path = %path.display(), "Loaded tile config");
        Ok(config)
    }

    /// Config for `year`, from memory first, then disk.
    pub async fn get(&self, year: i32) -> Option<TileConfig> {
        if let Some(config) = self.configs.read().await.get(&year) {
            return Some(config.clone());
        }

        match self.load_year(year).await {
            Ok(config) => Some(config),
            Err(StorageError::NotFound(_)) => None,
            Err(e) => {
                warn!(year, error = %e, "Unreadable tile config");
                None
            }
        }
    }

    /// Years currently held in memory, ascending.
    pub async fn loaded_years(&self) -> Vec<i32> {
        let mut years: Vec<i32> = self.configs.read().await.keys().copied().collect();
        years.sort_unstable();
        years
    }

    /// Load every `tile_config_{year}.json` in the directory.
    ///
    /// Unreadable files are skipped with a warning. Returns the years loaded.
    pub async fn preload(&self) -> StorageResult<Vec<i32>> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut loaded = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let name = entry.file_name();
            let Some(year) = name.to_str().and_then(year_from_file_name) else {
                continue;
            };
            match self.load_year(year).await {
                Ok(_) => loaded.push(year),
                Err(e) => warn!(year, error = %e, "Skipping tile config"),
            }
        }

        loaded.sort_unstable();
        info!(count = loaded.len(), dir = %self.dir.display(), "Preloaded tile configs");
        Ok(loaded)
    }
}

fn year_from_file_name(name: &str) -> Option<i32> {
    name.strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn config(tag: &str) -> TileConfig {
        TileConfig {
            lst_tile_url: format!("https://t/{}/lst/{{z}}/{{x}}/{{y}}", tag),
            anomaly_tile_url: format!("https://t/{}/anom/{{z}}/{{x}}/{{y}}", tag),
            absolute_anomaly_tile_url: format!("https://t/{}/abs/{{z}}/{{x}}/{{y}}", tag),
        }
    }

    #[test]
    fn test_year_from_file_name() {
        assert_eq!(year_from_file_name("tile_config_2023.json"), Some(2023));
        assert_eq!(year_from_file_name("tile_config_abc.json"), None);
        assert_eq!(year_from_file_name("tile_config_2023.yaml"), None);
        assert_eq!(year_from_file_name("other.json"), None);
    }

    #[tokio::test]
    async fn test_save_then_get_from_disk() {
        let dir = TempDir::new().unwrap();
        let writer = TileConfigStore::new(dir.path());
        let path = writer.save(2023, &config("a")).await.unwrap();
        assert_eq!(path, dir.path().join("tile_config_2023.json"));

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["lst_tile_url"], "https://t/a/lst/{z}/{x}/{y}");

        // A fresh store finds it on disk.
        let reader = TileConfigStore::new(dir.path());
        assert!(reader.loaded_years().await.is_empty());
        assert_eq!(reader.get(2023).await, Some(config("a")));
        assert_eq!(reader.loaded_years().await, vec![2023]);
        assert_eq!(reader.get(2024).await, None);
    }

    #[tokio::test]
    async fn test_missing_year_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = TileConfigStore::new(dir.path());
        assert!(matches!(
            store.load_year(1999).await,
            Err(StorageError::NotFound(1999))
        ));
    }

    #[tokio::test]
    async fn test_preload_skips_bad_files() {
        let dir = TempDir::new().unwrap();
        let store = TileConfigStore::new(dir.path());
        store.save(2021, &config("a")).await.unwrap();
        store.save(2023, &config("b")).await.unwrap();
        std::fs::write(dir.path().join("tile_config_2022.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let fresh = TileConfigStore::new(dir.path());
        assert_eq!(fresh.preload().await.unwrap(), vec![2021, 2023]);
        assert_eq!(fresh.loaded_years().await, vec![2021, 2023]);
    }

    #[tokio::test]
    async fn test_preload_missing_dir() {
        let dir = TempDir::new().unwrap();
        let store = TileConfigStore::new(dir.path().join("absent"));
        assert!(store.preload().await.unwrap().is_empty());
    }

    #[test]
    fn test_from_success_requires_all_layers() {
        let mut success = PipelineSuccess {
            tile_url: "u/{z}/{x}/{y}".to_string(),
            tile_urls: BTreeMap::new(),
            stats: BTreeMap::new(),
            processing_time: 1.0,
        };
        assert!(matches!(
            TileConfig::from_success(&success),
            Err(StorageError::MissingLayer(_))
        ));

        for name in ["lst", "anomaly", "absolute_anomaly"] {
            success
                .tile_urls
                .insert(name.to_string(), format!("{}/{{z}}/{{x}}/{{y}}", name));
        }
        let config = TileConfig::from_success(&success).unwrap();
        assert_eq!(config.anomaly_tile_url, "anomaly/{z}/{x}/{y}");
    }
}
