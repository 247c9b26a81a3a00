//! Configuration for the fusion and projection pipelines.

use std::path::Path;
use std::time::Duration;

use chrono::NaiveDate;
use raster_graph::{RegionReduction, SourceSpec};
use serde::{Deserialize, Serialize};
use thermal_common::time::parse_date;
use thermal_common::{DateRange, LayerStyle};

/// Styles of every published layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyles {
    pub lst: LayerStyle,
    pub anomaly: LayerStyle,
    pub absolute_anomaly: LayerStyle,
    pub temperature: LayerStyle,
}

impl Default for LayerStyles {
    fn default() -> Self {
        Self {
            lst: LayerStyle::lst(),
            anomaly: LayerStyle::anomaly(),
            absolute_anomaly: LayerStyle::absolute_anomaly(),
            temperature: LayerStyle::temperature(),
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Preferred, high-resolution source
    pub primary: SourceSpec,
    /// Source used to fill gaps in the primary
    pub fallback: SourceSpec,
    /// Multi-model projection source
    pub projection: SourceSpec,

    /// Fixed reference period for climatologies
    pub climatology_window: DateRange,

    /// Region statistics published with every result
    pub region: RegionReduction,

    #[serde(default)]
    pub layers: LayerStyles,

    /// Timeout for each terminal backend call, in seconds
    pub backend_timeout_secs: u64,

    /// Overrides the current date when deciding the months of the
    /// in-progress year.
    #[serde(default)]
    pub today: Option<NaiveDate>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            primary: SourceSpec::modis_lst(),
            fallback: SourceSpec::era5_land(),
            projection: SourceSpec::cmip6_tas(),
            climatology_window: DateRange {
                start: NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or_default(),
                end: NaiveDate::from_ymd_opt(2025, 7, 31).unwrap_or_default(),
            },
            region: RegionReduction::global_mean(),
            layers: LayerStyles::default(),
            backend_timeout_secs: 300,
            today: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("CLIMATOLOGY_START") {
            if let Ok(date) = parse_date(&val) {
                config.climatology_window.start = date;
            }
        }

        if let Ok(val) = std::env::var("CLIMATOLOGY_END") {
            if let Ok(date) = parse_date(&val) {
                config.climatology_window.end = date;
            }
        }

        if let Ok(val) = std::env::var("BACKEND_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.backend_timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("REGION_SCALE_M") {
            if let Ok(scale) = val.parse() {
                config.region.scale = scale;
            }
        }

        if let Ok(val) = std::env::var("PIPELINE_TODAY") {
            config.today = parse_date(&val).ok();
        }

        config
    }

    /// Load configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| format!("{}: {}", path.as_ref().display(), e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("invalid pipeline config: {}", e))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.climatology_window.start > self.climatology_window.end {
            return Err(format!(
                "climatology window is inverted: {}",
                self.climatology_window
            ));
        }

        if self.backend_timeout_secs == 0 {
            return Err("backend_timeout_secs must be > 0".to_string());
        }

        if self.region.scale <= 0.0 {
            return Err("region scale must be > 0".to_string());
        }

        if self.region.max_pixels == 0 {
            return Err("region max_pixels must be > 0".to_string());
        }

        for spec in [&self.primary, &self.fallback, &self.projection] {
            if spec.scale <= 0.0 {
                return Err(format!("source {} has non-positive scale", spec.id));
            }
        }

        for style in [
            &self.layers.lst,
            &self.layers.anomaly,
            &self.layers.absolute_anomaly,
            &self.layers.temperature,
        ] {
            style
                .vis
                .validate()
                .map_err(|e| format!("layer {}: {}", style.name, e))?;
        }

        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_timeout_secs)
    }
}
