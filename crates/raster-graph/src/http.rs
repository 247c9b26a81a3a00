//! Remote render backend over HTTP/JSON.
//!
//! Graphs are posted in their wire form; date filters are rendered half-open
//! (`end` is the day after the last included day).
//!
//! | Call | Endpoint | Response |
//! |------|----------|----------|
//! | probe | `GET  /v1/health` | any 2xx |
//! | count | `POST /v1/collections:count` | `{"count": n}` |
//! | reduce_region | `POST /v1/fields:reduceRegion` | `{"stats": {band: value}}` |
//! | tile_template | `POST /v1/fields:tiles` | `{"url_format": ".../{z}/{x}/{y}"}` |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thermal_common::{TileTemplate, VisParams};
use tracing::{debug, info};

use crate::backend::{RegionReduction, RegionStats, RenderBackend};
use crate::collection::TimeSeriesCollection;
use crate::error::{BackendError, BackendResult};
use crate::field::RasterField;

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the raster service
    pub url: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Bearer token sent with every request
    #[serde(default)]
    pub api_token: Option<String>,
    /// Billing project for the session
    pub project: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            timeout_secs: 120,
            api_token: None,
            project: "urban-heat".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BACKEND_URL") {
            config.url = val;
        }

        if let Ok(val) = std::env::var("BACKEND_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.timeout_secs = secs;
            }
        }

        if let Ok(val) = std::env::var("BACKEND_API_TOKEN") {
            if !val.is_empty() {
                config.api_token = Some(val);
            }
        }

        if let Ok(val) = std::env::var("BACKEND_PROJECT") {
            config.project = val;
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("backend url must be http(s): {}", self.url));
        }

        if self.timeout_secs == 0 {
            return Err("timeout_secs must be > 0".to_string());
        }

        if self.project.trim().is_empty() {
            return Err("project must not be empty".to_string());
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Deserialize)]
struct CountResponse {
    count: usize,
}

#[derive(Deserialize)]
struct StatsResponse {
    stats: RegionStats,
}

#[derive(Deserialize)]
struct TilesResponse {
    url_format: String,
}

/// Client for a remote raster-compute service.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_token: Option<String>,
    timeout: Duration,
}

impl HttpBackend {
    /// Build the client and probe the service.
    ///
    /// Any failure here is a [`BackendError::Initialization`].
    pub async fn connect(config: &BackendConfig) -> BackendResult<Self> {
        config.validate().map_err(BackendError::Initialization)?;

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| BackendError::initialization(format!("http client: {}", e)))?;

        let backend = Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            timeout: config.timeout(),
        };

        let mut probe = backend.client.get(backend.endpoint("health"));
        if let Some(token) = &backend.api_token {
            probe = probe.bearer_auth(token);
        }
        let response = probe
            .send()
            .await
            .map_err(|e| BackendError::initialization(format!("health probe failed: {}", e)))?;
        if !response.status().is_success() {
            return Err(BackendError::initialization(format!(
                "health probe returned {}",
                response.status()
            )));
        }

        info!(url = %backend.base_url, "Connected to render backend");
        Ok(backend)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> BackendResult<T> {
        let url = self.endpoint(path);
        let mut request = self.client.post(&url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(BackendError::compute(format!(
                "{} returned {}: {}",
                path, status, error_text
            )));
        }

        let bytes = response.bytes().await.map_err(|e| self.transport_error(e))?;
        debug!(path, bytes = bytes.len(), "Backend response received");
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl RenderBackend for HttpBackend {
    async fn count(&self, collection: &TimeSeriesCollection) -> BackendResult<usize> {
        let body = serde_json::json!({ "collection": collection.expr().to_wire() });
        let response: CountResponse = self.post("collections:count", body).await?;
        Ok(response.count)
    }

    async fn reduce_region(
        &self,
        field: &RasterField,
        reduction: &RegionReduction,
    ) -> BackendResult<RegionStats> {
        let body = serde_json::json!({
            "band": field.band(),
            "field": field.expr().to_wire(),
            "reduction": reduction,
        });
        let response: StatsResponse = self.post("fields:reduceRegion", body).await?;
        Ok(response.stats)
    }

    async fn tile_template(
        &self,
        field: &RasterField,
        vis: &VisParams,
    ) -> BackendResult<TileTemplate> {
        let body = serde_json::json!({
            "band": field.band(),
            "field": field.expr().to_wire(),
            "vis": vis,
        });
        let response: TilesResponse = self.post("fields:tiles", body).await?;
        TileTemplate::new(response.url_format)
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))
    }
}
